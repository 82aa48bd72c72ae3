//! Capacity check before a launch.

use tracing::debug;

use crate::{Result, SchedulerError};

/// Decide whether another session fits.
///
/// `relevant` is the number of session pods in the snapshot and `terminated`
/// the number just reaped from it. Returns the active client count on
/// admission.
///
/// # Errors
///
/// Returns [`SchedulerError::ServerFull`] when the active count has reached
/// `max_clients`.
pub fn admit(relevant: usize, terminated: usize, max_clients: usize) -> Result<usize> {
    let active = relevant.saturating_sub(terminated);
    debug!(relevant, terminated, active, max_clients, "Admission check");

    if active >= max_clients {
        return Err(SchedulerError::ServerFull {
            active,
            max: max_clients,
        });
    }

    Ok(active)
}
