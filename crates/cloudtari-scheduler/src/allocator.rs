//! Port allocation.
//!
//! Ports are read back from the snapshot rather than tracked, so the lowest
//! free port is always the one handed out. Two launchers reading the same
//! snapshot pick the same port; callers serialize launches.

use std::collections::BTreeSet;

use crate::types::{PodRecord, PortRange};
use crate::{Result, SchedulerError};

/// Ports held by session pods in the snapshot, whatever their state.
///
/// Terminated pods are included: they were reaped from the same snapshot and
/// may still be shutting down.
#[must_use]
pub fn occupied_ports(records: &[PodRecord], workload_tag: &str) -> BTreeSet<u16> {
    records
        .iter()
        .filter(|r| r.is_relevant(workload_tag))
        .filter_map(|r| r.port)
        .collect()
}

/// Pick the lowest port in `range` that is not occupied.
///
/// # Errors
///
/// Returns [`SchedulerError::NoFreePort`] if every port in the range is taken.
pub fn next_free_port(occupied: &BTreeSet<u16>, range: PortRange) -> Result<u16> {
    (range.start..range.end)
        .find(|port| !occupied.contains(port))
        .ok_or(SchedulerError::NoFreePort {
            start: range.start,
            end: range.end,
        })
}
