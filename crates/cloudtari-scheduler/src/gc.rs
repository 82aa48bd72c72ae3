//! Reaping of finished sessions.

use tracing::{info, warn};

use crate::k8s::Cluster;
use crate::types::PodRecord;

/// Delete every finished session in the snapshot and return how many there were.
///
/// Only records whose image carries `workload_tag` and whose container has
/// terminated are touched. A failed deletion is logged and still counted:
/// the pod has exited either way, so it no longer holds a client slot.
pub async fn reap_terminated<C>(cluster: &C, records: &[PodRecord], workload_tag: &str) -> usize
where
    C: Cluster + ?Sized,
{
    let mut terminated = 0;

    for record in records
        .iter()
        .filter(|r| r.is_relevant(workload_tag) && r.is_terminated())
    {
        if let Err(e) = cluster.delete_pod(&record.pod_name).await {
            warn!(pod_name = %record.pod_name, error = %e, "Failed to delete finished pod");
        }

        if let Some(job_name) = &record.job_name {
            if let Err(e) = cluster.delete_job(job_name).await {
                warn!(job_name = %job_name, error = %e, "Failed to delete finished job");
            }
        }

        info!(
            pod_name = %record.pod_name,
            port = ?record.port,
            "Reaped finished session"
        );
        terminated += 1;
    }

    terminated
}
