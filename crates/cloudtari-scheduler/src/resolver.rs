//! Address resolution for a freshly launched session.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::k8s::Cluster;
use crate::types::PodRecord;
use crate::{Result, SchedulerError};

/// Find the `host:port` address of the session listening on `port`.
#[must_use]
pub fn find_endpoint(records: &[PodRecord], port: u16, workload_tag: &str) -> Option<String> {
    let record = records
        .iter()
        .filter(|r| r.is_relevant(workload_tag) && r.port == Some(port))
        .find(|r| r.host_ip.is_some())?;

    if record.is_terminated() {
        warn!(pod_name = %record.pod_name, port, "Session exited before it was resolved");
    }
    record.endpoint()
}

/// Poll the cluster until the session on `port` has been placed on a host.
///
/// The snapshot is read immediately and then every `poll_interval` until
/// `timeout` has elapsed.
///
/// # Errors
///
/// Returns [`SchedulerError::ResolveTimeout`] if no placed pod holds the
/// port in time, or the cluster error if a snapshot read fails.
pub async fn resolve_address<C>(
    cluster: &C,
    port: u16,
    workload_tag: &str,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<String>
where
    C: Cluster + ?Sized,
{
    let started = Instant::now();
    let deadline = started + timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let records = cluster.list_pods().await?;

        if let Some(endpoint) = find_endpoint(&records, port, workload_tag) {
            info!(
                port,
                endpoint = %endpoint,
                attempts,
                elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "Resolved session address"
            );
            return Ok(endpoint);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(SchedulerError::ResolveTimeout {
                port,
                waited_secs: timeout.as_secs(),
            });
        }

        debug!(port, attempts, "Session not placed yet");
        sleep(poll_interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::build_job;
    use crate::k8s::mock::MockCluster;
    use crate::types::{ContainerState, LaunchConfig};

    const SECOND: Duration = Duration::from_secs(1);

    fn placed(port: u16, host: &str) -> PodRecord {
        PodRecord {
            pod_name: format!("cloudtari{port}-x"),
            job_name: Some(format!("cloudtari{port}")),
            image: "localhost:32000/cloudtari:local".to_string(),
            state: Some(ContainerState::Running),
            port: Some(port),
            host_ip: Some(host.to_string()),
        }
    }

    #[test]
    fn find_endpoint_matches_port() {
        let records = vec![placed(8080, "10.0.0.1"), placed(8090, "10.0.0.5")];
        assert_eq!(
            find_endpoint(&records, 8090, "cloudtari").as_deref(),
            Some("10.0.0.5:8090")
        );
        assert_eq!(find_endpoint(&records, 8091, "cloudtari"), None);
        assert_eq!(find_endpoint(&records, 8090, "other-game"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_once_placed() {
        let cluster = MockCluster::new();
        cluster.place_on_submit("10.0.0.5", 2);
        let job = build_job("pitfall.bin", 8090, &LaunchConfig::default());
        cluster.submit_job(&job).await.unwrap();

        let address = resolve_address(&cluster, 8090, "cloudtari", SECOND, 30 * SECOND)
            .await
            .unwrap();

        assert_eq!(address, "10.0.0.5:8090");
        assert_eq!(cluster.list_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_never_placed() {
        let cluster = MockCluster::new();
        let job = build_job("pitfall.bin", 8090, &LaunchConfig::default());
        cluster.submit_job(&job).await.unwrap();

        let started = Instant::now();
        let err = resolve_address(&cluster, 8090, "cloudtari", SECOND, 3 * SECOND)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SchedulerError::ResolveTimeout {
                port: 8090,
                waited_secs: 3
            }
        ));
        assert_eq!(cluster.list_calls(), 4);
        assert_eq!(started.elapsed(), 3 * SECOND);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_port_missing() {
        let cluster = MockCluster::with_records(vec![placed(8080, "10.0.0.1")]);

        let err = resolve_address(&cluster, 8090, "cloudtari", SECOND, 2 * SECOND)
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), 4);
    }
}
