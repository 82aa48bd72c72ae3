//! Cluster access.
//!
//! The launch flow only needs four calls against the control plane, so they
//! sit behind the narrow [`Cluster`] trait. [`KubeCluster`] talks to a real
//! API server; the mock keeps everything in memory.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use tracing::{debug, info, warn};

use crate::types::{ContainerState, LaunchConfig, PodRecord};
use crate::Result;

/// Labels Kubernetes puts on pods created by a job controller.
const JOB_NAME_LABELS: [&str; 2] = ["job-name", "batch.kubernetes.io/job-name"];

/// Index of the port in the emulator command line.
const PORT_ARG_INDEX: usize = 3;

/// The `Cluster` trait is everything the launcher needs from the control plane.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Read the current pod snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the pod list cannot be fetched.
    async fn list_pods(&self) -> Result<Vec<PodRecord>>;

    /// Delete a pod. Deleting a pod that no longer exists succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if deletion fails (except 404).
    async fn delete_pod(&self, name: &str) -> Result<()>;

    /// Delete a job. Deleting a job that no longer exists succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if deletion fails (except 404).
    async fn delete_job(&self, name: &str) -> Result<()>;

    /// Submit a job for scheduling.
    ///
    /// # Errors
    ///
    /// Returns an error if the API server rejects the job.
    async fn submit_job(&self, job: &Job) -> Result<()>;
}

/// Cluster access through the Kubernetes API.
pub struct KubeCluster {
    client: Client,
    namespace: String,
}

impl KubeCluster {
    /// Connect using in-cluster config or the local kubeconfig.
    ///
    /// # Errors
    ///
    /// Returns an error if the Kubernetes client cannot be created.
    pub async fn new(config: &LaunchConfig) -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::with_client(client, &config.namespace))
    }

    /// Create a cluster handle with a pre-configured client.
    #[must_use]
    pub fn with_client(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn pods_api(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn jobs_api(&self) -> Api<Job> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn list_pods(&self) -> Result<Vec<PodRecord>> {
        let pod_list = self.pods_api().list(&ListParams::default()).await?;
        debug!(
            namespace = %self.namespace,
            count = pod_list.items.len(),
            "Listed pods"
        );
        Ok(pod_list.items.iter().map(pod_record).collect())
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        match self.pods_api().delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(pod_name = name, "Deleted pod");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                warn!(pod_name = name, "Pod not found, already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_job(&self, name: &str) -> Result<()> {
        match self.jobs_api().delete(name, &DeleteParams::background()).await {
            Ok(_) => {
                info!(job_name = name, "Deleted job");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                warn!(job_name = name, "Job not found, already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn submit_job(&self, job: &Job) -> Result<()> {
        self.jobs_api().create(&PostParams::default(), job).await?;
        info!(
            job_name = job.metadata.name.as_deref().unwrap_or("unknown"),
            namespace = %self.namespace,
            "Submitted job"
        );
        Ok(())
    }
}

/// Reduce a Kubernetes pod to the fields the launcher reasons about.
#[must_use]
pub fn pod_record(pod: &Pod) -> PodRecord {
    let pod_name = pod
        .metadata
        .name
        .clone()
        .unwrap_or_else(|| "unknown".to_string());

    let job_name = pod.metadata.labels.as_ref().and_then(|labels| {
        JOB_NAME_LABELS
            .iter()
            .find_map(|key| labels.get(*key).cloned())
    });

    let container = pod.spec.as_ref().and_then(|s| s.containers.first());
    let status = pod.status.as_ref();
    let container_status = status
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|cs| cs.first());

    let image = container_status
        .map(|cs| cs.image.clone())
        .or_else(|| container.and_then(|c| c.image.clone()))
        .unwrap_or_default();

    let state = container_status
        .and_then(|cs| cs.state.as_ref())
        .and_then(|state| {
            if state.terminated.is_some() {
                Some(ContainerState::Terminated)
            } else if state.running.is_some() {
                Some(ContainerState::Running)
            } else if state.waiting.is_some() {
                Some(ContainerState::Waiting)
            } else {
                None
            }
        });

    let port_arg = container
        .and_then(|c| c.command.as_ref())
        .and_then(|cmd| cmd.get(PORT_ARG_INDEX));
    let port = port_arg.and_then(|arg| arg.parse::<u16>().ok());
    if port.is_none() && container.is_some() {
        debug!(pod_name = %pod_name, port_arg = ?port_arg, "Pod has no port argument");
    }

    let host_ip = status.and_then(|s| s.host_ip.clone());

    PodRecord {
        pod_name,
        job_name,
        image,
        state,
        port,
        host_ip,
    }
}

/// A mock cluster for testing without a real Kubernetes cluster.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use crate::SchedulerError;
    use parking_lot::Mutex;

    /// Where and when submitted jobs get placed.
    #[derive(Debug, Clone)]
    struct Placement {
        host_ip: String,
        after_lists: usize,
    }

    #[derive(Debug)]
    struct PendingPlacement {
        port: Option<u16>,
        host_ip: String,
        remaining: usize,
    }

    /// A mock cluster that stores pod records in memory.
    #[derive(Default)]
    pub struct MockCluster {
        records: Mutex<Vec<PodRecord>>,
        deleted_pods: Mutex<Vec<String>>,
        deleted_jobs: Mutex<Vec<String>>,
        submitted: Mutex<Vec<Job>>,
        placement: Mutex<Option<Placement>>,
        pending: Mutex<Vec<PendingPlacement>>,
        list_calls: Mutex<usize>,
        fail_deletes: Mutex<bool>,
    }

    impl MockCluster {
        /// Create a new, empty mock cluster.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Create a mock cluster seeded with records.
        #[must_use]
        pub fn with_records(records: Vec<PodRecord>) -> Self {
            let cluster = Self::new();
            *cluster.records.lock() = records;
            cluster
        }

        /// Place every submitted job on `host_ip` once the pod list has been
        /// read `after_lists` more times.
        pub fn place_on_submit(&self, host_ip: impl Into<String>, after_lists: usize) {
            *self.placement.lock() = Some(Placement {
                host_ip: host_ip.into(),
                after_lists,
            });
        }

        /// Make every delete call fail.
        pub fn fail_deletes(&self, fail: bool) {
            *self.fail_deletes.lock() = fail;
        }

        /// Current records.
        #[must_use]
        pub fn records(&self) -> Vec<PodRecord> {
            self.records.lock().clone()
        }

        /// Names passed to `delete_pod`.
        #[must_use]
        pub fn deleted_pods(&self) -> Vec<String> {
            self.deleted_pods.lock().clone()
        }

        /// Names passed to `delete_job`.
        #[must_use]
        pub fn deleted_jobs(&self) -> Vec<String> {
            self.deleted_jobs.lock().clone()
        }

        /// Jobs passed to `submit_job`.
        #[must_use]
        pub fn submitted(&self) -> Vec<Job> {
            self.submitted.lock().clone()
        }

        /// Number of `list_pods` calls so far.
        #[must_use]
        pub fn list_calls(&self) -> usize {
            *self.list_calls.lock()
        }
    }

    #[async_trait]
    impl Cluster for MockCluster {
        async fn list_pods(&self) -> Result<Vec<PodRecord>> {
            *self.list_calls.lock() += 1;

            let mut records = self.records.lock();
            let mut pending = self.pending.lock();
            pending.retain_mut(|p| {
                if p.remaining > 0 {
                    p.remaining -= 1;
                    return true;
                }
                for rec in records.iter_mut().filter(|r| r.port == p.port) {
                    rec.host_ip = Some(p.host_ip.clone());
                    rec.state = Some(ContainerState::Running);
                }
                false
            });

            Ok(records.clone())
        }

        async fn delete_pod(&self, name: &str) -> Result<()> {
            self.deleted_pods.lock().push(name.to_string());
            if *self.fail_deletes.lock() {
                return Err(SchedulerError::Config(format!("cannot delete pod {name}")));
            }
            self.records.lock().retain(|r| r.pod_name != name);
            Ok(())
        }

        async fn delete_job(&self, name: &str) -> Result<()> {
            self.deleted_jobs.lock().push(name.to_string());
            if *self.fail_deletes.lock() {
                return Err(SchedulerError::Config(format!("cannot delete job {name}")));
            }
            Ok(())
        }

        async fn submit_job(&self, job: &Job) -> Result<()> {
            let job_name = job.metadata.name.clone().unwrap_or_default();
            let container = job
                .spec
                .as_ref()
                .and_then(|s| s.template.spec.as_ref())
                .and_then(|s| s.containers.first());

            let port = container
                .and_then(|c| c.command.as_ref())
                .and_then(|cmd| cmd.get(PORT_ARG_INDEX))
                .and_then(|p| p.parse().ok());

            self.records.lock().push(PodRecord {
                pod_name: format!("{job_name}-mock"),
                job_name: Some(job_name),
                image: container.and_then(|c| c.image.clone()).unwrap_or_default(),
                state: None,
                port,
                host_ip: None,
            });

            if let Some(placement) = self.placement.lock().clone() {
                self.pending.lock().push(PendingPlacement {
                    port,
                    host_ip: placement.host_ip,
                    remaining: placement.after_lists,
                });
            }

            self.submitted.lock().push(job.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockCluster;
    use super::*;
    use crate::job::build_job;
    use serde_json::json;

    fn session_pod(name: &str, port: &str, state: serde_json::Value) -> Pod {
        serde_json::from_value(json!({
            "metadata": { "name": name, "labels": { "job-name": "cloudtari8080" } },
            "spec": { "containers": [{
                "name": "cloudtari",
                "image": "localhost:32000/cloudtari:local",
                "command": ["/root/cloudtari", "/root/pitfall.bin", "http", port]
            }]},
            "status": {
                "hostIP": "10.0.0.5",
                "containerStatuses": [{
                    "name": "cloudtari",
                    "image": "localhost:32000/cloudtari:local",
                    "imageID": "",
                    "ready": true,
                    "restartCount": 0,
                    "state": state
                }]
            }
        }))
        .unwrap()
    }

    #[test]
    fn pod_record_extracts_fields() {
        let pod = session_pod(
            "cloudtari8080-x7k2p",
            "8080",
            json!({ "running": { "startedAt": "2024-01-01T00:00:00Z" } }),
        );
        let rec = pod_record(&pod);

        assert_eq!(rec.pod_name, "cloudtari8080-x7k2p");
        assert_eq!(rec.job_name.as_deref(), Some("cloudtari8080"));
        assert_eq!(rec.state, Some(ContainerState::Running));
        assert_eq!(rec.port, Some(8080));
        assert_eq!(rec.host_ip.as_deref(), Some("10.0.0.5"));
        assert!(rec.is_relevant("cloudtari"));
    }

    #[test]
    fn pod_record_terminated_state() {
        let pod = session_pod(
            "cloudtari8081-abcde",
            "8081",
            json!({ "terminated": { "exitCode": 0 } }),
        );
        assert!(pod_record(&pod).is_terminated());
    }

    #[test]
    fn pod_record_bad_port_argument() {
        let pod = session_pod("p", "http", json!({ "waiting": {} }));
        let rec = pod_record(&pod);
        assert_eq!(rec.port, None);
        assert_eq!(rec.state, Some(ContainerState::Waiting));
    }

    #[test]
    fn pod_record_without_status_uses_spec_image() {
        let pod: Pod = serde_json::from_value(json!({
            "metadata": { "name": "cloudtari8085-new" },
            "spec": { "containers": [{
                "name": "cloudtari",
                "image": "localhost:32000/cloudtari:local",
                "command": ["/root/cloudtari", "/root/rom.bin", "http", "8085"]
            }]}
        }))
        .unwrap();
        let rec = pod_record(&pod);

        assert_eq!(rec.state, None);
        assert_eq!(rec.port, Some(8085));
        assert!(rec.job_name.is_none());
        assert!(rec.is_relevant("cloudtari"));
    }

    #[tokio::test]
    async fn mock_cluster_places_submitted_job() {
        let cluster = MockCluster::new();
        cluster.place_on_submit("10.0.0.7", 1);

        let config = LaunchConfig::default();
        let job = build_job("pitfall.bin", 8084, &config);
        cluster.submit_job(&job).await.unwrap();

        let first = cluster.list_pods().await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(first[0].host_ip.is_none());

        let second = cluster.list_pods().await.unwrap();
        assert_eq!(second[0].endpoint().as_deref(), Some("10.0.0.7:8084"));
        assert_eq!(cluster.list_calls(), 2);
    }

    #[tokio::test]
    async fn mock_cluster_delete_pod() {
        let cluster = MockCluster::new();
        let job = build_job("pitfall.bin", 8080, &LaunchConfig::default());
        cluster.submit_job(&job).await.unwrap();

        cluster.delete_pod("cloudtari8080-mock").await.unwrap();
        assert!(cluster.records().is_empty());
        assert_eq!(cluster.deleted_pods(), vec!["cloudtari8080-mock"]);
    }
}
