//! The launch flow.
//!
//! One launch reads the cluster once, reaps finished sessions, checks
//! capacity, picks a port, submits the job and waits for an address:
//!
//! ```text
//! read → reap → admit ─┬─ reject
//!                      └─ allocate → stage → submit → resolve → report
//! ```
//!
//! Nothing is retried and nothing is remembered between launches. The
//! check-then-act window between reading the snapshot and submitting the job
//! is not guarded here; callers serialize launches.

use serde::Serialize;
use tracing::{info, warn};

use crate::admission::admit;
use crate::allocator::{next_free_port, occupied_ports};
use crate::gc::reap_terminated;
use crate::job::{build_job, stage_manifest, validate_rom};
use crate::k8s::Cluster;
use crate::resolver::resolve_address;
use crate::types::LaunchConfig;
use crate::Result;

/// Outcome of the admission half of a launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchPlan {
    /// ROM the session will run.
    pub rom: String,
    /// Sessions still active after reaping.
    pub active_clients: usize,
    /// Finished sessions reaped during this launch.
    pub reaped: usize,
    /// Port assigned to the new session.
    pub port: u16,
}

/// A running session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchOutcome {
    /// The admission decision this session was launched under.
    pub plan: LaunchPlan,
    /// Name of the submitted job.
    pub job_name: String,
    /// `host:port` the emulator listens on.
    pub address: String,
}

impl LaunchOutcome {
    /// URL a browser can open to play the session.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}/", self.address)
    }
}

/// Launches emulator sessions against a [`Cluster`].
pub struct Launcher<C> {
    cluster: C,
    config: LaunchConfig,
}

impl<C: Cluster> Launcher<C> {
    /// Create a launcher.
    #[must_use]
    pub fn new(cluster: C, config: LaunchConfig) -> Self {
        Self { cluster, config }
    }

    /// Get a reference to the launch config.
    #[must_use]
    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    /// Get a reference to the cluster.
    #[must_use]
    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    /// Run the whole flow for one ROM.
    ///
    /// # Errors
    ///
    /// See [`Launcher::plan`] and [`Launcher::start`].
    pub async fn launch(&self, rom: &str) -> Result<LaunchOutcome> {
        let plan = self.plan(rom).await?;
        self.start(plan).await
    }

    /// Read the cluster, reap finished sessions, check capacity and pick a port.
    ///
    /// Reaping is the only mutation; a rejected launch submits nothing.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRom` for a bad ROM name, `ServerFull` when every client
    /// slot is taken, `NoFreePort` when the port range is exhausted, or the
    /// cluster error if the snapshot cannot be read.
    pub async fn plan(&self, rom: &str) -> Result<LaunchPlan> {
        validate_rom(rom)?;
        let tag = self.config.workload_tag.as_str();

        let snapshot = self.cluster.list_pods().await?;
        let relevant = snapshot.iter().filter(|r| r.is_relevant(tag)).count();

        for record in snapshot.iter().filter(|r| r.is_relevant(tag) && r.port.is_none()) {
            warn!(
                pod_name = %record.pod_name,
                "Session pod has no usable port argument; it reserves no port"
            );
        }

        let reaped = reap_terminated(&self.cluster, &snapshot, tag).await;
        let active_clients = admit(relevant, reaped, self.config.max_clients)?;

        let occupied = occupied_ports(&snapshot, tag);
        let port = next_free_port(&occupied, self.config.port_range)?;

        info!(
            rom,
            relevant,
            reaped,
            active_clients,
            port,
            "Admitted session"
        );

        Ok(LaunchPlan {
            rom: rom.to_string(),
            active_clients,
            reaped,
            port,
        })
    }

    /// Submit the session job for an admitted plan and wait for its address.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be staged, the job is
    /// rejected, or the session is not placed before the resolve timeout.
    pub async fn start(&self, plan: LaunchPlan) -> Result<LaunchOutcome> {
        let job = build_job(&plan.rom, plan.port, &self.config);
        let job_name = job.metadata.name.clone().unwrap_or_default();

        if let Some(path) = &self.config.manifest_path {
            stage_manifest(&job, path).await?;
        }
        self.cluster.submit_job(&job).await?;

        let address = resolve_address(
            &self.cluster,
            plan.port,
            &self.config.workload_tag,
            self.config.poll_interval(),
            self.config.resolve_timeout(),
        )
        .await?;

        info!(job_name = %job_name, address = %address, "Session started");

        Ok(LaunchOutcome {
            plan,
            job_name,
            address,
        })
    }
}
