//! Admission, port allocation and job launching for cloudtari emulator sessions.
//!
//! Each launch provisions one emulator session as a Kubernetes job on the
//! host network. The crate provides the [`Cluster`] trait and its
//! [`KubeCluster`] implementation, plus the pieces of a launch:
//!
//! - Reaping of finished sessions ([`gc`])
//! - A capacity check ([`admission`])
//! - Lowest-free-port allocation in a fixed range ([`allocator`])
//! - Job construction and manifest staging ([`job`])
//! - Polling until the session has a reachable address ([`resolver`])
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Launcher                              │
//! │  ┌──────────┐ ┌──────────┐ ┌───────────┐ ┌────────────────┐  │
//! │  │  Reap    │ │  Admit   │ │ Allocate  │ │ Submit+Resolve │  │
//! │  └──────────┘ └──────────┘ └───────────┘ └────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │              Cluster (KubeCluster / MockCluster)              │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   Kubernetes API Server                       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The launcher keeps no state between launches; everything is re-derived
//! from the pod list. Concurrent launches can pick the same port, so callers
//! must serialize them.
//!
//! # Example
//!
//! ```no_run
//! use cloudtari_scheduler::{KubeCluster, LaunchConfig, Launcher};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LaunchConfig::from_env();
//! let cluster = KubeCluster::new(&config).await?;
//! let launcher = Launcher::new(cluster, config);
//!
//! let session = launcher.launch("pitfall.bin").await?;
//! println!("play at {}", session.url());
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! For testing without a real Kubernetes cluster, enable the `test-utils`
//! feature and use `MockCluster`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod admission;
pub mod allocator;
pub mod error;
pub mod gc;
pub mod job;
pub mod k8s;
pub mod launcher;
pub mod resolver;
pub mod types;

pub use error::{Result, SchedulerError};
pub use k8s::{pod_record, Cluster, KubeCluster};
pub use launcher::{LaunchOutcome, LaunchPlan, Launcher};
pub use types::{ContainerState, LaunchConfig, PodRecord, PortRange};

#[cfg(any(test, feature = "test-utils"))]
pub use k8s::mock::MockCluster;
