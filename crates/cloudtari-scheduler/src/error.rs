//! Error types for the scheduler crate.

use thiserror::Error;

/// Errors that can occur while launching an emulator session.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeApi(#[from] kube::Error),

    /// Every client slot is taken.
    #[error("server full: {active} active clients, limit is {max}")]
    ServerFull {
        /// Active clients observed in the snapshot.
        active: usize,
        /// Configured client limit.
        max: usize,
    },

    /// Every port in the configured range is held by a session pod.
    #[error("no free port in range {start}..{end}")]
    NoFreePort {
        /// First port of the range.
        start: u16,
        /// End of the range (exclusive).
        end: u16,
    },

    /// The launched session never reported a host address.
    #[error("Timeout waiting for session on port {port} after {waited_secs}s")]
    ResolveTimeout {
        /// Port the session was launched on.
        port: u16,
        /// How long the resolver polled.
        waited_secs: u64,
    },

    /// The ROM identifier is unusable.
    #[error("Invalid ROM: {0}")]
    InvalidRom(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Writing the staged job manifest failed.
    #[error("Failed to stage job manifest: {0}")]
    Manifest(#[from] std::io::Error),

    /// Serializing the job manifest failed.
    #[error("Failed to render job manifest: {0}")]
    Render(#[from] serde_json::Error),
}

impl SchedulerError {
    /// Get the process exit code for this error.
    ///
    /// A full server keeps exit code 1, which the web front end treats as
    /// "try again later".
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::ServerFull { .. } => 1,
            Self::InvalidRom(_) | Self::Config(_) => 2,
            Self::NoFreePort { .. } => 3,
            Self::ResolveTimeout { .. } => 4,
            Self::KubeApi(_) | Self::Manifest(_) | Self::Render(_) => 5,
        }
    }
}

/// A specialized Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;
