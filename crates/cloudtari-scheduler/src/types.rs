//! Types for the scheduler crate.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// State of a session pod's emulator container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    /// Container is waiting to start (pulling, creating).
    Waiting,
    /// Container is running.
    Running,
    /// Container has exited.
    Terminated,
}

impl ContainerState {
    /// Check if the container has exited.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

/// What the scheduler knows about one pod in the cluster snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodRecord {
    /// Kubernetes pod name.
    pub pod_name: String,
    /// Name of the job that owns this pod, from the `job-name` label.
    pub job_name: Option<String>,
    /// Container image of the first container.
    pub image: String,
    /// Container state; `None` until the kubelet reports a container status.
    pub state: Option<ContainerState>,
    /// Port the emulator was told to listen on.
    pub port: Option<u16>,
    /// Address of the node the pod runs on.
    pub host_ip: Option<String>,
}

impl PodRecord {
    /// Whether this pod runs the emulator workload.
    #[must_use]
    pub fn is_relevant(&self, workload_tag: &str) -> bool {
        self.image.contains(workload_tag)
    }

    /// Whether the emulator container has exited.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.state.is_some_and(|s| s.is_terminal())
    }

    /// The `host:port` address of this session, if the pod has been placed.
    #[must_use]
    pub fn endpoint(&self) -> Option<String> {
        match (&self.host_ip, self.port) {
            (Some(ip), Some(port)) => Some(format!("{ip}:{port}")),
            _ => None,
        }
    }
}

/// A half-open range of ports handed out to sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    /// First port handed out.
    pub start: u16,
    /// One past the last port handed out.
    pub end: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 8080,
            end: 9000,
        }
    }
}

impl PortRange {
    /// Check if a port falls inside the range.
    #[must_use]
    pub fn contains(&self, port: u16) -> bool {
        (self.start..self.end).contains(&port)
    }

    /// Number of ports in the range.
    #[must_use]
    pub fn len(&self) -> usize {
        usize::from(self.end.saturating_sub(self.start))
    }

    /// Check if the range holds no ports.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Configuration for launching emulator sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Kubernetes namespace for session jobs.
    pub namespace: String,
    /// Container image for the emulator.
    pub image: String,
    /// Substring of the container image that marks a pod as a session.
    pub workload_tag: String,
    /// Maximum number of concurrently active sessions.
    pub max_clients: usize,
    /// Ports handed out to sessions.
    pub port_range: PortRange,
    /// Path of the emulator binary inside the image.
    pub emulator_path: String,
    /// Directory inside the image that holds ROM files.
    pub rom_dir: String,
    /// Display backend the emulator serves (`http` or `vnc`).
    pub display_mode: String,
    /// Interval between snapshot reads while resolving the address.
    pub poll_interval_ms: u64,
    /// Upper bound on address resolution.
    pub resolve_timeout_secs: u64,
    /// Where the rendered job manifest is staged before submission.
    pub manifest_path: Option<PathBuf>,
    /// Lock file held for the duration of a launch. Off by default: the web
    /// front end already holds `/tmp/cloudtari_lock.txt` around each launch.
    pub lock_path: Option<PathBuf>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            image: "localhost:32000/cloudtari:local".to_string(),
            workload_tag: "cloudtari".to_string(),
            max_clients: 8,
            port_range: PortRange::default(),
            emulator_path: "/root/cloudtari".to_string(),
            rom_dir: "/root".to_string(),
            display_mode: "http".to_string(),
            poll_interval_ms: 1000,
            resolve_timeout_secs: 30,
            manifest_path: Some(PathBuf::from("/tmp/cloudtari.json")),
            lock_path: None,
        }
    }
}

impl LaunchConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `CLOUDTARI_NAMESPACE`: Kubernetes namespace for session jobs
    /// - `CLOUDTARI_IMAGE`: Container image for the emulator
    /// - `CLOUDTARI_WORKLOAD_TAG`: Image substring identifying session pods
    /// - `CLOUDTARI_MAX_CLIENTS`: Maximum concurrent sessions
    /// - `CLOUDTARI_PORT_START` / `CLOUDTARI_PORT_END`: Port range
    /// - `CLOUDTARI_EMULATOR_PATH`: Emulator binary inside the image
    /// - `CLOUDTARI_ROM_DIR`: ROM directory inside the image
    /// - `CLOUDTARI_DISPLAY_MODE`: `http` or `vnc`
    /// - `CLOUDTARI_POLL_INTERVAL_MS`: Resolver poll interval
    /// - `CLOUDTARI_RESOLVE_TIMEOUT_SECS`: Resolver timeout
    /// - `CLOUDTARI_MANIFEST_PATH`: Manifest staging path (empty disables)
    /// - `CLOUDTARI_LOCK_PATH`: Launch lock path (unset or empty disables)
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    ///
    /// Unparseable numbers leave the default in place.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup("CLOUDTARI_NAMESPACE") {
            config.namespace = val;
        }
        if let Some(val) = lookup("CLOUDTARI_IMAGE") {
            config.image = val;
        }
        if let Some(val) = lookup("CLOUDTARI_WORKLOAD_TAG") {
            config.workload_tag = val;
        }
        if let Some(n) = lookup("CLOUDTARI_MAX_CLIENTS").and_then(|v| v.parse().ok()) {
            config.max_clients = n;
        }
        if let Some(n) = lookup("CLOUDTARI_PORT_START").and_then(|v| v.parse().ok()) {
            config.port_range.start = n;
        }
        if let Some(n) = lookup("CLOUDTARI_PORT_END").and_then(|v| v.parse().ok()) {
            config.port_range.end = n;
        }
        if let Some(val) = lookup("CLOUDTARI_EMULATOR_PATH") {
            config.emulator_path = val;
        }
        if let Some(val) = lookup("CLOUDTARI_ROM_DIR") {
            config.rom_dir = val;
        }
        if let Some(val) = lookup("CLOUDTARI_DISPLAY_MODE") {
            config.display_mode = val.to_lowercase();
        }
        if let Some(n) = lookup("CLOUDTARI_POLL_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            config.poll_interval_ms = n;
        }
        if let Some(n) = lookup("CLOUDTARI_RESOLVE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.resolve_timeout_secs = n;
        }
        if let Some(val) = lookup("CLOUDTARI_MANIFEST_PATH") {
            config.manifest_path = optional_path(val);
        }
        if let Some(val) = lookup("CLOUDTARI_LOCK_PATH") {
            config.lock_path = optional_path(val);
        }

        config
    }

    /// Get the resolver poll interval as a `Duration`.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Get the resolver timeout as a `Duration`.
    #[must_use]
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the workload tag is empty (it would match every
    /// pod), a limit is zero, the port range is empty, or the display mode is
    /// not one the emulator can serve over the network.
    pub fn validate(&self) -> crate::Result<()> {
        if self.namespace.is_empty() {
            return Err(crate::SchedulerError::Config(
                "namespace must not be empty".to_string(),
            ));
        }
        if self.workload_tag.is_empty() {
            return Err(crate::SchedulerError::Config(
                "workload tag must not be empty".to_string(),
            ));
        }
        if self.max_clients == 0 {
            return Err(crate::SchedulerError::Config(
                "max_clients must be at least 1".to_string(),
            ));
        }
        if self.port_range.start == 0 || self.port_range.is_empty() {
            return Err(crate::SchedulerError::Config(format!(
                "port range {}..{} is empty",
                self.port_range.start, self.port_range.end
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(crate::SchedulerError::Config(
                "poll interval must be positive".to_string(),
            ));
        }
        if !matches!(self.display_mode.as_str(), "http" | "vnc") {
            return Err(crate::SchedulerError::Config(format!(
                "unsupported display mode {:?}",
                self.display_mode
            )));
        }
        Ok(())
    }
}

fn optional_path(val: String) -> Option<PathBuf> {
    if val.is_empty() {
        None
    } else {
        Some(PathBuf::from(val))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn record(state: Option<ContainerState>) -> PodRecord {
        PodRecord {
            pod_name: "cloudtari8080-abcde".to_string(),
            job_name: Some("cloudtari8080".to_string()),
            image: "localhost:32000/cloudtari:local".to_string(),
            state,
            port: Some(8080),
            host_ip: None,
        }
    }

    #[test]
    fn record_relevance_and_state() {
        let running = record(Some(ContainerState::Running));
        assert!(running.is_relevant("cloudtari"));
        assert!(!running.is_relevant("nginx"));
        assert!(!running.is_terminated());

        assert!(record(Some(ContainerState::Terminated)).is_terminated());
        assert!(!record(None).is_terminated());
    }

    #[test]
    fn record_endpoint_needs_host() {
        let mut rec = record(Some(ContainerState::Running));
        assert_eq!(rec.endpoint(), None);

        rec.host_ip = Some("10.0.0.5".to_string());
        assert_eq!(rec.endpoint().as_deref(), Some("10.0.0.5:8080"));
    }

    #[test]
    fn port_range_bounds() {
        let range = PortRange::default();
        assert!(range.contains(8080));
        assert!(range.contains(8999));
        assert!(!range.contains(9000));
        assert!(!range.contains(8079));
        assert_eq!(range.len(), 920);
    }

    #[test]
    fn launch_config_defaults() {
        let config = LaunchConfig::default();
        assert_eq!(config.max_clients, 8);
        assert_eq!(config.port_range, PortRange::default());
        assert_eq!(config.workload_tag, "cloudtari");
        assert_eq!(config.resolve_timeout(), Duration::from_secs(30));
        // The front end holds /tmp/cloudtari_lock.txt while it runs us.
        assert!(config.lock_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn launch_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("CLOUDTARI_NAMESPACE", "games"),
            ("CLOUDTARI_MAX_CLIENTS", "3"),
            ("CLOUDTARI_PORT_START", "9100"),
            ("CLOUDTARI_PORT_END", "not-a-port"),
            ("CLOUDTARI_DISPLAY_MODE", "VNC"),
            ("CLOUDTARI_LOCK_PATH", ""),
        ]
        .into_iter()
        .collect();

        let config = LaunchConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string()));

        assert_eq!(config.namespace, "games");
        assert_eq!(config.max_clients, 3);
        assert_eq!(config.port_range.start, 9100);
        assert_eq!(config.port_range.end, 9000);
        assert_eq!(config.display_mode, "vnc");
        assert!(config.lock_path.is_none());
        assert!(config.manifest_path.is_some());

        let locked = LaunchConfig::from_lookup(|k| {
            (k == "CLOUDTARI_LOCK_PATH").then(|| "/run/cloudtari.lock".to_string())
        });
        assert_eq!(locked.lock_path, Some(PathBuf::from("/run/cloudtari.lock")));

        // start > end after the override
        assert!(config.validate().is_err());
    }

    #[test]
    fn launch_config_validate() {
        let mut config = LaunchConfig {
            namespace: "games".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.max_clients = 0;
        assert!(config.validate().is_err());

        config.max_clients = 8;
        config.display_mode = "sdl".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_workload_tag_is_rejected() {
        let config = LaunchConfig::from_lookup(|k| {
            (k == "CLOUDTARI_WORKLOAD_TAG").then(String::new)
        });
        assert_eq!(config.workload_tag, "");
        assert!(matches!(
            config.validate(),
            Err(crate::SchedulerError::Config(msg)) if msg.contains("workload tag")
        ));
    }
}
