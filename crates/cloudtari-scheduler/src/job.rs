//! Job specification builder for emulator sessions.
//!
//! Each session is a `batch/v1` Job with a single emulator container on the
//! host network. Three values vary per launch: the name suffix, the listening
//! port and the ROM.

use std::collections::BTreeMap;
use std::path::Path;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use kube::api::ObjectMeta;
use tracing::debug;

use crate::types::LaunchConfig;
use crate::{Result, SchedulerError};

/// Name of the emulator container.
const CONTAINER_NAME: &str = "cloudtari";

/// Label carrying the session port, for humans running `kubectl get`.
const PORT_LABEL: &str = "cloudtari.io/port";

/// Build the Kubernetes job for a session.
///
/// The ROM is passed through as-is; call [`validate_rom`] first.
#[must_use]
pub fn build_job(rom: &str, port: u16, config: &LaunchConfig) -> Job {
    let job_name = job_name_for_port(port);

    Job {
        metadata: build_metadata(&job_name, port, config),
        spec: Some(JobSpec {
            // Sessions are not restarted; a crashed emulator is reaped on the next launch.
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    name: Some(CONTAINER_NAME.to_string()),
                    labels: Some(session_labels(port)),
                    ..Default::default()
                }),
                spec: Some(build_pod_spec(rom, port, config)),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the job name for the session listening on `port`.
#[must_use]
pub fn job_name_for_port(port: u16) -> String {
    format!("{CONTAINER_NAME}{port}")
}

/// Check that a ROM identifier is safe to hand to the emulator.
///
/// # Errors
///
/// Returns [`SchedulerError::InvalidRom`] if the identifier is empty, holds
/// whitespace or control characters, or climbs out of the ROM directory.
pub fn validate_rom(rom: &str) -> Result<()> {
    if rom.is_empty() {
        return Err(SchedulerError::InvalidRom("empty ROM name".to_string()));
    }
    if rom.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(SchedulerError::InvalidRom(format!(
            "{rom:?} contains whitespace or control characters"
        )));
    }
    if rom.split('/').any(|part| part == "..") {
        return Err(SchedulerError::InvalidRom(format!(
            "{rom:?} escapes the ROM directory"
        )));
    }
    Ok(())
}

/// Write the rendered job to `path`, replacing whatever was there.
///
/// # Errors
///
/// Returns an error if the job cannot be serialized or the file cannot be written.
pub async fn stage_manifest(job: &Job, path: &Path) -> Result<()> {
    let rendered = serde_json::to_vec_pretty(job)?;
    tokio::fs::write(path, rendered).await?;
    debug!(path = %path.display(), "Staged job manifest");
    Ok(())
}

fn session_labels(port: u16) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), CONTAINER_NAME.to_string());
    labels.insert(PORT_LABEL.to_string(), port.to_string());
    labels
}

fn build_metadata(job_name: &str, port: u16, config: &LaunchConfig) -> ObjectMeta {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        "cloudtari.io/launched-at".to_string(),
        chrono::Utc::now().to_rfc3339(),
    );

    ObjectMeta {
        name: Some(job_name.to_string()),
        namespace: Some(config.namespace.clone()),
        labels: Some(session_labels(port)),
        annotations: Some(annotations),
        ..Default::default()
    }
}

fn build_pod_spec(rom: &str, port: u16, config: &LaunchConfig) -> PodSpec {
    PodSpec {
        containers: vec![build_container(rom, port, config)],
        host_network: Some(true),
        restart_policy: Some("Never".to_string()),
        ..Default::default()
    }
}

fn build_container(rom: &str, port: u16, config: &LaunchConfig) -> Container {
    let rom_path = format!(
        "{}/{}",
        config.rom_dir.trim_end_matches('/'),
        rom.trim_start_matches('/')
    );

    Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(config.image.clone()),
        image_pull_policy: Some("Always".to_string()),
        command: Some(vec![
            config.emulator_path.clone(),
            rom_path,
            config.display_mode.clone(),
            port.to_string(),
        ]),
        ..Default::default()
    }
}
