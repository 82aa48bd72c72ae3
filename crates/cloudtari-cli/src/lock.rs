//! Host-wide launch lock.
//!
//! A launch reads the cluster, decides, then mutates it. Two launches on the
//! same host would both see the same free port. The web front end guards
//! this with its own lock file; callers that bypass it can ask for this one,
//! held for the whole run.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

/// An exclusive lock held until dropped.
#[derive(Debug)]
pub struct LaunchLock {
    file: File,
    path: PathBuf,
}

impl LaunchLock {
    /// Block until the lock at `path` is ours, creating the file if needed.
    pub async fn acquire(path: &Path) -> anyhow::Result<Self> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || -> anyhow::Result<Self> {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&path)
                .with_context(|| format!("cannot open lock file {}", path.display()))?;

            file.lock()
                .with_context(|| format!("cannot lock {}", path.display()))?;
            debug!(path = %path.display(), "Acquired launch lock");

            Ok(Self { file, path })
        })
        .await
        .context("lock task panicked")?
    }
}

impl Drop for LaunchLock {
    fn drop(&mut self) {
        if self.file.unlock().is_ok() {
            debug!(path = %self.path.display(), "Released launch lock");
        }
    }
}
