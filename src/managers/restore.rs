//! Restore manager - repopulates volumes from stored snapshots

use crate::managers::retention;
use crate::managers::task_runner::{TaskError, TaskRunner, BACKUP_DIR, DATA_DIR};
use crate::strategies::{DestinationStrategy, SnapshotArtifact};
use crate::utils::runtime::ContainerRuntime;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("no snapshot found for volume {volume}")]
    NoArtifact { volume: String },

    #[error("extracting snapshot into volume {volume} failed")]
    Extraction {
        volume: String,
        #[source]
        source: TaskError,
    },
}

/// Audit record of one completed restore
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOutcome {
    pub restored_from: String,
    pub volume_name: String,
    pub restore_time: DateTime<Utc>,
    #[serde(skip)]
    pub artifact: SnapshotArtifact,
}

/// Results of a multi-volume restore, one entry per distinct volume
#[derive(Debug, Default)]
pub struct RestoreReport {
    pub restored: Vec<RestoreOutcome>,
    pub failed: Vec<(String, anyhow::Error)>,
}

pub struct RestoreManager {
    runtime: Arc<dyn ContainerRuntime>,
    runner: TaskRunner,
    destination: Box<dyn DestinationStrategy>,
}

impl RestoreManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        runner: TaskRunner,
        destination: Box<dyn DestinationStrategy>,
    ) -> Self {
        Self {
            runtime,
            runner,
            destination,
        }
    }

    /// Stored snapshots, newest first, optionally only the newest per volume
    pub fn list_snapshots(&self, filter: Option<&str>, newest_only: bool) -> Result<Vec<SnapshotArtifact>> {
        let artifacts = self.destination.list_artifacts(filter).context(format!(
            "Failed to list snapshots in destination '{}'",
            self.destination.name()
        ))?;

        Ok(if newest_only {
            retention::newest_per_volume(artifacts)
        } else {
            artifacts
        })
    }

    /// Restore one volume from `reference`, or from its newest snapshot
    pub fn restore(&self, volume_name: &str, reference: Option<&str>) -> Result<RestoreOutcome> {
        let artifact = match reference {
            Some(reference) => self.destination.resolve_reference(reference)?,
            None => {
                let candidates = self.destination.artifacts_for_volume(volume_name)?;
                retention::newest(&candidates)
                    .cloned()
                    .ok_or_else(|| RestoreError::NoArtifact {
                        volume: volume_name.to_string(),
                    })?
            }
        };

        info!(
            "Restoring volume {} from {} (destination '{}')",
            volume_name,
            artifact.reference,
            self.destination.name()
        );

        self.runner
            .prepare()
            .context(format!("Failed to prepare helper image {}", self.runner.image()))?;
        self.ensure_volume(volume_name)?;

        // a downloaded copy is removed when `fetched` goes out of scope
        let fetched = self.destination.fetch(&artifact)?;
        let command = extract_command(&fetched.file_name, true);
        self.runner
            .run_in_mounted_context(volume_name, Some(&fetched.host_dir), &command)
            .map_err(|source| RestoreError::Extraction {
                volume: volume_name.to_string(),
                source,
            })?;

        let outcome = RestoreOutcome {
            restored_from: artifact.reference.clone(),
            volume_name: volume_name.to_string(),
            restore_time: Utc::now(),
            artifact,
        };
        info!(
            "Restored volume {} from {} at {}",
            outcome.volume_name,
            outcome.restored_from,
            outcome.restore_time.to_rfc3339()
        );
        Ok(outcome)
    }

    /// Restore several volumes, each at most once.
    ///
    /// An empty list restores every volume with a snapshot in the destination.
    /// An explicit reference only makes sense for exactly one volume.
    pub fn restore_many(&self, volumes: &[String], reference: Option<&str>) -> Result<RestoreReport> {
        if reference.is_some() && volumes.len() != 1 {
            anyhow::bail!("An explicit snapshot can only be restored into exactly one volume");
        }

        let names: Vec<String> = if volumes.is_empty() {
            self.list_snapshots(None, true)?
                .into_iter()
                .map(|a| a.volume_name)
                .collect()
        } else {
            let mut names: Vec<String> = Vec::new();
            for v in volumes.iter().map(|v| v.trim()).filter(|v| !v.is_empty()) {
                if !names.iter().any(|n| n == v) {
                    names.push(v.to_string());
                }
            }
            names
        };

        if names.is_empty() {
            anyhow::bail!(
                "Nothing to restore: no snapshots in destination '{}'",
                self.destination.name()
            );
        }

        let mut report = RestoreReport::default();
        for name in names {
            match self.restore(&name, reference) {
                Ok(outcome) => report.restored.push(outcome),
                Err(e) => {
                    error!("Restore of volume {} failed: {:#}", name, e);
                    report.failed.push((name, e));
                }
            }
        }
        Ok(report)
    }

    /// Create a volume (if needed) and unpack a host archive into it, without clearing
    pub fn create_volume_from_archive(&self, volume_name: &str, archive: &Path) -> Result<()> {
        create_volume_from_archive(self.runtime.as_ref(), &self.runner, volume_name, archive)
    }

    fn ensure_volume(&self, volume_name: &str) -> Result<()> {
        ensure_volume(self.runtime.as_ref(), volume_name)
    }
}

fn ensure_volume(runtime: &dyn ContainerRuntime, volume_name: &str) -> Result<()> {
    if !runtime.volume_exists(volume_name)? {
        info!("Creating volume: {}", volume_name);
        runtime.create_volume(volume_name)?;
    }
    Ok(())
}

/// Unpack an archive on the docker host into a (possibly new) volume
pub fn create_volume_from_archive(
    runtime: &dyn ContainerRuntime,
    runner: &TaskRunner,
    volume_name: &str,
    archive: &Path,
) -> Result<()> {
    let host_dir = archive
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .context(format!("Archive path {:?} has no parent directory", archive))?;
    let file_name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .context(format!("Archive path {:?} has no file name", archive))?;

    runner
        .prepare()
        .context(format!("Failed to prepare helper image {}", runner.image()))?;
    ensure_volume(runtime, volume_name)?;

    runner
        .run_in_mounted_context(volume_name, Some(host_dir), &extract_command(file_name, false))
        .map_err(|source| RestoreError::Extraction {
            volume: volume_name.to_string(),
            source,
        })?;

    info!("Volume {} populated from {:?}", volume_name, archive);
    Ok(())
}

/// Shell command extracting `/backups/<file_name>` into the data dir,
/// dropping the archive's top-level directory.
pub fn extract_command(file_name: &str, clear_first: bool) -> Vec<String> {
    let extract = format!(
        "tar -xzf {} -C {} --strip-components 1",
        shell_quote(&format!("{}/{}", BACKUP_DIR, file_name)),
        DATA_DIR
    );
    let script = if clear_first {
        format!("find {} -mindepth 1 -delete && {}", DATA_DIR, extract)
    } else {
        extract
    };
    vec!["sh".to_string(), "-c".to_string(), script]
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
