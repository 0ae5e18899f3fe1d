//! Archives kept in a directory on the docker host

use super::{
    archive_command, parse_volume_name, todays_archive_name, DestinationStrategy, FetchedArchive,
    SnapshotArtifact,
};
use crate::config::{DestinationKind, FilesystemOptions, RetentionPolicy};
use crate::managers::retention::{self, PruneReport};
use crate::managers::task_runner::{TaskRunner, BACKUP_DIR};
use crate::utils::runtime::Mount;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct FilesystemDestination {
    name: String,
    host_path: PathBuf,
    local_path: PathBuf,
    retention: RetentionPolicy,
}

impl FilesystemDestination {
    pub fn new(options: &FilesystemOptions) -> Self {
        Self {
            name: options.name.clone(),
            host_path: options.host_path.clone(),
            local_path: options
                .local_path
                .clone()
                .unwrap_or_else(|| options.host_path.clone()),
            retention: options.retention,
        }
    }

    fn artifact_at(&self, path: &Path) -> Result<Option<SnapshotArtifact>> {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };
        let Some(volume_name) = parse_volume_name(file_name) else {
            return Ok(None);
        };

        let metadata = fs::metadata(path).context(format!("Failed to stat {:?}", path))?;
        if !metadata.is_file() {
            return Ok(None);
        }
        let created_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(Some(SnapshotArtifact {
            volume_name,
            reference: path.display().to_string(),
            file_name: file_name.to_string(),
            created_at,
            size: Some(metadata.len()),
        }))
    }
}

impl DestinationStrategy for FilesystemDestination {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DestinationKind {
        DestinationKind::Filesystem
    }

    fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    fn store(&self, volume: &Mount, runner: &TaskRunner) -> Result<SnapshotArtifact> {
        let file_name = todays_archive_name(&volume.name);
        let command = archive_command(&format!("{}/{}", BACKUP_DIR, file_name));

        runner
            .run_in_mounted_context(&volume.name, Some(&self.host_path), &command)
            .context(format!(
                "Archiving volume {} to {} destination '{}' failed",
                volume.name,
                self.kind(),
                self.name
            ))?;

        let path = self.local_path.join(&file_name);
        let artifact = match self.artifact_at(&path) {
            Ok(Some(artifact)) => artifact,
            other => {
                // host path not visible from here; prune will find nothing either
                if let Err(e) = other {
                    warn!("Archive {:?} not readable locally: {:#}", path, e);
                }
                SnapshotArtifact {
                    volume_name: volume.name.clone(),
                    reference: path.display().to_string(),
                    file_name,
                    created_at: Utc::now(),
                    size: None,
                }
            }
        };

        info!("Stored {} in destination '{}'", artifact.file_name, self.name);
        Ok(artifact)
    }

    fn prune(
        &self,
        volume_name: &str,
        policy: RetentionPolicy,
        current: &SnapshotArtifact,
    ) -> Result<PruneReport> {
        let artifacts = self.artifacts_for_volume(volume_name)?;
        retention::prune(&artifacts, policy, current, Utc::now(), |artifact| {
            fs::remove_file(&artifact.reference)
                .context(format!("Failed to delete {}", artifact.reference))
        })
    }

    fn list_artifacts(&self, filter: Option<&str>) -> Result<Vec<SnapshotArtifact>> {
        let entries = fs::read_dir(&self.local_path).context(format!(
            "Failed to read destination directory {:?}",
            self.local_path
        ))?;

        let mut artifacts = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry in {:?}: {}", self.local_path, e);
                    continue;
                }
            };
            // dangling links and files removed since read_dir are skipped, not fatal
            let artifact = match self.artifact_at(&entry.path()) {
                Ok(Some(artifact)) => artifact,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping {:?}: {:#}", entry.path(), e);
                    continue;
                }
            };
            if filter.map_or(true, |f| artifact.volume_name.contains(f)) {
                artifacts.push(artifact);
            }
        }

        retention::sort_newest_first(&mut artifacts);
        Ok(artifacts)
    }

    fn resolve_reference(&self, reference: &str) -> Result<SnapshotArtifact> {
        let file_name = Path::new(reference)
            .file_name()
            .context(format!("Not an archive reference: {}", reference))?;
        let path = self.local_path.join(file_name);

        if !path.exists() {
            anyhow::bail!("Archive {:?} not found in destination '{}'", path, self.name);
        }

        self.artifact_at(&path)?
            .context(format!("{:?} is not a recognised archive name", file_name))
    }

    fn fetch(&self, artifact: &SnapshotArtifact) -> Result<FetchedArchive> {
        Ok(FetchedArchive::in_place(
            self.host_path.clone(),
            artifact.file_name.clone(),
        ))
    }
}
