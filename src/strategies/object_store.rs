//! Archives shipped to an object store
//!
//! The helper writes the archive into a staging directory (`.s3tmp/` under the
//! destination's host path), the engine uploads it under its file name and
//! removes the local copy once the upload has succeeded.

use super::{
    archive_command, parse_volume_name, todays_archive_name, DestinationStrategy, FetchedArchive,
    SnapshotArtifact,
};
use crate::config::{DestinationKind, RetentionPolicy, S3Options};
use crate::managers::retention::{self, PruneReport};
use crate::managers::task_runner::{TaskRunner, BACKUP_DIR};
use crate::utils::object_store::{ObjectInfo, ObjectStore};
use crate::utils::runtime::Mount;
use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const STAGING_DIR: &str = ".s3tmp";

pub struct ObjectStoreDestination {
    name: String,
    host_path: PathBuf,
    local_path: PathBuf,
    retention: RetentionPolicy,
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreDestination {
    pub fn new(options: &S3Options, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            name: options.name.clone(),
            host_path: options.host_path.clone(),
            local_path: options
                .local_path
                .clone()
                .unwrap_or_else(|| options.host_path.clone()),
            retention: options.retention,
            store,
        }
    }

    fn staging_dir(&self) -> PathBuf {
        self.local_path.join(STAGING_DIR)
    }

    fn objects(&self, prefix: &str) -> Result<Vec<SnapshotArtifact>> {
        let objects = self.store.list_objects(prefix).context(format!(
            "Failed to list objects in destination '{}'",
            self.name
        ))?;
        Ok(objects.into_iter().filter_map(to_artifact).collect())
    }
}

fn to_artifact(object: ObjectInfo) -> Option<SnapshotArtifact> {
    let volume_name = parse_volume_name(&object.key)?;
    Some(SnapshotArtifact {
        volume_name,
        file_name: object.key.clone(),
        reference: object.key,
        created_at: object.last_modified,
        size: object.size,
    })
}

impl DestinationStrategy for ObjectStoreDestination {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DestinationKind {
        DestinationKind::ObjectStore
    }

    fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    fn store(&self, volume: &Mount, runner: &TaskRunner) -> Result<SnapshotArtifact> {
        let file_name = todays_archive_name(&volume.name);
        let staging = self.staging_dir();
        fs::create_dir_all(&staging)
            .context(format!("Failed to create staging directory {:?}", staging))?;

        let command = archive_command(&format!("{}/{}/{}", BACKUP_DIR, STAGING_DIR, file_name));
        runner
            .run_in_mounted_context(&volume.name, Some(&self.host_path), &command)
            .context(format!(
                "Archiving volume {} to {} destination '{}' failed",
                volume.name,
                self.kind(),
                self.name
            ))?;

        let local_file = staging.join(&file_name);
        let size = fs::metadata(&local_file).ok().map(|m| m.len());

        // on failure the staged archive stays for a manual upload
        self.store.put_object(&file_name, &local_file).context(format!(
            "Uploading {} to {} destination '{}' failed",
            file_name,
            self.kind(),
            self.name
        ))?;

        if let Err(e) = fs::remove_file(&local_file) {
            warn!("Uploaded {} but could not remove {:?}: {}", file_name, local_file, e);
        }

        info!("Uploaded {} to destination '{}'", file_name, self.name);
        Ok(SnapshotArtifact {
            volume_name: volume.name.clone(),
            reference: file_name.clone(),
            file_name,
            created_at: Utc::now(),
            size,
        })
    }

    fn prune(
        &self,
        volume_name: &str,
        policy: RetentionPolicy,
        current: &SnapshotArtifact,
    ) -> Result<PruneReport> {
        let artifacts = self.artifacts_for_volume(volume_name)?;
        retention::prune(&artifacts, policy, current, Utc::now(), |artifact| {
            self.store.delete_object(&artifact.reference)
        })
    }

    fn list_artifacts(&self, filter: Option<&str>) -> Result<Vec<SnapshotArtifact>> {
        let mut artifacts = self.objects("")?;
        if let Some(f) = filter {
            artifacts.retain(|a| a.volume_name.contains(f));
        }
        retention::sort_newest_first(&mut artifacts);
        Ok(artifacts)
    }

    /// Artifacts whose parsed volume name equals `volume_name` exactly.
    ///
    /// Matching is on the name, not the raw key prefix, so pruning `db`
    /// never touches `dbx-*` or `db2-*` objects.
    fn artifacts_for_volume(&self, volume_name: &str) -> Result<Vec<SnapshotArtifact>> {
        let mut artifacts = self.objects(volume_name)?;
        artifacts.retain(|a| a.volume_name == volume_name);
        retention::sort_newest_first(&mut artifacts);
        Ok(artifacts)
    }

    fn resolve_reference(&self, reference: &str) -> Result<SnapshotArtifact> {
        let key = reference.trim_start_matches('/');
        self.objects(key)?
            .into_iter()
            .find(|a| a.reference == key)
            .context(format!("Object {} not found in destination '{}'", key, self.name))
    }

    fn fetch(&self, artifact: &SnapshotArtifact) -> Result<FetchedArchive> {
        let staging = self.staging_dir();
        fs::create_dir_all(&staging)
            .context(format!("Failed to create staging directory {:?}", staging))?;

        let file_name = format!("restore-{}", artifact.file_name);
        let local_copy = staging.join(&file_name);
        debug!("Downloading {} to {:?}", artifact.reference, local_copy);

        self.store
            .get_object(&artifact.reference, &local_copy)
            .context(format!(
                "Failed to download {} from destination '{}'",
                artifact.reference, self.name
            ))?;

        Ok(FetchedArchive::downloaded(
            self.host_path.join(STAGING_DIR),
            file_name,
            local_copy,
        ))
    }
}
