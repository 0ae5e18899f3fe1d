pub mod filesystem;
pub mod object_store;

use crate::config::{DestinationConfig, DestinationKind, RetentionPolicy};
use crate::managers::retention::PruneReport;
use crate::managers::task_runner::{TaskRunner, DATA_DIR};
use crate::utils::object_store::{S3ObjectStore, S3Settings};
use crate::utils::runtime::Mount;
use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Local, NaiveDate, Utc};
use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing::warn;

pub use filesystem::FilesystemDestination;
pub use object_store::ObjectStoreDestination;

/// A stored snapshot of one volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotArtifact {
    pub volume_name: String,
    /// Absolute file path (filesystem) or object key (object store)
    pub reference: String,
    pub file_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// An archive made reachable for a helper container
///
/// Any local copy made to get it there is deleted on drop.
#[derive(Debug)]
pub struct FetchedArchive {
    /// Host directory to bind into the helper
    pub host_dir: PathBuf,
    pub file_name: String,
    cleanup: Option<PathBuf>,
}

impl FetchedArchive {
    pub fn in_place(host_dir: PathBuf, file_name: String) -> Self {
        Self { host_dir, file_name, cleanup: None }
    }

    pub fn downloaded(host_dir: PathBuf, file_name: String, local_copy: PathBuf) -> Self {
        Self { host_dir, file_name, cleanup: Some(local_copy) }
    }
}

impl Drop for FetchedArchive {
    fn drop(&mut self) {
        if let Some(path) = self.cleanup.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Failed to remove downloaded archive {:?}: {}", path, e);
            }
        }
    }
}

/// A place snapshots are written to and read back from
pub trait DestinationStrategy: Send + Sync {
    /// Configured destination name (for logging and attribution)
    fn name(&self) -> &str;

    fn kind(&self) -> DestinationKind;

    /// Retention policy configured for this destination
    fn retention(&self) -> RetentionPolicy;

    /// Archive one volume through a helper and persist it
    fn store(&self, volume: &Mount, runner: &TaskRunner) -> Result<SnapshotArtifact>;

    /// Apply `policy` to the volume's artifacts, keeping `current`
    fn prune(
        &self,
        volume_name: &str,
        policy: RetentionPolicy,
        current: &SnapshotArtifact,
    ) -> Result<PruneReport>;

    /// Every artifact whose volume name contains `filter`, newest first
    fn list_artifacts(&self, filter: Option<&str>) -> Result<Vec<SnapshotArtifact>>;

    /// Artifacts of exactly this volume, newest first
    fn artifacts_for_volume(&self, volume_name: &str) -> Result<Vec<SnapshotArtifact>> {
        let mut artifacts = self.list_artifacts(Some(volume_name))?;
        artifacts.retain(|a| a.volume_name == volume_name);
        Ok(artifacts)
    }

    /// Look up an artifact by an explicit reference (file name, path or key)
    fn resolve_reference(&self, reference: &str) -> Result<SnapshotArtifact>;

    /// Make an artifact available on the docker host for extraction
    fn fetch(&self, artifact: &SnapshotArtifact) -> Result<FetchedArchive>;
}

/// Build the strategy for a destination entry
pub fn build_destination(config: &DestinationConfig) -> Result<Box<dyn DestinationStrategy>> {
    match config {
        DestinationConfig::Filesystem(opts) => Ok(Box::new(FilesystemDestination::new(opts))),
        DestinationConfig::S3(opts) => {
            let settings = S3Settings::resolve(
                opts.bucket.as_deref(),
                opts.region.as_deref(),
                opts.endpoint.as_deref(),
                opts.force_path_style,
            )
            .context(format!("Destination '{}'", opts.name))?;
            let store = S3ObjectStore::connect(&settings)?;
            Ok(Box::new(ObjectStoreDestination::new(opts, Arc::new(store))))
        }
    }
}

/// `{volume}-{day}-{month}-{year}.tar.gz`, no zero padding
pub fn archive_file_name(volume_name: &str, date: NaiveDate) -> String {
    format!(
        "{}-{}-{}-{}.tar.gz",
        volume_name,
        date.day(),
        date.month(),
        date.year()
    )
}

/// Today's archive name for a volume
pub fn todays_archive_name(volume_name: &str) -> String {
    archive_file_name(volume_name, Local::now().date_naive())
}

fn archive_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(.+)-\d{1,2}-\d{1,2}-\d{4}.*\.tar\.gz$").expect("archive pattern is valid")
    })
}

/// Volume name encoded in an archive file name, if it is one of ours
pub fn parse_volume_name(file_name: &str) -> Option<String> {
    archive_pattern()
        .captures(file_name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Helper command archiving the mounted volume to `archive_path`.
///
/// Entries are stored under a single `data/` directory; extraction strips it.
pub fn archive_command(archive_path: &str) -> Vec<String> {
    vec![
        "tar".to_string(),
        "-czf".to_string(),
        archive_path.to_string(),
        DATA_DIR.to_string(),
    ]
}
