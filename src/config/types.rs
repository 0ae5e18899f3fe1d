use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub schedules: HashMap<String, ScheduleConfig>,
}

/// Global configuration settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Logging configuration
    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_max_files")]
    pub log_max_files: u32,

    /// Prefix shared by every label the engine reads or writes
    #[serde(default = "default_label_prefix")]
    pub label_prefix: String,

    /// Image used for archival helpers
    #[serde(default = "default_helper_image")]
    pub helper_image: String,

    /// Image used for extraction helpers (needs a tar with --strip-components)
    #[serde(default = "default_restore_image")]
    pub restore_image: String,

    /// Deadline for a single helper run
    #[serde(default = "default_task_timeout")]
    pub task_timeout_seconds: u64,

    /// Deadline for short runtime calls (stop, start, inspect, ...)
    #[serde(default = "default_docker_timeout")]
    pub docker_timeout_seconds: u64,

    /// Where per-schedule lock files live
    #[serde(default = "default_lock_directory")]
    pub lock_directory: PathBuf,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_directory: default_log_directory(),
            log_level: default_log_level(),
            log_max_files: default_log_max_files(),
            label_prefix: default_label_prefix(),
            helper_image: default_helper_image(),
            restore_image: default_restore_image(),
            task_timeout_seconds: default_task_timeout(),
            docker_timeout_seconds: default_docker_timeout(),
            lock_directory: default_lock_directory(),
        }
    }
}

/// A named backup schedule
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Cron schedule
    pub schedule: String,

    /// Only workloads labelled `<prefix>.schedule=<key>` belong to this schedule
    #[serde(default)]
    pub schedule_key: Option<String>,

    /// Destinations, in the order they are written to
    #[serde(default)]
    pub destinations: Vec<DestinationConfig>,
}

/// Backup destination configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DestinationConfig {
    Filesystem(FilesystemOptions),
    S3(S3Options),
}

impl DestinationConfig {
    pub fn name(&self) -> &str {
        match self {
            DestinationConfig::Filesystem(opts) => &opts.name,
            DestinationConfig::S3(opts) => &opts.name,
        }
    }

    pub fn kind(&self) -> DestinationKind {
        match self {
            DestinationConfig::Filesystem(_) => DestinationKind::Filesystem,
            DestinationConfig::S3(_) => DestinationKind::ObjectStore,
        }
    }

    pub fn host_path(&self) -> &Path {
        match self {
            DestinationConfig::Filesystem(opts) => &opts.host_path,
            DestinationConfig::S3(opts) => &opts.host_path,
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        match self {
            DestinationConfig::Filesystem(opts) => opts.retention,
            DestinationConfig::S3(opts) => opts.retention,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    Filesystem,
    ObjectStore,
}

impl std::fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DestinationKind::Filesystem => write!(f, "filesystem"),
            DestinationKind::ObjectStore => write!(f, "object-store"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FilesystemOptions {
    pub name: String,

    /// Directory on the docker host that receives the archives
    pub host_path: PathBuf,

    /// The same directory as seen by this process (defaults to host_path)
    #[serde(default)]
    pub local_path: Option<PathBuf>,

    #[serde(default = "default_filesystem_retention")]
    pub retention: RetentionPolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct S3Options {
    pub name: String,

    /// Staging directory on the docker host; archives land in `.s3tmp/`
    pub host_path: PathBuf,

    #[serde(default)]
    pub local_path: Option<PathBuf>,

    /// Falls back to AWS_BUCKET
    #[serde(default)]
    pub bucket: Option<String>,

    /// Falls back to AWS_DEFAULT_REGION
    #[serde(default)]
    pub region: Option<String>,

    /// Falls back to AWS_ENDPOINT
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub force_path_style: bool,

    #[serde(default = "default_object_store_retention")]
    pub retention: RetentionPolicy,
}

/// How stale artifacts are pruned after a successful store
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Keep only the artifact written in the current cycle
    KeepNewestOnly,
    /// Delete artifacts older than N days; 0 disables deletion
    MaxAgeDays(u32),
}

// Default value functions

fn default_log_directory() -> PathBuf { PathBuf::from("~/logs") }
fn default_log_level() -> String { "info".to_string() }
fn default_log_max_files() -> u32 { 10 }
fn default_label_prefix() -> String { "volume-backup".to_string() }
fn default_helper_image() -> String { "busybox:latest".to_string() }
fn default_restore_image() -> String { "ubuntu:latest".to_string() }
fn default_task_timeout() -> u64 { 3600 }
fn default_docker_timeout() -> u64 { 120 }
fn default_lock_directory() -> PathBuf { PathBuf::from("/tmp") }
fn default_enabled() -> bool { true }
fn default_filesystem_retention() -> RetentionPolicy { RetentionPolicy::MaxAgeDays(0) }
fn default_object_store_retention() -> RetentionPolicy { RetentionPolicy::KeepNewestOnly }
