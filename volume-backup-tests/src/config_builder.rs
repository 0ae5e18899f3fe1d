//! Fluent API for building test configurations
//!
//! Provides a builder pattern for creating test configurations with sensible defaults.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use volume_backup::config::{
    Config, DestinationConfig, FilesystemOptions, GlobalConfig, RetentionPolicy, S3Options,
    ScheduleConfig,
};

/// Builder for creating test configurations
pub struct ConfigBuilder {
    temp_dir: TempDir,
    global: GlobalConfig,
    schedules: HashMap<String, ScheduleConfig>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder with logs and locks inside a temp dir
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let log_directory = temp_dir.path().join("logs");
        fs::create_dir_all(&log_directory).expect("Failed to create log_directory");

        let global = GlobalConfig {
            log_directory,
            log_max_files: 5,
            lock_directory: temp_dir.path().join("locks"),
            task_timeout_seconds: 60,
            docker_timeout_seconds: 30,
            ..GlobalConfig::default()
        };

        Self {
            temp_dir,
            global,
            schedules: HashMap::new(),
        }
    }

    /// A "nightly" schedule writing to a filesystem destination "local"
    pub fn minimal() -> Self {
        let builder = Self::new().add_schedule("nightly", "0 2 * * *");
        let backup_path = builder.temp_dir.path().join("backups");
        fs::create_dir_all(&backup_path).expect("Failed to create backup dir");

        builder.add_filesystem_destination("nightly", "local", &backup_path, RetentionPolicy::MaxAgeDays(0))
    }

    /// Add a schedule without destinations
    pub fn add_schedule(mut self, name: &str, cron: &str) -> Self {
        self.schedules.insert(
            name.to_string(),
            ScheduleConfig {
                enabled: true,
                schedule: cron.to_string(),
                schedule_key: None,
                destinations: vec![],
            },
        );
        self
    }

    /// Mark a schedule as disabled
    pub fn disable_schedule(mut self, name: &str) -> Self {
        self.schedule_mut(name).enabled = false;
        self
    }

    /// Restrict a schedule to workloads carrying `<prefix>.schedule=<key>`
    pub fn with_schedule_key(mut self, name: &str, key: &str) -> Self {
        self.schedule_mut(name).schedule_key = Some(key.to_string());
        self
    }

    pub fn add_filesystem_destination(
        mut self,
        schedule: &str,
        name: &str,
        path: &Path,
        retention: RetentionPolicy,
    ) -> Self {
        self.schedule_mut(schedule)
            .destinations
            .push(DestinationConfig::Filesystem(FilesystemOptions {
                name: name.to_string(),
                host_path: path.to_path_buf(),
                local_path: None,
                retention,
            }));
        self
    }

    /// Add an S3 destination staging under the temp dir
    pub fn add_s3_destination(mut self, schedule: &str, name: &str, bucket: &str) -> Self {
        let staging = self.temp_dir.path().join(format!("staging-{}", name));
        fs::create_dir_all(&staging).expect("Failed to create staging dir");

        self.schedule_mut(schedule)
            .destinations
            .push(DestinationConfig::S3(S3Options {
                name: name.to_string(),
                host_path: staging,
                local_path: None,
                bucket: Some(bucket.to_string()),
                region: Some("us-east-1".to_string()),
                endpoint: None,
                force_path_style: false,
                retention: RetentionPolicy::KeepNewestOnly,
            }));
        self
    }

    pub fn with_label_prefix(mut self, prefix: &str) -> Self {
        self.global.label_prefix = prefix.to_string();
        self
    }

    /// Get the temp directory path
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Host path of a destination, if configured
    pub fn destination_path(&self, name: &str) -> Option<PathBuf> {
        self.schedules
            .values()
            .flat_map(|s| s.destinations.iter())
            .find(|d| d.name() == name)
            .map(|d| d.host_path().to_path_buf())
    }

    /// Build the Config
    pub fn build(self) -> Config {
        Config {
            global: self.global,
            schedules: self.schedules,
        }
    }

    /// Build the Config and keep the temp directory alive
    pub fn persist(self) -> (Config, TempDir) {
        let config = Config {
            global: self.global,
            schedules: self.schedules,
        };
        (config, self.temp_dir)
    }

    fn schedule_mut(&mut self, name: &str) -> &mut ScheduleConfig {
        self.schedules
            .get_mut(name)
            .unwrap_or_else(|| panic!("Schedule '{}' not added to builder", name))
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
