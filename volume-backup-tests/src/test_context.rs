//! Test context and harness
//!
//! Wires the library's managers to the mock runtime and object store so
//! scenario tests only describe workloads, archives and expectations.

use crate::config_builder::ConfigBuilder;
use crate::fixtures::LABEL_PREFIX;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use volume_backup::config::{
    Config, FilesystemOptions, RetentionPolicy, S3Options,
};
use volume_backup::labels::LabelKeys;
use volume_backup::strategies::{DestinationStrategy, FilesystemDestination, ObjectStoreDestination};
use volume_backup::utils::object_store::mock::MockObjectStore;
use volume_backup::utils::runtime::mock::MockRuntime;
use volume_backup::utils::runtime::ContainerRuntime;
use volume_backup::{BackupManager, RestoreManager, TaskRunner};

/// Test context that manages test resources and provides common utilities
pub struct TestContext {
    temp_dir: TempDir,
    config: Option<Config>,
}

impl TestContext {
    /// Create a new test context with a temporary directory
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
            config: None,
        }
    }

    /// Create a test context from a ConfigBuilder
    pub fn from_builder(builder: ConfigBuilder) -> Self {
        let (config, temp_dir) = builder.persist();
        Self {
            temp_dir,
            config: Some(config),
        }
    }

    /// Get the temporary directory path
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Get the configuration
    pub fn config(&self) -> Option<&Config> {
        self.config.as_ref()
    }

    /// Create a subdirectory in the temp dir
    pub fn create_subdir(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::create_dir_all(&path).expect("Failed to create subdirectory");
        path
    }

    /// Create a file in the temp dir
    pub fn create_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(&path, content).expect("Failed to write file");
        path
    }

    /// Serialize the context's config to `config.toml` and return its path
    pub fn write_config(&self) -> Result<PathBuf> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Test context has no config"))?;
        let path = self.temp_dir.path().join("config.toml");
        std::fs::write(&path, toml::to_string_pretty(config)?)?;
        Ok(path)
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Managers wired to a [`MockRuntime`] and a [`MockObjectStore`]
pub struct MockEngine {
    pub runtime: MockRuntime,
    pub store: MockObjectStore,
    dir: TempDir,
}

impl MockEngine {
    pub fn new(runtime: MockRuntime) -> Self {
        Self {
            runtime,
            store: MockObjectStore::new(),
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn with_store(mut self, store: MockObjectStore) -> Self {
        self.store = store;
        self
    }

    /// Host directory of the filesystem destination
    pub fn backup_dir(&self) -> PathBuf {
        let path = self.dir.path().join("backups");
        std::fs::create_dir_all(&path).expect("Failed to create backup dir");
        path
    }

    /// Staging directory of the object-store destination
    pub fn staging_dir(&self) -> PathBuf {
        let path = self.dir.path().join("staging");
        std::fs::create_dir_all(&path).expect("Failed to create staging dir");
        path
    }

    pub fn runner(&self, image: &str) -> TaskRunner {
        TaskRunner::new(
            self.shared_runtime(),
            image,
            LabelKeys::new(LABEL_PREFIX),
            None,
        )
    }

    pub fn filesystem(&self, retention: RetentionPolicy) -> Box<dyn DestinationStrategy> {
        Box::new(FilesystemDestination::new(&FilesystemOptions {
            name: "local".to_string(),
            host_path: self.backup_dir(),
            local_path: None,
            retention,
        }))
    }

    pub fn object_store(&self, retention: RetentionPolicy) -> Box<dyn DestinationStrategy> {
        Box::new(ObjectStoreDestination::new(
            &S3Options {
                name: "offsite".to_string(),
                host_path: self.staging_dir(),
                local_path: None,
                bucket: Some("backups".to_string()),
                region: None,
                endpoint: None,
                force_path_style: false,
                retention,
            },
            Arc::new(self.store.clone()),
        ))
    }

    pub fn backup_manager(&self, destinations: Vec<Box<dyn DestinationStrategy>>) -> BackupManager {
        BackupManager::new(
            self.shared_runtime(),
            self.runner("busybox:latest"),
            destinations,
            LabelKeys::new(LABEL_PREFIX),
        )
    }

    pub fn restore_manager(&self, destination: Box<dyn DestinationStrategy>) -> RestoreManager {
        RestoreManager::new(self.shared_runtime(), self.runner("ubuntu:latest"), destination)
    }

    fn shared_runtime(&self) -> Arc<dyn ContainerRuntime> {
        Arc::new(self.runtime.clone())
    }
}

/// Extension trait for assertion helpers
pub trait ResultAssertions<T> {
    /// Assert that the result is Ok and return the value
    fn assert_ok(self) -> T;

    /// Assert that the result is Err and the error message contains the given string
    fn assert_err_contains(self, needle: &str);
}

impl<T: std::fmt::Debug, E: std::fmt::Debug> ResultAssertions<T> for std::result::Result<T, E> {
    fn assert_ok(self) -> T {
        match self {
            Ok(v) => v,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    }

    fn assert_err_contains(self, needle: &str) {
        match self {
            Ok(v) => panic!("Expected Err containing '{}', got Ok: {:?}", needle, v),
            Err(e) => {
                let err_msg = format!("{:?}", e);
                assert!(
                    err_msg.contains(needle),
                    "Error '{}' does not contain '{}'",
                    err_msg,
                    needle
                );
            }
        }
    }
}
