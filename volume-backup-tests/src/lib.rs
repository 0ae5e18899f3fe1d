//! Test utilities for volume-backup
//!
//! Shared fixtures, a config builder, and a [`MockEngine`] that wires the
//! library's managers to the in-memory runtime and object store.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use test_utils::{labelled_workload, write_archive_effect, MockEngine, MockRuntime};
//!
//! #[test]
//! fn my_test() {
//!     let runtime = MockRuntime::new()
//!         .with_helper_effect(write_archive_effect)
//!         .with_workload(labelled_workload("app", &["app-data"]));
//!     let engine = MockEngine::new(runtime);
//!     let manager = engine.backup_manager(vec![engine.filesystem(RetentionPolicy::MaxAgeDays(0))]);
//!     // ... test code
//! }
//! ```

pub mod config_builder;
pub mod fixtures;
pub mod test_context;

// Re-export commonly used items
pub use config_builder::ConfigBuilder;
pub use fixtures::*;
pub use test_context::{MockEngine, ResultAssertions, TestContext};

// Re-export types from the main crate for convenience
pub use volume_backup::config::{
    Config, DestinationConfig, FilesystemOptions, GlobalConfig, RetentionPolicy, S3Options,
    ScheduleConfig,
};
pub use volume_backup::strategies::SnapshotArtifact;
pub use volume_backup::utils::runtime::{Mount, MountKind, RunState, Workload};

// Re-export mock implementations from the main crate
pub use volume_backup::utils::object_store::mock::{MockObjectStore, StoreCall};
pub use volume_backup::utils::object_store::ObjectStore;
pub use volume_backup::utils::runtime::mock::{MockRuntime, RuntimeCall};
pub use volume_backup::utils::runtime::ContainerRuntime;

/// Common test result type
pub type TestResult<T = ()> = anyhow::Result<T>;
