//! Volume Backup Library
//!
//! Backs up the named volumes of labelled containers: stop the container,
//! archive each volume to filesystem or S3 destinations, restart it, prune old
//! archives. Restores go the other way through the same helper containers.

pub mod config;
pub mod labels;
pub mod managers;
pub mod strategies;
pub mod utils;

// Re-export commonly used types
pub use config::{load_config, Config};
pub use managers::backup::{BackupManager, BackupOutcome, CycleReport, RestartOutcome, WorkloadReport};
pub use managers::logging::{init_console_logging, init_logging, LogGuard, LoggingConfig};
pub use managers::restore::{RestoreError, RestoreManager, RestoreOutcome};
pub use managers::task_runner::{TaskError, TaskRunner};
pub use strategies::{build_destination, DestinationStrategy, SnapshotArtifact};
