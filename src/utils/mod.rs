pub mod command;
pub mod cron;
pub mod locker;

// Capability traits with real and mock implementations
pub mod object_store;
pub mod runtime;

// Re-export commonly used types and traits (used by test crate)
pub use object_store::{ObjectStore, S3ObjectStore};
pub use runtime::{ContainerRuntime, DockerCli};
