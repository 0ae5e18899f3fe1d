pub mod backup;
pub mod logging;
pub mod restore;
pub mod retention;
pub mod task_runner;
