//! Configuration module for volume-backup
//!
//! This module handles loading and validating configuration from TOML files.
//!
//! ## Layout
//!
//! A config file declares global settings and any number of named schedules.
//! Each schedule carries a cron expression and an ordered list of destinations:
//!
//! ```toml
//! [schedules.nightly]
//! schedule = "0 2 * * *"
//!
//! [[schedules.nightly.destinations]]
//! type = "filesystem"
//! name = "local"
//! host_path = "/srv/backups"
//! retention = { max_age_days = 14 }
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use volume_backup::config;
//!
//! let config = config::load_config("/etc/volume-backup/config.toml")?;
//! for (name, schedule) in &config.schedules {
//!     println!("Schedule: {}, Destinations: {}", name, schedule.destinations.len());
//! }
//! # Ok::<(), volume_backup::config::ConfigError>(())
//! ```

mod loader;
mod types;

pub use loader::{
    find_destination, find_schedule, load_config, parse_config, resolve_destination,
    validate_config, ConfigError, Result,
};
pub use types::*;

/// Expand tilde (~) in path
pub fn expand_tilde(path: &std::path::Path) -> std::path::PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}
