use super::types::*;
use crate::utils::cron::validate_cron_schedule;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Schedule '{0}' not found")]
    ScheduleNotFound(String),

    #[error("Destination '{0}' not found")]
    DestinationNotFound(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let contents = fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.global.label_prefix.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "label_prefix must not be empty".to_string(),
        ));
    }

    if config.schedules.is_empty() {
        return Err(ConfigError::ValidationError(
            "No schedules defined".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for (name, schedule) in &config.schedules {
        validate_schedule(name, schedule)?;

        for destination in &schedule.destinations {
            if !seen.insert(destination.name().to_string()) {
                return Err(ConfigError::ValidationError(format!(
                    "Destination name '{}' is used more than once",
                    destination.name()
                )));
            }
        }
    }

    Ok(())
}

fn validate_schedule(name: &str, schedule: &ScheduleConfig) -> Result<()> {
    if !validate_cron_schedule(&schedule.schedule) {
        return Err(ConfigError::ValidationError(format!(
            "Schedule '{}': invalid cron schedule format (expected 5 fields): {}",
            name, schedule.schedule
        )));
    }

    if schedule.destinations.is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "Schedule '{}' has no destinations",
            name
        )));
    }

    if let Some(key) = &schedule.schedule_key {
        if key.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "Schedule '{}': schedule_key must not be empty",
                name
            )));
        }
    }

    for destination in &schedule.destinations {
        if destination.name().trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "Schedule '{}' has a destination without a name",
                name
            )));
        }
        if destination.host_path().as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "Destination '{}': host_path must not be empty",
                destination.name()
            )));
        }
        // commas would split the helper's --mount option
        if destination.host_path().to_string_lossy().contains(',') {
            return Err(ConfigError::ValidationError(format!(
                "Destination '{}': host_path must not contain ',': {:?}",
                destination.name(),
                destination.host_path()
            )));
        }
    }

    Ok(())
}

/// Look up a schedule by name
pub fn find_schedule<'a>(config: &'a Config, name: &str) -> Result<&'a ScheduleConfig> {
    config
        .schedules
        .get(name)
        .ok_or_else(|| ConfigError::ScheduleNotFound(name.to_string()))
}

/// Look up a destination by name across all schedules
pub fn find_destination<'a>(config: &'a Config, name: &str) -> Result<&'a DestinationConfig> {
    config
        .schedules
        .values()
        .flat_map(|s| s.destinations.iter())
        .find(|d| d.name() == name)
        .ok_or_else(|| ConfigError::DestinationNotFound(name.to_string()))
}

/// Resolve the destination to read from: the named one, or the only one configured
pub fn resolve_destination<'a>(
    config: &'a Config,
    name: Option<&str>,
) -> Result<&'a DestinationConfig> {
    if let Some(name) = name {
        return find_destination(config, name);
    }

    let mut all: Vec<&DestinationConfig> = config
        .schedules
        .values()
        .flat_map(|s| s.destinations.iter())
        .collect();
    all.sort_by(|a, b| a.name().cmp(b.name()));

    match all.as_slice() {
        [only] => Ok(only),
        [] => Err(ConfigError::ValidationError(
            "No destinations defined".to_string(),
        )),
        many => Err(ConfigError::ValidationError(format!(
            "Multiple destinations configured, pick one with --destination: {}",
            many.iter().map(|d| d.name()).collect::<Vec<_>>().join(", ")
        ))),
    }
}
