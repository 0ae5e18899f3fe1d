//! Label conventions that mark a workload for backup
//!
//! Labels are read once at discovery into a [`BackupLabels`] value; the rest
//! of the engine works with that instead of the raw string map.
//!
//! | label                     | meaning                                          |
//! |---------------------------|--------------------------------------------------|
//! | `<prefix>.enabled=true`   | workload takes part in backup cycles             |
//! | `<prefix>.volumes=a,b`    | only these named volumes (default: all of them)  |
//! | `<prefix>.schedule=KEY`   | only picked up by schedules with that key        |
//! | `<prefix>.type=task`      | set by the engine on its own helper containers   |

use crate::utils::runtime::{Mount, MountKind, Workload};
use std::collections::HashMap;

pub const TASK_LABEL_VALUE: &str = "task";

/// Fully-qualified label keys for a prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelKeys {
    pub enabled: String,
    pub volumes: String,
    pub schedule: String,
    pub task_type: String,
}

impl LabelKeys {
    pub fn new(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('.');
        Self {
            enabled: format!("{}.enabled", prefix),
            volumes: format!("{}.volumes", prefix),
            schedule: format!("{}.schedule", prefix),
            task_type: format!("{}.type", prefix),
        }
    }

    /// Runtime filters selecting eligible workloads, optionally for one schedule key
    pub fn discovery_filters(&self, schedule_key: Option<&str>) -> Vec<(String, String)> {
        let mut filters = vec![(self.enabled.clone(), "true".to_string())];
        if let Some(key) = schedule_key {
            filters.push((self.schedule.clone(), key.to_string()));
        }
        filters
    }

    /// Labels stamped on helper containers
    pub fn task_labels(&self) -> HashMap<String, String> {
        HashMap::from([(self.task_type.clone(), TASK_LABEL_VALUE.to_string())])
    }
}

/// Typed view of a workload's backup labels
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BackupLabels {
    pub enabled: bool,
    /// Explicit volume list; `None` means "every named volume"
    pub volumes: Option<Vec<String>>,
    pub schedule_key: Option<String>,
}

impl BackupLabels {
    pub fn from_labels(labels: &HashMap<String, String>, keys: &LabelKeys) -> Self {
        let enabled = labels.get(&keys.enabled).map(|v| v == "true").unwrap_or(false);

        // an empty or all-separator list falls back to "all volumes"
        let volumes = labels.get(&keys.volumes).and_then(|raw| {
            let names: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if names.is_empty() {
                None
            } else {
                Some(names)
            }
        });

        let schedule_key = labels
            .get(&keys.schedule)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        Self {
            enabled,
            volumes,
            schedule_key,
        }
    }

    /// Mounts of `mounts` selected for backup, in mount order
    pub fn select<'a>(&self, mounts: &'a [Mount]) -> Vec<&'a Mount> {
        mounts
            .iter()
            .filter(|m| m.kind == MountKind::NamedVolume)
            .filter(|m| match &self.volumes {
                Some(names) => names.iter().any(|n| n == &m.name),
                None => true,
            })
            .collect()
    }
}

/// True iff the enabled label is present and exactly "true"
pub fn is_backup_eligible(workload: &Workload, keys: &LabelKeys) -> bool {
    BackupLabels::from_labels(&workload.labels, keys).enabled
}

/// Named-volume mounts of a workload selected for backup
pub fn select_volumes(workload: &Workload, keys: &LabelKeys) -> Vec<Mount> {
    BackupLabels::from_labels(&workload.labels, keys)
        .select(&workload.mounts)
        .into_iter()
        .cloned()
        .collect()
}
