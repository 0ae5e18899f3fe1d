//! Backup manager - runs backup cycles over labelled workloads
//!
//! One cycle discovers eligible workloads and handles them one at a time:
//! stop, archive every selected volume to every destination, prune, restart.
//! The restart is tied to a [`StoppedWorkload`] guard so it happens on every
//! path out of the backup step, including a panic.

use crate::labels::{BackupLabels, LabelKeys};
use crate::managers::task_runner::TaskRunner;
use crate::strategies::{DestinationStrategy, SnapshotArtifact};
use crate::utils::runtime::{ContainerRuntime, Mount, RunState, Workload};
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// How the backup step went for one workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum BackupOutcome {
    Succeeded,
    PartiallyFailed { reason: String },
    /// No volume selected; the workload was not touched
    Skipped,
    /// The workload could not be stopped, so nothing was archived
    StopFailed { reason: String },
}

/// What happened to the workload's run state afterwards
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum RestartOutcome {
    /// The engine never stopped it
    NotStopped,
    Restarted,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadReport {
    pub workload_id: String,
    pub workload_name: String,
    pub outcome: BackupOutcome,
    pub restart: RestartOutcome,
    pub artifacts: Vec<SnapshotArtifact>,
}

impl WorkloadReport {
    pub fn is_failure(&self) -> bool {
        matches!(
            self.outcome,
            BackupOutcome::PartiallyFailed { .. } | BackupOutcome::StopFailed { .. }
        ) || matches!(self.restart, RestartOutcome::Failed { .. })
    }
}

/// Result of one `run_backup_cycle` call
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub workloads: Vec<WorkloadReport>,
}

impl CycleReport {
    pub fn has_failures(&self) -> bool {
        self.workloads.iter().any(WorkloadReport::is_failure)
    }

    pub fn failures(&self) -> impl Iterator<Item = &WorkloadReport> {
        self.workloads.iter().filter(|w| w.is_failure())
    }
}

/// A workload this engine stopped; dropping it without [`restart`](Self::restart)
/// still starts the workload again.
struct StoppedWorkload<'a> {
    runtime: &'a dyn ContainerRuntime,
    id: String,
    name: String,
    released: bool,
}

impl<'a> StoppedWorkload<'a> {
    fn stop(runtime: &'a dyn ContainerRuntime, workload: &Workload) -> Result<Self> {
        runtime
            .stop(&workload.id)
            .context(format!("Failed to stop workload {} ({})", workload.name, workload.id))?;
        info!("Stopped workload: {}", workload.name);
        Ok(Self {
            runtime,
            id: workload.id.clone(),
            name: workload.name.clone(),
            released: false,
        })
    }

    fn restart(mut self) -> Result<()> {
        self.released = true;
        self.runtime
            .start(&self.id)
            .context(format!("Failed to restart workload {} ({})", self.name, self.id))?;
        info!("Restarted workload: {}", self.name);
        Ok(())
    }
}

impl Drop for StoppedWorkload<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!("Backup of {} unwound, restarting it", self.name);
        if let Err(e) = self.runtime.start(&self.id) {
            error!("Workload {} ({}) left stopped: {}", self.name, self.id, e);
        }
    }
}

pub struct BackupManager {
    runtime: Arc<dyn ContainerRuntime>,
    runner: TaskRunner,
    destinations: Vec<Box<dyn DestinationStrategy>>,
    keys: LabelKeys,
    schedule_key: Option<String>,
}

impl BackupManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        runner: TaskRunner,
        destinations: Vec<Box<dyn DestinationStrategy>>,
        keys: LabelKeys,
    ) -> Self {
        Self {
            runtime,
            runner,
            destinations,
            keys,
            schedule_key: None,
        }
    }

    /// Only consider workloads labelled with this schedule key
    pub fn with_schedule_key(mut self, schedule_key: Option<String>) -> Self {
        self.schedule_key = schedule_key;
        self
    }

    /// Run one backup cycle over every eligible workload.
    ///
    /// Errors only when discovery (or helper image preparation) fails; per
    /// workload failures are in the returned report.
    pub fn run_backup_cycle(&self) -> Result<CycleReport> {
        let start_time = Instant::now();

        let filters = self.keys.discovery_filters(self.schedule_key.as_deref());
        let discovered = self
            .runtime
            .list_workloads(&filters)
            .context("Failed to discover workloads")?;

        let workloads: Vec<(Workload, BackupLabels)> = discovered
            .into_iter()
            .filter_map(|w| {
                let labels = BackupLabels::from_labels(&w.labels, &self.keys);
                self.is_in_scope(&labels).then_some((w, labels))
            })
            .collect();

        if workloads.is_empty() {
            info!("No workloads labelled for backup");
            return Ok(CycleReport::default());
        }

        info!("Found {} workload(s) to back up", workloads.len());

        self.runner
            .prepare()
            .context(format!("Failed to prepare helper image {}", self.runner.image()))?;

        let mut report = CycleReport::default();
        for (workload, labels) in &workloads {
            report.workloads.push(self.backup_workload(workload, labels));
        }

        let failed = report.failures().count();
        info!(
            "Backup cycle completed in {:.2}s: {} workload(s), {} with failures",
            start_time.elapsed().as_secs_f64(),
            report.workloads.len(),
            failed
        );

        Ok(report)
    }

    fn is_in_scope(&self, labels: &BackupLabels) -> bool {
        if !labels.enabled {
            return false;
        }
        match &self.schedule_key {
            Some(key) => labels.schedule_key.as_deref() == Some(key.as_str()),
            None => true,
        }
    }

    fn backup_workload(&self, workload: &Workload, labels: &BackupLabels) -> WorkloadReport {
        let volumes: Vec<Mount> = labels.select(&workload.mounts).into_iter().cloned().collect();

        let mut report = WorkloadReport {
            workload_id: workload.id.clone(),
            workload_name: workload.name.clone(),
            outcome: BackupOutcome::Skipped,
            restart: RestartOutcome::NotStopped,
            artifacts: Vec::new(),
        };

        if volumes.is_empty() {
            info!("Workload {} has no volumes selected for backup, skipping", workload.name);
            return report;
        }

        info!(
            "Starting backup for workload: {} ({} volume(s))",
            workload.name,
            volumes.len()
        );

        // a workload the operator stopped is archived as is and stays stopped
        let guard = match workload.state {
            RunState::Stopped => None,
            RunState::Running => match StoppedWorkload::stop(self.runtime.as_ref(), workload) {
                Ok(guard) => Some(guard),
                Err(e) => {
                    error!("{:#}", e);
                    report.outcome = BackupOutcome::StopFailed {
                        reason: format!("{:#}", e),
                    };
                    return report;
                }
            },
        };

        let (artifacts, errors) = self.archive_volumes(workload, &volumes);
        report.artifacts = artifacts;
        report.outcome = match errors.first() {
            None => BackupOutcome::Succeeded,
            Some(first) => BackupOutcome::PartiallyFailed {
                reason: if errors.len() == 1 {
                    first.clone()
                } else {
                    format!("{} (and {} more)", first, errors.len() - 1)
                },
            },
        };

        if let Some(guard) = guard {
            report.restart = match guard.restart() {
                Ok(()) => RestartOutcome::Restarted,
                Err(e) => {
                    error!("Workload {} left stopped: {:#}", workload.name, e);
                    RestartOutcome::Failed {
                        reason: format!("{:#}", e),
                    }
                }
            };
        }

        report
    }

    /// Store every volume in every destination, collecting errors instead of stopping
    fn archive_volumes(
        &self,
        workload: &Workload,
        volumes: &[Mount],
    ) -> (Vec<SnapshotArtifact>, Vec<String>) {
        let mut artifacts = Vec::new();
        let mut errors = Vec::new();

        for volume in volumes {
            for destination in &self.destinations {
                debug!(
                    "Archiving volume {} to {} destination '{}'",
                    volume.name,
                    destination.kind(),
                    destination.name()
                );

                let stored = destination
                    .store(volume, &self.runner)
                    .context(format!("Workload {} ({})", workload.name, workload.id));

                let artifact = match stored {
                    Ok(artifact) => artifact,
                    Err(e) => {
                        error!("{:#}", e);
                        errors.push(format!("{:#}", e));
                        continue;
                    }
                };

                if let Err(e) = destination.prune(&volume.name, destination.retention(), &artifact) {
                    warn!(
                        "Retention for volume {} in destination '{}' failed: {:#}",
                        volume.name,
                        destination.name(),
                        e
                    );
                }

                artifacts.push(artifact);
            }
        }

        (artifacts, errors)
    }
}
