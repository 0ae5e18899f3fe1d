//! Retention of stored snapshots
//!
//! Destinations list their artifacts for a volume and hand them here after a
//! successful store. Two policies exist:
//!
//! - [`RetentionPolicy::MaxAgeDays`]: time horizon, `0` disables deletion.
//! - [`RetentionPolicy::KeepNewestOnly`]: dedup, everything except the
//!   artifact written this cycle goes, whatever its age.
//!
//! The artifact just stored is never selected, and under the age policy the
//! newest artifact of the volume is never selected either.

use crate::config::RetentionPolicy;
use crate::strategies::SnapshotArtifact;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Newest first: creation time descending, ties broken by the greatest reference
pub fn newest_first(a: &SnapshotArtifact, b: &SnapshotArtifact) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.reference.cmp(&a.reference))
}

pub fn sort_newest_first(artifacts: &mut [SnapshotArtifact]) {
    artifacts.sort_by(newest_first);
}

/// The newest artifact of a listing
pub fn newest(artifacts: &[SnapshotArtifact]) -> Option<&SnapshotArtifact> {
    artifacts.iter().min_by(|a, b| newest_first(a, b))
}

/// One artifact per volume (the newest), newest first
pub fn newest_per_volume(mut artifacts: Vec<SnapshotArtifact>) -> Vec<SnapshotArtifact> {
    sort_newest_first(&mut artifacts);
    let mut seen = HashSet::new();
    artifacts.retain(|a| seen.insert(a.volume_name.clone()));
    artifacts
}

/// Artifacts of one volume that `policy` says should go
pub fn select_for_deletion(
    artifacts: &[SnapshotArtifact],
    policy: RetentionPolicy,
    current: &SnapshotArtifact,
    now: DateTime<Utc>,
) -> Vec<SnapshotArtifact> {
    let others = artifacts.iter().filter(|a| a.reference != current.reference);

    match policy {
        RetentionPolicy::KeepNewestOnly => others.cloned().collect(),
        RetentionPolicy::MaxAgeDays(0) => Vec::new(),
        RetentionPolicy::MaxAgeDays(days) => {
            let horizon = now - Duration::days(i64::from(days));
            let newest_ref = newest(artifacts).map(|a| a.reference.clone());
            others
                .filter(|a| Some(&a.reference) != newest_ref.as_ref())
                .filter(|a| a.created_at < horizon)
                .cloned()
                .collect()
        }
    }
}

/// Outcome of one prune pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

/// Delete what the policy selects, attempting every artifact even if some fail
pub fn prune<F>(
    artifacts: &[SnapshotArtifact],
    policy: RetentionPolicy,
    current: &SnapshotArtifact,
    now: DateTime<Utc>,
    mut delete: F,
) -> Result<PruneReport>
where
    F: FnMut(&SnapshotArtifact) -> Result<()>,
{
    let doomed = select_for_deletion(artifacts, policy, current, now);
    let mut report = PruneReport::default();

    if doomed.is_empty() {
        debug!("Nothing to prune for volume {}", current.volume_name);
        return Ok(report);
    }

    for artifact in &doomed {
        match delete(artifact) {
            Ok(()) => {
                debug!("Pruned {}", artifact.reference);
                report.deleted.push(artifact.reference.clone());
            }
            Err(e) => {
                warn!("Failed to prune {}: {:#}", artifact.reference, e);
                report.failed.push(artifact.reference.clone());
            }
        }
    }

    info!(
        "Pruned {} snapshot(s) of volume {} ({:?})",
        report.deleted.len(),
        current.volume_name,
        policy
    );

    if !report.failed.is_empty() {
        anyhow::bail!(
            "Failed to prune {} snapshot(s) of volume {}: {}",
            report.failed.len(),
            current.volume_name,
            report.failed.join(", ")
        );
    }

    Ok(report)
}
