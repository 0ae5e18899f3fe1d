//! Retention selection and ordering

use chrono::{DateTime, Duration, TimeZone, Utc};
use rstest::rstest;
use test_utils::{RetentionPolicy, SnapshotArtifact};
use volume_backup::managers::retention::{
    newest, newest_per_volume, prune, select_for_deletion, sort_newest_first,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 10, 12, 0, 0).unwrap()
}

fn artifact(volume: &str, reference: &str, age_days: i64) -> SnapshotArtifact {
    SnapshotArtifact {
        volume_name: volume.to_string(),
        reference: reference.to_string(),
        file_name: reference.to_string(),
        created_at: now() - Duration::days(age_days),
        size: None,
    }
}

fn refs(artifacts: &[SnapshotArtifact]) -> Vec<&str> {
    artifacts.iter().map(|a| a.reference.as_str()).collect()
}

/// Five daily snapshots of `db`, index 0 is today's
fn daily() -> Vec<SnapshotArtifact> {
    (0..5)
        .map(|d| artifact("db", &format!("db-{}-7-2024.tar.gz", 10 - d), d))
        .collect()
}

#[rstest]
#[case::disabled(RetentionPolicy::MaxAgeDays(0), vec![])]
#[case::two_days(RetentionPolicy::MaxAgeDays(2), vec!["db-7-7-2024.tar.gz", "db-6-7-2024.tar.gz"])]
#[case::long_horizon(RetentionPolicy::MaxAgeDays(30), vec![])]
#[case::keep_newest(
    RetentionPolicy::KeepNewestOnly,
    vec!["db-9-7-2024.tar.gz", "db-8-7-2024.tar.gz", "db-7-7-2024.tar.gz", "db-6-7-2024.tar.gz"]
)]
fn test_select_for_deletion(#[case] policy: RetentionPolicy, #[case] expected: Vec<&str>) {
    let artifacts = daily();
    let doomed = select_for_deletion(&artifacts, policy, &artifacts[0], now());
    assert_eq!(refs(&doomed), expected);
}

#[test]
fn test_current_artifact_never_deleted_even_if_old() {
    let artifacts = vec![artifact("db", "a", 40), artifact("db", "b", 50)];
    let current = artifacts[0].clone();

    for policy in [RetentionPolicy::MaxAgeDays(1), RetentionPolicy::KeepNewestOnly] {
        let doomed = select_for_deletion(&artifacts, policy, &current, now());
        assert!(doomed.iter().all(|a| a.reference != "a"), "{:?}", policy);
    }
}

#[test]
fn test_age_policy_keeps_newest_even_when_current_is_missing() {
    // an unreadable current archive shows up as "now"; the listing's own
    // newest entry is still protected
    let artifacts = vec![artifact("db", "old", 20), artifact("db", "older", 30)];
    let current = artifact("db", "unlisted", 0);

    let doomed = select_for_deletion(&artifacts, RetentionPolicy::MaxAgeDays(7), &current, now());
    assert_eq!(refs(&doomed), vec!["older"]);
}

#[test]
fn test_ordering_ties_broken_by_reference() {
    let mut artifacts = vec![
        artifact("db", "db-a", 1),
        artifact("db", "db-c", 1),
        artifact("db", "db-b", 1),
        artifact("db", "db-z", 3),
    ];
    sort_newest_first(&mut artifacts);

    assert_eq!(refs(&artifacts), vec!["db-c", "db-b", "db-a", "db-z"]);
    assert_eq!(newest(&artifacts).unwrap().reference, "db-c");
}

#[test]
fn test_newest_per_volume() {
    let artifacts = vec![
        artifact("db", "db-3", 3),
        artifact("db", "db-4", 1),
        artifact("cache", "cache-1", 2),
    ];

    let newest = newest_per_volume(artifacts);
    assert_eq!(refs(&newest), vec!["db-4", "cache-1"]);
}

#[test]
fn test_prune_attempts_every_deletion() {
    let artifacts = daily();
    let mut attempted = Vec::new();

    let result = prune(
        &artifacts,
        RetentionPolicy::KeepNewestOnly,
        &artifacts[0],
        now(),
        |a| {
            attempted.push(a.reference.clone());
            if a.reference.starts_with("db-8") {
                anyhow::bail!("permission denied");
            }
            Ok(())
        },
    );

    assert_eq!(attempted.len(), 4);
    let err = result.unwrap_err();
    assert!(format!("{:#}", err).contains("db-8-7-2024.tar.gz"));
}

#[test]
fn test_prune_reports_deleted() {
    let artifacts = daily();
    let report = prune(
        &artifacts,
        RetentionPolicy::MaxAgeDays(3),
        &artifacts[0],
        now(),
        |_| Ok(()),
    )
    .unwrap();

    assert_eq!(report.deleted, vec!["db-6-7-2024.tar.gz"]);
    assert!(report.failed.is_empty());
}
