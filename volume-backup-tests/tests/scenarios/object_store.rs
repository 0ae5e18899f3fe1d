//! Backups shipped to an object store

use chrono::{Duration, Utc};
use test_utils::{
    labelled_workload, write_archive_effect, MockEngine, MockObjectStore, MockRuntime,
    RetentionPolicy, StoreCall,
};
use volume_backup::strategies::object_store::STAGING_DIR;
use volume_backup::strategies::todays_archive_name;
use volume_backup::{BackupOutcome, RestartOutcome};

fn days_ago(days: i64) -> chrono::DateTime<Utc> {
    Utc::now() - Duration::days(days)
}

#[test]
fn test_keep_newest_only_leaves_one_object_per_volume() {
    let store = MockObjectStore::new()
        .with_object("app-data-1-6-2024.tar.gz", days_ago(30), b"old")
        .with_object("app-data-2-6-2024.tar.gz", days_ago(29), b"older")
        .with_object("other-data-1-6-2024.tar.gz", days_ago(30), b"other");
    let runtime = MockRuntime::new()
        .with_helper_effect(write_archive_effect)
        .with_workload(labelled_workload("app", &["app-data"]));
    let engine = MockEngine::new(runtime).with_store(store);
    let manager = engine.backup_manager(vec![engine.object_store(RetentionPolicy::KeepNewestOnly)]);

    let report = manager.run_backup_cycle().unwrap();
    assert!(!report.has_failures());

    let today = todays_archive_name("app-data");
    let keys = engine.store.keys();
    let app_keys: Vec<&String> = keys.iter().filter(|k| k.starts_with("app-data-")).collect();
    assert_eq!(app_keys, vec![&today]);
    assert!(keys.contains(&"other-data-1-6-2024.tar.gz".to_string()));
    assert_eq!(engine.store.body(&today).unwrap(), b"archive of app-data");
}

#[test]
fn test_staged_archive_removed_after_upload() {
    let runtime = MockRuntime::new()
        .with_helper_effect(write_archive_effect)
        .with_workload(labelled_workload("app", &["app-data"]));
    let engine = MockEngine::new(runtime);
    let manager = engine.backup_manager(vec![engine.object_store(RetentionPolicy::KeepNewestOnly)]);

    manager.run_backup_cycle().unwrap();

    let staged = engine
        .staging_dir()
        .join(STAGING_DIR)
        .join(todays_archive_name("app-data"));
    assert!(!staged.exists());
    assert!(engine
        .store
        .get_calls()
        .contains(&StoreCall::Put { key: todays_archive_name("app-data") }));
}

#[test]
fn test_failed_upload_keeps_staged_archive_and_restarts() {
    let runtime = MockRuntime::new()
        .with_helper_effect(write_archive_effect)
        .with_workload(labelled_workload("app", &["app-data"]));
    let engine = MockEngine::new(runtime).with_store(MockObjectStore::new().with_failing_put());
    let manager = engine.backup_manager(vec![engine.object_store(RetentionPolicy::KeepNewestOnly)]);

    let report = manager.run_backup_cycle().unwrap();

    let app = &report.workloads[0];
    assert!(matches!(app.outcome, BackupOutcome::PartiallyFailed { .. }));
    assert_eq!(app.restart, RestartOutcome::Restarted);

    let staged = engine
        .staging_dir()
        .join(STAGING_DIR)
        .join(todays_archive_name("app-data"));
    assert!(staged.exists());
    assert!(!engine
        .store
        .get_calls()
        .iter()
        .any(|c| matches!(c, StoreCall::Delete { .. })));
}

#[test]
fn test_failed_delete_is_not_a_backup_failure() {
    let store = MockObjectStore::new()
        .with_object("app-data-1-6-2024.tar.gz", days_ago(30), b"old")
        .with_failing_delete();
    let runtime = MockRuntime::new()
        .with_helper_effect(write_archive_effect)
        .with_workload(labelled_workload("app", &["app-data"]));
    let engine = MockEngine::new(runtime).with_store(store);
    let manager = engine.backup_manager(vec![engine.object_store(RetentionPolicy::KeepNewestOnly)]);

    let report = manager.run_backup_cycle().unwrap();

    assert_eq!(report.workloads[0].outcome, BackupOutcome::Succeeded);
    assert!(engine.store.keys().contains(&"app-data-1-6-2024.tar.gz".to_string()));
}

#[test]
fn test_filesystem_and_object_store_in_one_cycle() {
    let runtime = MockRuntime::new()
        .with_helper_effect(write_archive_effect)
        .with_workload(labelled_workload("app", &["app-data"]));
    let engine = MockEngine::new(runtime);
    let manager = engine.backup_manager(vec![
        engine.filesystem(RetentionPolicy::MaxAgeDays(0)),
        engine.object_store(RetentionPolicy::KeepNewestOnly),
    ]);

    let report = manager.run_backup_cycle().unwrap();

    assert_eq!(report.workloads[0].artifacts.len(), 2);
    assert!(engine.backup_dir().join(todays_archive_name("app-data")).exists());
    assert_eq!(engine.store.keys(), vec![todays_archive_name("app-data")]);
    // stopped once for both destinations
    assert_eq!(engine.runtime.stop_calls("app"), 1);
}
