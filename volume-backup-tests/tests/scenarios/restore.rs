//! Restores and snapshot listings

use chrono::{Duration, Utc};
use test_utils::{
    write_archive, MockEngine, MockObjectStore, MockRuntime, RetentionPolicy, StoreCall,
};
use volume_backup::strategies::object_store::STAGING_DIR;
use volume_backup::RestoreError;

/// Four daily archives of `db`, the 4th of July being the newest
fn engine_with_daily_archives(runtime: MockRuntime) -> MockEngine {
    let engine = MockEngine::new(runtime);
    let dir = engine.backup_dir();
    for day in 1..=4 {
        write_archive(&dir, &format!("db-{}-7-2024.tar.gz", day), 4 - day);
    }
    engine
}

#[test]
fn test_restore_uses_newest_snapshot() {
    let engine = engine_with_daily_archives(MockRuntime::new().with_volumes(vec!["db".to_string()]));
    let manager = engine.restore_manager(engine.filesystem(RetentionPolicy::MaxAgeDays(0)));

    let outcome = manager.restore("db", None).unwrap();

    assert!(outcome.restored_from.ends_with("db-4-7-2024.tar.gz"));
    assert_eq!(outcome.volume_name, "db");

    let specs = engine.runtime.helper_specs();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].image, "ubuntu:latest");
    let script = specs[0].command.last().unwrap();
    assert!(script.starts_with("find /data -mindepth 1 -delete && "));
    assert!(script.contains("'/backups/db-4-7-2024.tar.gz'"));
}

#[test]
fn test_restore_explicit_snapshot() {
    let engine = engine_with_daily_archives(MockRuntime::new());
    let manager = engine.restore_manager(engine.filesystem(RetentionPolicy::MaxAgeDays(0)));

    let outcome = manager.restore("db-copy", Some("db-2-7-2024.tar.gz")).unwrap();

    assert!(outcome.restored_from.ends_with("db-2-7-2024.tar.gz"));
    assert!(engine.runtime.has_volume("db-copy"), "target volume is created");
}

#[test]
fn test_restore_without_snapshot_fails() {
    let engine = MockEngine::new(MockRuntime::new());
    let manager = engine.restore_manager(engine.filesystem(RetentionPolicy::MaxAgeDays(0)));

    let err = manager.restore("missing", None).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RestoreError>(),
        Some(RestoreError::NoArtifact { volume }) if volume == "missing"
    ));
    assert!(engine.runtime.helper_specs().is_empty());
}

#[test]
fn test_failed_extraction_is_reported() {
    let engine = engine_with_daily_archives(MockRuntime::new().with_exit_code(1));
    let manager = engine.restore_manager(engine.filesystem(RetentionPolicy::MaxAgeDays(0)));

    let err = manager.restore("db", None).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RestoreError>(),
        Some(RestoreError::Extraction { .. })
    ));
    // left behind for inspection
    assert_eq!(engine.runtime.remove_calls(), 0);
}

#[test]
fn test_list_newest_only_one_entry_per_volume() {
    let engine = MockEngine::new(MockRuntime::new());
    let dir = engine.backup_dir();
    write_archive(&dir, "db-3-7-2024.tar.gz", 2);
    write_archive(&dir, "db-4-7-2024.tar.gz", 1);
    write_archive(&dir, "cache-4-7-2024.tar.gz", 1);
    let manager = engine.restore_manager(engine.filesystem(RetentionPolicy::MaxAgeDays(0)));

    let all = manager.list_snapshots(None, false).unwrap();
    assert_eq!(all.len(), 3);

    let newest = manager.list_snapshots(None, true).unwrap();
    assert_eq!(newest.len(), 2);
    let db = newest.iter().find(|a| a.volume_name == "db").unwrap();
    assert_eq!(db.file_name, "db-4-7-2024.tar.gz");

    let filtered = manager.list_snapshots(Some("cach"), false).unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].volume_name, "cache");
}

#[test]
fn test_restore_many_continues_after_failure() {
    let runtime = MockRuntime::new().with_exit_code_for_volume("db", 1);
    let engine = MockEngine::new(runtime);
    let dir = engine.backup_dir();
    write_archive(&dir, "db-4-7-2024.tar.gz", 1);
    write_archive(&dir, "cache-4-7-2024.tar.gz", 1);
    let manager = engine.restore_manager(engine.filesystem(RetentionPolicy::MaxAgeDays(0)));

    let volumes = vec!["db".to_string(), "cache".to_string(), "db".to_string()];
    let report = manager.restore_many(&volumes, None).unwrap();

    assert_eq!(report.restored.len(), 1);
    assert_eq!(report.restored[0].volume_name, "cache");
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "db");
}

#[test]
fn test_restore_many_defaults_to_every_volume() {
    let engine = MockEngine::new(MockRuntime::new());
    let dir = engine.backup_dir();
    write_archive(&dir, "db-4-7-2024.tar.gz", 1);
    write_archive(&dir, "cache-4-7-2024.tar.gz", 1);
    let manager = engine.restore_manager(engine.filesystem(RetentionPolicy::MaxAgeDays(0)));

    let report = manager.restore_many(&[], None).unwrap();

    let mut restored: Vec<&str> = report.restored.iter().map(|o| o.volume_name.as_str()).collect();
    restored.sort();
    assert_eq!(restored, vec!["cache", "db"]);
}

#[test]
fn test_restore_many_rejects_explicit_snapshot_for_many_volumes() {
    let engine = engine_with_daily_archives(MockRuntime::new());
    let manager = engine.restore_manager(engine.filesystem(RetentionPolicy::MaxAgeDays(0)));

    let volumes = vec!["db".to_string(), "cache".to_string()];
    assert!(manager.restore_many(&volumes, Some("db-1-7-2024.tar.gz")).is_err());
    assert!(engine.runtime.helper_specs().is_empty());
}

#[test]
fn test_restore_from_object_store_downloads_and_cleans_up() {
    let store = MockObjectStore::new()
        .with_object("db-3-7-2024.tar.gz", Utc::now() - Duration::days(2), b"three")
        .with_object("db-4-7-2024.tar.gz", Utc::now() - Duration::days(1), b"four");
    let engine = MockEngine::new(MockRuntime::new()).with_store(store);
    let manager = engine.restore_manager(engine.object_store(RetentionPolicy::KeepNewestOnly));

    let outcome = manager.restore("db", None).unwrap();

    assert_eq!(outcome.restored_from, "db-4-7-2024.tar.gz");
    assert!(engine
        .store
        .get_calls()
        .contains(&StoreCall::Get { key: "db-4-7-2024.tar.gz".to_string() }));

    // the downloaded copy is gone once the restore returns
    let staging = engine.staging_dir().join(STAGING_DIR);
    let leftovers = std::fs::read_dir(&staging)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}
