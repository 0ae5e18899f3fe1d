//! Docker volume integration tests
//!
//! These tests require Docker and drive the library against a real daemon.
//! Run with: `cargo test -p volume-backup-tests --test integration -- --ignored`

use super::common::*;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use test_utils::{ContainerRuntime, FilesystemOptions, RetentionPolicy};
use volume_backup::labels::LabelKeys;
use volume_backup::managers::restore;
use volume_backup::strategies::{todays_archive_name, DestinationStrategy, FilesystemDestination};
use volume_backup::utils::runtime::DockerCli;
use volume_backup::{BackupManager, BackupOutcome, RestartOutcome, RestoreManager, TaskRunner};

fn runtime() -> Arc<dyn ContainerRuntime> {
    Arc::new(DockerCli::new(Duration::from_secs(60)))
}

fn runner(runtime: Arc<dyn ContainerRuntime>) -> TaskRunner {
    TaskRunner::new(
        runtime,
        TEST_IMAGE,
        LabelKeys::new(TEST_LABEL_PREFIX),
        Some(Duration::from_secs(120)),
    )
}

fn destination(dir: &TempDir) -> Box<dyn DestinationStrategy> {
    Box::new(FilesystemDestination::new(&FilesystemOptions {
        name: "local".to_string(),
        host_path: dir.path().to_path_buf(),
        local_path: None,
        retention: RetentionPolicy::MaxAgeDays(0),
    }))
}

/// Back up a labelled container's volume, then restore it into a fresh volume
#[test]
#[ignore] // Requires Docker
#[serial]
fn test_backup_then_restore_round_trip() {
    if !is_docker_available() {
        println!("Docker not available, skipping test");
        return;
    }

    let volume = "volume-backup-it-data";
    let restored = "volume-backup-it-restored";
    let container = "volume-backup-it-app";
    let backups = TempDir::new().expect("Failed to create temp dir");

    create_test_volume(volume, "hello from the volume").expect("Failed to create volume");
    let _volume_guard = VolumeGuard::new(volume);
    let _restored_guard = VolumeGuard::new(restored);
    start_workload(container, volume, &[("enabled", "true")]).expect("Failed to start container");
    let _container_guard = ContainerGuard::new(container);

    let rt = runtime();
    let manager = BackupManager::new(
        rt.clone(),
        runner(rt.clone()),
        vec![destination(&backups)],
        LabelKeys::new(TEST_LABEL_PREFIX),
    );
    let report = manager.run_backup_cycle().expect("Backup cycle failed");

    assert_eq!(report.workloads.len(), 1);
    assert_eq!(report.workloads[0].outcome, BackupOutcome::Succeeded);
    assert_eq!(report.workloads[0].restart, RestartOutcome::Restarted);
    assert!(is_running(container), "Container should be running again");

    let archive = backups.path().join(todays_archive_name(volume));
    assert!(archive.exists(), "Archive should exist");
    assert!(archive.metadata().unwrap().len() > 0, "Archive should not be empty");

    let restore_manager = RestoreManager::new(rt.clone(), runner(rt), destination(&backups));
    let outcome = restore_manager
        .restore(restored, Some(&todays_archive_name(volume)))
        .expect("Restore failed");
    assert_eq!(outcome.volume_name, restored);

    let content = read_volume_data(restored).expect("Failed to read restored data");
    assert_eq!(content, "hello from the volume");
}

/// Containers without the enabled label are neither stopped nor archived
#[test]
#[ignore] // Requires Docker
#[serial]
fn test_unlabelled_container_untouched() {
    if !is_docker_available() {
        println!("Docker not available, skipping test");
        return;
    }

    let volume = "volume-backup-it-unlabelled";
    let container = "volume-backup-it-unlabelled-app";
    let backups = TempDir::new().expect("Failed to create temp dir");

    create_test_volume(volume, "leave me alone").expect("Failed to create volume");
    let _volume_guard = VolumeGuard::new(volume);
    start_workload(container, volume, &[("enabled", "false")]).expect("Failed to start container");
    let _container_guard = ContainerGuard::new(container);

    let rt = runtime();
    let manager = BackupManager::new(
        rt.clone(),
        runner(rt),
        vec![destination(&backups)],
        LabelKeys::new(TEST_LABEL_PREFIX),
    );
    let report = manager.run_backup_cycle().expect("Backup cycle failed");

    assert!(report.workloads.is_empty());
    assert!(is_running(container));
    assert!(!backups.path().join(todays_archive_name(volume)).exists());
}

/// Restore an archive lying on the host into a volume that does not exist yet
#[test]
#[ignore] // Requires Docker
#[serial]
fn test_create_volume_from_archive() {
    if !is_docker_available() {
        println!("Docker not available, skipping test");
        return;
    }

    let source = "volume-backup-it-source";
    let target = "volume-backup-it-created";
    let backups = TempDir::new().expect("Failed to create temp dir");

    create_test_volume(source, "seed data").expect("Failed to create volume");
    let _source_guard = VolumeGuard::new(source);
    let _target_guard = VolumeGuard::new(target);

    let rt = runtime();
    let runner = runner(rt.clone());
    let archive_name = todays_archive_name(source);
    runner
        .run_in_mounted_context(
            source,
            Some(backups.path()),
            &volume_backup::strategies::archive_command(&format!("/backups/{}", archive_name)),
        )
        .expect("Failed to archive source volume");

    restore::create_volume_from_archive(
        rt.as_ref(),
        &runner,
        target,
        &backups.path().join(&archive_name),
    )
    .expect("Failed to create volume from archive");

    assert!(rt.volume_exists(target).unwrap());
    assert_eq!(read_volume_data(target).unwrap(), "seed data");
}
