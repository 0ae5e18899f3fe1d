//! Test fixtures and sample data
//!
//! Workload builders, archive seeding and a helper effect that makes the mock
//! runtime's helpers "write" the archives their tar command names.

use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use volume_backup::utils::runtime::{HelperSpec, Mount, MountKind, RunState, Workload};

pub const LABEL_PREFIX: &str = "volume-backup";

/// Labels that opt a workload into backups
pub fn enabled_labels() -> Vec<(String, String)> {
    vec![(format!("{}.enabled", LABEL_PREFIX), "true".to_string())]
}

/// A running workload with the given labels and mounts
pub fn workload(id: &str, labels: &[(String, String)], mounts: Vec<Mount>) -> Workload {
    Workload {
        id: id.to_string(),
        name: id.to_string(),
        state: RunState::Running,
        mounts,
        labels: labels.iter().cloned().collect::<HashMap<_, _>>(),
    }
}

/// A running, backup-enabled workload mounting the given named volumes
pub fn labelled_workload(id: &str, volumes: &[&str]) -> Workload {
    let mounts = volumes
        .iter()
        .map(|v| Mount::volume(v, &format!("/mnt/{}", v)))
        .collect();
    workload(id, &enabled_labels(), mounts)
}

/// Add one label to a workload
pub fn with_label(mut workload: Workload, key: &str, value: &str) -> Workload {
    workload
        .labels
        .insert(format!("{}.{}", LABEL_PREFIX, key), value.to_string());
    workload
}

/// Create an (empty) archive file whose mtime is `age_days` in the past
pub fn write_archive(dir: &Path, name: &str, age_days: i64) -> PathBuf {
    let path = dir.join(name);
    let file = File::create(&path).expect("Failed to create archive");
    file.set_modified(SystemTime::from(Utc::now() - Duration::days(age_days)))
        .expect("Failed to set mtime");
    path
}

/// Helper effect for `MockRuntime::with_helper_effect`: write the file the
/// helper's command targets under `/backups/` into the bound host directory.
pub fn write_archive_effect(spec: &HelperSpec) {
    let host = spec
        .mounts
        .iter()
        .find(|m| m.kind == MountKind::BindMount)
        .map(|m| PathBuf::from(&m.source));
    let target = spec.command.iter().find_map(|arg| arg.strip_prefix("/backups/"));

    if let (Some(host), Some(target)) = (host, target) {
        let path = host.join(target);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create archive directory");
        }
        fs::write(path, format!("archive of {}", spec.volume_name().unwrap_or("?")))
            .expect("Failed to write archive");
    }
}

/// Minimal valid config TOML template
pub fn minimal_config_toml() -> &'static str {
    r#"
[global]
log_directory = "{log_dir}"
lock_directory = "{lock_dir}"

[schedules.nightly]
schedule = "0 2 * * *"

[[schedules.nightly.destinations]]
type = "filesystem"
name = "local"
host_path = "{backup_path}"
retention = { max_age_days = 14 }
"#
}

/// Config with a filesystem and an S3 schedule
pub fn multi_schedule_config_toml() -> &'static str {
    r#"
[global]
log_directory = "{log_dir}"
lock_directory = "{lock_dir}"
label_prefix = "acme.backup"

[schedules.nightly]
schedule = "0 2 * * *"

[[schedules.nightly.destinations]]
type = "filesystem"
name = "local"
host_path = "{backup_path}"

[schedules.offsite]
schedule = "30 3 * * 0"
schedule_key = "weekly"

[[schedules.offsite.destinations]]
type = "s3"
name = "bucket"
host_path = "{backup_path}"
bucket = "backups"
region = "eu-central-1"
retention = "keep_newest_only"
"#
}

/// Fill `{placeholders}` in a config template
pub fn render_template(template: &str, vars: &[(&str, &Path)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, path)| {
        acc.replace(&format!("{{{}}}", key), &path.display().to_string())
    })
}
