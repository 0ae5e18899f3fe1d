//! Crontab installation for schedules

use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

const MARKER_PREFIX: &str = "# volume-backup - Schedule:";

/// Path of the running binary, used in installed cron lines
pub fn get_binary_path() -> Result<PathBuf> {
    env::current_exe().context("Failed to get current executable path")
}

/// Current user's crontab (empty if there is none)
pub fn get_crontab() -> Result<String> {
    let output = Command::new("crontab")
        .arg("-l")
        .output()
        .context("Failed to execute crontab -l")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("no crontab") {
            return Ok(String::new());
        }
        anyhow::bail!("Failed to read crontab: {}", stderr);
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Replace the current user's crontab
pub fn set_crontab(content: &str) -> Result<()> {
    use std::io::Write;

    let mut child = Command::new("crontab")
        .arg("-")
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .context("Failed to spawn crontab")?;

    let mut stdin = child.stdin.take().context("Failed to open crontab stdin")?;
    stdin
        .write_all(content.as_bytes())
        .context("Failed to write to crontab stdin")?;
    drop(stdin);

    let output = child.wait_with_output().context("Failed to wait for crontab")?;
    if !output.status.success() {
        anyhow::bail!("Crontab command failed: {}", String::from_utf8_lossy(&output.stderr));
    }

    info!("Crontab updated successfully");
    Ok(())
}

fn marker(schedule_name: &str) -> String {
    format!("{} {}", MARKER_PREFIX, schedule_name)
}

/// Marker comment plus cron line running one schedule
pub fn cron_entry(schedule_name: &str, schedule: &str, binary: &Path, config_path: &Path) -> String {
    format!(
        "{}\n{} {} --config {} run --schedule {}",
        marker(schedule_name),
        schedule,
        binary.display(),
        config_path.display(),
        schedule_name
    )
}

/// Crontab content with the entry for `schedule_name` replaced by `entry`
/// (or removed when `entry` is None). Other lines are left alone.
pub fn replace_entry(existing: &str, schedule_name: &str, entry: Option<&str>) -> String {
    let marker = marker(schedule_name);
    let mut lines = Vec::new();
    let mut skip_next = false;

    for line in existing.lines() {
        if line.trim_end() == marker {
            skip_next = true;
            continue;
        }
        if skip_next {
            skip_next = false;
            continue;
        }
        lines.push(line.to_string());
    }

    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    if let Some(entry) = entry {
        lines.push(entry.to_string());
    }

    if lines.is_empty() {
        String::new()
    } else {
        lines.join("\n") + "\n"
    }
}

/// Install (or update) the cron job for a schedule
pub fn add_cron_job(schedule_name: &str, schedule: &str, config_path: &Path, dry_run: bool) -> Result<()> {
    let entry = cron_entry(schedule_name, schedule, &get_binary_path()?, config_path);

    if dry_run {
        println!("  [DRY RUN] Would add cron job:");
        println!("    {}", entry.replace('\n', "\n    "));
        return Ok(());
    }

    let existing = get_crontab()?;
    set_crontab(&replace_entry(&existing, schedule_name, Some(&entry)))?;

    info!("Installed cron job for schedule: {}", schedule_name);
    Ok(())
}

/// Remove the cron job for a schedule, if present
pub fn remove_cron_job(schedule_name: &str) -> Result<()> {
    let existing = get_crontab()?;
    if !existing.contains(&marker(schedule_name)) {
        return Ok(());
    }
    set_crontab(&replace_entry(&existing, schedule_name, None))?;
    info!("Removed cron job for schedule: {}", schedule_name);
    Ok(())
}

/// Basic syntax check: five whitespace-separated fields
pub fn validate_cron_schedule(schedule: &str) -> bool {
    schedule.split_whitespace().count() == 5
}

/// Schedule names with an installed cron job
pub fn list_cron_jobs() -> Result<Vec<String>> {
    Ok(get_crontab()?
        .lines()
        .filter_map(|l| l.strip_prefix(MARKER_PREFIX))
        .map(|name| name.trim().to_string())
        .collect())
}
