//! Common utilities for integration tests
//!
//! Cleanup guards and docker helpers for integration tests.

use anyhow::Result;
use std::process::Command;

pub const TEST_LABEL_PREFIX: &str = "volume-backup-test";
pub const TEST_IMAGE: &str = "alpine:latest";

/// Guard that ensures Docker container cleanup on drop (even on panic)
pub struct ContainerGuard {
    name: String,
}

impl ContainerGuard {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let _ = Command::new("docker").args(["rm", "-f", &self.name]).output();
    }
}

/// Guard that ensures Docker volume cleanup on drop (even on panic)
pub struct VolumeGuard {
    name: String,
}

impl VolumeGuard {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Drop for VolumeGuard {
    fn drop(&mut self) {
        let _ = Command::new("docker").args(["volume", "rm", "-f", &self.name]).output();
    }
}

/// Helper to check if Docker is available
pub fn is_docker_available() -> bool {
    Command::new("docker")
        .args(["ps"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn docker(args: &[&str]) -> Result<String> {
    let output = Command::new("docker").args(args).output()?;
    if !output.status.success() {
        anyhow::bail!(
            "docker {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Create a volume holding `/test.txt` with the given content
pub fn create_test_volume(name: &str, content: &str) -> Result<()> {
    docker(&["volume", "create", name])?;
    docker(&[
        "run",
        "--rm",
        "-v",
        &format!("{}:/data", name),
        TEST_IMAGE,
        "sh",
        "-c",
        &format!("echo '{}' > /data/test.txt", content),
    ])?;
    Ok(())
}

/// Read `/test.txt` back out of a volume
pub fn read_volume_data(name: &str) -> Result<String> {
    docker(&[
        "run",
        "--rm",
        "-v",
        &format!("{}:/data", name),
        TEST_IMAGE,
        "cat",
        "/data/test.txt",
    ])
}

/// Start a long-running container mounting `volume` at /data with extra labels
pub fn start_workload(name: &str, volume: &str, labels: &[(&str, &str)]) -> Result<()> {
    let mount = format!("{}:/data", volume);
    let label_args: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}.{}={}", TEST_LABEL_PREFIX, k, v))
        .collect();

    let mut args: Vec<&str> = vec!["run", "-d", "--name", name, "-v", mount.as_str()];
    for label in &label_args {
        args.push("--label");
        args.push(label);
    }
    args.extend([TEST_IMAGE, "sleep", "600"]);

    docker(&args)?;
    Ok(())
}

pub fn is_running(name: &str) -> bool {
    docker(&["inspect", "-f", "{{.State.Running}}", name])
        .map(|s| s == "true")
        .unwrap_or(false)
}
