//! Utilities for running commands with proper error handling and timeouts

use anyhow::{Context, Result};
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use tracing::{debug, error};

/// Errors a caller may want to tell apart from an ordinary failing command
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Command timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Command failed with exit code {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },
}

/// Run a command with optional timeout, failing on a non-zero exit
pub fn run_command(program: &str, args: &[&str], timeout: Option<Duration>) -> Result<Output> {
    let output = run_command_unchecked(program, args, timeout)?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        error!("Command failed: {} {}", program, args.join(" "));
        error!("Stderr: {}", stderr);
        return Err(CommandError::Failed {
            code: output.status.code(),
            stderr,
        }
        .into());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.is_empty() {
        debug!("Command output: {}", stdout.trim_end());
    }

    Ok(output)
}

/// Run a command and hand back its output whatever the exit status
pub fn run_command_unchecked(
    program: &str,
    args: &[&str],
    timeout: Option<Duration>,
) -> Result<Output> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    debug!("Running command: {} {}", program, args.join(" "));

    match timeout {
        Some(timeout_duration) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to build runtime for command deadline")?;

            runtime.block_on(async {
                let mut cmd = tokio::process::Command::from(cmd);
                cmd.kill_on_drop(true);
                match tokio::time::timeout(timeout_duration, cmd.output()).await {
                    Ok(output) => output.context(format!("Failed to execute {}", program)),
                    Err(_) => Err(CommandError::TimedOut(timeout_duration).into()),
                }
            })
        }
        None => cmd
            .output()
            .context(format!("Failed to execute {}", program)),
    }
}

/// Run a command and return stdout as string
pub fn run_command_stdout(
    program: &str,
    args: &[&str],
    timeout: Option<Duration>,
) -> Result<String> {
    let output = run_command(program, args, timeout)?;
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// True when the error chain bottoms out in a deadline expiry
pub fn is_timeout(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<CommandError>(),
            Some(CommandError::TimedOut(_))
        )
    })
}
