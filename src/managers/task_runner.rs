//! Ephemeral helper containers
//!
//! Every operation that touches volume contents (archive, extract) runs in a
//! short-lived helper that mounts the volume at [`DATA_DIR`] and, optionally,
//! a host directory at [`BACKUP_DIR`]. The runner owns the create, start,
//! wait, clean-up sequence so no caller has to get it right twice.

use crate::labels::LabelKeys;
use crate::utils::runtime::{ContainerRuntime, HelperMount, HelperSpec, MountKind, WaitStatus};
use rand::Rng;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the target volume is mounted inside a helper
pub const DATA_DIR: &str = "/data";

/// Where the destination host directory is mounted inside a helper
pub const BACKUP_DIR: &str = "/backups";

const NAME_LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The helper ran and its process failed; the container is kept for inspection
    #[error("helper {helper} exited with code {exit_code}")]
    Exited { helper: String, exit_code: i64 },

    /// The helper overran its deadline and was force-removed
    #[error("helper {helper} did not finish within {timeout:?}")]
    TimedOut { helper: String, timeout: Duration },

    /// The runtime itself failed (create, start, wait)
    #[error("runtime fault running helper {helper}")]
    Infrastructure {
        helper: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Runs commands in throwaway containers with a volume mounted
#[derive(Clone)]
pub struct TaskRunner {
    runtime: Arc<dyn ContainerRuntime>,
    image: String,
    labels: LabelKeys,
    timeout: Option<Duration>,
}

impl TaskRunner {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        image: &str,
        labels: LabelKeys,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            runtime,
            image: image.to_string(),
            labels,
            timeout,
        }
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Pull the helper image if the runtime does not have it yet
    pub fn prepare(&self) -> anyhow::Result<()> {
        self.runtime.ensure_image(&self.image)
    }

    /// Run `command` in a helper with `volume` at [`DATA_DIR`] and `host_dir`
    /// (if any) at [`BACKUP_DIR`], blocking until it exits.
    ///
    /// On exit code 0 the helper is removed (its volumes are not). A non-zero
    /// exit leaves the helper in place so it can be inspected.
    pub fn run_in_mounted_context(
        &self,
        volume: &str,
        host_dir: Option<&Path>,
        command: &[String],
    ) -> Result<(), TaskError> {
        let spec = self.helper_spec(volume, host_dir, command);
        let helper = spec.name.clone();

        debug!("Creating helper {} for volume {}: {:?}", helper, volume, command);
        let id = self
            .runtime
            .create_helper(&spec)
            .map_err(|e| infrastructure(&helper, e))?;

        if let Err(e) = self.runtime.start(&id) {
            if let Err(cleanup) = self.runtime.force_remove(&id) {
                warn!("Failed to remove helper {} that never started: {}", helper, cleanup);
            }
            return Err(infrastructure(&helper, e));
        }

        let status = self
            .runtime
            .wait_for_exit(&id, self.timeout)
            .map_err(|e| infrastructure(&helper, e))?;

        match status {
            WaitStatus::Exited(0) => {
                if let Err(e) = self.runtime.remove(&id) {
                    warn!("Helper {} succeeded but could not be removed: {}", helper, e);
                }
                info!("Helper {} finished for volume {}", helper, volume);
                Ok(())
            }
            WaitStatus::Exited(exit_code) => {
                warn!(
                    "Helper {} ({}) exited with code {}, leaving it for inspection",
                    helper, id, exit_code
                );
                Err(TaskError::Exited { helper, exit_code })
            }
            WaitStatus::TimedOut => {
                let timeout = self.timeout.unwrap_or_default();
                warn!("Helper {} overran {:?}, removing it", helper, timeout);
                if let Err(e) = self.runtime.force_remove(&id) {
                    warn!("Failed to force-remove helper {}: {}", helper, e);
                }
                Err(TaskError::TimedOut { helper, timeout })
            }
        }
    }

    fn helper_spec(&self, volume: &str, host_dir: Option<&Path>, command: &[String]) -> HelperSpec {
        let mut mounts = vec![HelperMount {
            kind: MountKind::NamedVolume,
            source: volume.to_string(),
            target: DATA_DIR.to_string(),
        }];
        if let Some(dir) = host_dir {
            mounts.push(HelperMount {
                kind: MountKind::BindMount,
                source: dir.display().to_string(),
                target: BACKUP_DIR.to_string(),
            });
        }

        HelperSpec {
            name: helper_name(volume),
            image: self.image.clone(),
            command: command.to_vec(),
            labels: self.labels.task_labels(),
            mounts,
        }
    }
}

fn infrastructure(helper: &str, err: anyhow::Error) -> TaskError {
    TaskError::Infrastructure {
        helper: helper.to_string(),
        source: err.into(),
    }
}

/// `backup-<volume>-<5 random letters>`
fn helper_name(volume: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..5)
        .map(|_| NAME_LETTERS[rng.gen_range(0..NAME_LETTERS.len())] as char)
        .collect();
    format!("backup-{}-{}", volume, suffix)
}
