//! Per-schedule lock so scheduler ticks never overlap
//!
//! A second `run` for a schedule whose previous run is still going fails fast
//! instead of stopping the same workloads twice.

use anyhow::{Context, Result};
use fd_lock::{RwLock, RwLockWriteGuard};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Held for the duration of one schedule run
pub struct ScheduleLock {
    // field order matters: the guard must drop before the lock it points into
    _guard: Option<RwLockWriteGuard<'static, File>>,
    _lock: Box<RwLock<File>>,
    lock_path: PathBuf,
}

impl ScheduleLock {
    /// Take the lock for `schedule_name` in `lock_dir`, failing if it is held
    pub fn acquire(lock_dir: &Path, schedule_name: &str) -> Result<Self> {
        let lock_path = Self::lock_path(lock_dir, schedule_name);
        debug!("Attempting to acquire lock: {:?}", lock_path);

        std::fs::create_dir_all(lock_dir)
            .context(format!("Failed to create lock directory {:?}", lock_dir))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .context(format!("Failed to open lock file: {:?}", lock_path))?;

        let mut lock = Box::new(RwLock::new(file));
        let lock_ptr: *mut RwLock<File> = &mut *lock;

        // SAFETY: the RwLock lives on the heap behind `_lock`, which is never
        // moved out of or replaced while `_guard` exists, and `_guard` is
        // declared first so it is dropped before the box is freed.
        let guard = unsafe { (*lock_ptr).try_write() }.context(format!(
            "Schedule '{}' is already running (lock {:?} held)",
            schedule_name, lock_path
        ))?;
        let guard: RwLockWriteGuard<'static, File> = unsafe { std::mem::transmute(guard) };

        info!("Acquired lock for schedule: {}", schedule_name);

        Ok(Self {
            _guard: Some(guard),
            _lock: lock,
            lock_path,
        })
    }

    fn lock_path(lock_dir: &Path, schedule_name: &str) -> PathBuf {
        lock_dir.join(format!("volume-backup-{}.lock", schedule_name))
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for ScheduleLock {
    fn drop(&mut self) {
        self._guard.take();
        debug!("Released lock: {:?}", self.lock_path);
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            debug!("Failed to remove lock file: {}", e);
        }
    }
}
