//! Crash-safe file writes and cross-process file locks
//!
//! Every mutable file in a project directory goes through [`atomic_write`]:
//! the bytes land in a hidden temp file next to the target, are flushed to
//! the device, and only then renamed over the target. Readers therefore see
//! either the previous complete file or the new complete file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{MemoryError, Result};

/// Prefix shared by all in-flight temp files
pub const TEMP_PREFIX: &str = ".tmp-";

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(2);

/// Hidden sibling path used while writing `target`
pub fn temp_path_for(target: &Path) -> Result<PathBuf> {
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| MemoryError::invalid_path(target.display().to_string()))?;
    let nonce = Uuid::new_v4().simple().to_string();
    Ok(target.with_file_name(format!("{TEMP_PREFIX}{name}-{}", &nonce[..8])))
}

/// True for names produced by [`temp_path_for`]
pub fn is_temp_file(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX)
}

/// Write `bytes` to `target` atomically and durably
pub fn atomic_write(target: &Path, bytes: &[u8]) -> Result<()> {
    let temp = temp_path_for(target)?;

    let written = (|| -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp)?;
        file.write_all(bytes)?;
        // Reach the device, not just the page cache, before the rename
        file.sync_all()?;
        Ok(())
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp, target) {
        let _ = fs::remove_file(&temp);
        return Err(e.into());
    }

    sync_parent_dir(target);
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically
pub fn write_json_atomic<T: Serialize>(target: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write(target, &bytes)
}

/// Read a JSON file, returning `None` if it does not exist
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn sync_parent_dir(target: &Path) {
    if let Some(parent) = target.parent() {
        if let Ok(dir) = File::open(parent) {
            if let Err(e) = dir.sync_all() {
                log::debug!("Directory fsync failed for {}: {}", parent.display(), e);
            }
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_target: &Path) {}

/// Seconds since the file was last modified, if known
pub fn file_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    SystemTime::now().duration_since(modified).ok()
}

/// Exclusive advisory lock held through a `.lock` file
///
/// The lock file is created with `create_new`, so only one process can hold
/// it. It is removed when the guard drops. A lock file older than the stale
/// age is assumed to belong to a crashed holder and is broken.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Acquire the lock, retrying until `timeout` elapses
    pub fn acquire(path: impl Into<PathBuf>, timeout: Duration, stale_after: Duration) -> Result<Self> {
        let path = path.into();
        let started = Instant::now();

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if file_age(&path).is_some_and(|age| age > stale_after) {
                        break_stale_lock(&path, stale_after)?;
                        continue;
                    }
                    if started.elapsed() >= timeout {
                        return Err(MemoryError::LockTimeout(path));
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Move a stale lock out of the way
///
/// Rename is atomic, so only one contender gets the stale file. Its age is
/// checked again after the move: a fresh file means another contender broke
/// the lock and re-took it in between, and it is linked back into place.
/// Returns true if a stale lock was removed.
fn break_stale_lock(path: &Path, stale_after: Duration) -> Result<bool> {
    let aside = temp_path_for(path)?;
    match fs::rename(path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    }

    if file_age(&aside).is_some_and(|age| age > stale_after) {
        log::warn!("Breaking stale lock {}", path.display());
        let _ = fs::remove_file(&aside);
        return Ok(true);
    }

    // hard_link fails if a third contender already created the lock
    if let Err(e) = fs::hard_link(&aside, path) {
        log::warn!("Could not restore live lock {}: {}", path.display(), e);
    }
    let _ = fs::remove_file(&aside);
    Ok(false)
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::debug!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}
