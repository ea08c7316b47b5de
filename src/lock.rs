//! File-based run lock with TTL staleness.
//!
//! Uses `O_CREAT | O_EXCL` semantics for atomic lock creation and writes a
//! small JSON payload recording who locked and until when. A run that finds
//! the lock present and unexpired skips instead of blocking; an expired or
//! unreadable lock is reclaimed. A RAII guard releases the lock on drop,
//! which covers every exit path including early returns.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Result, SyncError};

/// Default time-to-live for a run lock: 30 minutes.
pub const DEFAULT_TTL_SECS: u64 = 30 * 60;

/// Contents of a lock file. The PID is informational; expiry alone decides
/// staleness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// RAII guard that releases the lock file on drop.
pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

impl LockGuard {
    /// Get the path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Try to acquire the run lock at the given path.
///
/// Creates the lock file with `O_CREAT | O_EXCL` and writes a `LockInfo`
/// payload whose expiry is `ttl_secs` from now. If the file already exists
/// and is unexpired, returns `Ok(None)` so the caller can skip the run.
/// An expired or unreadable lock file is removed, after re-checking that
/// it has not changed hands, and the creation retried once; losing that
/// race to another process also returns `Ok(None)`.
pub fn try_acquire(lock_path: &Path, ttl_secs: u64) -> Result<Option<LockGuard>> {
    if let Some(parent) = lock_path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    if let Some(guard) = try_create_lock(lock_path, ttl_secs)? {
        return Ok(Some(guard));
    }

    // Lock file exists. Reclaim it only once it has expired.
    let observed = read_info(lock_path);
    match &observed {
        Some(info) if !info.is_expired() => {
            debug!(
                path = %lock_path.display(),
                holder = info.pid,
                expires_at = %info.expires_at,
                "lock held"
            );
            return Ok(None);
        }
        Some(info) => {
            warn!(
                path = %lock_path.display(),
                holder = info.pid,
                expired_at = %info.expires_at,
                "removing expired lock"
            );
        }
        None => {
            warn!(path = %lock_path.display(), "removing unreadable lock file");
        }
    }

    remove_if_matches(lock_path, &observed);
    try_create_lock(lock_path, ttl_secs)
}

/// Remove the lock file only while its payload still matches `observed`.
///
/// Re-reading before the unlink guards against the race where another
/// process reclaimed the same expired lock and already rewrote it between
/// our checks; unlinking then would strip the new holder of its lock.
fn remove_if_matches(lock_path: &Path, observed: &Option<LockInfo>) {
    if read_info(lock_path) == *observed {
        let _ = fs::remove_file(lock_path);
    }
}

/// Try to create the lock file atomically.
///
/// Returns `Ok(None)` when the file already exists.
fn try_create_lock(lock_path: &Path, ttl_secs: u64) -> Result<Option<LockGuard>> {
    let mut file = match OpenOptions::new()
        .write(true)
        .create_new(true) // O_CREAT | O_EXCL
        .open(lock_path)
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    // Guard first, so a failed payload write still cleans the file up.
    let guard = LockGuard {
        path: lock_path.to_path_buf(),
    };

    let now = Utc::now();
    let info = LockInfo {
        pid: std::process::id(),
        acquired_at: now,
        expires_at: now + Duration::seconds(ttl_secs as i64),
    };
    let payload = serde_json::to_string(&info).map_err(|e| SyncError::state(lock_path, e))?;
    writeln!(file, "{payload}")?;

    Ok(Some(guard))
}

/// Read the payload of an existing lock file.
///
/// Returns `None` if the file is missing, unreadable, or not a valid
/// payload.
pub fn read_info(lock_path: &Path) -> Option<LockInfo> {
    let content = fs::read_to_string(lock_path).ok()?;
    serde_json::from_str(content.trim()).ok()
}
