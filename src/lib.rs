//! `feedsync` — incremental synchronization of supplier XML feeds into a local
//! catalog.
//!
//! Provides:
//! - `canonical` / `hash` — canonical JSON form and content hashing
//! - `snapshot` — persisted key-to-hash snapshots with diffing
//! - `cursor` / `lock` — batch resume pointer and TTL-bounded run lock
//! - `feed` — HTTP feed retrieval and XML-to-record parsing
//! - `catalog` / `processor` — catalog mapping and per-record upserts
//! - `orchestrator` — the batch cycle tying the pieces together
//! - `maintenance` — paged purge of previously imported entries
//! - `server` — HTTP trigger endpoint

use std::path::{Path, PathBuf};

use error::Result;

pub mod canonical;
pub mod catalog;
pub mod config;
pub mod cursor;
pub mod error;
pub mod feed;
pub mod hash;
pub mod lock;
pub mod logging;
pub mod maintenance;
pub mod orchestrator;
pub mod processor;
pub mod record;
pub mod server;
pub mod snapshot;
pub mod store;

/// Default state directory name.
const STATE_DIR_NAME: &str = ".feedsync";

/// Environment variable to override the state directory location.
const STATE_DIR_ENV: &str = "FEEDSYNC_STATE_DIR";

/// Get the state directory path.
/// Respects `FEEDSYNC_STATE_DIR` env var, otherwise defaults to `~/.feedsync/`.
pub fn state_dir() -> PathBuf {
    if let Ok(override_path) = std::env::var(STATE_DIR_ENV) {
        return PathBuf::from(override_path);
    }
    dirs_home().join(STATE_DIR_NAME)
}

/// Ensure the state directory exists, creating it if needed.
/// Returns the path to the directory.
pub fn ensure_state_dir() -> Result<PathBuf> {
    let dir = state_dir();
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| error::SyncError::state(&dir, e))?;
    }
    Ok(dir)
}

/// Get the path for a named state file: `~/.feedsync/<name>.json`.
///
/// The file may or may not exist. Use `store::read` to read with a default.
pub fn state_file(name: &str) -> PathBuf {
    state_dir().join(format!("{name}.json"))
}

fn dirs_home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp/feedsync-fallback"))
}

/// Locations of the persisted runtime state.
///
/// Injected into the orchestrator and maintenance passes so tests can root
/// everything in a temporary directory.
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub cursor: PathBuf,
    pub lock: PathBuf,
    pub snapshot: PathBuf,
    pub purge_cursor: PathBuf,
}

impl StatePaths {
    /// Paths under the configured state directory.
    pub fn resolve(config: &config::SyncConfig) -> Self {
        let mut paths = Self::in_dir(&state_dir());
        paths.snapshot = config.snapshot_file();
        paths
    }

    /// Root every path in `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            cursor: dir.join("cursor.json"),
            lock: dir.join("sync.lock"),
            snapshot: dir.join("snapshot.json"),
            purge_cursor: dir.join("purge.json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_paths_respect_env_override() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("state-test");
        std::env::set_var(STATE_DIR_ENV, &root);

        assert_eq!(state_dir(), root);
        assert_eq!(state_file("cursor"), root.join("cursor.json"));

        let created = ensure_state_dir().unwrap();
        assert!(created.exists());

        std::env::remove_var(STATE_DIR_ENV);
    }
}
