//! Atomic JSON state file read/write.
//!
//! Generic utilities for the small JSON files this crate persists between
//! runs (cursor, snapshot, catalog, asset ledger). Writes go to a `.tmp`
//! sibling first and are renamed into place so readers never observe a
//! partially-written file.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use crate::error::{Result, SyncError};

/// Read a JSON state file, returning `T::default()` if the file doesn't exist
/// or is empty.
///
/// Returns an error if the file exists but can't be parsed.
pub fn read<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }

    let content =
        std::fs::read_to_string(path).map_err(|e| SyncError::state(path, e))?;

    if content.trim().is_empty() {
        return Ok(T::default());
    }

    serde_json::from_str(&content).map_err(|e| SyncError::state(path, e))
}

/// Write data to a JSON state file atomically.
///
/// Writes to a temporary file (`.tmp` suffix) then renames to the target
/// path. The rename is what makes the update atomic on the same filesystem.
pub fn write_atomic<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| SyncError::state(path, e))?;
        }
    }

    let tmp_path = path.with_extension("tmp");

    let json =
        serde_json::to_string_pretty(data).map_err(|e| SyncError::state(path, e))?;

    std::fs::write(&tmp_path, &json).map_err(|e| SyncError::state(&tmp_path, e))?;

    std::fs::rename(&tmp_path, path).map_err(|e| SyncError::state(path, e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct TestStore {
        items: HashMap<String, String>,
    }

    #[test]
    fn test_read_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nonexistent.json");

        let store: TestStore = read(&path).unwrap();
        assert_eq!(store, TestStore::default());
    }

    #[test]
    fn test_write_atomic_and_read() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.json");

        let mut store = TestStore::default();
        store.items.insert("key".to_string(), "value".to_string());

        write_atomic(&path, &store).unwrap();

        let loaded: TestStore = read(&path).unwrap();
        assert_eq!(loaded.items.get("key").unwrap(), "value");

        // Ensure tmp file was cleaned up
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_write_atomic_creates_parent_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("dir").join("test.json");

        let store = TestStore::default();
        write_atomic(&path, &store).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_read_empty_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("empty.json");
        std::fs::write(&path, "").unwrap();

        let store: TestStore = read(&path).unwrap();
        assert_eq!(store, TestStore::default());
    }

    #[test]
    fn test_read_corrupt_file_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("corrupt.json");
        std::fs::write(&path, "{not json").unwrap();

        let result: Result<TestStore> = read(&path);
        assert!(result.is_err());
    }
}
