//! Persisted batch resume pointer.
//!
//! The cursor records where in the feed the next batch should start. It is
//! a small JSON file written through the atomic store, so a crash can't
//! leave a torn pointer. A missing file reads as offset zero.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::store;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CursorFile {
    offset: usize,
}

/// A resume pointer stored at a fixed path.
///
/// The purge pass keeps its own instance at a different path, so the two
/// offsets never interfere.
#[derive(Debug, Clone)]
pub struct SyncCursor {
    path: PathBuf,
}

impl SyncCursor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current offset, zero when never written.
    pub fn offset(&self) -> Result<usize> {
        let file: CursorFile = store::read(&self.path)?;
        Ok(file.offset)
    }

    /// Persist a new offset.
    pub fn set_offset(&self, offset: usize) -> Result<()> {
        store::write_atomic(&self.path, &CursorFile { offset })
    }

    /// Reset the offset to zero. Independent of lock state.
    pub fn reset(&self) -> Result<()> {
        self.set_offset(0)
    }
}
