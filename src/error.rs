//! Error types for feed synchronization.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for feed synchronization.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed '{feed}' returned an empty body")]
    EmptyFeed { feed: String },

    #[error("feed '{feed}' could not be parsed: {reason}")]
    FeedParse { feed: String, reason: String },

    #[error("state file {}: {reason}", path.display())]
    State { path: PathBuf, reason: String },

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("asset URL rejected: {0}")]
    IneligibleUrl(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("trigger secret is not configured")]
    TriggerDisabled,

    #[error("trigger token rejected")]
    Unauthorized,
}

impl SyncError {
    /// Wrap an underlying error with the state file it concerns.
    pub(crate) fn state(path: &Path, err: impl std::fmt::Display) -> Self {
        SyncError::State {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    }
}
