//! Runtime configuration.
//!
//! Configuration comes from an optional JSON file (default
//! `~/.feedsync/config.json`) with `FEEDSYNC_*` environment variables
//! layered on top. Every field has a default so a missing file is fine;
//! the one hard requirement checked before a run is the items feed URL.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, SyncError};
use crate::hash::HashAlgorithm;
use crate::lock;

/// Feed endpoint URLs.
///
/// The items feed is required. Blank auxiliary URLs disable the matching
/// lookup, the run proceeds without that data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedEndpoints {
    pub items: String,
    pub images: String,
    pub series: String,
    pub attributes: String,
    pub features: String,
}

/// What happens to the cursor position held by records that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvancePolicy {
    /// Hold position so failed records are retried on the next run.
    #[default]
    RetryInPlace,
    /// Advance past failures; they get another chance after wraparound.
    SkipAndAdvance,
}

impl FromStr for AdvancePolicy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "retry_in_place" => Ok(AdvancePolicy::RetryInPlace),
            "skip_and_advance" => Ok(AdvancePolicy::SkipAndAdvance),
            other => Err(SyncError::Config(format!(
                "unknown advance policy '{other}' (expected retry_in_place or skip_and_advance)"
            ))),
        }
    }
}

/// The full runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub feeds: FeedEndpoints,
    /// Records handled per run.
    pub batch_size: usize,
    /// Field whose text keys records; blank falls back to positional keys.
    pub key_field: String,
    /// Run lock time-to-live in seconds.
    pub lock_ttl_secs: u64,
    /// Timeout applied to every HTTP call, in seconds.
    pub http_timeout_secs: u64,
    /// Algorithm for record change hashing.
    pub hash_algorithm: HashAlgorithm,
    pub advance_policy: AdvancePolicy,
    /// Skip-unchanged snapshotting. Disabled, every batched record is
    /// reprocessed each cycle.
    pub snapshots: bool,
    /// Snapshot file location; unset uses `<state dir>/snapshot.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,
    /// Shared secret for the HTTP trigger; unset disables the trigger.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_token: Option<String>,
    /// Bind address for `feedsync serve`.
    pub host: String,
    pub port: u16,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            feeds: FeedEndpoints::default(),
            batch_size: 10,
            key_field: "code".to_string(),
            lock_ttl_secs: lock::DEFAULT_TTL_SECS,
            http_timeout_secs: 30,
            hash_algorithm: HashAlgorithm::default(),
            advance_policy: AdvancePolicy::default(),
            snapshots: true,
            snapshot_path: None,
            secret_token: None,
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

impl SyncConfig {
    /// Load configuration from `path` (default `<state dir>/config.json`)
    /// and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let default_path;
        let path = match path {
            Some(p) => p,
            None => {
                default_path = crate::state_file("config");
                &default_path
            }
        };

        let mut config = if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| SyncError::state(path, e))?;
            serde_json::from_str(&content).map_err(|e| SyncError::state(path, e))?
        } else {
            Self::default()
        };

        config.apply_env()?;
        Ok(config)
    }

    /// Layer `FEEDSYNC_*` environment variables over the current values.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_var("FEEDSYNC_ITEMS_URL") {
            self.feeds.items = v;
        }
        if let Some(v) = env_var("FEEDSYNC_IMAGES_URL") {
            self.feeds.images = v;
        }
        if let Some(v) = env_var("FEEDSYNC_SERIES_URL") {
            self.feeds.series = v;
        }
        if let Some(v) = env_var("FEEDSYNC_ATTRIBUTES_URL") {
            self.feeds.attributes = v;
        }
        if let Some(v) = env_var("FEEDSYNC_FEATURES_URL") {
            self.feeds.features = v;
        }
        if let Some(v) = env_var("FEEDSYNC_BATCH_SIZE") {
            self.batch_size = parse_env("FEEDSYNC_BATCH_SIZE", &v)?;
        }
        if let Some(v) = env_var("FEEDSYNC_KEY_FIELD") {
            self.key_field = v;
        }
        if let Some(v) = env_var("FEEDSYNC_LOCK_TTL_SECS") {
            self.lock_ttl_secs = parse_env("FEEDSYNC_LOCK_TTL_SECS", &v)?;
        }
        if let Some(v) = env_var("FEEDSYNC_HTTP_TIMEOUT_SECS") {
            self.http_timeout_secs = parse_env("FEEDSYNC_HTTP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = env_var("FEEDSYNC_HASH_ALGORITHM") {
            self.hash_algorithm = v.parse()?;
        }
        if let Some(v) = env_var("FEEDSYNC_ADVANCE_POLICY") {
            self.advance_policy = v.parse()?;
        }
        if let Some(v) = env_var("FEEDSYNC_SNAPSHOTS") {
            self.snapshots = parse_bool("FEEDSYNC_SNAPSHOTS", &v)?;
        }
        if let Some(v) = env_var("FEEDSYNC_SNAPSHOT_PATH") {
            self.snapshot_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env_var("FEEDSYNC_SECRET_TOKEN") {
            self.secret_token = Some(v);
        }
        if let Some(v) = env_var("FEEDSYNC_HOST") {
            self.host = v;
        }
        if let Some(v) = env_var("FEEDSYNC_PORT") {
            self.port = parse_env("FEEDSYNC_PORT", &v)?;
        }
        Ok(())
    }

    /// Check the parts a run cannot proceed without.
    pub fn validate(&self) -> Result<()> {
        if self.feeds.items.trim().is_empty() {
            return Err(SyncError::Config(
                "items feed URL is not set (config feeds.items or FEEDSYNC_ITEMS_URL)".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(SyncError::Config("batch_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Key field in the `Option` form the snapshot layer takes.
    pub fn key_field(&self) -> Option<&str> {
        let trimmed = self.key_field.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    /// Effective snapshot file location.
    pub fn snapshot_file(&self) -> PathBuf {
        self.snapshot_path
            .clone()
            .unwrap_or_else(|| crate::state_file("snapshot"))
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| SyncError::Config(format!("{name}: '{value}' is not a valid value")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(SyncError::Config(format!(
            "{name}: '{other}' is not a boolean"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.key_field, "code");
        assert_eq!(config.lock_ttl_secs, 30 * 60);
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha256);
        assert_eq!(config.advance_policy, AdvancePolicy::RetryInPlace);
        assert!(config.snapshots);
        assert!(config.secret_token.is_none());
    }

    #[test]
    fn test_validate_requires_items_url() {
        let mut config = SyncConfig::default();
        assert!(config.validate().is_err());

        config.feeds.items = "https://example.com/items.xml".to_string();
        assert!(config.validate().is_ok());

        config.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_with_partial_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "feeds": {"items": "https://example.com/items.xml"},
                "batch_size": 25,
                "advance_policy": "skip_and_advance"
            }"#,
        )
        .unwrap();

        let config = SyncConfig::load(Some(&path)).unwrap();
        assert_eq!(config.feeds.items, "https://example.com/items.xml");
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.advance_policy, AdvancePolicy::SkipAndAdvance);
        // Untouched fields keep their defaults
        assert_eq!(config.key_field, "code");
        assert_eq!(config.port, 8787);
    }

    #[test]
    fn test_env_overrides_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"batch_size": 25}"#).unwrap();

        std::env::set_var("FEEDSYNC_BATCH_SIZE", "50");
        std::env::set_var("FEEDSYNC_ITEMS_URL", "https://example.com/env.xml");

        let config = SyncConfig::load(Some(&path)).unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.feeds.items, "https://example.com/env.xml");

        std::env::remove_var("FEEDSYNC_BATCH_SIZE");
        std::env::remove_var("FEEDSYNC_ITEMS_URL");
    }

    #[test]
    fn test_bad_env_value_is_a_config_error() {
        let mut config = SyncConfig::default();
        std::env::set_var("FEEDSYNC_HASH_ALGORITHM", "md5");

        let result = config.apply_env();
        assert!(matches!(result, Err(SyncError::Config(_))));

        std::env::remove_var("FEEDSYNC_HASH_ALGORITHM");
    }

    #[test]
    fn test_key_field_blank_means_positional() {
        let mut config = SyncConfig::default();
        assert_eq!(config.key_field(), Some("code"));

        config.key_field = "   ".to_string();
        assert_eq!(config.key_field(), None);
    }

    #[test]
    fn test_corrupt_config_file_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{nope").unwrap();

        assert!(SyncConfig::load(Some(&path)).is_err());
    }
}
