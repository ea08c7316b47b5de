//! Persisted key-to-hash snapshots and diffing.
//!
//! A snapshot maps record keys to the content hashes observed on an earlier
//! run. Diffing a stored snapshot against a freshly built one classifies
//! every key as added, removed, changed, or unchanged without touching the
//! catalog. Snapshot loading never fails: anything unusable on disk is
//! treated as "no previous observation".

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::feed::AuxData;
use crate::hash::{self, ContentHash, HashAlgorithm};
use crate::processor;
use crate::record::Record;
use crate::store;

/// Key-to-hash map for one observed feed state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HashSnapshot {
    pub algorithm: HashAlgorithm,
    pub entries: BTreeMap<String, ContentHash>,
}

impl HashSnapshot {
    pub fn empty(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            entries: BTreeMap::new(),
        }
    }

    /// Build a snapshot of `records`, keyed by `key_field` with positional
    /// fallback. When two records share a key the later one wins. Each hash
    /// covers the record plus its slice of `aux`.
    pub fn build(
        records: &[Record],
        key_field: Option<&str>,
        aux: &AuxData,
        algorithm: HashAlgorithm,
    ) -> Self {
        let mut entries = BTreeMap::new();
        for (index, record) in records.iter().enumerate() {
            let key = record.key(key_field, index);
            let context = processor::enrichment_context(record, &key, aux);
            entries.insert(
                key,
                hash::hash_record_in_context(record, context.as_ref(), algorithm),
            );
        }
        Self { algorithm, entries }
    }

    pub fn get(&self, key: &str) -> Option<&ContentHash> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: String, hash: ContentHash) {
        self.entries.insert(key, hash);
    }

    pub fn remove(&mut self, key: &str) -> Option<ContentHash> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every key that `current` no longer has.
    pub fn retain_keys(&mut self, current: &HashSnapshot) {
        self.entries.retain(|key, _| current.contains(key));
    }

    /// Load a snapshot from disk.
    ///
    /// Missing, empty, or unreadable files and snapshots hashed with a
    /// different algorithm all yield an empty snapshot.
    pub fn load(path: &Path, algorithm: HashAlgorithm) -> Self {
        let stored: HashSnapshot = match store::read(path) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "snapshot unreadable, starting empty");
                return Self::empty(algorithm);
            }
        };

        if stored.algorithm != algorithm {
            if !stored.entries.is_empty() {
                warn!(
                    stored = %stored.algorithm,
                    expected = %algorithm,
                    "snapshot hash algorithm changed, starting empty"
                );
            }
            return Self::empty(algorithm);
        }

        stored
    }

    /// Persist the snapshot atomically.
    ///
    /// Failure here loses only the change-detection shortcut for the next
    /// run, so callers log it and carry on.
    pub fn save(&self, path: &Path) -> Result<()> {
        store::write_atomic(path, self)
    }
}

/// Classification of keys between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
    pub unchanged: Vec<String>,
}

impl Diff {
    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty())
    }
}

/// Classify every key across two snapshots.
///
/// Keys only in `new` are added, keys only in `old` are removed; keys in
/// both compare hashes in constant time. Each list comes out in sorted key
/// order.
pub fn diff(old: &HashSnapshot, new: &HashSnapshot) -> Diff {
    let mut out = Diff::default();

    for (key, new_hash) in &new.entries {
        match old.get(key) {
            None => out.added.push(key.clone()),
            Some(old_hash) if old_hash.eq_ct(new_hash) => out.unchanged.push(key.clone()),
            Some(_) => out.changed.push(key.clone()),
        }
    }

    for key in old.entries.keys() {
        if !new.contains(key) {
            out.removed.push(key.clone());
        }
    }

    out
}

/// Records needing work after comparing against a previous snapshot.
#[derive(Debug, Clone, Default)]
pub struct FilteredChanges {
    /// Full records for keys never seen before, in feed order.
    pub added: Vec<Record>,
    pub changed_keys: Vec<String>,
    pub removed_keys: Vec<String>,
}

/// Partition `records` against a previous snapshot.
///
/// New keys return their full records, keys whose hash moved and keys that
/// disappeared return just the key. Unchanged records are omitted entirely.
pub fn filter_changed(
    records: &[Record],
    previous: &HashSnapshot,
    key_field: Option<&str>,
    aux: &AuxData,
) -> FilteredChanges {
    let current = HashSnapshot::build(records, key_field, aux, previous.algorithm);
    let classified = diff(previous, &current);

    let added_keys: BTreeSet<&str> = classified.added.iter().map(String::as_str).collect();
    let added = records
        .iter()
        .enumerate()
        .filter(|(index, record)| {
            added_keys.contains(record.key(key_field, *index).as_str())
        })
        .map(|(_, record)| record.clone())
        .collect();

    FilteredChanges {
        added,
        changed_keys: classified.changed,
        removed_keys: classified.removed,
    }
}
