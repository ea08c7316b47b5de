//! Catalog persistence and asset resolution.
//!
//! The processor talks to two traits: [`CatalogStore`] for entries and
//! category terms, and [`AssetResolver`] for image attachments. The default
//! implementations persist JSON files in the state directory, which keeps a
//! full sync runnable against nothing but local disk; a deployment backed
//! by a real commerce platform implements the same traits.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::error::{Result, SyncError};
use crate::hash::{self, HashAlgorithm};
use crate::store;

pub type EntryId = u64;
pub type TermId = u64;
pub type AssetId = u64;

/// Fields of a catalog entry as mapped from one feed record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryDraft {
    /// Natural key from the feed (the SKU).
    pub key: String,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Price as a validated numeric string.
    pub price: Option<String>,
    pub primary_image: Option<AssetId>,
    pub gallery: Vec<AssetId>,
    /// Descriptive name/value pairs.
    pub attributes: Vec<(String, String)>,
}

/// Summary row for listings and purge previews.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub id: EntryId,
    pub key: String,
    pub name: Option<String>,
}

/// Entry and category persistence.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Find an entry by natural key.
    async fn find_by_key(&self, key: &str) -> Result<Option<EntryId>>;

    /// Create or update an entry. `id` is `None` for new entries; the
    /// assigned identifier comes back either way.
    async fn upsert_entry(&self, id: Option<EntryId>, draft: &EntryDraft) -> Result<EntryId>;

    /// Resolve a category term under `parent`, creating it if missing.
    /// Resolving the same name twice yields the same term.
    async fn resolve_category(&self, parent: Option<TermId>, name: &str) -> Result<TermId>;

    /// Attach category terms to an entry. Terms already attached stay
    /// attached once.
    async fn attach_categories(&self, entry: EntryId, terms: &[TermId]) -> Result<()>;

    /// One page of entries plus the total count.
    async fn list_entries(&self, offset: usize, limit: usize)
        -> Result<(Vec<EntrySummary>, usize)>;

    /// Delete entries by id, returning how many existed.
    async fn delete_entries(&self, ids: &[EntryId]) -> Result<usize>;
}

/// Image attachment resolution.
#[async_trait]
pub trait AssetResolver: Send + Sync {
    /// Resolve an image URL to an attachment identity.
    ///
    /// The same source URL resolves to the same asset without another
    /// retrieval, and so do different URLs serving identical bytes.
    async fn resolve(&self, url: &str) -> Result<AssetId>;
}

/// Check that an asset URL is retrievable over HTTP(S).
///
/// Anything else is rejected before any retrieval is attempted.
pub fn eligible_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| SyncError::IneligibleUrl(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(SyncError::IneligibleUrl(format!(
            "{raw}: scheme '{scheme}' is not fetchable"
        ))),
    }
}

// ===== JSON-file-backed defaults =====

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogEntry {
    id: EntryId,
    key: String,
    name: Option<String>,
    description: Option<String>,
    price: Option<String>,
    primary_image: Option<AssetId>,
    gallery: Vec<AssetId>,
    attributes: Vec<(String, String)>,
    categories: Vec<TermId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CategoryTerm {
    id: TermId,
    parent: Option<TermId>,
    name: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    next_entry_id: EntryId,
    next_term_id: TermId,
    entries: Vec<CatalogEntry>,
    terms: Vec<CategoryTerm>,
}

/// Catalog store persisted as one JSON file.
pub struct JsonCatalog {
    path: PathBuf,
    inner: Mutex<CatalogFile>,
}

impl JsonCatalog {
    /// Open the catalog at `path`, loading whatever is there.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file: CatalogFile = store::read(&path)?;
        Ok(Self {
            path,
            inner: Mutex::new(file),
        })
    }

    fn persist(&self, file: &CatalogFile) -> Result<()> {
        store::write_atomic(&self.path, file)
    }
}

#[async_trait]
impl CatalogStore for JsonCatalog {
    async fn find_by_key(&self, key: &str) -> Result<Option<EntryId>> {
        let file = self.inner.lock().await;
        Ok(file.entries.iter().find(|e| e.key == key).map(|e| e.id))
    }

    async fn upsert_entry(&self, id: Option<EntryId>, draft: &EntryDraft) -> Result<EntryId> {
        let mut file = self.inner.lock().await;
        let now = Utc::now();

        let id = match id {
            Some(id) => {
                let entry = file
                    .entries
                    .iter_mut()
                    .find(|e| e.id == id)
                    .ok_or_else(|| SyncError::Catalog(format!("entry {id} does not exist")))?;
                entry.key = draft.key.clone();
                entry.name = draft.name.clone();
                entry.description = draft.description.clone();
                entry.price = draft.price.clone();
                entry.primary_image = draft.primary_image;
                entry.gallery = draft.gallery.clone();
                entry.attributes = draft.attributes.clone();
                entry.updated_at = now;
                id
            }
            None => {
                file.next_entry_id += 1;
                let id = file.next_entry_id;
                file.entries.push(CatalogEntry {
                    id,
                    key: draft.key.clone(),
                    name: draft.name.clone(),
                    description: draft.description.clone(),
                    price: draft.price.clone(),
                    primary_image: draft.primary_image,
                    gallery: draft.gallery.clone(),
                    attributes: draft.attributes.clone(),
                    categories: Vec::new(),
                    created_at: now,
                    updated_at: now,
                });
                id
            }
        };

        self.persist(&file)?;
        Ok(id)
    }

    async fn resolve_category(&self, parent: Option<TermId>, name: &str) -> Result<TermId> {
        let mut file = self.inner.lock().await;

        if let Some(term) = file
            .terms
            .iter()
            .find(|t| t.parent == parent && t.name == name)
        {
            return Ok(term.id);
        }

        file.next_term_id += 1;
        let id = file.next_term_id;
        file.terms.push(CategoryTerm {
            id,
            parent,
            name: name.to_string(),
        });
        self.persist(&file)?;
        debug!(term = name, id, "created category term");
        Ok(id)
    }

    async fn attach_categories(&self, entry: EntryId, terms: &[TermId]) -> Result<()> {
        if terms.is_empty() {
            return Ok(());
        }

        let mut file = self.inner.lock().await;
        let target = file
            .entries
            .iter_mut()
            .find(|e| e.id == entry)
            .ok_or_else(|| SyncError::Catalog(format!("entry {entry} does not exist")))?;

        let mut changed = false;
        for term in terms {
            if !target.categories.contains(term) {
                target.categories.push(*term);
                changed = true;
            }
        }

        if changed {
            self.persist(&file)?;
        }
        Ok(())
    }

    async fn list_entries(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<EntrySummary>, usize)> {
        let file = self.inner.lock().await;
        let total = file.entries.len();
        let page = file
            .entries
            .iter()
            .skip(offset)
            .take(limit)
            .map(|e| EntrySummary {
                id: e.id,
                key: e.key.clone(),
                name: e.name.clone(),
            })
            .collect();
        Ok((page, total))
    }

    async fn delete_entries(&self, ids: &[EntryId]) -> Result<usize> {
        let mut file = self.inner.lock().await;
        let before = file.entries.len();
        file.entries.retain(|e| !ids.contains(&e.id));
        let removed = before - file.entries.len();

        if removed > 0 {
            self.persist(&file)?;
        }
        Ok(removed)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AssetLedger {
    next_asset_id: AssetId,
    /// Source URL to asset.
    by_url: BTreeMap<String, AssetId>,
    /// Content hash (hex) to asset.
    by_hash: BTreeMap<String, AssetId>,
}

/// Asset resolver that deduplicates by source URL and by content hash.
///
/// Each URL is retrieved at most once; bytes matching an already known
/// asset reuse its id.
pub struct LedgerAssetResolver {
    http: reqwest::Client,
    path: PathBuf,
    inner: Mutex<AssetLedger>,
}

impl LedgerAssetResolver {
    /// Open the ledger at `path`, loading whatever is there.
    pub fn open(path: impl Into<PathBuf>, http: reqwest::Client) -> Result<Self> {
        let path = path.into();
        let ledger: AssetLedger = store::read(&path)?;
        Ok(Self {
            http,
            path,
            inner: Mutex::new(ledger),
        })
    }
}

#[async_trait]
impl AssetResolver for LedgerAssetResolver {
    async fn resolve(&self, raw: &str) -> Result<AssetId> {
        let url = eligible_url(raw)?;

        {
            let ledger = self.inner.lock().await;
            if let Some(id) = ledger.by_url.get(url.as_str()) {
                return Ok(*id);
            }
        }

        let response = self.http.get(url.clone()).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        let digest = hash::hash_bytes(HashAlgorithm::Sha256, &bytes).to_hex();

        let mut ledger = self.inner.lock().await;
        let id = match ledger.by_hash.get(&digest) {
            Some(existing) => *existing,
            None => {
                ledger.next_asset_id += 1;
                let id = ledger.next_asset_id;
                ledger.by_hash.insert(digest, id);
                id
            }
        };
        ledger.by_url.insert(String::from(url), id);
        store::write_atomic(&self.path, &*ledger)?;

        debug!(url = raw, asset = id, "resolved asset");
        Ok(id)
    }
}
