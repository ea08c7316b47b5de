//! Mapping one feed record onto the catalog.
//!
//! The processor owns the feed schema: which fields hold the natural key,
//! names, prices, the category path, and how the auxiliary dictionaries
//! (images, series, attributes, features) enrich an entry. It reports one
//! [`ProcessOutcome`] per record; error isolation across records is the
//! orchestrator's job.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::catalog::{AssetId, AssetResolver, CatalogStore, EntryDraft, TermId};
use crate::error::Result;
use crate::feed::{AuxData, ImageRef};
use crate::record::{scalar_text, Record};

const NAME_FIELDS: &[&str] = &["name", "name_alt"];
const DESCRIPTION_FIELDS: &[&str] = &["description", "description_alt"];
const PRICE_FIELDS: &[&str] = &["price_with_vat", "price"];
const CATEGORY_FIELD: &str = "category";
const SERIES_FIELD: &str = "series";

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessOutcome {
    Created,
    Updated,
    Unchanged,
    SkippedNoKey,
    Failed(String),
}

/// Per-outcome counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BatchTally {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped_no_key: usize,
    pub failed: usize,
}

impl BatchTally {
    pub fn record(&mut self, outcome: &ProcessOutcome) {
        match outcome {
            ProcessOutcome::Created => self.created += 1,
            ProcessOutcome::Updated => self.updated += 1,
            ProcessOutcome::Unchanged => self.unchanged += 1,
            ProcessOutcome::SkippedNoKey => self.skipped_no_key += 1,
            ProcessOutcome::Failed(_) => self.failed += 1,
        }
    }

    /// Records that completed an upsert or were verified unchanged.
    pub fn processed(&self) -> usize {
        self.created + self.updated + self.unchanged
    }
}

/// Maps feed records to catalog entries through the store and resolver
/// seams.
pub struct ItemProcessor {
    catalog: Arc<dyn CatalogStore>,
    assets: Arc<dyn AssetResolver>,
    key_field: Option<String>,
}

impl ItemProcessor {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        assets: Arc<dyn AssetResolver>,
        key_field: Option<String>,
    ) -> Self {
        Self {
            catalog,
            assets,
            key_field,
        }
    }

    /// Map one record into the catalog.
    ///
    /// A record without its natural key is skipped. Category terms are
    /// resolved before the upsert; attachment happens after, once the
    /// entry id is known.
    pub async fn process(&self, record: &Record, aux: &AuxData) -> Result<ProcessOutcome> {
        let Some(key) = self.key_field.as_deref().and_then(|f| record.text(f)) else {
            warn!("record without a natural key, skipping");
            return Ok(ProcessOutcome::SkippedNoKey);
        };

        let existing = self.catalog.find_by_key(&key).await?;
        let (primary_image, gallery) = self.resolve_images(&key, aux).await;

        let draft = EntryDraft {
            key: key.clone(),
            name: record.text_any(NAME_FIELDS),
            description: record.text_any(DESCRIPTION_FIELDS),
            price: price_of(record),
            primary_image,
            gallery,
            attributes: descriptive_attributes(record, aux),
        };

        let terms = self.resolve_category_path(record).await?;

        let (id, outcome) = match existing {
            Some(id) => (
                self.catalog.upsert_entry(Some(id), &draft).await?,
                ProcessOutcome::Updated,
            ),
            None => (
                self.catalog.upsert_entry(None, &draft).await?,
                ProcessOutcome::Created,
            ),
        };
        self.catalog.attach_categories(id, &terms).await?;

        debug!(key, entry = id, outcome = ?outcome, "record mapped");
        Ok(outcome)
    }

    /// Resolve each `/`-separated segment of the category path into a term,
    /// nesting every segment under the previous one.
    async fn resolve_category_path(&self, record: &Record) -> Result<Vec<TermId>> {
        let Some(path) = record.text(CATEGORY_FIELD) else {
            return Ok(Vec::new());
        };

        let mut terms = Vec::new();
        let mut parent: Option<TermId> = None;
        for segment in path.split('/') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let term = self.catalog.resolve_category(parent, segment).await?;
            terms.push(term);
            parent = Some(term);
        }
        Ok(terms)
    }

    /// Resolve the record's gallery to attachment ids.
    ///
    /// References are sorted by their order number, resolved, and
    /// deduplicated by resolved identity, which collapses repeated URLs and
    /// content-identical images wherever they sit in the gallery. The first
    /// surviving attachment is the primary image. A reference that fails to
    /// resolve is logged and dropped without failing the record.
    async fn resolve_images(&self, key: &str, aux: &AuxData) -> (Option<AssetId>, Vec<AssetId>) {
        let Some(refs) = aux.images.get(key) else {
            return (None, Vec::new());
        };

        let mut refs: Vec<&ImageRef> = refs.iter().collect();
        refs.sort_by_key(|r| r.order);

        let mut resolved = Vec::new();
        for image in refs {
            match self.assets.resolve(&image.url).await {
                Ok(id) if !resolved.contains(&id) => resolved.push(id),
                Ok(_) => {}
                Err(e) => warn!(item = key, url = %image.url, error = %e, "image skipped"),
            }
        }

        let mut ids = resolved.into_iter();
        let primary = ids.next();
        (primary, ids.collect())
    }
}

/// First price field holding a non-blank numeric string.
fn price_of(record: &Record) -> Option<String> {
    PRICE_FIELDS
        .iter()
        .find_map(|field| record.text(field).filter(|p| p.parse::<f64>().is_ok()))
}

/// Descriptive name/value pairs: the series name, attribute pairs, and
/// feature labels, each resolved through its dictionary. Codes a dictionary
/// cannot resolve are not applied.
fn descriptive_attributes(record: &Record, aux: &AuxData) -> Vec<(String, String)> {
    let mut pairs = Vec::new();

    if let Some(name) = record
        .text(SERIES_FIELD)
        .and_then(|code| aux.series.get(&code))
    {
        pairs.push(("Series".to_string(), name.clone()));
    }

    for attribute in record.children("attributes", "attribute") {
        let code = attribute.get("code").and_then(scalar_text);
        let value = attribute.get("value").and_then(scalar_text);
        let (Some(code), Some(value)) = (code, value) else {
            continue;
        };
        if let Some(name) = aux.attributes.get(&code) {
            pairs.push((name.clone(), value));
        }
    }

    let labels: Vec<String> = record
        .children("features", "feature")
        .into_iter()
        .filter_map(scalar_text)
        .filter_map(|code| aux.features.get(&code).cloned())
        .collect();
    if !labels.is_empty() {
        pairs.push(("Features".to_string(), labels.join(", ")));
    }

    pairs
}

/// The auxiliary material that shapes one entry, as a stable JSON value.
///
/// Covers the record's gallery references and its dictionary-resolved
/// pairs. Hashed alongside the record itself, so a gallery or dictionary
/// change reaches an entry whose record is untouched, and an entry written
/// while an auxiliary feed was down is rewritten once the feed returns.
/// `None` when nothing auxiliary applies to the record.
pub fn enrichment_context(record: &Record, key: &str, aux: &AuxData) -> Option<Value> {
    let mut map = Map::new();

    if let Some(refs) = aux.images.get(key) {
        let mut refs: Vec<&ImageRef> = refs.iter().collect();
        refs.sort_by(|a, b| (a.order, &a.url).cmp(&(b.order, &b.url)));
        map.insert(
            "images".to_string(),
            Value::Array(
                refs.iter()
                    .map(|r| json!({"order": r.order, "url": r.url}))
                    .collect(),
            ),
        );
    }

    let pairs = descriptive_attributes(record, aux);
    if !pairs.is_empty() {
        map.insert(
            "attributes".to_string(),
            Value::Array(pairs.iter().map(|(name, value)| json!([name, value])).collect()),
        );
    }

    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::catalog::JsonCatalog;
    use crate::error::SyncError;

    /// Fixed URL-to-id table standing in for real asset retrieval.
    struct StaticAssets {
        ids: HashMap<String, AssetId>,
    }

    impl StaticAssets {
        fn new(pairs: &[(&str, AssetId)]) -> Arc<Self> {
            Arc::new(Self {
                ids: pairs
                    .iter()
                    .map(|(url, id)| (url.to_string(), *id))
                    .collect(),
            })
        }
    }

    #[async_trait]
    impl AssetResolver for StaticAssets {
        async fn resolve(&self, url: &str) -> Result<AssetId> {
            self.ids
                .get(url)
                .copied()
                .ok_or_else(|| SyncError::IneligibleUrl(url.to_string()))
        }
    }

    fn processor(
        dir: &std::path::Path,
        assets: Arc<dyn AssetResolver>,
    ) -> (ItemProcessor, Arc<JsonCatalog>) {
        let catalog = Arc::new(JsonCatalog::open(dir.join("catalog.json")).unwrap());
        let processor = ItemProcessor::new(catalog.clone(), assets, Some("code".to_string()));
        (processor, catalog)
    }

    #[tokio::test]
    async fn test_process_creates_then_updates() {
        let tmp = tempfile::tempdir().unwrap();
        let (processor, catalog) = processor(tmp.path(), StaticAssets::new(&[]));
        let aux = AuxData::default();

        let record = Record::new(json!({
            "code": "SKU-1",
            "name": "",
            "name_alt": "Widget",
            "price_with_vat": "12.40",
        }));

        let outcome = processor.process(&record, &aux).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Created);

        let outcome = processor.process(&record, &aux).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Updated);

        let (page, total) = catalog.list_entries(0, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].name.as_deref(), Some("Widget"));
    }

    #[tokio::test]
    async fn test_process_skips_record_without_key() {
        let tmp = tempfile::tempdir().unwrap();
        let (processor, catalog) = processor(tmp.path(), StaticAssets::new(&[]));

        let record = Record::new(json!({"name": "Nameless"}));
        let outcome = processor.process(&record, &AuxData::default()).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::SkippedNoKey);

        let (_, total) = catalog.list_entries(0, 10).await.unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_category_path_resolves_nested_terms_once() {
        let tmp = tempfile::tempdir().unwrap();
        let (processor, catalog) = processor(tmp.path(), StaticAssets::new(&[]));

        let record = Record::new(json!({
            "code": "SKU-1",
            "name": "Drill",
            "category": " Tools / Drills //Cordless ",
        }));

        processor.process(&record, &AuxData::default()).await.unwrap();
        processor.process(&record, &AuxData::default()).await.unwrap();

        // Re-resolving the same path finds the existing terms
        let tools = catalog.resolve_category(None, "Tools").await.unwrap();
        let drills = catalog.resolve_category(Some(tools), "Drills").await.unwrap();
        let cordless = catalog
            .resolve_category(Some(drills), "Cordless")
            .await
            .unwrap();
        assert_eq!(vec![tools, drills, cordless], vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_images_sorted_deduplicated_and_isolated() {
        let tmp = tempfile::tempdir().unwrap();
        let assets = StaticAssets::new(&[
            ("http://img/front.jpg", 1),
            ("http://img/back.jpg", 2),
            ("http://img/front-copy.jpg", 1),
        ]);
        let (processor, _) = processor(tmp.path(), assets);

        let mut aux = AuxData::default();
        aux.images.insert(
            "SKU-1".to_string(),
            vec![
                ImageRef {
                    url: "http://img/back.jpg".to_string(),
                    order: 5,
                },
                ImageRef {
                    url: "http://img/front.jpg".to_string(),
                    order: 0,
                },
                // Different URL, same content as the primary
                ImageRef {
                    url: "http://img/front-copy.jpg".to_string(),
                    order: 1,
                },
                // Unknown to the resolver, dropped without failing
                ImageRef {
                    url: "http://img/missing.jpg".to_string(),
                    order: 2,
                },
            ],
        );

        let (primary, gallery) = processor.resolve_images("SKU-1", &aux).await;
        assert_eq!(primary, Some(1));
        assert_eq!(gallery, vec![2]);

        let none = processor.resolve_images("SKU-2", &aux).await;
        assert_eq!(none, (None, Vec::new()));
    }

    #[test]
    fn test_price_prefers_vat_and_requires_numeric() {
        let both = Record::new(json!({"price_with_vat": "12.40", "price": "10.00"}));
        assert_eq!(price_of(&both).unwrap(), "12.40");

        let fallback = Record::new(json!({"price_with_vat": "n/a", "price": "10.00"}));
        assert_eq!(price_of(&fallback).unwrap(), "10.00");

        let unusable = Record::new(json!({"price_with_vat": "call us", "price": "  "}));
        assert_eq!(price_of(&unusable), None);
    }

    #[test]
    fn test_descriptive_attributes_resolve_through_dictionaries() {
        let mut aux = AuxData::default();
        aux.series.insert("S1".to_string(), "Alpha Series".to_string());
        aux.attributes.insert("AT1".to_string(), "Voltage".to_string());
        aux.features.insert("F1".to_string(), "Brushless".to_string());
        aux.features.insert("F2".to_string(), "LED light".to_string());

        let record = Record::new(json!({
            "code": "SKU-1",
            "series": "S1",
            "attributes": {
                "attribute": [
                    {"code": "AT1", "value": "18V"},
                    {"code": "AT-unknown", "value": "ignored"},
                ],
            },
            "features": {"feature": ["F1", "F2", "F-unknown"]},
        }));

        let pairs = descriptive_attributes(&record, &aux);
        assert_eq!(
            pairs,
            vec![
                ("Series".to_string(), "Alpha Series".to_string()),
                ("Voltage".to_string(), "18V".to_string()),
                ("Features".to_string(), "Brushless, LED light".to_string()),
            ]
        );
    }

    #[test]
    fn test_descriptive_attributes_empty_without_dictionaries() {
        let record = Record::new(json!({
            "series": "S1",
            "features": {"feature": "F1"},
        }));
        assert!(descriptive_attributes(&record, &AuxData::default()).is_empty());
    }

    #[test]
    fn test_enrichment_context_tracks_auxiliary_material() {
        let record = Record::new(json!({"code": "SKU-1", "series": "S1"}));

        assert_eq!(enrichment_context(&record, "SKU-1", &AuxData::default()), None);

        let mut aux = AuxData::default();
        aux.series.insert("S1".to_string(), "Alpha".to_string());
        aux.images.insert(
            "SKU-1".to_string(),
            vec![ImageRef {
                url: "http://img/a.jpg".to_string(),
                order: 1,
            }],
        );

        let context = enrichment_context(&record, "SKU-1", &aux).unwrap();
        assert_eq!(
            context,
            json!({
                "images": [{"order": 1, "url": "http://img/a.jpg"}],
                "attributes": [["Series", "Alpha"]],
            })
        );

        // A renamed series or a new image is different material
        aux.series.insert("S1".to_string(), "Beta".to_string());
        assert_ne!(enrichment_context(&record, "SKU-1", &aux).unwrap(), context);
    }
}
