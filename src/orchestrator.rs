//! The batch cycle.
//!
//! One run: acquire the lock or skip, load the auxiliary tables, fetch the
//! items feed, slice the window at the stored cursor, push each record
//! through the processor with failures isolated, advance or wrap the
//! cursor, release the lock through the guard. Change detection layers on
//! top: a record is hashed together with its slice of the auxiliary tables,
//! and when that hash matches the stored snapshot the record is counted as
//! unchanged without touching the catalog.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use constant_time_eq::constant_time_eq;
use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::{AssetResolver, CatalogStore};
use crate::config::{AdvancePolicy, SyncConfig};
use crate::cursor::SyncCursor;
use crate::error::{Result, SyncError};
use crate::feed::FeedClient;
use crate::hash;
use crate::lock;
use crate::processor::{self, BatchTally, ItemProcessor, ProcessOutcome};
use crate::snapshot::HashSnapshot;
use crate::StatePaths;

/// Per-run options layered over the configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    /// Overrides the configured batch size.
    pub batch_size: Option<usize>,
    /// Zero the cursor before running.
    pub reset: bool,
}

/// How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// The window was processed and the cursor advanced.
    Completed,
    /// Another run holds the lock; nothing was done.
    LockHeld,
    /// The items feed could not be fetched or parsed; cursor untouched.
    FeedFailed,
}

/// Outcome of one record in the window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordResult {
    pub key: String,
    pub outcome: ProcessOutcome,
}

/// Structured report of one batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub status: BatchStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Records handled successfully: created, updated, or unchanged.
    pub processed: usize,
    pub offset_before: usize,
    pub offset_after: usize,
    pub total_records: usize,
    pub tally: BatchTally,
    pub records: Vec<RecordResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchReport {
    /// Report for a run that processed nothing.
    fn empty(status: BatchStatus, started_at: DateTime<Utc>, offset: usize) -> Self {
        Self {
            status,
            started_at,
            finished_at: Utc::now(),
            processed: 0,
            offset_before: offset,
            offset_after: offset,
            total_records: 0,
            tally: BatchTally::default(),
            records: Vec::new(),
            error: None,
        }
    }
}

/// Check a presented trigger token against the configured secret.
///
/// Fails closed: no configured secret disables the trigger entirely, and
/// the comparison runs in constant time.
pub fn validate_token(secret: Option<&str>, token: Option<&str>) -> Result<()> {
    let Some(secret) = secret else {
        return Err(SyncError::TriggerDisabled);
    };
    let Some(token) = token else {
        return Err(SyncError::Unauthorized);
    };
    if constant_time_eq(token.as_bytes(), secret.as_bytes()) {
        Ok(())
    } else {
        Err(SyncError::Unauthorized)
    }
}

/// Drives batch runs against one configuration and state directory.
pub struct Orchestrator {
    config: SyncConfig,
    paths: StatePaths,
    client: FeedClient,
    processor: ItemProcessor,
    cursor: SyncCursor,
}

impl Orchestrator {
    pub fn new(
        config: SyncConfig,
        paths: StatePaths,
        client: FeedClient,
        catalog: Arc<dyn CatalogStore>,
        assets: Arc<dyn AssetResolver>,
    ) -> Self {
        let key_field = config.key_field().map(str::to_string);
        let processor = ItemProcessor::new(catalog, assets, key_field);
        let cursor = SyncCursor::new(paths.cursor.clone());
        Self {
            config,
            paths,
            client,
            processor,
            cursor,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Validate the trigger token, then run one batch.
    pub async fn run_trigger(
        &self,
        token: Option<&str>,
        options: BatchOptions,
    ) -> Result<BatchReport> {
        validate_token(self.config.secret_token.as_deref(), token)?;
        self.run_batch(options).await
    }

    /// Run one batch.
    ///
    /// Per-record failures land in the report; only lock, cursor, and feed
    /// plumbing can fail the call itself. A held lock or a failed items
    /// fetch comes back as a report, not an error.
    pub async fn run_batch(&self, options: BatchOptions) -> Result<BatchReport> {
        let started_at = Utc::now();

        if options.reset {
            self.cursor.reset()?;
            info!("cursor reset before run");
        }

        let Some(_lock) = lock::try_acquire(&self.paths.lock, self.config.lock_ttl_secs)? else {
            info!("another run holds the lock, skipping");
            return Ok(BatchReport::empty(
                BatchStatus::LockHeld,
                started_at,
                self.cursor.offset()?,
            ));
        };

        // Lock held from here; the guard releases it on every return path.

        let aux = self.client.fetch_aux(&self.config.feeds).await;

        let records = match self
            .client
            .fetch_records(&self.config.feeds.items, "items")
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "items feed failed, batch abandoned");
                let mut report =
                    BatchReport::empty(BatchStatus::FeedFailed, started_at, self.cursor.offset()?);
                report.error = Some(e.to_string());
                return Ok(report);
            }
        };

        let total = records.len();
        let offset = self.cursor.offset()?;

        if offset >= total {
            // Stale pointer past the end of the current feed
            self.cursor.reset()?;
            info!(offset, total, "cursor past feed end, wrapped to zero");
            let mut report = BatchReport::empty(BatchStatus::Completed, started_at, 0);
            report.offset_before = offset;
            report.total_records = total;
            return Ok(report);
        }

        let batch_size = options.batch_size.unwrap_or(self.config.batch_size).max(1);
        let window = &records[offset..offset.saturating_add(batch_size).min(total)];
        let key_field = self.config.key_field();

        let mut stored = if self.config.snapshots {
            HashSnapshot::load(&self.paths.snapshot, self.config.hash_algorithm)
        } else {
            HashSnapshot::empty(self.config.hash_algorithm)
        };

        let mut tally = BatchTally::default();
        let mut results = Vec::with_capacity(window.len());
        let mut advance = 0usize;

        for (position, record) in window.iter().enumerate() {
            let key = record.key(key_field, offset + position);
            let context = processor::enrichment_context(record, &key, &aux);
            let current_hash =
                hash::hash_record_in_context(record, context.as_ref(), self.config.hash_algorithm);

            let outcome = if self.config.snapshots
                && stored.get(&key).is_some_and(|prev| prev.eq_ct(&current_hash))
            {
                ProcessOutcome::Unchanged
            } else {
                match self.processor.process(record, &aux).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(key, error = %e, "record failed");
                        ProcessOutcome::Failed(e.to_string())
                    }
                }
            };

            match &outcome {
                ProcessOutcome::Created
                | ProcessOutcome::Updated
                | ProcessOutcome::Unchanged => {
                    advance += 1;
                    if self.config.snapshots {
                        stored.insert(key.clone(), current_hash);
                    }
                }
                // Keyless records can never import; passing over them keeps
                // the cursor moving.
                ProcessOutcome::SkippedNoKey => advance += 1,
                ProcessOutcome::Failed(_) => {
                    if self.config.advance_policy == AdvancePolicy::SkipAndAdvance {
                        advance += 1;
                    }
                }
            }

            tally.record(&outcome);
            results.push(RecordResult { key, outcome });
        }

        let new_offset = offset + advance;
        let wrapped = new_offset >= total;
        let offset_after = if wrapped { 0 } else { new_offset };
        self.cursor.set_offset(offset_after)?;

        if self.config.snapshots {
            if wrapped {
                // Cycle complete: drop keys the feed no longer carries
                let current =
                    HashSnapshot::build(&records, key_field, &aux, self.config.hash_algorithm);
                stored.retain_keys(&current);
            }
            if let Err(e) = stored.save(&self.paths.snapshot) {
                warn!(error = %e, "snapshot save failed, change detection degraded");
            }
        }

        let report = BatchReport {
            status: BatchStatus::Completed,
            started_at,
            finished_at: Utc::now(),
            processed: tally.processed(),
            offset_before: offset,
            offset_after,
            total_records: total,
            tally,
            records: results,
            error: None,
        };
        info!(
            processed = report.processed,
            failed = report.tally.failed,
            offset = report.offset_after,
            total = report.total_records,
            "batch finished"
        );
        Ok(report)
    }
}
