//! Paged purge of imported entries.
//!
//! Removal reuses the sync machinery: its own persisted offset with the
//! same advance-and-wrap arithmetic, and the shared run lock so a purge
//! never races a sync batch. The default mode only previews; deletion has
//! to be asked for explicitly.

use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::{CatalogStore, EntryId, EntrySummary};
use crate::cursor::SyncCursor;
use crate::error::Result;
use crate::lock;
use crate::snapshot::HashSnapshot;
use crate::store;
use crate::StatePaths;

#[derive(Debug, Clone, Copy)]
pub struct PurgeOptions {
    /// Entries examined per pass.
    pub limit: usize,
    /// Delete the previewed window instead of only listing it.
    pub execute: bool,
    /// Start from this offset instead of the stored one.
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PurgeStatus {
    Completed,
    /// A sync or another purge holds the lock; nothing was done.
    LockHeld,
}

/// Structured report of one purge pass.
#[derive(Debug, Clone, Serialize)]
pub struct PurgeReport {
    pub status: PurgeStatus,
    pub dry_run: bool,
    pub offset_before: usize,
    pub offset_after: usize,
    pub total_entries: usize,
    pub deleted: usize,
    pub listed: Vec<EntrySummary>,
}

/// Preview or delete one page of catalog entries.
///
/// Previewing mutates nothing, not even the stored offset. Executing
/// deletes the listed page, drops its keys from the stored hash snapshot
/// so the next sync re-imports them, then advances the offset by the page
/// length, wrapping against the pre-delete total.
pub async fn run_purge(
    catalog: &dyn CatalogStore,
    paths: &StatePaths,
    lock_ttl_secs: u64,
    options: PurgeOptions,
) -> Result<PurgeReport> {
    let Some(_lock) = lock::try_acquire(&paths.lock, lock_ttl_secs)? else {
        info!("run lock held, purge skipped");
        return Ok(PurgeReport {
            status: PurgeStatus::LockHeld,
            dry_run: !options.execute,
            offset_before: 0,
            offset_after: 0,
            total_entries: 0,
            deleted: 0,
            listed: Vec::new(),
        });
    };

    let cursor = SyncCursor::new(paths.purge_cursor.clone());
    let offset = match options.offset {
        Some(offset) => offset,
        None => cursor.offset()?,
    };

    let (listed, total) = catalog.list_entries(offset, options.limit).await?;

    if !options.execute {
        info!(offset, listed = listed.len(), total, "purge preview");
        return Ok(PurgeReport {
            status: PurgeStatus::Completed,
            dry_run: true,
            offset_before: offset,
            offset_after: offset,
            total_entries: total,
            deleted: 0,
            listed,
        });
    }

    let ids: Vec<EntryId> = listed.iter().map(|e| e.id).collect();
    let deleted = catalog.delete_entries(&ids).await?;
    prune_snapshot(&paths.snapshot, &listed);

    let new_offset = offset + listed.len();
    let offset_after = if new_offset >= total { 0 } else { new_offset };
    cursor.set_offset(offset_after)?;

    if deleted != listed.len() {
        warn!(listed = listed.len(), deleted, "some listed entries were already gone");
    }
    info!(deleted, offset = offset_after, "purge pass finished");

    Ok(PurgeReport {
        status: PurgeStatus::Completed,
        dry_run: false,
        offset_before: offset,
        offset_after,
        total_entries: total,
        deleted,
        listed,
    })
}

/// Drop purged keys from the stored hash snapshot.
///
/// A key left behind would hash as unchanged on the next sync and the
/// deleted entry would never come back. The snapshot is read as stored,
/// whatever its algorithm; only keys are touched.
fn prune_snapshot(path: &Path, purged: &[EntrySummary]) {
    if !path.exists() {
        return;
    }
    let mut snapshot: HashSnapshot = match store::read(path) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, "snapshot unreadable, prune skipped");
            return;
        }
    };

    let before = snapshot.len();
    for entry in purged {
        snapshot.remove(&entry.key);
    }
    if snapshot.len() == before {
        return;
    }

    if let Err(e) = snapshot.save(path) {
        warn!(error = %e, "snapshot prune failed, purged keys may report unchanged");
    }
}
