//! Deferred cache-log writes.
//!
//! Under the eager strategy, log writes are not worth a durable round trip
//! each: they accumulate in a pending map, deduplicated per image path with
//! last-write-wins, and the whole batch is flushed in one transaction when
//! the request-lifecycle owner closes the service. Directory-existence
//! flags queue in a separate map and flush to the durable KV cache.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value as JsonValue;
use time::OffsetDateTime;

use super::keys::pending_update_hash;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::batch";

/// One deferred cache-log write.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    /// Normalized logical path of the artifact.
    pub image_path: String,
    pub processing_time: f64,
    pub vars: Option<JsonValue>,
    pub cache_dir: String,
    pub source_path: String,
    pub timestamp: OffsetDateTime,
}

#[derive(Default)]
pub struct WriteBatcher {
    pending: Mutex<HashMap<u64, PendingUpdate>>,
    /// `directory -> (site_id, adapter)` for valid-directory flags.
    pending_dirs: Mutex<HashMap<String, (i64, String)>>,
    closed: AtomicBool,
}

impl WriteBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a write. A newer update for the same path + dir supersedes the
    /// queued one; an older one (by timestamp) is ignored.
    pub fn schedule(&self, update: PendingUpdate) {
        let slot = pending_update_hash(&update.image_path, &update.cache_dir);
        let mut pending = mutex_lock(&self.pending, SOURCE, "schedule");
        match pending.get(&slot) {
            Some(existing) if existing.timestamp > update.timestamp => {}
            _ => {
                pending.insert(slot, update);
            }
        }
    }

    pub fn schedule_dir_flag(&self, directory: String, site_id: i64, adapter: String) {
        mutex_lock(&self.pending_dirs, SOURCE, "schedule_dir_flag")
            .insert(directory, (site_id, adapter));
    }

    pub fn pending_len(&self) -> usize {
        mutex_lock(&self.pending, SOURCE, "pending_len").len()
    }

    /// Snapshot and clear the pending maps. The snapshot is taken under the
    /// lock and processing happens outside it, so updates scheduled while a
    /// flush is running land in the next batch instead of being lost.
    pub fn take_pending(&self) -> (Vec<PendingUpdate>, Vec<(String, (i64, String))>) {
        let updates = {
            let mut pending = mutex_lock(&self.pending, SOURCE, "take_pending");
            std::mem::take(&mut *pending).into_values().collect()
        };
        let dirs = {
            let mut pending = mutex_lock(&self.pending_dirs, SOURCE, "take_pending.dirs");
            std::mem::take(&mut *pending).into_iter().collect()
        };
        (updates, dirs)
    }

    /// Latch for the final flush: true exactly once. Re-entrant shutdown
    /// triggers after the first close are no-ops.
    pub fn close_once(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }
}
