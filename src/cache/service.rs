//! The cache service facade.
//!
//! Constructed once per worker process and injected into the image
//! pipeline. All shared mutable state (memory index, pending writes, the
//! probed adapter cache) lives behind this object; per-request state is an
//! explicit [`RequestScope`] handed to each call.

use std::sync::Arc;

use metrics::counter;
use serde_json::Value as JsonValue;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::application::repos::{CacheLogRepo, KvStore};
use crate::config::{
    CacheSettings, DIRECTORY_STATUS_TTL, SiteContext, VALID_DIRECTORY_TTL,
};
use crate::domain::{
    CacheEntry, DirectoryStatusSummary, EntryKey, EntryStats, parse_ttl_from_filename, split_path,
    variant_base,
};
use crate::infra::storage::{AdapterFactory, StorageAdapter, StorageError};

use super::batch::{PendingUpdate, WriteBatcher};
use super::freshness::{Freshness, evaluate_freshness};
use super::keys::{directory_status_key, valid_dirs_key};
use super::outcome::CacheOutcome;
use super::request::RequestScope;
use super::store::MemoryIndex;
use super::strategy::{self, LoadingStrategy};

const SOURCE: &str = "cache::service";

/// A cache-log write request from the image pipeline.
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    pub path: String,
    pub processing_time: Option<f64>,
    pub vars: Option<JsonValue>,
    pub cache_dir: Option<String>,
    pub source_path: Option<String>,
    /// Bypass batching and write straight through to the durable log.
    pub force: bool,
}

impl UpdateRequest {
    pub fn for_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

pub struct CacheService {
    pub(super) settings: CacheSettings,
    pub(super) ctx: SiteContext,
    pub(super) adapters: Arc<AdapterFactory>,
    pub(super) repo: Arc<dyn CacheLogRepo>,
    pub(super) kv: Arc<dyn KvStore>,
    pub(super) memory: MemoryIndex,
    pub(super) batcher: WriteBatcher,
}

impl CacheService {
    pub fn new(
        settings: CacheSettings,
        ctx: SiteContext,
        adapters: Arc<AdapterFactory>,
        repo: Arc<dyn CacheLogRepo>,
        kv: Arc<dyn KvStore>,
    ) -> Self {
        Self {
            settings,
            ctx,
            adapters,
            repo,
            kv,
            memory: MemoryIndex::new(),
            batcher: WriteBatcher::new(),
        }
    }

    /// Begin a request scope sized from the configured memo limit.
    pub fn scope(&self) -> RequestScope {
        RequestScope::new(self.settings.request_memo_limit_non_zero())
    }

    pub(super) async fn adapter(&self) -> Result<Arc<dyn StorageAdapter>, StorageError> {
        self.adapters.get(&self.ctx.adapter_name).await
    }

    /// The scope's loading strategy, deciding it (and running the eager
    /// preload) on first use.
    async fn strategy_for(&self, scope: &RequestScope) -> LoadingStrategy {
        let strategy = match scope.strategy() {
            Some(strategy) => strategy,
            None => {
                let decided =
                    strategy::determine(&*self.kv, &*self.repo, &self.ctx, &self.settings).await;
                scope.set_strategy(decided);
                decided
            }
        };

        if strategy == LoadingStrategy::Eager && !scope.preload_done() {
            if !self.memory.is_loaded(self.ctx.site_id, &self.ctx.adapter_name) {
                match self
                    .repo
                    .fetch_all(self.ctx.site_id, &self.ctx.adapter_name)
                    .await
                {
                    Ok(entries) => {
                        debug!(
                            target_module = SOURCE,
                            rows = entries.len(),
                            "memory index preloaded"
                        );
                        self.memory.put_all(entries);
                        self.memory
                            .mark_loaded(self.ctx.site_id, &self.ctx.adapter_name);
                    }
                    Err(err) => {
                        warn!(target_module = SOURCE, error = %err, "eager preload failed");
                    }
                }
            }
            scope.mark_preload_done();
        }

        strategy
    }

    /// Key lookup through the layered caches: request memo, memory index,
    /// and (under the selective strategy) a single durable row.
    async fn lookup(&self, scope: &RequestScope, key: &EntryKey) -> Option<CacheEntry> {
        if let Some(memoized) = scope.memo_get(key) {
            return memoized;
        }

        let strategy = self.strategy_for(scope).await;

        if let Some(entry) = self.memory.get(key) {
            counter!("pictura_cache_memory_hit_total").increment(1);
            scope.memo_put(key.clone(), Some(entry.clone()));
            return Some(entry);
        }
        counter!("pictura_cache_memory_miss_total").increment(1);

        let entry = match strategy {
            // Eager mode preloaded everything; a memory miss is a miss.
            LoadingStrategy::Eager => None,
            LoadingStrategy::Selective => match self.repo.fetch_one(key).await {
                Ok(found) => found,
                Err(err) => {
                    warn!(target_module = SOURCE, error = %err, "selective row fetch failed");
                    None
                }
            },
        };

        if let Some(entry) = entry.clone() {
            self.memory.put(entry);
        }
        scope.memo_put(key.clone(), entry.clone());
        entry
    }

    fn key_for(&self, directory: &str, filename: &str) -> EntryKey {
        EntryKey::new(
            self.ctx.site_id,
            self.ctx.adapter_name.clone(),
            directory,
            filename,
        )
    }

    /// Whether a cached artifact exists and is still fresh.
    ///
    /// Expired artifacts are removed from both the memory index and the
    /// durable log (together with their size-variant siblings) as a side
    /// effect; fresh-but-unindexed files are queued for lazy repair.
    pub async fn is_image_cached(&self, scope: &RequestScope, path: &str) -> bool {
        if !self.settings.enabled {
            return false;
        }
        let (directory, filename) = match split_path(path) {
            Ok(parts) => parts,
            Err(err) => {
                warn!(target_module = SOURCE, path, error = %err, "rejecting cache lookup");
                return false;
            }
        };
        let key = self.key_for(&directory, &filename);
        let entry = self.lookup(scope, &key).await;

        let adapter = match self.adapter().await {
            Ok(adapter) => adapter,
            Err(err) => {
                warn!(target_module = SOURCE, error = %err, "no storage adapter for lookup");
                return false;
            }
        };

        let ttl = parse_ttl_from_filename(
            &filename,
            self.settings.ttl_delimiter,
            self.settings.default_ttl_secs,
        );
        let now = OffsetDateTime::now_utc();
        let freshness =
            evaluate_freshness(ttl, entry.as_ref(), adapter.as_ref(), &key.path(), now).await;

        match freshness {
            Freshness::Valid => true,
            Freshness::ValidNeedsRepair => {
                self.schedule_repair(adapter.as_ref(), &key).await;
                true
            }
            Freshness::Expired => {
                counter!("pictura_cache_expired_total").increment(1);
                if let Err(err) = adapter.delete(&key.path()).await {
                    warn!(target_module = SOURCE, path = key.path(), error = %err, "expired file delete failed");
                }
                self.drop_variant_family(&key).await;
                scope.memo_invalidate(&key);
                false
            }
            Freshness::Invalid => {
                if entry.is_some() {
                    if let Err(err) = self.repo.delete(&key).await {
                        warn!(target_module = SOURCE, error = %err, "invalid row delete failed");
                    }
                    self.memory.remove(&key);
                }
                scope.memo_invalidate(&key);
                false
            }
        }
    }

    /// The recorded log entry for a path, if any.
    pub async fn get_cached_entry(&self, scope: &RequestScope, path: &str) -> Option<CacheEntry> {
        if !self.settings.enabled {
            return None;
        }
        let (directory, filename) = split_path(path).ok()?;
        let key = self.key_for(&directory, &filename);
        self.lookup(scope, &key).await
    }

    /// Entries known to the cache log.
    ///
    /// With no path this returns the whole partition under the eager
    /// strategy and an empty list under the selective strategy: once the
    /// corpus is past the preload threshold an unscoped scan is exactly
    /// the cost the strategy exists to avoid, so complete listings are
    /// not available at scale. With a path it returns at most one entry.
    pub async fn get_file_info_from_cache_log(
        &self,
        scope: &RequestScope,
        path: Option<&str>,
    ) -> Vec<CacheEntry> {
        if !self.settings.enabled {
            return Vec::new();
        }
        match path {
            Some(path) => self
                .get_cached_entry(scope, path)
                .await
                .into_iter()
                .collect(),
            None => match self.strategy_for(scope).await {
                LoadingStrategy::Eager => self
                    .memory
                    .list_all(self.ctx.site_id, &self.ctx.adapter_name),
                LoadingStrategy::Selective => Vec::new(),
            },
        }
    }

    /// Record an artifact generation in the cache log.
    ///
    /// Under the eager strategy the write is deferred into the pending
    /// batch (the memory index is updated immediately); under the selective
    /// strategy, or with `force`, it goes straight to the durable log.
    pub async fn update_cache_log(&self, scope: &RequestScope, request: UpdateRequest) -> bool {
        if !self.settings.enabled {
            return false;
        }
        if request.path.trim().is_empty() {
            warn!(target_module = SOURCE, "rejecting cache log update with empty path");
            return false;
        }
        let (directory, filename) = match split_path(&request.path) {
            Ok(parts) => parts,
            Err(err) => {
                warn!(target_module = SOURCE, path = request.path, error = %err, "rejecting cache log update");
                return false;
            }
        };
        let key = self.key_for(&directory, &filename);
        let cache_dir = request
            .cache_dir
            .map(|dir| crate::domain::normalize_path(&dir))
            .unwrap_or_else(|| directory.clone());

        let update = PendingUpdate {
            image_path: key.path(),
            processing_time: request.processing_time.unwrap_or(0.0),
            vars: request.vars,
            cache_dir: cache_dir.clone(),
            source_path: request.source_path.unwrap_or_default(),
            timestamp: OffsetDateTime::now_utc(),
        };

        let strategy = self.strategy_for(scope).await;
        let base = self.memory.get(&key);
        let entry = self.entry_from_update(&key, &update, base).await;

        self.batcher.schedule_dir_flag(
            cache_dir,
            self.ctx.site_id,
            self.ctx.adapter_name.clone(),
        );

        let written = if strategy == LoadingStrategy::Eager && !request.force {
            self.batcher.schedule(update);
            true
        } else {
            match self.repo.upsert(&entry).await {
                Ok(()) => true,
                Err(err) => {
                    warn!(target_module = SOURCE, error = %err, "cache log upsert failed");
                    false
                }
            }
        };

        if written {
            counter!("pictura_cache_log_update_total").increment(1);
            self.memory.put(entry);
            scope.memo_invalidate(&key);
        }
        written
    }

    /// Flush pending batched writes to the durable store. Idempotent;
    /// writes scheduled while the flush runs land in the next batch.
    pub async fn flush(&self) -> bool {
        let (updates, dirs) = self.batcher.take_pending();
        if updates.is_empty() && dirs.is_empty() {
            return true;
        }
        debug!(
            target_module = SOURCE,
            updates = updates.len(),
            dir_flags = dirs.len(),
            "flushing pending cache writes"
        );

        let mut ok = true;
        if !updates.is_empty() {
            let mut entries = Vec::with_capacity(updates.len());
            for update in &updates {
                let entry = match split_path(&update.image_path) {
                    Ok((directory, filename)) => {
                        let key = self.key_for(&directory, &filename);
                        // The memory index already carries the merged state
                        // from schedule time.
                        match self.memory.get(&key) {
                            Some(entry) => entry,
                            None => self.entry_from_update(&key, update, None).await,
                        }
                    }
                    Err(_) => continue,
                };
                entries.push(entry);
            }
            if let Err(err) = self.repo.upsert_many(&entries).await {
                warn!(target_module = SOURCE, error = %err, "pending update flush failed");
                ok = false;
            } else {
                counter!("pictura_cache_flush_total").increment(1);
            }
        }

        for (dir, (site_id, adapter)) in dirs {
            let key = valid_dirs_key(site_id, &adapter);
            let mut map = match self.kv.get(&key).await {
                Ok(Some(JsonValue::Object(map))) => map,
                _ => serde_json::Map::new(),
            };
            map.insert(dir, JsonValue::Bool(true));
            if let Err(err) = self
                .kv
                .put(&key, &JsonValue::Object(map), VALID_DIRECTORY_TTL)
                .await
            {
                warn!(target_module = SOURCE, error = %err, "valid-directory flush failed");
                ok = false;
            }
        }
        ok
    }

    /// Final flush for the request-lifecycle owner. Runs at most once per
    /// service lifetime; failures are logged and swallowed so the host
    /// request still completes.
    pub async fn close(&self) {
        if self.batcher.close_once() {
            let _ = self.flush().await;
        }
    }

    /// Whether a cache directory is known to exist on the backend,
    /// creating it when absent. Confirmed directories are batched into a
    /// short-lived durable flag so other workers skip the backend check.
    pub async fn ensure_directory(&self, directory: &str) -> bool {
        let directory = crate::domain::normalize_path(directory);
        let key = valid_dirs_key(self.ctx.site_id, &self.ctx.adapter_name);
        if let Ok(Some(JsonValue::Object(map))) = self.kv.get(&key).await {
            if map.get(&directory).and_then(JsonValue::as_bool) == Some(true) {
                return true;
            }
        }

        let adapter = match self.adapter().await {
            Ok(adapter) => adapter,
            Err(err) => {
                warn!(target_module = SOURCE, error = %err, "no storage adapter for directory check");
                return false;
            }
        };
        if !crate::infra::storage::exists_soft(adapter.as_ref(), &directory).await {
            if let Err(err) = adapter.create_directory(&directory).await {
                warn!(target_module = SOURCE, directory, error = %err, "directory create failed");
                return false;
            }
        }
        self.batcher.schedule_dir_flag(
            directory,
            self.ctx.site_id,
            self.ctx.adapter_name.clone(),
        );
        true
    }

    /// Per-directory rollup of the cache log, cached durably for a week.
    pub async fn directory_status(&self, directory: &str) -> Option<DirectoryStatusSummary> {
        let directory = crate::domain::normalize_path(directory);
        let key = directory_status_key(self.ctx.site_id, &self.ctx.adapter_name, &directory);

        if let Ok(Some(value)) = self.kv.get(&key).await {
            if let Ok(summary) = serde_json::from_value(value) {
                return Some(summary);
            }
        }

        // After a full preload the memory index is a complete mirror, so the
        // rollup can skip the durable query.
        let entries = if self.memory.is_loaded(self.ctx.site_id, &self.ctx.adapter_name) {
            self.memory
                .list_dir(self.ctx.site_id, &self.ctx.adapter_name, &directory)
        } else {
            match self
                .repo
                .fetch_dir(self.ctx.site_id, &self.ctx.adapter_name, &directory)
                .await
            {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(target_module = SOURCE, error = %err, "directory status query failed");
                    return None;
                }
            }
        };
        if entries.is_empty() {
            return None;
        }

        let mut summary = DirectoryStatusSummary::default();
        for entry in &entries {
            summary.accumulate(&entry.stats);
        }
        if let Ok(value) = serde_json::to_value(&summary) {
            let _ = self.kv.put(&key, &value, DIRECTORY_STATUS_TTL).await;
        }
        Some(summary)
    }

    /// Remove cached artifacts and their log rows, for one directory or
    /// the whole partition.
    pub async fn clear_cache(&self, location: Option<&str>) -> CacheOutcome {
        if !self.settings.enabled {
            return CacheOutcome::NotEnabled;
        }
        let adapter = match self.adapter().await {
            Ok(adapter) => adapter,
            Err(err) => {
                warn!(target_module = SOURCE, error = %err, "no storage adapter for clear");
                return CacheOutcome::Error;
            }
        };

        let known = match self
            .repo
            .list_directories(self.ctx.site_id, &self.ctx.adapter_name)
            .await
        {
            Ok(dirs) => dirs,
            Err(err) => {
                warn!(target_module = SOURCE, error = %err, "directory listing failed");
                return CacheOutcome::Error;
            }
        };

        let outcome = match location {
            Some(location) => {
                let directory = crate::domain::normalize_path(location);
                if !known.contains(&directory) {
                    return CacheOutcome::NotValidLocation;
                }
                if let Err(err) = adapter.delete_directory(&directory).await {
                    warn!(target_module = SOURCE, directory, error = %err, "cache dir delete failed");
                }
                let rows = self
                    .repo
                    .delete_dir(self.ctx.site_id, &self.ctx.adapter_name, &directory)
                    .await
                    .unwrap_or(0);
                self.memory
                    .remove_dir(self.ctx.site_id, &self.ctx.adapter_name, &directory);
                let _ = self
                    .kv
                    .delete(&directory_status_key(
                        self.ctx.site_id,
                        &self.ctx.adapter_name,
                        &directory,
                    ))
                    .await;
                if rows == 0 {
                    CacheOutcome::NothingToClear
                } else {
                    CacheOutcome::Success
                }
            }
            None => {
                if known.is_empty() {
                    return CacheOutcome::NothingToClear;
                }
                for directory in &known {
                    // One failed directory must not strand the rest.
                    if let Err(err) = adapter.delete_directory(directory).await {
                        warn!(target_module = SOURCE, directory, error = %err, "cache dir delete failed");
                    }
                    let _ = self
                        .kv
                        .delete(&directory_status_key(
                            self.ctx.site_id,
                            &self.ctx.adapter_name,
                            directory,
                        ))
                        .await;
                }
                let rows = self
                    .repo
                    .delete_all(self.ctx.site_id, &self.ctx.adapter_name)
                    .await
                    .unwrap_or(0);
                self.memory.clear(self.ctx.site_id, &self.ctx.adapter_name);
                let _ = self
                    .kv
                    .delete(&valid_dirs_key(self.ctx.site_id, &self.ctx.adapter_name))
                    .await;
                if rows == 0 {
                    CacheOutcome::NothingToClear
                } else {
                    CacheOutcome::Success
                }
            }
        };

        strategy::refresh_stored_count(&*self.kv, &*self.repo, &self.ctx).await;
        counter!("pictura_cache_clear_total").increment(1);
        outcome
    }

    /// Remove an entry and its size-variant siblings from both indexes.
    pub(super) async fn drop_variant_family(&self, key: &EntryKey) {
        let delimiter = self.settings.ttl_delimiter;
        let base = variant_base(&key.filename, delimiter).to_string();
        if let Err(err) = self
            .repo
            .delete_by_basename(key.site_id, &key.adapter_name, &key.directory, &base, delimiter)
            .await
        {
            warn!(target_module = SOURCE, error = %err, "variant family delete failed");
        }
        self.memory
            .remove_by_basename(key.site_id, &key.adapter_name, &key.directory, &base, delimiter);
    }

    /// Queue a repair row for a file that exists on the backend without an
    /// index entry. The file's own mtime becomes the inception date so the
    /// TTL keeps counting from the real generation time.
    async fn schedule_repair(&self, adapter: &dyn StorageAdapter, key: &EntryKey) {
        let timestamp = adapter
            .last_modified(&key.path())
            .await
            .unwrap_or_else(|_| OffsetDateTime::now_utc());
        let update = PendingUpdate {
            image_path: key.path(),
            processing_time: 0.0,
            vars: None,
            cache_dir: key.directory.clone(),
            source_path: String::new(),
            timestamp,
        };
        let entry = self.entry_from_update(key, &update, None).await;
        self.batcher.schedule(update);
        self.memory.put(entry);
    }

    /// Build the log entry for an update, folding in the previous state
    /// when the artifact is being regenerated.
    pub(super) async fn entry_from_update(
        &self,
        key: &EntryKey,
        update: &PendingUpdate,
        base: Option<CacheEntry>,
    ) -> CacheEntry {
        let size = match self.adapter().await {
            Ok(adapter) => adapter.size(&update.image_path).await.unwrap_or(0),
            Err(_) => 0,
        };
        let stats = EntryStats {
            inception_date: update.timestamp.unix_timestamp(),
            count: 1,
            size: i64::try_from(size).unwrap_or(i64::MAX),
            processing_time: update.processing_time,
            sourcepath: update.source_path.clone(),
        };
        match base {
            Some(mut existing) => {
                existing.merge_regeneration(&stats);
                if update.vars.is_some() {
                    existing.values = update.vars.clone();
                }
                existing
            }
            None => CacheEntry::new(key.clone(), stats, update.vars.clone()),
        }
    }
}
