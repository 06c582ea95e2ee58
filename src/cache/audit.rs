//! Periodic reconciliation between the blob store and the cache log.
//!
//! The sweep works in two passes. First it drops orphan rows, log entries
//! whose file no longer exists on the backend. Then it walks each cache
//! directory on the backend: expired artifacts are deleted together with
//! their size-variant rows, and fresh files missing from the log are
//! re-logged with their mtime as the inception date. A durable marker
//! keyed by site + adapter throttles the sweep to the configured interval.

use serde_json::json;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::domain::{CacheEntry, EntryKey, join_path, parse_ttl_from_filename};

use super::freshness::{Freshness, evaluate_freshness};
use super::keys::audit_marker_key;
use super::outcome::CacheOutcome;
use super::service::CacheService;
use super::strategy;

const SOURCE: &str = "cache::audit";

/// What an audit sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditReport {
    /// Log rows whose backing file had vanished.
    pub orphan_rows: u64,
    /// Expired artifact files deleted from the backend.
    pub removed_files: u64,
    /// Log rows deleted along with expired files (variants included).
    pub removed_rows: u64,
    /// Fresh files that were missing from the log and re-indexed.
    pub relogged: u64,
}

impl CacheService {
    /// Sweep the cache, or the single `location` directory, reconciling
    /// the blob store with the cache log.
    ///
    /// With `force` the interval marker is ignored and the stored row
    /// count is refreshed unconditionally. A failure inside one directory
    /// is logged and the sweep moves on; only failures that prevent the
    /// sweep from starting produce [`CacheOutcome::Error`].
    pub async fn audit_cache(
        &self,
        force: bool,
        location: Option<&str>,
    ) -> (CacheOutcome, AuditReport) {
        let mut report = AuditReport::default();

        if !self.settings.enabled {
            return (CacheOutcome::NotEnabled, report);
        }

        let marker_key = audit_marker_key(self.ctx.site_id, &self.ctx.adapter_name);
        if !force {
            if let Ok(Some(_)) = self.kv.get(&marker_key).await {
                return (CacheOutcome::NotDue, report);
            }
        }

        let adapter = match self.adapter().await {
            Ok(adapter) => adapter,
            Err(err) => {
                warn!(target_module = SOURCE, error = %err, "no storage adapter for audit");
                return (CacheOutcome::Error, report);
            }
        };

        let mut known_dirs = match self
            .repo
            .list_directories(self.ctx.site_id, &self.ctx.adapter_name)
            .await
        {
            Ok(dirs) => dirs,
            Err(err) => {
                warn!(target_module = SOURCE, error = %err, "directory listing failed");
                return (CacheOutcome::Error, report);
            }
        };
        // Batched writes may have created directories the durable log has not
        // seen yet; the memory index knows them.
        for directory in self
            .memory
            .directories(self.ctx.site_id, &self.ctx.adapter_name)
        {
            if !known_dirs.contains(&directory) {
                known_dirs.push(directory);
            }
        }

        let location = location.map(crate::domain::normalize_path);
        if let Some(directory) = &location {
            if !known_dirs.contains(directory) {
                return (CacheOutcome::NotValidLocation, report);
            }
        }

        let entries = match self
            .repo
            .fetch_all(self.ctx.site_id, &self.ctx.adapter_name)
            .await
        {
            Ok(entries) => entries,
            Err(err) => {
                warn!(target_module = SOURCE, error = %err, "cache log fetch failed");
                return (CacheOutcome::Error, report);
            }
        };
        if entries.is_empty() && location.is_none() {
            return (CacheOutcome::EmptyCacheLog, report);
        }

        // Pass one: rows whose file is gone.
        let mut indexed: std::collections::HashMap<EntryKey, CacheEntry> =
            std::collections::HashMap::new();
        for entry in entries {
            if let Some(directory) = &location {
                if &entry.key.directory != directory {
                    indexed.insert(entry.key.clone(), entry);
                    continue;
                }
            }
            match adapter.exists(&entry.key.path()).await {
                Ok(true) => {
                    indexed.insert(entry.key.clone(), entry);
                }
                Ok(false) => {
                    if let Err(err) = self.repo.delete(&entry.key).await {
                        warn!(target_module = SOURCE, error = %err, "orphan row delete failed");
                        indexed.insert(entry.key.clone(), entry);
                        continue;
                    }
                    self.memory.remove(&entry.key);
                    report.orphan_rows += 1;
                }
                Err(err) => {
                    // Can't tell; leave the row alone.
                    warn!(target_module = SOURCE, path = entry.key.path(), error = %err, "orphan probe failed");
                    indexed.insert(entry.key.clone(), entry);
                }
            }
        }

        // Pass two: files on the backend.
        let sweep_dirs: Vec<String> = match &location {
            Some(directory) => vec![directory.clone()],
            None => known_dirs,
        };
        let now = OffsetDateTime::now_utc();
        for directory in &sweep_dirs {
            let files = match adapter.list(directory).await {
                Ok(files) => files,
                Err(err) => {
                    warn!(target_module = SOURCE, directory, error = %err, "directory scan failed");
                    continue;
                }
            };
            for file in files {
                let key = EntryKey::new(
                    self.ctx.site_id,
                    self.ctx.adapter_name.clone(),
                    directory,
                    &file.filename,
                );
                let ttl = parse_ttl_from_filename(
                    &file.filename,
                    self.settings.ttl_delimiter,
                    self.settings.default_ttl_secs,
                );
                let entry = indexed.get(&key);
                let path = join_path(directory, &file.filename);
                match evaluate_freshness(ttl, entry, adapter.as_ref(), &path, now).await {
                    Freshness::Valid => {}
                    Freshness::ValidNeedsRepair => {
                        let relogged = self.relog_file(&key, file.last_modified, now).await;
                        if relogged {
                            report.relogged += 1;
                        }
                    }
                    Freshness::Expired | Freshness::Invalid => {
                        if let Err(err) = adapter.delete(&path).await {
                            warn!(target_module = SOURCE, path, error = %err, "expired file delete failed");
                            continue;
                        }
                        report.removed_files += 1;
                        report.removed_rows += self.drop_variant_family_counted(&key).await;
                    }
                }
            }
        }

        if let Err(err) = self
            .kv
            .put(
                &marker_key,
                &json!(now.unix_timestamp()),
                self.settings.audit_interval(),
            )
            .await
        {
            warn!(target_module = SOURCE, error = %err, "audit marker write failed");
        }

        if force || report.removed_files > self.settings.audit_refresh_min_removals {
            strategy::refresh_stored_count(&*self.kv, &*self.repo, &self.ctx).await;
        }

        info!(
            target_module = SOURCE,
            site_id = self.ctx.site_id,
            adapter = self.ctx.adapter_name,
            orphan_rows = report.orphan_rows,
            removed_files = report.removed_files,
            removed_rows = report.removed_rows,
            relogged = report.relogged,
            "audit sweep complete"
        );
        metrics::counter!("pictura_cache_audit_total").increment(1);
        (CacheOutcome::Success, report)
    }

    /// Re-index a fresh file the log had lost track of.
    async fn relog_file(
        &self,
        key: &EntryKey,
        last_modified: Option<OffsetDateTime>,
        now: OffsetDateTime,
    ) -> bool {
        let update = super::batch::PendingUpdate {
            image_path: key.path(),
            processing_time: 0.0,
            vars: None,
            cache_dir: key.directory.clone(),
            source_path: String::new(),
            timestamp: last_modified.unwrap_or(now),
        };
        let entry = self.entry_from_update(key, &update, None).await;
        match self.repo.upsert(&entry).await {
            Ok(()) => {
                self.memory.put(entry);
                true
            }
            Err(err) => {
                warn!(target_module = SOURCE, path = key.path(), error = %err, "relog failed");
                false
            }
        }
    }

    /// Like [`drop_variant_family`](Self::drop_variant_family) but reports
    /// how many rows went away.
    async fn drop_variant_family_counted(&self, key: &EntryKey) -> u64 {
        let delimiter = self.settings.ttl_delimiter;
        let base = crate::domain::variant_base(&key.filename, delimiter).to_string();
        let removed = match self
            .repo
            .delete_by_basename(key.site_id, &key.adapter_name, &key.directory, &base, delimiter)
            .await
        {
            Ok(removed) => removed,
            Err(err) => {
                warn!(target_module = SOURCE, error = %err, "variant family delete failed");
                0
            }
        };
        self.memory
            .remove_by_basename(key.site_id, &key.adapter_name, &key.directory, &base, delimiter);
        debug!(
            target_module = SOURCE,
            path = key.path(),
            removed,
            "expired variant family removed"
        );
        removed
    }
}
