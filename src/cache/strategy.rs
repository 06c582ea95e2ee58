//! Loading strategy selection.
//!
//! Small corpora are preloaded wholesale into the memory index (one bulk
//! query, cheap random access afterwards); past a configured row count the
//! cost of that scan flips and lookups fall back to selective single-row
//! queries. The stored row count steering the decision is advisory,
//! refreshed after bulk operations; it only picks a strategy, never affects
//! correctness.

use serde_json::json;
use tracing::debug;

use crate::application::repos::{CacheLogRepo, KvStore};
use crate::config::{CacheSettings, SiteContext, STORED_COUNT_TTL};

use super::keys::stored_count_key;

const SOURCE: &str = "cache::strategy";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingStrategy {
    /// Bulk-preload the whole partition, then serve from memory.
    Eager,
    /// Start empty; fetch single rows on demand, never scan.
    Selective,
}

/// Decide the strategy for one site + adapter partition.
///
/// The decision is made once per request scope and memoized there; this
/// function is only reached on the first lookup of a scope.
pub(crate) async fn determine(
    kv: &dyn KvStore,
    repo: &dyn CacheLogRepo,
    ctx: &SiteContext,
    settings: &CacheSettings,
) -> LoadingStrategy {
    let stored = stored_count(kv, repo, ctx).await;
    let strategy = if stored <= settings.preload_threshold {
        LoadingStrategy::Eager
    } else {
        LoadingStrategy::Selective
    };
    debug!(
        target_module = SOURCE,
        site_id = ctx.site_id,
        adapter = ctx.adapter_name,
        stored,
        threshold = settings.preload_threshold,
        strategy = ?strategy,
        "loading strategy decided"
    );
    strategy
}

/// Cached row count, falling back to a live COUNT that is written back.
/// Failures read as zero: a broken store should degrade to the simple
/// eager path, not take requests down.
async fn stored_count(kv: &dyn KvStore, repo: &dyn CacheLogRepo, ctx: &SiteContext) -> u64 {
    let key = stored_count_key(ctx.site_id, &ctx.adapter_name);
    match kv.get(&key).await {
        Ok(Some(value)) => {
            if let Some(count) = value.as_u64() {
                return count;
            }
        }
        Ok(None) => {}
        Err(err) => {
            tracing::warn!(target_module = SOURCE, error = %err, "stored count read failed");
            return 0;
        }
    }

    let count = repo
        .count(ctx.site_id, &ctx.adapter_name)
        .await
        .unwrap_or(0);
    let _ = kv.put(&key, &json!(count), STORED_COUNT_TTL).await;
    count
}

/// Refresh the advisory row count after a bulk operation.
pub(crate) async fn refresh_stored_count(
    kv: &dyn KvStore,
    repo: &dyn CacheLogRepo,
    ctx: &SiteContext,
) {
    let key = stored_count_key(ctx.site_id, &ctx.adapter_name);
    match repo.count(ctx.site_id, &ctx.adapter_name).await {
        Ok(count) => {
            let _ = kv.put(&key, &json!(count), STORED_COUNT_TTL).await;
        }
        Err(err) => {
            tracing::warn!(target_module = SOURCE, error = %err, "stored count refresh failed");
        }
    }
}
