//! Repository traits describing the durable cache log and key-value cache.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::domain::{CacheEntry, EntryKey};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Durable cache log: one row per cached artifact, keyed by the natural
/// `(site_id, adapter_name, directory, filename)` tuple.
#[async_trait]
pub trait CacheLogRepo: Send + Sync {
    /// Every row for one site + adapter partition. The eager preload path.
    async fn fetch_all(&self, site_id: i64, adapter: &str) -> Result<Vec<CacheEntry>, RepoError>;

    /// Every row in one directory.
    async fn fetch_dir(
        &self,
        site_id: i64,
        adapter: &str,
        directory: &str,
    ) -> Result<Vec<CacheEntry>, RepoError>;

    /// Single-row lookup (`LIMIT 1`). The selective-mode path.
    async fn fetch_one(&self, key: &EntryKey) -> Result<Option<CacheEntry>, RepoError>;

    /// Insert or replace on conflict; at most one row per key afterwards.
    async fn upsert(&self, entry: &CacheEntry) -> Result<(), RepoError>;

    /// Batched upsert; used by the write flush.
    async fn upsert_many(&self, entries: &[CacheEntry]) -> Result<(), RepoError>;

    /// Returns the number of rows removed.
    async fn delete(&self, key: &EntryKey) -> Result<u64, RepoError>;

    /// Remove an entry together with its size-variant siblings: every row in
    /// the directory whose filename is the bare `base`, or `base` followed by
    /// `delimiter` or an extension dot.
    async fn delete_by_basename(
        &self,
        site_id: i64,
        adapter: &str,
        directory: &str,
        base: &str,
        delimiter: char,
    ) -> Result<u64, RepoError>;

    async fn delete_dir(
        &self,
        site_id: i64,
        adapter: &str,
        directory: &str,
    ) -> Result<u64, RepoError>;

    async fn delete_all(&self, site_id: i64, adapter: &str) -> Result<u64, RepoError>;

    async fn count(&self, site_id: i64, adapter: &str) -> Result<u64, RepoError>;

    /// Distinct directories known to the log for one site + adapter.
    async fn list_directories(
        &self,
        site_id: i64,
        adapter: &str,
    ) -> Result<Vec<String>, RepoError>;
}

/// Durable key-value cache with per-entry TTL, distinct from the cache log.
/// Holds derived facts only: directory rollups, valid-directory flags, the
/// audit marker, and the stored row count.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a value; expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<JsonValue>, RepoError>;

    async fn put(&self, key: &str, value: &JsonValue, ttl: Duration) -> Result<(), RepoError>;

    async fn delete(&self, key: &str) -> Result<(), RepoError>;
}
