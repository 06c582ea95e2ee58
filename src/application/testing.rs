//! In-memory repository fakes for unit tests.
//!
//! The fake counts durable queries so tests can pin down how often each
//! loading strategy actually reaches the durable store.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

use crate::domain::{CacheEntry, EntryKey, in_variant_family};

use super::repos::{CacheLogRepo, KvStore, RepoError};

#[derive(Default)]
pub(crate) struct InMemoryRepo {
    rows: Mutex<HashMap<EntryKey, CacheEntry>>,
    pub fetch_all_calls: AtomicU64,
    pub fetch_one_calls: AtomicU64,
    pub fetch_dir_calls: AtomicU64,
    pub upsert_calls: AtomicU64,
}

impl InMemoryRepo {
    pub fn seed(&self, entries: impl IntoIterator<Item = CacheEntry>) {
        let mut rows = self.rows.lock().expect("rows lock");
        for entry in entries {
            rows.insert(entry.key.clone(), entry);
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().expect("rows lock").len()
    }

    pub fn contains(&self, key: &EntryKey) -> bool {
        self.rows.lock().expect("rows lock").contains_key(key)
    }

    pub fn get(&self, key: &EntryKey) -> Option<CacheEntry> {
        self.rows.lock().expect("rows lock").get(key).cloned()
    }
}

#[async_trait]
impl CacheLogRepo for InMemoryRepo {
    async fn fetch_all(&self, site_id: i64, adapter: &str) -> Result<Vec<CacheEntry>, RepoError> {
        self.fetch_all_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .rows
            .lock()
            .expect("rows lock")
            .values()
            .filter(|e| e.key.site_id == site_id && e.key.adapter_name == adapter)
            .cloned()
            .collect())
    }

    async fn fetch_dir(
        &self,
        site_id: i64,
        adapter: &str,
        directory: &str,
    ) -> Result<Vec<CacheEntry>, RepoError> {
        self.fetch_dir_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .rows
            .lock()
            .expect("rows lock")
            .values()
            .filter(|e| {
                e.key.site_id == site_id
                    && e.key.adapter_name == adapter
                    && e.key.directory == directory
            })
            .cloned()
            .collect())
    }

    async fn fetch_one(&self, key: &EntryKey) -> Result<Option<CacheEntry>, RepoError> {
        self.fetch_one_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.lock().expect("rows lock").get(key).cloned())
    }

    async fn upsert(&self, entry: &CacheEntry) -> Result<(), RepoError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        self.rows
            .lock()
            .expect("rows lock")
            .insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn upsert_many(&self, entries: &[CacheEntry]) -> Result<(), RepoError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock().expect("rows lock");
        for entry in entries {
            rows.insert(entry.key.clone(), entry.clone());
        }
        Ok(())
    }

    async fn delete(&self, key: &EntryKey) -> Result<u64, RepoError> {
        Ok(u64::from(
            self.rows.lock().expect("rows lock").remove(key).is_some(),
        ))
    }

    async fn delete_by_basename(
        &self,
        site_id: i64,
        adapter: &str,
        directory: &str,
        base: &str,
        delimiter: char,
    ) -> Result<u64, RepoError> {
        let mut rows = self.rows.lock().expect("rows lock");
        let before = rows.len();
        rows.retain(|key, _| {
            !(key.site_id == site_id
                && key.adapter_name == adapter
                && key.directory == directory
                && in_variant_family(&key.filename, base, delimiter))
        });
        Ok((before - rows.len()) as u64)
    }

    async fn delete_dir(
        &self,
        site_id: i64,
        adapter: &str,
        directory: &str,
    ) -> Result<u64, RepoError> {
        let mut rows = self.rows.lock().expect("rows lock");
        let before = rows.len();
        rows.retain(|key, _| {
            !(key.site_id == site_id
                && key.adapter_name == adapter
                && key.directory == directory)
        });
        Ok((before - rows.len()) as u64)
    }

    async fn delete_all(&self, site_id: i64, adapter: &str) -> Result<u64, RepoError> {
        let mut rows = self.rows.lock().expect("rows lock");
        let before = rows.len();
        rows.retain(|key, _| !(key.site_id == site_id && key.adapter_name == adapter));
        Ok((before - rows.len()) as u64)
    }

    async fn count(&self, site_id: i64, adapter: &str) -> Result<u64, RepoError> {
        Ok(self
            .rows
            .lock()
            .expect("rows lock")
            .keys()
            .filter(|key| key.site_id == site_id && key.adapter_name == adapter)
            .count() as u64)
    }

    async fn list_directories(
        &self,
        site_id: i64,
        adapter: &str,
    ) -> Result<Vec<String>, RepoError> {
        let rows = self.rows.lock().expect("rows lock");
        let mut dirs: Vec<String> = rows
            .keys()
            .filter(|key| key.site_id == site_id && key.adapter_name == adapter)
            .map(|key| key.directory.clone())
            .collect();
        dirs.sort();
        dirs.dedup();
        Ok(dirs)
    }
}

#[derive(Default)]
pub(crate) struct InMemoryKv {
    entries: Mutex<HashMap<String, (JsonValue, OffsetDateTime)>>,
}

impl InMemoryKv {
    pub fn raw_get(&self, key: &str) -> Option<JsonValue> {
        self.entries
            .lock()
            .expect("kv lock")
            .get(key)
            .map(|(value, _)| value.clone())
    }
}

#[async_trait]
impl KvStore for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<JsonValue>, RepoError> {
        let entries = self.entries.lock().expect("kv lock");
        Ok(entries.get(key).and_then(|(value, expires)| {
            (*expires > OffsetDateTime::now_utc()).then(|| value.clone())
        }))
    }

    async fn put(&self, key: &str, value: &JsonValue, ttl: Duration) -> Result<(), RepoError> {
        self.entries.lock().expect("kv lock").insert(
            key.to_string(),
            (value.clone(), OffsetDateTime::now_utc() + ttl),
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RepoError> {
        self.entries.lock().expect("kv lock").remove(key);
        Ok(())
    }
}
