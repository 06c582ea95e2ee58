//! Postgres-backed cache log and key-value cache.

mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions};
use time::OffsetDateTime;
use tracing::warn;

use crate::application::repos::{CacheLogRepo, KvStore, RepoError};
use crate::domain::{CacheEntry, EntryKey, EntryStats};

const SOURCE: &str = "infra::db";

/// Postgres repositories for the cache subsystem. Cheap to clone; the pool
/// is shared.
#[derive(Clone)]
pub struct PgCacheIndex {
    pool: Arc<PgPool>,
}

#[derive(sqlx::FromRow)]
struct CacheRow {
    site_id: i64,
    adapter_name: String,
    path: String,
    image_name: String,
    stats: JsonValue,
    values: Option<JsonValue>,
}

impl CacheRow {
    /// Decode a row into a domain entry. A malformed stats blob is logged
    /// and read as a miss; regenerating the artifact is safer than trusting
    /// corrupt metadata.
    fn decode(self) -> Option<CacheEntry> {
        let stats: EntryStats = match serde_json::from_value(self.stats) {
            Ok(stats) => stats,
            Err(err) => {
                warn!(
                    target_module = SOURCE,
                    site_id = self.site_id,
                    path = self.path,
                    image_name = self.image_name,
                    error = %err,
                    "discarding cache row with malformed stats blob"
                );
                return None;
            }
        };
        Some(CacheEntry::new(
            EntryKey::new(self.site_id, self.adapter_name, self.path, self.image_name),
            stats,
            self.values,
        ))
    }
}

impl PgCacheIndex {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }

    fn convert_count(value: i64) -> Result<u64, RepoError> {
        value
            .try_into()
            .map_err(|_| RepoError::from_persistence("count exceeds supported range"))
    }
}

const SELECT_COLUMNS: &str =
    r#"SELECT site_id, adapter_name, path, image_name, stats, "values" FROM image_cache_log"#;

#[async_trait]
impl CacheLogRepo for PgCacheIndex {
    async fn fetch_all(&self, site_id: i64, adapter: &str) -> Result<Vec<CacheEntry>, RepoError> {
        let sql = format!("{SELECT_COLUMNS} WHERE site_id = $1 AND adapter_name = $2");
        let rows: Vec<CacheRow> = sqlx::query_as(&sql)
            .bind(site_id)
            .bind(adapter)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().filter_map(CacheRow::decode).collect())
    }

    async fn fetch_dir(
        &self,
        site_id: i64,
        adapter: &str,
        directory: &str,
    ) -> Result<Vec<CacheEntry>, RepoError> {
        let sql =
            format!("{SELECT_COLUMNS} WHERE site_id = $1 AND adapter_name = $2 AND path = $3");
        let rows: Vec<CacheRow> = sqlx::query_as(&sql)
            .bind(site_id)
            .bind(adapter)
            .bind(directory)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().filter_map(CacheRow::decode).collect())
    }

    async fn fetch_one(&self, key: &EntryKey) -> Result<Option<CacheEntry>, RepoError> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE site_id = $1 AND adapter_name = $2 AND path = $3 AND image_name = $4 LIMIT 1"
        );
        let row: Option<CacheRow> = sqlx::query_as(&sql)
            .bind(key.site_id)
            .bind(&key.adapter_name)
            .bind(&key.directory)
            .bind(&key.filename)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.and_then(CacheRow::decode))
    }

    async fn upsert(&self, entry: &CacheEntry) -> Result<(), RepoError> {
        let stats = serde_json::to_value(&entry.stats)
            .map_err(|err| RepoError::InvalidInput {
                message: format!("unserializable stats blob: {err}"),
            })?;

        sqlx::query(
            r#"
            INSERT INTO image_cache_log (site_id, adapter_name, path, image_name, stats, "values")
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (site_id, adapter_name, path, image_name)
            DO UPDATE SET stats = EXCLUDED.stats, "values" = EXCLUDED."values"
            "#,
        )
        .bind(entry.key.site_id)
        .bind(&entry.key.adapter_name)
        .bind(&entry.key.directory)
        .bind(&entry.key.filename)
        .bind(stats)
        .bind(&entry.values)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn upsert_many(&self, entries: &[CacheEntry]) -> Result<(), RepoError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        for entry in entries {
            let stats = serde_json::to_value(&entry.stats)
                .map_err(|err| RepoError::InvalidInput {
                    message: format!("unserializable stats blob: {err}"),
                })?;
            sqlx::query(
                r#"
                INSERT INTO image_cache_log (site_id, adapter_name, path, image_name, stats, "values")
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (site_id, adapter_name, path, image_name)
                DO UPDATE SET stats = EXCLUDED.stats, "values" = EXCLUDED."values"
                "#,
            )
            .bind(entry.key.site_id)
            .bind(&entry.key.adapter_name)
            .bind(&entry.key.directory)
            .bind(&entry.key.filename)
            .bind(stats)
            .bind(&entry.values)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn delete(&self, key: &EntryKey) -> Result<u64, RepoError> {
        let result = sqlx::query(
            "DELETE FROM image_cache_log WHERE site_id = $1 AND adapter_name = $2 AND path = $3 AND image_name = $4",
        )
        .bind(key.site_id)
        .bind(&key.adapter_name)
        .bind(&key.directory)
        .bind(&key.filename)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn delete_by_basename(
        &self,
        site_id: i64,
        adapter: &str,
        directory: &str,
        base: &str,
        delimiter: char,
    ) -> Result<u64, RepoError> {
        // Members are the bare stem or the stem followed by the delimiter or
        // an extension dot; prefix-sharing neighbors stay untouched.
        let variant_pattern =
            format!("{}{}%", escape_like(base), escape_like(&delimiter.to_string()));
        let extension_pattern = format!("{}.%", escape_like(base));
        let result = sqlx::query(
            r"DELETE FROM image_cache_log
              WHERE site_id = $1 AND adapter_name = $2 AND path = $3
                AND (image_name = $4
                     OR image_name LIKE $5 ESCAPE '\'
                     OR image_name LIKE $6 ESCAPE '\')",
        )
        .bind(site_id)
        .bind(adapter)
        .bind(directory)
        .bind(base)
        .bind(variant_pattern)
        .bind(extension_pattern)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn delete_dir(
        &self,
        site_id: i64,
        adapter: &str,
        directory: &str,
    ) -> Result<u64, RepoError> {
        let result = sqlx::query(
            "DELETE FROM image_cache_log WHERE site_id = $1 AND adapter_name = $2 AND path = $3",
        )
        .bind(site_id)
        .bind(adapter)
        .bind(directory)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn delete_all(&self, site_id: i64, adapter: &str) -> Result<u64, RepoError> {
        let result =
            sqlx::query("DELETE FROM image_cache_log WHERE site_id = $1 AND adapter_name = $2")
                .bind(site_id)
                .bind(adapter)
                .execute(self.pool())
                .await
                .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn count(&self, site_id: i64, adapter: &str) -> Result<u64, RepoError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total FROM image_cache_log WHERE site_id = $1 AND adapter_name = $2",
        )
        .bind(site_id)
        .bind(adapter)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let total: i64 = row.try_get("total").map_err(map_sqlx_error)?;
        Self::convert_count(total)
    }

    async fn list_directories(
        &self,
        site_id: i64,
        adapter: &str,
    ) -> Result<Vec<String>, RepoError> {
        let rows = sqlx::query(
            "SELECT DISTINCT path FROM image_cache_log WHERE site_id = $1 AND adapter_name = $2 ORDER BY path",
        )
        .bind(site_id)
        .bind(adapter)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| row.try_get("path").map_err(map_sqlx_error))
            .collect()
    }
}

#[async_trait]
impl KvStore for PgCacheIndex {
    async fn get(&self, key: &str) -> Result<Option<JsonValue>, RepoError> {
        let row = sqlx::query(
            "SELECT payload FROM image_cache_kv WHERE cache_key = $1 AND expires_at > now()",
        )
        .bind(key)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(|row| row.try_get("payload").map_err(map_sqlx_error))
            .transpose()
    }

    async fn put(&self, key: &str, value: &JsonValue, ttl: Duration) -> Result<(), RepoError> {
        let expires_at = OffsetDateTime::now_utc() + ttl;
        sqlx::query(
            r#"
            INSERT INTO image_cache_kv (cache_key, payload, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (cache_key)
            DO UPDATE SET payload = EXCLUDED.payload, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM image_cache_kv WHERE cache_key = $1")
            .bind(key)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(())
    }
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_like_neutralizes_wildcards() {
        assert_eq!(escape_like("a_b%c"), "a\\_b\\%c");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn malformed_stats_blob_reads_as_miss() {
        let row = CacheRow {
            site_id: 1,
            adapter_name: "local".into(),
            path: "cache".into(),
            image_name: "a_1e.jpg".into(),
            stats: serde_json::json!("not an object"),
            values: None,
        };
        assert!(row.decode().is_none());
    }

    #[test]
    fn well_formed_row_decodes() {
        let row = CacheRow {
            site_id: 1,
            adapter_name: "local".into(),
            path: "cache".into(),
            image_name: "a_1e.jpg".into(),
            stats: serde_json::json!({"inception_date": 100, "count": 1, "size": 10}),
            values: Some(serde_json::json!({"width": 100})),
        };
        let entry = row.decode().expect("entry");
        assert_eq!(entry.stats.inception_date, 100);
        assert_eq!(entry.key.filename, "a_1e.jpg");
    }
}
