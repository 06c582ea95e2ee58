//! Freshness decisions for cached artifacts.
//!
//! An artifact's lifetime comes from its filename TTL token; its age comes
//! preferentially from the recorded inception timestamp, falling back to
//! the backing file's modification time. When neither is available the
//! artifact cannot be trusted and is treated as invalid.

use time::OffsetDateTime;
use tracing::debug;

use crate::domain::{CacheEntry, Ttl};
use crate::infra::storage::StorageAdapter;

const SOURCE: &str = "cache::freshness";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Fresh; serve from cache.
    Valid,
    /// Fresh, but the index has no row for a file that exists on disk.
    /// Callers should re-log the entry on the next write pass.
    ValidNeedsRepair,
    /// Past its TTL; the file and its index rows should be removed.
    Expired,
    /// Unusable (zero TTL, no age source, or nothing backing it); any
    /// lingering index row should be deleted.
    Invalid,
}

impl Freshness {
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Valid | Self::ValidNeedsRepair)
    }
}

/// Apply the freshness decision table to one artifact.
///
/// `entry` is the index row if one is known; `path` is the artifact's
/// logical path on `adapter`. Backend errors during the fallback probes are
/// soft: they read as "no file", never as a hard failure.
pub async fn evaluate_freshness(
    ttl: Ttl,
    entry: Option<&CacheEntry>,
    adapter: &dyn StorageAdapter,
    path: &str,
    now: OffsetDateTime,
) -> Freshness {
    let duration = match ttl {
        Ttl::Perpetual => {
            return if entry.is_some() {
                Freshness::Valid
            } else if crate::infra::storage::exists_soft(adapter, path).await {
                Freshness::ValidNeedsRepair
            } else {
                Freshness::Invalid
            };
        }
        Ttl::Seconds(0) => return Freshness::Invalid,
        Ttl::Seconds(secs) => secs,
    };

    let inception = entry
        .map(|entry| entry.stats.inception_date)
        .filter(|&ts| ts > 0);

    let age_secs = match inception {
        Some(ts) => now.unix_timestamp().saturating_sub(ts),
        None => match adapter.last_modified(path).await {
            Ok(modified) => (now - modified).whole_seconds(),
            Err(err) => {
                debug!(target_module = SOURCE, path, error = %err, "no age source for artifact");
                return Freshness::Invalid;
            }
        },
    };

    if age_secs < 0 {
        // Clock skew between backend and worker; a file from the future is
        // treated as brand new.
        return if entry.is_some() {
            Freshness::Valid
        } else {
            Freshness::ValidNeedsRepair
        };
    }

    if (age_secs as u64) < duration {
        if entry.is_some() {
            Freshness::Valid
        } else {
            Freshness::ValidNeedsRepair
        }
    } else {
        Freshness::Expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntryKey, EntryStats, parse_ttl_from_filename};
    use crate::infra::storage::LocalAdapter;

    fn entry_with_inception(file: &str, inception: i64) -> CacheEntry {
        CacheEntry::new(
            EntryKey::new(1, "local", "cache", file),
            EntryStats {
                inception_date: inception,
                count: 1,
                size: 1,
                processing_time: 0.0,
                sourcepath: String::new(),
            },
            None,
        )
    }

    fn local() -> (tempfile::TempDir, LocalAdapter) {
        let dir = tempfile::tempdir().expect("tempdir");
        let adapter = LocalAdapter::new(dir.path().to_path_buf()).expect("adapter");
        (dir, adapter)
    }

    #[tokio::test]
    async fn fresh_entry_is_valid() {
        let (_dir, adapter) = local();
        let now = OffsetDateTime::now_utc();
        let entry = entry_with_inception("a_1e.jpg", now.unix_timestamp() - 10);

        let ttl = parse_ttl_from_filename("a_1e.jpg", '_', 600);
        let freshness =
            evaluate_freshness(ttl, Some(&entry), &adapter, "cache/a_1e.jpg", now).await;
        assert_eq!(freshness, Freshness::Valid);
    }

    #[tokio::test]
    async fn stale_entry_is_expired() {
        let (_dir, adapter) = local();
        let now = OffsetDateTime::now_utc();
        let entry = entry_with_inception("a_1e.jpg", now.unix_timestamp() - 31);

        let ttl = parse_ttl_from_filename("a_1e.jpg", '_', 600);
        let freshness =
            evaluate_freshness(ttl, Some(&entry), &adapter, "cache/a_1e.jpg", now).await;
        assert_eq!(freshness, Freshness::Expired);
    }

    #[tokio::test]
    async fn zero_ttl_is_always_invalid() {
        let (_dir, adapter) = local();
        let now = OffsetDateTime::now_utc();
        let entry = entry_with_inception("a_0.jpg", now.unix_timestamp());

        let freshness =
            evaluate_freshness(Ttl::Seconds(0), Some(&entry), &adapter, "cache/a_0.jpg", now)
                .await;
        assert_eq!(freshness, Freshness::Invalid);
    }

    #[tokio::test]
    async fn perpetual_with_row_is_valid_without_file() {
        let (_dir, adapter) = local();
        let now = OffsetDateTime::now_utc();
        let entry = entry_with_inception("logo_abcdef.png", 0);

        let freshness = evaluate_freshness(
            Ttl::Perpetual,
            Some(&entry),
            &adapter,
            "cache/logo_abcdef.png",
            now,
        )
        .await;
        assert_eq!(freshness, Freshness::Valid);
    }

    #[tokio::test]
    async fn perpetual_without_row_needs_file() {
        let (_dir, adapter) = local();
        let now = OffsetDateTime::now_utc();

        let absent =
            evaluate_freshness(Ttl::Perpetual, None, &adapter, "cache/logo_abcdef.png", now).await;
        assert_eq!(absent, Freshness::Invalid);

        adapter
            .write("cache/logo_abcdef.png", b"png")
            .await
            .expect("write");
        let present =
            evaluate_freshness(Ttl::Perpetual, None, &adapter, "cache/logo_abcdef.png", now).await;
        assert_eq!(present, Freshness::ValidNeedsRepair);
    }

    #[tokio::test]
    async fn unindexed_file_falls_back_to_mtime() {
        let (_dir, adapter) = local();
        adapter.write("cache/a_1e.jpg", b"jpg").await.expect("write");
        let now = OffsetDateTime::now_utc();

        // Freshly written file, 30 second TTL: fresh but needs repair.
        let freshness = evaluate_freshness(
            Ttl::Seconds(30),
            None,
            &adapter,
            "cache/a_1e.jpg",
            now,
        )
        .await;
        assert_eq!(freshness, Freshness::ValidNeedsRepair);

        // Same file judged far in the future: expired.
        let later = now + time::Duration::seconds(120);
        let freshness =
            evaluate_freshness(Ttl::Seconds(30), None, &adapter, "cache/a_1e.jpg", later).await;
        assert_eq!(freshness, Freshness::Expired);
    }

    #[tokio::test]
    async fn no_age_source_is_invalid() {
        let (_dir, adapter) = local();
        let now = OffsetDateTime::now_utc();
        let entry = entry_with_inception("a_1e.jpg", 0);

        // Row has no inception and no file backs it.
        let freshness =
            evaluate_freshness(Ttl::Seconds(30), Some(&entry), &adapter, "cache/a_1e.jpg", now)
                .await;
        assert_eq!(freshness, Freshness::Invalid);
    }
}
