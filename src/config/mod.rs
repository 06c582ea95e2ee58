//! Typed settings for the cache subsystem.
//!
//! The host CMS owns the outer configuration file and hands this crate a
//! deserialized [`CacheSettings`] plus one [`AdapterSettings`] per configured
//! storage backend. Everything carries serde defaults so a bare `[cache]`
//! table works out of the box.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_PRELOAD_THRESHOLD: u64 = 5000;
const DEFAULT_TTL_SECS: u64 = 60 * 60 * 24 * 30;
const DEFAULT_TTL_DELIMITER: char = '_';
const DEFAULT_AUDIT_INTERVAL_SECS: u64 = 60 * 60 * 24;
const DEFAULT_AUDIT_REFRESH_MIN_REMOVALS: u64 = 10;
const DEFAULT_REQUEST_MEMO_LIMIT: usize = 256;
const DEFAULT_WRITE_RETRY_ATTEMPTS: u32 = 3;

/// How long derived key-value facts live in the durable KV cache.
pub const DIRECTORY_STATUS_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 7);
pub const VALID_DIRECTORY_TTL: Duration = Duration::from_secs(5 * 60);
pub const STORED_COUNT_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 7);

/// Cache subsystem settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Master switch; when off, lookups miss and audits report `NotEnabled`.
    pub enabled: bool,
    /// Row count above which the memory index switches from eager preload
    /// to selective per-key lookups.
    pub preload_threshold: u64,
    /// Fallback lifetime for filenames without an embedded TTL token.
    pub default_ttl_secs: u64,
    /// Segment delimiter used by the filename TTL encoding.
    pub ttl_delimiter: char,
    /// Minimum time between cache audits.
    pub audit_interval_secs: u64,
    /// An audit that removed more files than this refreshes the stored
    /// row count used for strategy selection.
    pub audit_refresh_min_removals: u64,
    /// Capacity of the per-request query memoization.
    pub request_memo_limit: usize,
    /// Attempts per storage write before giving up.
    pub write_retry_attempts: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            preload_threshold: DEFAULT_PRELOAD_THRESHOLD,
            default_ttl_secs: DEFAULT_TTL_SECS,
            ttl_delimiter: DEFAULT_TTL_DELIMITER,
            audit_interval_secs: DEFAULT_AUDIT_INTERVAL_SECS,
            audit_refresh_min_removals: DEFAULT_AUDIT_REFRESH_MIN_REMOVALS,
            request_memo_limit: DEFAULT_REQUEST_MEMO_LIMIT,
            write_retry_attempts: DEFAULT_WRITE_RETRY_ATTEMPTS,
        }
    }
}

impl CacheSettings {
    pub fn audit_interval(&self) -> Duration {
        Duration::from_secs(self.audit_interval_secs)
    }

    /// Request memo capacity clamped away from zero for the LRU cache.
    pub fn request_memo_limit_non_zero(&self) -> std::num::NonZeroUsize {
        std::num::NonZeroUsize::new(self.request_memo_limit).unwrap_or(std::num::NonZeroUsize::MIN)
    }
}

/// Which backend family an adapter talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    Local,
    S3,
    R2,
    DoSpaces,
}

/// Credentials and addressing for an S3-compatible backend.
#[derive(Debug, Clone, Deserialize)]
pub struct S3Settings {
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub region: String,
    pub bucket: String,
    /// Full endpoint override; required for `r2`, derived from the region
    /// for `s3` and `dospaces` when absent.
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// One configured storage backend, selected per site by name.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterSettings {
    pub name: String,
    pub kind: AdapterKind,
    /// Root directory for `local` adapters.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Server-side key prefix prepended to every logical path.
    #[serde(default)]
    pub path_prefix: String,
    #[serde(default)]
    pub s3: Option<S3Settings>,
}

/// Ambient request context: which site and which active adapter.
#[derive(Debug, Clone)]
pub struct SiteContext {
    pub site_id: i64,
    pub adapter_name: String,
}

impl SiteContext {
    pub fn new(site_id: i64, adapter_name: impl Into<String>) -> Self {
        Self {
            site_id,
            adapter_name: adapter_name.into(),
        }
    }
}
