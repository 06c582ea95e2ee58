//! Storage adapters: uniform blob operations over local disk and
//! S3-compatible object stores.
//!
//! One adapter is active per site at a time. Adapters are built lazily by
//! [`AdapterFactory`], probed with a live round trip before being trusted,
//! and cached per adapter name for the life of the worker process.

mod factory;
mod local;
mod s3;

pub use factory::AdapterFactory;
pub use local::LocalAdapter;
pub use s3::S3Adapter;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::warn;

const SOURCE: &str = "storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{path}` not found")]
    NotFound { path: String },
    #[error("invalid storage path `{path}`")]
    InvalidPath { path: String },
    #[error("adapter `{name}` is not configured")]
    UnknownAdapter { name: String },
    #[error("adapter configuration invalid: {message}")]
    Config { message: String },
    #[error("adapter probe failed: {message}")]
    ProbeFailed { message: String },
    #[error("backend returned unexpected status {status} for `{path}`")]
    UnexpectedStatus { status: u16, path: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl StorageError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Listing record for one stored object.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    /// Logical path relative to the adapter root.
    pub path: String,
    pub filename: String,
    pub last_modified: Option<OffsetDateTime>,
}

/// Uniform capability set shared by every backend.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool, StorageError>;
    async fn read(&self, path: &str) -> Result<Bytes, StorageError>;
    async fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError>;
    async fn delete(&self, path: &str) -> Result<(), StorageError>;
    async fn delete_directory(&self, path: &str) -> Result<(), StorageError>;
    async fn create_directory(&self, path: &str) -> Result<(), StorageError>;
    async fn list(&self, path: &str) -> Result<Vec<ObjectInfo>, StorageError>;
    async fn last_modified(&self, path: &str) -> Result<OffsetDateTime, StorageError>;
    async fn size(&self, path: &str) -> Result<u64, StorageError>;
}

/// Write with a bounded retry. Transient backend errors are logged per
/// attempt; the final error is returned once attempts are exhausted.
pub async fn write_with_retry(
    adapter: &dyn StorageAdapter,
    path: &str,
    data: &[u8],
    attempts: u32,
) -> Result<(), StorageError> {
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match adapter.write(path, data).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                warn!(
                    target_module = SOURCE,
                    path,
                    attempt,
                    attempts,
                    error = %err,
                    "storage write failed"
                );
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| StorageError::config("write retry with zero attempts")))
}

/// Soft existence check: transient errors are logged and read as "absent",
/// never propagated to the caller.
pub async fn exists_soft(adapter: &dyn StorageAdapter, path: &str) -> bool {
    match adapter.exists(path).await {
        Ok(found) => found,
        Err(err) => {
            warn!(target_module = SOURCE, path, error = %err, "existence check failed");
            false
        }
    }
}
