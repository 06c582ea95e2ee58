//! Derivative cache index for CMS image add-ons.
//!
//! When an image pipeline renders derivatives (resized, cropped, processed
//! variants), this crate tracks what was generated, where it lives, and how
//! long it stays valid. The durable cache log lives in Postgres, artifacts
//! live behind a [`StorageAdapter`] (local disk or any S3-compatible
//! backend), and a per-process memory index keeps hot lookups off the
//! database.
//!
//! Entry point is [`cache::CacheService`]; see that module's docs for the
//! moving parts.
//!
//! [`StorageAdapter`]: infra::storage::StorageAdapter

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;

pub use application::{CacheLogRepo, KvStore, RepoError};
pub use cache::{CacheOutcome, CacheService, RequestScope, UpdateRequest};
pub use config::{AdapterKind, AdapterSettings, CacheSettings, S3Settings, SiteContext};
pub use domain::{CacheEntry, EntryKey, EntryStats};
pub use infra::db::PgCacheIndex;
pub use infra::storage::{AdapterFactory, StorageAdapter, StorageError};
