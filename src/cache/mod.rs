//! Image derivative cache.
//!
//! The subsystem keeps three views of the same cache in agreement:
//!
//! - the **durable cache log** (Postgres), the source of truth across
//!   worker processes;
//! - the **memory index**, a process-lifetime mirror populated eagerly or
//!   selectively depending on corpus size;
//! - the **blob store** itself, behind a [`StorageAdapter`] so local disk
//!   and S3-compatible backends look alike.
//!
//! [`CacheService`] is the facade the image pipeline talks to. It is
//! constructed once per worker and injected; per-request state lives in an
//! explicit [`RequestScope`]. The request-lifecycle owner must call
//! [`CacheService::close`] so pending batched writes reach the durable log.
//!
//! [`StorageAdapter`]: crate::infra::storage::StorageAdapter

mod audit;
mod batch;
mod freshness;
mod keys;
mod lock;
mod outcome;
mod request;
mod service;
mod store;
mod strategy;

pub use audit::AuditReport;
pub use batch::{PendingUpdate, WriteBatcher};
pub use freshness::{Freshness, evaluate_freshness};
pub use outcome::CacheOutcome;
pub use request::RequestScope;
pub use service::{CacheService, UpdateRequest};
pub use store::MemoryIndex;
pub use strategy::LoadingStrategy;
