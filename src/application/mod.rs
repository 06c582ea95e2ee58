//! Persistence contracts consumed by the cache subsystem.

pub mod repos;

#[cfg(test)]
pub(crate) mod testing;

pub use repos::{CacheLogRepo, KvStore, RepoError};
