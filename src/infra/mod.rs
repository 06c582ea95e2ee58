//! Infrastructure adapters: durable persistence and blob storage backends.

pub mod db;
pub mod storage;
