//! Lazy, probed adapter construction.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::{AdapterKind, AdapterSettings};

use super::{LocalAdapter, S3Adapter, StorageAdapter, StorageError, write_with_retry};

const PROBE_DIR: &str = "_pictura_probe";
const PROBE_FILE: &str = "_pictura_probe/probe.txt";
const PROBE_PAYLOAD: &[u8] = b"pictura storage probe";

/// Builds adapters on first use and caches them per adapter name for the
/// life of the worker process. A freshly built adapter must survive a live
/// round trip (write, read back, compare, delete) before it is trusted;
/// a failed probe is not cached so the next request retries construction.
pub struct AdapterFactory {
    settings: HashMap<String, AdapterSettings>,
    cache: DashMap<String, Arc<dyn StorageAdapter>>,
    client: Client,
    /// Attempts per probe write, from `CacheSettings::write_retry_attempts`.
    write_attempts: u32,
}

impl AdapterFactory {
    pub fn new(adapters: Vec<AdapterSettings>, client: Client, write_attempts: u32) -> Self {
        let settings = adapters
            .into_iter()
            .map(|adapter| (adapter.name.clone(), adapter))
            .collect();
        Self {
            settings,
            cache: DashMap::new(),
            client,
            write_attempts,
        }
    }

    /// Fetch the adapter registered under `name`, constructing and probing
    /// it if this is the first use.
    pub async fn get(&self, name: &str) -> Result<Arc<dyn StorageAdapter>, StorageError> {
        if let Some(cached) = self.cache.get(name) {
            return Ok(Arc::clone(cached.value()));
        }

        let settings = self
            .settings
            .get(name)
            .ok_or_else(|| StorageError::UnknownAdapter { name: name.into() })?;

        let adapter = build(settings, self.client.clone())?;
        if let Err(err) = probe(adapter.as_ref(), self.write_attempts).await {
            warn!(adapter = name, error = %err, "storage adapter failed its probe");
            return Err(err);
        }

        debug!(adapter = name, "storage adapter constructed and probed");
        self.cache.insert(name.to_string(), Arc::clone(&adapter));
        Ok(adapter)
    }
}

fn build(
    settings: &AdapterSettings,
    client: Client,
) -> Result<Arc<dyn StorageAdapter>, StorageError> {
    match settings.kind {
        AdapterKind::Local => {
            let root = settings
                .root
                .clone()
                .ok_or_else(|| StorageError::config("local adapter requires a root directory"))?;
            Ok(Arc::new(LocalAdapter::new(root)?))
        }
        AdapterKind::S3 | AdapterKind::R2 | AdapterKind::DoSpaces => {
            Ok(Arc::new(S3Adapter::new(settings, client)?))
        }
    }
}

async fn probe(adapter: &dyn StorageAdapter, write_attempts: u32) -> Result<(), StorageError> {
    adapter.create_directory(PROBE_DIR).await?;
    write_with_retry(adapter, PROBE_FILE, PROBE_PAYLOAD, write_attempts).await?;
    let echoed = adapter.read(PROBE_FILE).await?;
    if echoed.as_ref() != PROBE_PAYLOAD {
        // Clean up before failing; a lying backend should not be trusted
        // with cache traffic.
        let _ = adapter.delete(PROBE_FILE).await;
        return Err(StorageError::ProbeFailed {
            message: "probe payload mismatch on read-back".into(),
        });
    }
    adapter.delete(PROBE_FILE).await?;
    Ok(())
}
