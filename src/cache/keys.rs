//! Key builders for the durable key-value cache and the pending-write map.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Stored row count for one site + adapter partition; advisory input to the
/// loading strategy.
pub(crate) fn stored_count_key(site_id: i64, adapter: &str) -> String {
    format!("pictura:stored_count:{site_id}:{adapter}")
}

/// Map of directories known to exist on the backend.
pub(crate) fn valid_dirs_key(site_id: i64, adapter: &str) -> String {
    format!("pictura:valid_dirs:{site_id}:{adapter}")
}

/// Timestamp marker of the last completed audit.
pub(crate) fn audit_marker_key(site_id: i64, adapter: &str) -> String {
    format!("pictura:audit_marker:{site_id}:{adapter}")
}

/// Cached per-directory rollup.
pub(crate) fn directory_status_key(site_id: i64, adapter: &str, directory: &str) -> String {
    format!("pictura:dir_status:{site_id}:{adapter}:{directory}")
}

/// Dedup key for pending updates: one slot per path + cache dir.
pub(crate) fn pending_update_hash(image_path: &str, cache_dir: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    image_path.hash(&mut hasher);
    cache_dir.hash(&mut hasher);
    hasher.finish()
}
