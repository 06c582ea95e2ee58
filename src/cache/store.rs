//! Process-lifetime memory index.
//!
//! Mirrors durable cache log rows as `site → adapter → directory →
//! filename → entry`. Rebuilt from the durable log at process start or on
//! demand; never persisted itself.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::domain::{CacheEntry, EntryKey, in_variant_family};

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

type DirMap = HashMap<String, CacheEntry>;
type SiteKey = (i64, String);

#[derive(Default)]
pub struct MemoryIndex {
    entries: RwLock<HashMap<SiteKey, HashMap<String, DirMap>>>,
    /// Partitions that have been fully populated by an eager preload.
    loaded: RwLock<HashSet<SiteKey>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &EntryKey) -> Option<CacheEntry> {
        rw_read(&self.entries, SOURCE, "get")
            .get(&(key.site_id, key.adapter_name.clone()))
            .and_then(|dirs| dirs.get(&key.directory))
            .and_then(|dir| dir.get(&key.filename))
            .cloned()
    }

    pub fn put(&self, entry: CacheEntry) {
        let mut entries = rw_write(&self.entries, SOURCE, "put");
        entries
            .entry((entry.key.site_id, entry.key.adapter_name.clone()))
            .or_default()
            .entry(entry.key.directory.clone())
            .or_default()
            .insert(entry.key.filename.clone(), entry);
    }

    pub fn put_all(&self, batch: impl IntoIterator<Item = CacheEntry>) {
        let mut entries = rw_write(&self.entries, SOURCE, "put_all");
        for entry in batch {
            entries
                .entry((entry.key.site_id, entry.key.adapter_name.clone()))
                .or_default()
                .entry(entry.key.directory.clone())
                .or_default()
                .insert(entry.key.filename.clone(), entry);
        }
    }

    pub fn remove(&self, key: &EntryKey) -> Option<CacheEntry> {
        let mut entries = rw_write(&self.entries, SOURCE, "remove");
        entries
            .get_mut(&(key.site_id, key.adapter_name.clone()))
            .and_then(|dirs| dirs.get_mut(&key.directory))
            .and_then(|dir| dir.remove(&key.filename))
    }

    /// Remove a variant family from one directory: the bare `base` plus every
    /// filename where `base` is followed by `delimiter` or an extension dot.
    /// Returns how many entries were dropped.
    pub fn remove_by_basename(
        &self,
        site_id: i64,
        adapter: &str,
        directory: &str,
        base: &str,
        delimiter: char,
    ) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "remove_by_basename");
        let Some(dir) = entries
            .get_mut(&(site_id, adapter.to_string()))
            .and_then(|dirs| dirs.get_mut(directory))
        else {
            return 0;
        };
        let before = dir.len();
        dir.retain(|filename, _| !in_variant_family(filename, base, delimiter));
        before - dir.len()
    }

    pub fn remove_dir(&self, site_id: i64, adapter: &str, directory: &str) {
        let mut entries = rw_write(&self.entries, SOURCE, "remove_dir");
        if let Some(dirs) = entries.get_mut(&(site_id, adapter.to_string())) {
            dirs.remove(directory);
        }
    }

    pub fn list_dir(
        &self,
        site_id: i64,
        adapter: &str,
        directory: &str,
    ) -> Vec<CacheEntry> {
        rw_read(&self.entries, SOURCE, "list_dir")
            .get(&(site_id, adapter.to_string()))
            .and_then(|dirs| dirs.get(directory))
            .map(|dir| dir.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn list_all(&self, site_id: i64, adapter: &str) -> Vec<CacheEntry> {
        rw_read(&self.entries, SOURCE, "list_all")
            .get(&(site_id, adapter.to_string()))
            .map(|dirs| dirs.values().flat_map(|dir| dir.values().cloned()).collect())
            .unwrap_or_default()
    }

    pub fn directories(&self, site_id: i64, adapter: &str) -> Vec<String> {
        rw_read(&self.entries, SOURCE, "directories")
            .get(&(site_id, adapter.to_string()))
            .map(|dirs| dirs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether the partition was populated by a full preload.
    pub fn is_loaded(&self, site_id: i64, adapter: &str) -> bool {
        rw_read(&self.loaded, SOURCE, "is_loaded").contains(&(site_id, adapter.to_string()))
    }

    pub fn mark_loaded(&self, site_id: i64, adapter: &str) {
        rw_write(&self.loaded, SOURCE, "mark_loaded").insert((site_id, adapter.to_string()));
    }

    pub fn clear(&self, site_id: i64, adapter: &str) {
        rw_write(&self.entries, SOURCE, "clear").remove(&(site_id, adapter.to_string()));
        rw_write(&self.loaded, SOURCE, "clear.loaded").remove(&(site_id, adapter.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntryStats;

    fn entry(dir: &str, file: &str) -> CacheEntry {
        CacheEntry::new(
            EntryKey::new(1, "local", dir, file),
            EntryStats::default(),
            None,
        )
    }

    #[test]
    fn put_get_remove_round_trip() {
        let index = MemoryIndex::new();
        let e = entry("cache/thumbs", "a_1e.jpg");
        index.put(e.clone());

        assert_eq!(index.get(&e.key), Some(e.clone()));
        assert_eq!(index.remove(&e.key), Some(e.clone()));
        assert_eq!(index.get(&e.key), None);
    }

    #[test]
    fn list_dir_is_scoped() {
        let index = MemoryIndex::new();
        index.put(entry("a", "one.jpg"));
        index.put(entry("a", "two.jpg"));
        index.put(entry("b", "three.jpg"));

        assert_eq!(index.list_dir(1, "local", "a").len(), 2);
        assert_eq!(index.list_dir(1, "local", "b").len(), 1);
        assert!(index.list_dir(1, "local", "c").is_empty());
        assert_eq!(index.list_all(1, "local").len(), 3);
        assert!(index.list_all(2, "local").is_empty());
    }

    #[test]
    fn remove_by_basename_drops_variant_family() {
        let index = MemoryIndex::new();
        index.put(entry("d", "photo_100x100_1e.jpg"));
        index.put(entry("d", "photo_200x200_1e.jpg"));
        index.put(entry("d", "other_1e.jpg"));

        assert_eq!(index.remove_by_basename(1, "local", "d", "photo", '_'), 2);
        assert_eq!(index.list_dir(1, "local", "d").len(), 1);
    }

    #[test]
    fn remove_by_basename_spares_prefix_sharing_neighbors() {
        let index = MemoryIndex::new();
        index.put(entry("d", "photo_1e.jpg"));
        index.put(entry("d", "photo.jpg"));
        index.put(entry("d", "photography_abcdef.jpg"));

        assert_eq!(index.remove_by_basename(1, "local", "d", "photo", '_'), 2);
        let survivors = index.list_dir(1, "local", "d");
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].key.filename, "photography_abcdef.jpg");
    }

    #[test]
    fn loaded_flag_tracks_partition() {
        let index = MemoryIndex::new();
        assert!(!index.is_loaded(1, "local"));
        index.mark_loaded(1, "local");
        assert!(index.is_loaded(1, "local"));

        index.clear(1, "local");
        assert!(!index.is_loaded(1, "local"));
    }
}
