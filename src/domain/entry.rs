//! Cache log records.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::path::join_path;

/// Natural key of a cached artifact: one durable row per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey {
    pub site_id: i64,
    pub adapter_name: String,
    pub directory: String,
    pub filename: String,
}

impl EntryKey {
    pub fn new(
        site_id: i64,
        adapter_name: impl Into<String>,
        directory: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            site_id,
            adapter_name: adapter_name.into(),
            directory: directory.into(),
            filename: filename.into(),
        }
    }

    /// The logical path this key describes, relative to the adapter root.
    pub fn path(&self) -> String {
        join_path(&self.directory, &self.filename)
    }
}

/// Generation statistics persisted as the `stats` JSON blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryStats {
    /// Unix timestamp of first successful generation.
    pub inception_date: i64,
    /// How many times the artifact has been (re)generated.
    pub count: i64,
    /// Size of the backing file in bytes.
    pub size: i64,
    /// Seconds spent generating the artifact, accumulated across runs.
    pub processing_time: f64,
    /// Logical path of the source image the artifact was derived from.
    pub sourcepath: String,
}

impl Default for EntryStats {
    fn default() -> Self {
        Self {
            inception_date: 0,
            count: 0,
            size: 0,
            processing_time: 0.0,
            sourcepath: String::new(),
        }
    }
}

/// One cached artifact as recorded in the durable cache log.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: EntryKey,
    pub stats: EntryStats,
    /// Optional decoded variables associated with the artifact
    /// (image dimensions, generation parameters).
    pub values: Option<JsonValue>,
}

impl CacheEntry {
    pub fn new(key: EntryKey, stats: EntryStats, values: Option<JsonValue>) -> Self {
        Self { key, stats, values }
    }

    /// Fold a regeneration into the recorded stats: the inception date and
    /// source path of the first generation win, everything else accumulates
    /// or takes the newer value.
    pub fn merge_regeneration(&mut self, newer: &EntryStats) {
        if self.stats.inception_date == 0 {
            self.stats.inception_date = newer.inception_date;
        }
        if self.stats.sourcepath.is_empty() {
            self.stats.sourcepath = newer.sourcepath.clone();
        }
        self.stats.count += 1;
        self.stats.size = newer.size;
        self.stats.processing_time += newer.processing_time;
    }
}

/// Aggregated per-directory rollup, derived from cache log rows and cached
/// in the durable key-value store as an optimization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectoryStatusSummary {
    pub earliest_inception: i64,
    pub count: i64,
    pub total_size: i64,
    pub total_processing_time: f64,
}

impl DirectoryStatusSummary {
    pub fn accumulate(&mut self, stats: &EntryStats) {
        if stats.inception_date > 0
            && (self.earliest_inception == 0 || stats.inception_date < self.earliest_inception)
        {
            self.earliest_inception = stats.inception_date;
        }
        self.count += stats.count.max(1);
        self.total_size += stats.size;
        self.total_processing_time += stats.processing_time;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_path_round_trip() {
        let key = EntryKey::new(1, "local", "cache/thumbs", "a_1e.jpg");
        assert_eq!(key.path(), "cache/thumbs/a_1e.jpg");

        let top = EntryKey::new(1, "local", "", "a.jpg");
        assert_eq!(top.path(), "a.jpg");
    }

    #[test]
    fn merge_preserves_inception_and_accumulates() {
        let key = EntryKey::new(1, "local", "d", "f_1e.jpg");
        let mut entry = CacheEntry::new(
            key,
            EntryStats {
                inception_date: 100,
                count: 1,
                size: 10,
                processing_time: 0.5,
                sourcepath: "src/a.jpg".into(),
            },
            None,
        );

        entry.merge_regeneration(&EntryStats {
            inception_date: 200,
            count: 1,
            size: 12,
            processing_time: 0.25,
            sourcepath: "src/other.jpg".into(),
        });

        assert_eq!(entry.stats.inception_date, 100);
        assert_eq!(entry.stats.sourcepath, "src/a.jpg");
        assert_eq!(entry.stats.count, 2);
        assert_eq!(entry.stats.size, 12);
        assert!((entry.stats.processing_time - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn summary_accumulates_earliest_inception() {
        let mut summary = DirectoryStatusSummary::default();
        summary.accumulate(&EntryStats {
            inception_date: 300,
            count: 2,
            size: 10,
            processing_time: 1.0,
            sourcepath: String::new(),
        });
        summary.accumulate(&EntryStats {
            inception_date: 100,
            count: 1,
            size: 5,
            processing_time: 0.5,
            sourcepath: String::new(),
        });

        assert_eq!(summary.earliest_inception, 100);
        assert_eq!(summary.count, 3);
        assert_eq!(summary.total_size, 15);
        assert!((summary.total_processing_time - 1.5).abs() < f64::EPSILON);
    }
}
