//! Pure domain types for the image cache: entry keys and records, path
//! normalization, and the filename-embedded TTL wire format.

pub mod entry;
pub mod path;
pub mod ttl;

pub use entry::{CacheEntry, DirectoryStatusSummary, EntryKey, EntryStats};
pub use path::{PathError, in_variant_family, join_path, normalize_path, split_path, variant_base};
pub use ttl::{PERPETUAL_TOKEN, Ttl, parse_ttl_from_filename};
