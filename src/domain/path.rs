//! Cache path normalization and splitting.
//!
//! Cache entries are keyed by a normalized logical path split into a
//! directory and a filename. Normalization is lossy on purpose: paths are
//! lower-cased and slash-trimmed so the same artifact never lands under two
//! keys because a collaborator built the path differently.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("cache path is empty")]
    Empty,
    #[error("cache path `{path}` has no filename component")]
    MissingFilename { path: String },
}

/// Normalize a logical cache path: backslashes to slashes, lower-case,
/// duplicate slashes collapsed, leading and trailing slashes trimmed.
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = true; // swallows leading slashes
    for ch in path.trim().chars() {
        let ch = if ch == '\\' { '/' } else { ch };
        if ch == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.extend(ch.to_lowercase());
    }
    if out.ends_with('/') {
        out.pop();
    }
    out
}

/// Split a logical path into `(directory, filename)` after normalization.
///
/// The directory may be empty for top-level artifacts. A path that
/// normalizes to nothing, or whose final segment is empty, is rejected.
pub fn split_path(path: &str) -> Result<(String, String), PathError> {
    let normalized = normalize_path(path);
    if normalized.is_empty() {
        return Err(PathError::Empty);
    }
    match normalized.rsplit_once('/') {
        Some((dir, file)) => {
            if file.is_empty() {
                Err(PathError::MissingFilename {
                    path: path.to_string(),
                })
            } else {
                Ok((dir.to_string(), file.to_string()))
            }
        }
        None => Ok((String::new(), normalized)),
    }
}

/// Join a directory and filename back into a logical path.
pub fn join_path(directory: &str, filename: &str) -> String {
    if directory.is_empty() {
        filename.to_string()
    } else {
        format!("{directory}/{filename}")
    }
}

/// The base name shared by size-variant siblings of `filename`.
///
/// Variants append delimiter-separated tokens (dimensions, TTL) to a common
/// stem, so the stem up to the first delimiter identifies the whole family.
pub fn variant_base(filename: &str, delimiter: char) -> &str {
    let stem = filename.split('.').next().unwrap_or(filename);
    stem.split(delimiter).next().unwrap_or(stem)
}

/// Whether `filename` belongs to the variant family named by `base`.
///
/// A member is the bare stem itself, or the stem immediately followed by the
/// variant delimiter or an extension dot. A longer name that merely shares
/// the prefix (`photography` next to `photo`) is a different family.
pub fn in_variant_family(filename: &str, base: &str, delimiter: char) -> bool {
    match filename.strip_prefix(base) {
        Some("") => true,
        Some(rest) => rest.starts_with(delimiter) || rest.starts_with('.'),
        None => false,
    }
}
