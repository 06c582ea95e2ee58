//! Filename-embedded TTL tokens.
//!
//! Derived artifacts carry their lifetime in the filename: a hexadecimal
//! number of seconds appended as a delimiter-separated segment, e.g.
//! `photo_100x100_1e.jpg` lives for 0x1e = 30 seconds. The literal token
//! `abcdef` marks an artifact that never expires. This is an external wire
//! format generated by the transform pipeline; all parsing lives behind
//! [`parse_ttl_from_filename`] so the encoding can change in one place.

/// Magic token marking an artifact that never expires.
pub const PERPETUAL_TOKEN: &str = "abcdef";

/// Parsed lifetime of a cached artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Never expires while an index row or backing file exists.
    Perpetual,
    /// Expires once the artifact is older than this many seconds.
    /// Zero means the artifact is never considered valid.
    Seconds(u64),
}

impl Ttl {
    pub fn is_perpetual(self) -> bool {
        matches!(self, Ttl::Perpetual)
    }
}

/// Extract the TTL from a cache filename.
///
/// The extension is ignored; the remaining stem is split on `delimiter` and
/// scanned from the last segment backward for the first hex-looking token.
/// No token at all falls back to `default_secs`.
pub fn parse_ttl_from_filename(filename: &str, delimiter: char, default_secs: u64) -> Ttl {
    let stem = filename.split('.').next().unwrap_or(filename);
    for segment in stem.rsplit(delimiter) {
        if segment == PERPETUAL_TOKEN {
            return Ttl::Perpetual;
        }
        if is_hex_token(segment) {
            // Overflow is treated the same as an unparsable token: the
            // artifact is never valid and gets cleaned up.
            return match u64::from_str_radix(segment, 16) {
                Ok(secs) => Ttl::Seconds(secs),
                Err(_) => Ttl::Seconds(0),
            };
        }
    }
    Ttl::Seconds(default_secs)
}

fn is_hex_token(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_hexdigit())
}
