//! Outcome codes for cache maintenance operations.

/// Result of a clear or audit run, reported as a code rather than an error
/// so the calling UI or CLI can render a specific message per case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Success,
    NothingToClear,
    NotEnabled,
    NotDue,
    EmptyCacheLog,
    NotValidLocation,
    Error,
}

impl CacheOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NothingToClear => "nothing_to_clear",
            Self::NotEnabled => "not_enabled",
            Self::NotDue => "not_due",
            Self::EmptyCacheLog => "empty_cache_log",
            Self::NotValidLocation => "not_valid_location",
            Self::Error => "error",
        }
    }

    /// Whether the operation actually ran to completion.
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl std::fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
