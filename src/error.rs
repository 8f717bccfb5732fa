//! Error types for SiteLens

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the SiteLens cache
///
/// Only [`Error::Fetch`] and [`Error::Serialization`] on write ever reach the
/// caller of the cache facade. Every other variant is recovered locally and
/// recorded in logs and stats.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Tier Errors
    // =========================================================================
    /// Storage tier is not supported or failed to initialize
    #[error("Tier {tier} unavailable: {reason}")]
    TierUnavailable { tier: String, reason: String },

    /// A stored record could not be decoded
    #[error("Corrupt record in tier {tier}: {reason}")]
    CorruptRecord { tier: String, reason: String },

    // =========================================================================
    // Codec Errors
    // =========================================================================
    /// Value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    // =========================================================================
    // Fetch Errors
    // =========================================================================
    /// Caller-supplied fetch or fallback function failed
    #[error("Fetch for key {key} failed: {reason}")]
    Fetch { key: String, reason: String },
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Shorthand for a corrupt record error
    pub(crate) fn corrupt(tier: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        Error::CorruptRecord {
            tier: tier.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for an unavailable tier error
    pub(crate) fn unavailable(tier: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        Error::TierUnavailable {
            tier: tier.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error means the stored data itself is bad and should be purged
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::CorruptRecord { .. }
                | Error::Serialization(_)
                | Error::DecompressionFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Fetch {
            key: "seo:example.com".into(),
            reason: "timeout".into(),
        };
        assert_eq!(err.to_string(), "Fetch for key seo:example.com failed: timeout");

        let err = Error::unavailable("L2 (Segment)", "read-only filesystem");
        assert_eq!(
            err.to_string(),
            "Tier L2 (Segment) unavailable: read-only filesystem"
        );
    }

    #[test]
    fn test_corruption_classification() {
        assert!(Error::corrupt("L3 (Disk)", "bad header").is_corruption());
        assert!(Error::Serialization("eof".into()).is_corruption());
        assert!(!Error::Config("bad".into()).is_corruption());
        assert!(!Error::Fetch {
            key: "k".into(),
            reason: "r".into()
        }
        .is_corruption());
    }

    #[test]
    fn test_from_serde_json() {
        let parse = serde_json::from_str::<u32>("not a number").unwrap_err();
        let err: Error = parse.into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
