//! Error types for the cache engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache engine.
///
/// Steady-state cache operations are fail-open: the managers catch these
/// internally, log them, and degrade to a miss or a no-op. Only the
/// administrative purge surface propagates them to the caller.
#[derive(Error, Debug)]
pub enum Error {
    /// Backing key-value store unavailable or misbehaving
    #[error("key-value store error: {0}")]
    Store(String),

    /// Stored entry failed integrity verification or structural parsing.
    /// The offending key must be deleted and the read treated as a miss.
    #[error("corrupt cache entry at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// Object graph could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(String),

    /// Persistence-layer collaborator failed
    #[error("entity store error: {0}")]
    Persistence(String),

    /// Type tag is not registered as cacheable, or is a reserved token
    #[error("unknown or reserved type tag: {0}")]
    UnknownType(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization error from the transport encoding
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the error denotes a corrupt entry that the reader must
    /// self-heal by deleting the key.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Error::Corrupt { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    #[test]
    fn test_serde_failure_converts() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = parse_err.into();
        assert_matches!(err, Error::Serialization(_));
    }

    #[test]
    fn test_corrupt_classification() {
        let err = Error::Corrupt {
            key: "app:Product:42".to_string(),
            reason: "hash mismatch".to_string(),
        };
        assert!(err.is_corrupt());
        assert!(!Error::Store("down".to_string()).is_corrupt());
    }

    #[test]
    fn test_display_includes_key() {
        let err = Error::Corrupt {
            key: "app:Product:42".to_string(),
            reason: "type mismatch".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("app:Product:42"));
        assert!(msg.contains("type mismatch"));
    }
}
