//! Error types for the foliodb document store.
//!
//! All public APIs return `FoliodbResult<T>` — no panics in library code
//! outside of invariants that should be unreachable.

use thiserror::Error;

/// Unified error type for all foliodb operations.
#[derive(Debug, Error)]
pub enum FoliodbError {
    /// A database name, table name, or row id failed the `[A-Za-z0-9]+` rule.
    #[error("invalid name: {0}")]
    NameInvalid(String),

    /// Referenced database, table, row, or column does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A value failed schema validation (type mismatch, missing required
    /// column, or value not in an enum's allowed set).
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// An operation touched an encrypted column without a KEK configured.
    #[error("a key-encryption key is required for this operation: {0}")]
    CryptoRequired(String),

    /// The KEK did not unwrap the table's DEK, or an AEAD tag failed to
    /// verify on read.
    #[error("decryption failed: {0}")]
    CryptoFailed(String),

    /// Lock acquisition, write, rename, or remove failed at the filesystem
    /// boundary.
    #[error("io failure: {0}")]
    IoFailure(String),

    /// The query builder was malformed (no `from`, bad sort order, bad
    /// limit).
    #[error("malformed query: {0}")]
    QueryMalformed(String),

    /// An invariant that should be unreachable was violated.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl From<std::io::Error> for FoliodbError {
    fn from(err: std::io::Error) -> Self {
        FoliodbError::IoFailure(err.to_string())
    }
}

impl From<serde_json::Error> for FoliodbError {
    fn from(err: serde_json::Error) -> Self {
        FoliodbError::SchemaViolation(format!("malformed JSON: {err}"))
    }
}

/// Result type alias for all foliodb operations.
pub type FoliodbResult<T> = Result<T, FoliodbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_not_found() {
        let err = FoliodbError::NotFound("table 'users'".to_string());
        assert_eq!(err.to_string(), "not found: table 'users'");
    }

    #[test]
    fn error_display_name_invalid() {
        let err = FoliodbError::NameInvalid("us-ers".to_string());
        assert!(err.to_string().contains("invalid name"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: FoliodbError = io_err.into();
        assert!(matches!(err, FoliodbError::IoFailure(_)));
    }

    #[test]
    fn json_error_converts() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: FoliodbError = json_err.into();
        assert!(matches!(err, FoliodbError::SchemaViolation(_)));
    }
}
