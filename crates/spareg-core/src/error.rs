//! Error types for point-set construction and numeric helpers.

use thiserror::Error;

/// Errors raised by the core data model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// A named matrix does not have one row per point.
    #[error("Row count mismatch for '{key}': expected {expected}, got {actual}")]
    RowCountMismatch {
        key: String,
        expected: usize,
        actual: usize,
    },

    /// A layer does not have one column per feature name.
    #[error("Column count mismatch for '{key}': expected {expected}, got {actual}")]
    ColumnCountMismatch {
        key: String,
        expected: usize,
        actual: usize,
    },

    /// Requested key is not present.
    #[error("Key '{0}' not found")]
    MissingKey(String),

    /// Linear algebra routine failed.
    #[error("Linear algebra failure: {0}")]
    Linalg(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create a missing key error.
    pub fn missing_key(key: impl Into<String>) -> Self {
        Self::MissingKey(key.into())
    }

    /// Create a linear algebra error.
    pub fn linalg(msg: impl Into<String>) -> Self {
        Self::Linalg(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::missing_key("spatial");
        assert_eq!(err.to_string(), "Key 'spatial' not found");
    }

    #[test]
    fn test_row_count_mismatch_display() {
        let err = CoreError::RowCountMismatch {
            key: "X".into(),
            expected: 10,
            actual: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected 10"));
        assert!(msg.contains("got 5"));
    }
}
