//! Error types for registration operations.
//!
//! Configuration problems are reported before the iterative loop starts;
//! inside the loop only numerical and linear-algebra failures can occur.

use spareg_core::CoreError;
use thiserror::Error;

/// Main error type for registration operations.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// Invalid configuration (unknown option value, non-positive tunable,
    /// malformed guidance pairs).
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A spatial key, feature layer, embedding or label column is absent.
    #[error("Missing key: {0}")]
    MissingKey(String),

    /// Dimension mismatch.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Shape mismatch.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// NaN or Inf detected in updated parameters.
    #[error("Numerical degeneracy: {0}")]
    NumericalDegeneracy(String),

    /// SVD or pseudo-inverse failed.
    #[error("Linear algebra failure: {0}")]
    Linalg(String),
}

/// Result type for registration operations.
pub type Result<T> = std::result::Result<T, RegistrationError>;

impl RegistrationError {
    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a missing key error.
    pub fn missing_key(msg: impl Into<String>) -> Self {
        Self::MissingKey(msg.into())
    }

    /// Create a dimension mismatch error.
    pub fn dimension_mismatch(msg: impl Into<String>) -> Self {
        Self::DimensionMismatch(msg.into())
    }

    /// Create a numerical degeneracy error.
    pub fn numerical_degeneracy(msg: impl Into<String>) -> Self {
        Self::NumericalDegeneracy(msg.into())
    }

    /// True for errors raised while validating inputs, before any iteration.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration(_)
                | Self::MissingKey(_)
                | Self::DimensionMismatch(_)
                | Self::ShapeMismatch { .. }
        )
    }
}

impl From<CoreError> for RegistrationError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::MissingKey(key) => Self::MissingKey(key),
            CoreError::Linalg(msg) => Self::Linalg(msg),
            CoreError::RowCountMismatch {
                expected, actual, ..
            }
            | CoreError::ColumnCountMismatch {
                expected, actual, ..
            } => Self::ShapeMismatch {
                expected: vec![expected],
                actual: vec![actual],
            },
        }
    }
}
