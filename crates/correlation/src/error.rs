// Error types for correlation storage

use thiserror::Error;

use crate::models::CorrelationState;

/// Result type alias for correlation repository operations
pub type Result<T> = std::result::Result<T, CorrelationError>;

/// Errors that can occur when reading or mutating correlations
#[derive(Debug, Error)]
pub enum CorrelationError {
    /// A keyed lookup or keyed state transition matched no records
    #[error("{0}")]
    NotFound(String),

    /// Required identifying fields were missing at create time
    #[error("validation error: {0}")]
    Validation(String),

    /// A finish operation was attempted on a record that is already terminal
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: CorrelationState,
        to: CorrelationState,
    },

    /// The repository was used before `initialize()`
    #[error("correlation repository is not initialized")]
    NotInitialized,

    /// Storage configuration could not be loaded
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Storage engine failure, propagated unchanged
    #[error("database error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl CorrelationError {
    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        CorrelationError::NotFound(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        CorrelationError::Validation(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        CorrelationError::Configuration(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CorrelationError::NotFound(_))
    }
}

impl From<anyhow::Error> for CorrelationError {
    fn from(err: anyhow::Error) -> Self {
        CorrelationError::config(format!("{:#}", err))
    }
}
