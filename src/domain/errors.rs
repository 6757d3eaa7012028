//! Domain errors for TriAI.

use thiserror::Error;

/// Failure surfaced by the resilient store.
///
/// Transient connectivity failures never appear here directly: they are
/// retried and only become [`StoreError::RetriesExhausted`] once the ceiling
/// is reached.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Statement failed: {message} (statement: {statement})")]
    Statement { statement: String, message: String },

    #[error("Storage unavailable after {attempts} attempts: {message} (statement: {statement})")]
    RetriesExhausted {
        attempts: u32,
        statement: String,
        message: String,
    },

    #[error("Invalid store input: {0}")]
    InvalidInput(String),
}

impl StoreError {
    /// Whether this is the fatal outcome of an exhausted retry loop.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }
}

/// Domain-level errors that can occur in the TriAI system.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(i64),

    #[error("Memory not found: {0}")]
    MemoryNotFound(i64),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_includes_statement() {
        let err = StoreError::RetriesExhausted {
            attempts: 4,
            statement: "SELECT 1".into(),
            message: "connection refused".into(),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("SELECT 1"));
        assert!(err.to_string().contains("4 attempts"));
    }

    #[test]
    fn test_domain_error_wraps_store_error() {
        let err: DomainError = StoreError::InvalidInput("no rows".into()).into();
        assert!(matches!(err, DomainError::Storage(StoreError::InvalidInput(_))));
    }
}
