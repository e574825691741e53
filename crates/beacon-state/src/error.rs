//! Error types for the Beacon registry store.

use thiserror::Error;

/// Result type alias for registry store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during registry store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("service already registered: {0}")]
    Conflict(String),

    #[error("service not found: {0}")]
    NotFound(String),

    #[error("version mismatch for {name}: expected {expected}, found {actual}")]
    VersionMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("invalid registration: {0}")]
    Invalid(String),

    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}

impl StateError {
    /// True for persistence-layer failures (I/O, corruption, unavailability).
    pub fn is_storage(&self) -> bool {
        !matches!(
            self,
            StateError::Conflict(_)
                | StateError::NotFound(_)
                | StateError::VersionMismatch { .. }
                | StateError::Invalid(_)
        )
    }
}
