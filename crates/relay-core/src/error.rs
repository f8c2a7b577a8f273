//! Error types for relay-core

use thiserror::Error;

/// Result type alias using relay-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in relay-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Adapter could not reach its backing store
    #[error("Connection error: {0}")]
    Connection(String),

    /// An expected table or column is absent from the source schema
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A mapping expression referenced a field the record does not have
    #[error("Unresolved reference: {0}")]
    UnresolvedReference(String),

    /// A mapping expression failed to evaluate (division by zero, type mismatch)
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// The adapter cannot honor the requested filter or write
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The slave store rejected one record's write (constraint violation,
    /// type error); scoped to that record, not the job
    #[error("Record write rejected: {0}")]
    WriteRejected(String),

    /// The conflict was already resolved or skipped
    #[error("Conflict already resolved: {0}")]
    AlreadyResolved(String),

    /// The captured record expired before it could be resolved
    #[error("Captured state expired: {0}")]
    StateExpired(String),

    /// A bounded adapter or state-store call ran out of time
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Durable storage error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the engine should retry the operation with backoff.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Http(_) | Self::Timeout(_)
        )
    }

    /// Whether the error is scoped to one record rather than the whole job.
    pub const fn is_per_record(&self) -> bool {
        matches!(
            self,
            Self::UnresolvedReference(_) | Self::Evaluation(_) | Self::WriteRejected(_)
        )
    }
}
