//! Error types for the timesheet core

use thiserror::Error;

/// Main error type for all core operations.
///
/// Variants map onto the boundary error kinds the service distinguishes when
/// reporting failures to a caller (see the error handling design notes).
#[derive(Debug, Error)]
pub enum Error {
    /// Requested entity does not exist for this user.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique or overlap constraint violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Operation forbidden by current state.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Malformed input, including DSL parse errors. `position` is a byte
    /// offset into the offending input when known.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String, position: Option<usize> },

    /// The external calendar provider is unavailable after retries.
    #[error("external provider unavailable: {0}")]
    ExternalUnavailable(String),

    /// The delta/sync token is no longer honored by the provider.
    #[error("delta token expired")]
    DeltaTokenExpired,

    /// Credentials could not be refreshed; caller must reconnect.
    #[error("needs reauthorization: {0}")]
    NeedsReauth(String),

    /// Caller deadline exceeded or operation was canceled.
    #[error("canceled")]
    Canceled,

    /// Unexpected internal error, logged with a correlation id.
    #[error("internal error [{correlation_id}]: {message}")]
    Internal { message: String, correlation_id: uuid::Uuid },

    /// Database errors not otherwise classified.
    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Migration errors.
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Serialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client errors talking to the calendar provider.
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

impl Error {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument { message: message.into(), position: None }
    }

    pub fn invalid_argument_at(message: impl Into<String>, position: usize) -> Self {
        Error::InvalidArgument { message: message.into(), position: Some(position) }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal { message: message.into(), correlation_id: uuid::Uuid::new_v4() }
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
