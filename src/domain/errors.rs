//! Domain errors for the Strategist orchestration core.

use thiserror::Error;

/// Domain-level errors that can occur while orchestrating an analysis.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition { from: String, to: String, reason: String },

    #[error("Invalid part number: {0}")]
    InvalidPartNumber(u8),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The operation row changed between read and write.
    #[error("Concurrency conflict: operation {operation_id} expected state {expected}")]
    ConcurrencyConflict { operation_id: String, expected: String },

    #[error("An analysis run is already active for session {0}")]
    RunAlreadyActive(String),

    #[error("Notification failed: {0}")]
    NotificationFailed(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

/// Errors returned by a language-model provider call.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// Invalid request parameters or malformed request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication failed due to invalid or missing API key
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("API server error: {0}")]
    ServerError(String),

    #[error("API server overloaded")]
    Overloaded,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout waiting for response")]
    Timeout,

    /// Provider answered but without usable text.
    #[error("Empty response from model")]
    EmptyResponse,

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl LlmError {
    /// Map an HTTP status and body to an error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            400 | 422 => Self::InvalidRequest(body),
            401 | 403 => Self::AuthenticationFailed(body),
            408 | 504 => Self::Timeout,
            429 => Self::RateLimitExceeded,
            529 => Self::Overloaded,
            500..=599 => Self::ServerError(body),
            _ => Self::Unknown(format!("HTTP {status}: {body}")),
        }
    }

    /// Returns true if this error is transient and should be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded
                | Self::ServerError(_)
                | Self::Overloaded
                | Self::Network(_)
                | Self::Timeout
                | Self::EmptyResponse
        )
    }
}
