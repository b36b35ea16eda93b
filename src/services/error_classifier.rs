//! Classification of orchestration failures.
//!
//! Errors are classified once, where they cross the orchestration boundary.
//! Retry, circuit accounting, queueing and notifications all branch on the
//! resulting [`ClassifiedError`] rather than on concrete error types.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::domain::errors::{DomainError, LlmError};

/// Failure raised while generating a part.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("LLM circuit breaker is open until {retry_after}")]
    CircuitOpen { retry_after: DateTime<Utc> },

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Coarse failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    RateLimit,
    Network,
    ServerError,
    CircuitOpen,
    Fatal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::Network => "network",
            Self::ServerError => "server_error",
            Self::CircuitOpen => "circuit_open",
            Self::Fatal => "fatal",
        }
    }
}

/// Structured failure used for all downstream branching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub retryable: bool,
    pub code: String,
    pub message: String,
}

impl ClassifiedError {
    fn new(category: ErrorCategory, code: &str, message: impl Into<String>) -> Self {
        Self {
            category,
            retryable: category != ErrorCategory::Fatal,
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Whether this failure counts toward the circuit breaker.
    ///
    /// Fatal errors and calls rejected by the breaker itself do not.
    pub fn counts_toward_circuit(&self) -> bool {
        self.retryable && self.category != ErrorCategory::CircuitOpen
    }
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

pub fn classify_llm_error(err: &LlmError) -> ClassifiedError {
    let message = err.to_string();
    match err {
        LlmError::Timeout => ClassifiedError::new(ErrorCategory::Timeout, "LLM_TIMEOUT", message),
        LlmError::RateLimitExceeded => {
            ClassifiedError::new(ErrorCategory::RateLimit, "LLM_RATE_LIMITED", message)
        }
        LlmError::Network(_) => {
            ClassifiedError::new(ErrorCategory::Network, "NETWORK_ERROR", message)
        }
        LlmError::ServerError(_) => {
            ClassifiedError::new(ErrorCategory::ServerError, "LLM_SERVER_ERROR", message)
        }
        LlmError::Overloaded => {
            ClassifiedError::new(ErrorCategory::ServerError, "LLM_OVERLOADED", message)
        }
        LlmError::EmptyResponse => {
            ClassifiedError::new(ErrorCategory::ServerError, "LLM_EMPTY_RESPONSE", message)
        }
        // Unrecognised provider failures are retried rather than failing a paid run.
        LlmError::Unknown(_) => {
            ClassifiedError::new(ErrorCategory::ServerError, "LLM_UNKNOWN_ERROR", message)
        }
        LlmError::InvalidRequest(_) => {
            ClassifiedError::new(ErrorCategory::Fatal, "INVALID_REQUEST", message)
        }
        LlmError::AuthenticationFailed(_) => {
            ClassifiedError::new(ErrorCategory::Fatal, "AUTH_FAILED", message)
        }
    }
}

pub fn classify_error(err: &AnalysisError) -> ClassifiedError {
    match err {
        AnalysisError::Llm(llm) => classify_llm_error(llm),
        AnalysisError::CircuitOpen { .. } => {
            ClassifiedError::new(ErrorCategory::CircuitOpen, "CIRCUIT_OPEN", err.to_string())
        }
        AnalysisError::Domain(DomainError::DatabaseError(_)) => {
            ClassifiedError::new(ErrorCategory::ServerError, "DATABASE_ERROR", err.to_string())
        }
        AnalysisError::Domain(DomainError::NotificationFailed(_)) => {
            ClassifiedError::new(ErrorCategory::Network, "NOTIFICATION_FAILED", err.to_string())
        }
        AnalysisError::Domain(_) => {
            ClassifiedError::new(ErrorCategory::Fatal, "INTERNAL_ERROR", err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_llm_errors_are_retryable() {
        for err in [
            LlmError::Timeout,
            LlmError::RateLimitExceeded,
            LlmError::Overloaded,
            LlmError::Network("reset".into()),
            LlmError::ServerError("502".into()),
        ] {
            let classified = classify_error(&AnalysisError::Llm(err));
            assert!(classified.retryable, "{classified} should be retryable");
            assert!(classified.counts_toward_circuit());
        }
    }

    #[test]
    fn test_fatal_errors_bypass_retry_and_circuit() {
        let classified =
            classify_error(&AnalysisError::Llm(LlmError::AuthenticationFailed("bad key".into())));
        assert_eq!(classified.category, ErrorCategory::Fatal);
        assert!(!classified.retryable);
        assert!(!classified.counts_toward_circuit());
        assert_eq!(classified.code, "AUTH_FAILED");
    }

    #[test]
    fn test_circuit_open_is_retryable_but_not_counted() {
        let classified = classify_error(&AnalysisError::CircuitOpen {
            retry_after: Utc::now(),
        });
        assert_eq!(classified.category, ErrorCategory::CircuitOpen);
        assert!(classified.retryable);
        assert!(!classified.counts_toward_circuit());
    }

    #[test]
    fn test_domain_errors() {
        let db = classify_error(&AnalysisError::Domain(DomainError::DatabaseError(
            "locked".into(),
        )));
        assert!(db.retryable);

        let invalid = classify_error(&AnalysisError::Domain(DomainError::ValidationFailed(
            "bad".into(),
        )));
        assert_eq!(invalid.category, ErrorCategory::Fatal);
    }
}
