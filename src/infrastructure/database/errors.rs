use thiserror::Error;

use crate::domain::errors::DomainError;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationFailed(#[from] sqlx::migrate::MigrateError),

    #[error("Connection pool error: {0}")]
    ConnectionPoolError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("DateTime parse error: {0}")]
    DateTimeParseError(#[from] chrono::ParseError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl DatabaseError {
    /// Wrap a column value that failed domain parsing.
    pub fn parse(column: &str, err: impl std::fmt::Display) -> Self {
        Self::ParseError(format!("{column}: {err}"))
    }
}

impl From<DatabaseError> for DomainError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::JsonError(e) => DomainError::SerializationError(e.to_string()),
            other => DomainError::DatabaseError(other.to_string()),
        }
    }
}
