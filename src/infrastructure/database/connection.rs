use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::errors::DatabaseError;
use crate::domain::models::DatabaseConfig;

/// Database connection pool manager
///
/// Manages the `SQLite` pool with WAL mode enabled. The orchestrator writes
/// from several tasks at once (runs, the retry processor, admin commands),
/// so every connection waits on a busy database instead of failing.
pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    /// Create a new connection pool
    ///
    /// # Arguments
    /// * `database_url` - `SQLite` URL (e.g. "sqlite:.strategist/strategist.db" or "sqlite::memory:")
    /// * `max_connections` - upper bound of the pool
    ///
    /// # Configuration
    /// - Journal mode: WAL
    /// - Synchronous: NORMAL
    /// - Foreign keys: enabled
    /// - Busy timeout: 5 seconds
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, DatabaseError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| DatabaseError::ConnectionPoolError(format!("Invalid database URL: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        // An in-memory database exists per connection, so tests get a single one.
        let in_memory = database_url.contains(":memory:");
        let max_connections = if in_memory { 1 } else { max_connections.max(1) };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(if in_memory { None } else { Some(Duration::from_secs(30)) })
            .max_lifetime(if in_memory { None } else { Some(Duration::from_secs(1800)) })
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| {
                DatabaseError::ConnectionPoolError(format!("Failed to create connection pool: {e}"))
            })?;

        debug!(database_url, max_connections, "database pool ready");
        Ok(Self { pool })
    }

    /// Open the database described by the configuration
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        Self::new(&config.url(), config.max_connections).await
    }

    /// Run migrations at startup
    ///
    /// Safe to call multiple times; only pending migrations are applied.
    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Get a reference to the connection pool
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the connection pool gracefully
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migration_creates_tables() {
        let db = DatabaseConnection::new("sqlite::memory:", 5)
            .await
            .expect("failed to create connection");
        db.migrate().await.expect("failed to run migrations");
        db.migrate().await.expect("migrations should be idempotent");

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .expect("failed to query tables");
        let names: Vec<String> = tables.into_iter().map(|t| t.0).collect();

        assert_eq!(
            names,
            vec![
                "analysis_operation_events",
                "analysis_operations",
                "analysis_results",
                "analysis_sessions",
                "retry_queue",
            ]
        );
        db.close().await;
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let db = DatabaseConnection::new("sqlite::memory:", 1)
            .await
            .expect("failed to create connection");
        let result: (i32,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(db.pool())
            .await
            .expect("failed to check foreign keys pragma");
        assert_eq!(result.0, 1);
    }
}
