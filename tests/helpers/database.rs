use strategist::domain::models::{AnalysisSession, Tier};
use strategist::domain::ports::SessionRepository;
use strategist::infrastructure::database::{DatabaseConnection, SessionRepositoryImpl};

/// Create an in-memory SQLite database for testing
///
/// Each call creates a completely isolated database instance with
/// migrations applied. The pool holds a single connection so every query
/// sees the same in-memory database.
pub async fn setup_test_db() -> DatabaseConnection {
    let db = DatabaseConnection::new("sqlite::memory:", 1)
        .await
        .expect("failed to create test database");
    db.migrate().await.expect("failed to run migrations");
    db
}

/// Close the connection pool at the end of a test
pub async fn teardown_test_db(db: DatabaseConnection) {
    db.close().await;
}

/// Insert a paid session ready for analysis
pub async fn insert_session(
    db: &DatabaseConnection,
    id: &str,
    tier: Tier,
    email: Option<&str>,
) -> AnalysisSession {
    let session = AnalysisSession::new(
        id,
        tier,
        "Our B2B churn doubled after the pricing change. What should we do?",
        email.map(str::to_string),
    );
    SessionRepositoryImpl::new(db.pool().clone())
        .create_session(&session)
        .await
        .expect("failed to create session");
    session
}
