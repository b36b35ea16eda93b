mod helpers;

use strategist::domain::errors::DomainError;
use strategist::domain::models::{
    AnalysisSession, PartNumber, ResultUpdate, SessionStatus, Tier,
};
use strategist::domain::ports::SessionRepository;
use strategist::infrastructure::database::SessionRepositoryImpl;

use helpers::database::{setup_test_db, teardown_test_db};

fn part(n: u8) -> PartNumber {
    PartNumber::new(n).unwrap()
}

#[tokio::test]
async fn test_create_and_get_session() {
    let db = setup_test_db().await;
    let repo = SessionRepositoryImpl::new(db.pool().clone());

    let session = AnalysisSession::new(
        "sess_create",
        Tier::Medium,
        "Activation fell after the redesign",
        Some("pm@example.com".to_string()),
    );
    repo.create_session(&session)
        .await
        .expect("failed to create session");

    let retrieved = repo
        .get_session("sess_create")
        .await
        .expect("failed to get session")
        .expect("session exists");
    assert_eq!(retrieved.id, "sess_create");
    assert_eq!(retrieved.tier, Tier::Medium);
    assert_eq!(retrieved.status, SessionStatus::PendingPayment);
    assert_eq!(retrieved.email.as_deref(), Some("pm@example.com"));
    assert_eq!(retrieved.problem_statement, "Activation fell after the redesign");

    // An empty result row is created alongside the session.
    let result = repo.get_analysis_result("sess_create").await.unwrap().unwrap();
    assert!(result.single_result.is_none());
    assert!(result.completed_parts().is_empty());

    teardown_test_db(db).await;
}

#[tokio::test]
async fn test_get_nonexistent_session() {
    let db = setup_test_db().await;
    let repo = SessionRepositoryImpl::new(db.pool().clone());

    assert!(repo.get_session("sess_missing").await.unwrap().is_none());
    let err = repo
        .update_session_status("sess_missing", SessionStatus::Processing)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::SessionNotFound(_)));

    teardown_test_db(db).await;
}

#[tokio::test]
async fn test_result_updates_merge_columns() {
    let db = setup_test_db().await;
    let repo = SessionRepositoryImpl::new(db.pool().clone());
    let session = AnalysisSession::new("sess_merge", Tier::Full, "Problem", None);
    repo.create_session(&session).await.unwrap();

    repo.update_analysis_result("sess_merge", ResultUpdate::part(part(1), "one"))
        .await
        .unwrap();
    repo.update_analysis_result("sess_merge", ResultUpdate::part(part(2), "two"))
        .await
        .unwrap();
    repo.update_analysis_result("sess_merge", ResultUpdate::markdown("# Report", true))
        .await
        .unwrap();

    let result = repo.get_analysis_result("sess_merge").await.unwrap().unwrap();
    assert_eq!(result.part(part(1)), Some("one"));
    assert_eq!(result.part(part(2)), Some("two"));
    assert!(result.part(part(3)).is_none());
    assert_eq!(result.full_markdown.as_deref(), Some("# Report"));
    assert!(result.is_partial);

    // Rewriting a part keeps the other columns.
    repo.update_analysis_result("sess_merge", ResultUpdate::part(part(1), "one, revised"))
        .await
        .unwrap();
    let result = repo.get_analysis_result("sess_merge").await.unwrap().unwrap();
    assert_eq!(result.part(part(1)), Some("one, revised"));
    assert_eq!(result.full_markdown.as_deref(), Some("# Report"));

    teardown_test_db(db).await;
}

#[tokio::test]
async fn test_status_updates() {
    let db = setup_test_db().await;
    let repo = SessionRepositoryImpl::new(db.pool().clone());
    let session = AnalysisSession::new("sess_status", Tier::Standard, "Problem", None);
    repo.create_session(&session).await.unwrap();

    repo.update_session_status("sess_status", SessionStatus::Processing)
        .await
        .unwrap();
    repo.update_session_status("sess_status", SessionStatus::Completed)
        .await
        .unwrap();

    let stored = repo.get_session("sess_status").await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);
    assert!(stored.updated_at >= stored.created_at);

    teardown_test_db(db).await;
}
