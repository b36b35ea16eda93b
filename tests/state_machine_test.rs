mod helpers;

use std::sync::Arc;

use strategist::domain::errors::{DomainError, LlmError};
use strategist::domain::models::{
    replay_events, AnalysisOperation, EventType, OperationFilter, OperationState, PartNumber,
    Tier, TriggeredBy,
};
use strategist::domain::ports::OperationRepository;
use strategist::infrastructure::database::{
    DatabaseConnection, OperationRepositoryImpl, SessionRepositoryImpl,
};
use strategist::services::{classify_llm_error, AnalysisStateMachine, StepResult};

use helpers::database::{insert_session, setup_test_db, teardown_test_db};

fn part(n: u8) -> PartNumber {
    PartNumber::new(n).unwrap()
}

fn state_machine(db: &DatabaseConnection) -> (AnalysisStateMachine, Arc<OperationRepositoryImpl>) {
    let operations = Arc::new(OperationRepositoryImpl::new(db.pool().clone()));
    let sessions = Arc::new(SessionRepositoryImpl::new(db.pool().clone()));
    (
        AnalysisStateMachine::new(operations.clone(), sessions),
        operations,
    )
}

fn proceed(step: StepResult) -> AnalysisOperation {
    match step {
        StepResult::Proceed(op) => op,
        StepResult::Halted(op) => panic!("unexpected halt in state {}", op.state),
    }
}

/// Run parts `1..=upto` through the state machine.
async fn generate_parts(
    sm: &AnalysisStateMachine,
    mut op: AnalysisOperation,
    upto: u8,
) -> AnalysisOperation {
    for n in (op.completed_parts + 1)..=upto {
        op = proceed(sm.begin_part(&op.operation_id, part(n)).await.unwrap());
        op = proceed(
            sm.complete_part(&op, part(n), 1_500, Some(900), None)
                .await
                .unwrap(),
        );
    }
    op
}

/// Every prefix of the log must replay, and progress never goes down.
async fn assert_progress_monotonic(operations: &OperationRepositoryImpl, operation_id: &str) {
    let events = operations.get_events(operation_id).await.unwrap();
    let mut last = 0;
    for end in 1..=events.len() {
        let replayed = replay_events(&events[..end]).expect("prefix replays");
        assert!(replayed.completed_parts >= last, "progress went backwards");
        assert!(replayed.completed_parts <= 6);
        last = replayed.completed_parts;
    }
}

#[tokio::test]
async fn test_full_lifecycle_replays_to_persisted_row() {
    let db = setup_test_db().await;
    insert_session(&db, "sess_life", Tier::Full, None).await;
    let (sm, operations) = state_machine(&db);

    let op = sm
        .start_operation("sess_life", Tier::Full, TriggeredBy::User, 0, 0)
        .await
        .unwrap();
    assert_eq!(op.state, OperationState::Initialized);

    let op = generate_parts(&sm, op, 6).await;
    assert_eq!(op.completed_parts, 6);
    let op = proceed(sm.complete_operation(&op, &[]).await.unwrap());
    assert_eq!(op.state, OperationState::Completed);
    assert!(op.completed_at.is_some());

    let replayed = sm.verify_event_log(&op.operation_id).await.unwrap();
    assert_eq!(replayed.state, OperationState::Completed);
    assert_eq!(replayed.completed_parts, 6);
    assert_progress_monotonic(&operations, &op.operation_id).await;

    let events = operations.get_events(&op.operation_id).await.unwrap();
    assert_eq!(events.first().unwrap().event_type, EventType::OperationStarted);
    assert_eq!(events.last().unwrap().event_type, EventType::OperationCompleted);
    let completed: Vec<u8> = events
        .iter()
        .filter(|e| e.event_type == EventType::PartCompleted)
        .filter_map(|e| e.part_number)
        .collect();
    assert_eq!(completed, vec![1, 2, 3, 4, 5, 6]);
    assert!(events.windows(2).all(|w| w[0].id < w[1].id));

    teardown_test_db(db).await;
}

#[tokio::test]
async fn test_failure_then_regeneration_carries_progress() {
    let db = setup_test_db().await;
    insert_session(&db, "sess_regen", Tier::Full, None).await;
    let (sm, operations) = state_machine(&db);

    let op = sm
        .start_operation("sess_regen", Tier::Full, TriggeredBy::User, 0, 0)
        .await
        .unwrap();
    let op = generate_parts(&sm, op, 3).await;
    let op = proceed(sm.begin_part(&op.operation_id, part(4)).await.unwrap());
    let error = classify_llm_error(&LlmError::ServerError("bad gateway".into()));
    let failed = proceed(sm.fail_operation(&op, Some(part(4)), &error).await.unwrap());
    assert_eq!(failed.state, OperationState::Failed);
    assert_eq!(failed.failed_part, Some(4));
    assert_eq!(failed.completed_parts, 3);

    let retryable = sm.get_retryable_operations(5).await.unwrap();
    assert_eq!(retryable.len(), 1);
    assert_eq!(retryable[0].operation_id, failed.operation_id);

    let fresh = sm
        .trigger_regeneration(&failed.operation_id, "0xadmin", Some("provider recovered"))
        .await
        .unwrap();
    assert_ne!(fresh.operation_id, failed.operation_id);
    assert_eq!(fresh.completed_parts, 3);
    assert_eq!(fresh.retry_count, 1);
    assert_eq!(fresh.triggered_by, TriggeredBy::Admin);

    // The superseded row keeps its state and points at its replacement.
    let old = sm.get_operation_details(&failed.operation_id).await.unwrap();
    assert_eq!(old.operation.state, OperationState::Failed);
    let retried = old
        .events
        .iter()
        .find(|e| e.event_type == EventType::OperationRetried)
        .expect("retry event");
    assert_eq!(retried.metadata["new_operation_id"], fresh.operation_id.as_str());
    sm.verify_event_log(&failed.operation_id).await.unwrap();

    let latest = sm
        .get_operation_by_session_id("sess_regen")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.operation_id, fresh.operation_id);

    let fresh = generate_parts(&sm, fresh, 6).await;
    let done = proceed(sm.complete_operation(&fresh, &[]).await.unwrap());
    let replayed = sm.verify_event_log(&done.operation_id).await.unwrap();
    assert_eq!(replayed.completed_parts, 6);
    assert_progress_monotonic(&operations, &done.operation_id).await;
    assert_progress_monotonic(&operations, &failed.operation_id).await;

    teardown_test_db(db).await;
}

#[tokio::test]
async fn test_stale_write_is_rejected() {
    let db = setup_test_db().await;
    insert_session(&db, "sess_stale", Tier::Medium, None).await;
    let (sm, _) = state_machine(&db);

    let op = sm
        .start_operation("sess_stale", Tier::Medium, TriggeredBy::User, 0, 0)
        .await
        .unwrap();
    let generating = proceed(sm.begin_part(&op.operation_id, part(1)).await.unwrap());
    proceed(
        sm.complete_part(&generating, part(1), 10, None, None)
            .await
            .unwrap(),
    );

    // The row moved on to part_completed; replaying the stale copy must fail.
    let err = sm
        .complete_part(&generating, part(1), 10, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::ConcurrencyConflict { .. }));

    let row = sm.get_operation(&op.operation_id).await.unwrap().unwrap();
    assert_eq!(row.state, OperationState::PartCompleted);
    assert_eq!(row.completed_parts, 1);
    sm.verify_event_log(&row.operation_id).await.unwrap();

    teardown_test_db(db).await;
}

#[tokio::test]
async fn test_verify_detects_drift() {
    let db = setup_test_db().await;
    insert_session(&db, "sess_drift", Tier::Medium, None).await;
    let (sm, _) = state_machine(&db);

    let op = sm
        .start_operation("sess_drift", Tier::Medium, TriggeredBy::User, 0, 0)
        .await
        .unwrap();
    let op = generate_parts(&sm, op, 1).await;

    sqlx::query("UPDATE analysis_operations SET completed_parts = 2 WHERE operation_id = ?")
        .bind(&op.operation_id)
        .execute(db.pool())
        .await
        .unwrap();

    let err = sm.verify_event_log(&op.operation_id).await.unwrap_err();
    assert!(matches!(err, DomainError::ValidationFailed(_)));

    teardown_test_db(db).await;
}

#[tokio::test]
async fn test_admin_transitions_are_validated_and_logged() {
    let db = setup_test_db().await;
    insert_session(&db, "sess_admin", Tier::Full, None).await;
    let (sm, _) = state_machine(&db);

    let op = sm
        .start_operation("sess_admin", Tier::Full, TriggeredBy::User, 0, 0)
        .await
        .unwrap();

    let err = sm
        .pause_operation(&op.operation_id, "0xadmin", None)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidStateTransition { .. }));

    let op = generate_parts(&sm, op, 2).await;
    let paused = sm
        .pause_operation(&op.operation_id, "0xadmin", Some("reviewing part 2"))
        .await
        .unwrap();
    assert_eq!(paused.state, OperationState::Paused);

    // A paused operation halts the run at its next part boundary.
    let step = sm.begin_part(&op.operation_id, part(3)).await.unwrap();
    assert!(matches!(step, StepResult::Halted(_)));

    let noted = sm
        .add_admin_note(&op.operation_id, "0xops", "customer emailed")
        .await
        .unwrap();
    assert_eq!(noted.state, OperationState::Paused);
    let notes = noted.admin_notes.unwrap();
    assert!(notes.contains("reviewing part 2"));
    assert!(notes.contains("customer emailed"));

    let resumed = sm
        .resume_operation(&op.operation_id, "0xadmin", None)
        .await
        .unwrap();
    assert_eq!(resumed.state, OperationState::Generating);
    assert_eq!(resumed.completed_parts, 2);

    let cancelled = sm
        .cancel_operation(&op.operation_id, "0xadmin", None)
        .await
        .unwrap();
    assert_eq!(cancelled.state, OperationState::Cancelled);
    let err = sm
        .cancel_operation(&op.operation_id, "0xadmin", None)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidStateTransition { .. }));

    let listed = sm
        .get_operations(&OperationFilter::new().state(OperationState::Cancelled))
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert!(sm
        .get_operations(&OperationFilter::new().tier(Tier::Standard))
        .await
        .unwrap()
        .is_empty());

    sm.verify_event_log(&op.operation_id).await.unwrap();

    let err = sm
        .pause_operation("op_missing", "0xadmin", None)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::OperationNotFound(_)));

    teardown_test_db(db).await;
}
