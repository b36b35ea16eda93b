//! Persisted analysis state machine.
//!
//! Every state change goes through [`OperationRepository::apply_transition`],
//! which writes the row and its audit event in one transaction guarded by
//! the expected previous state. Admin operations validate their source
//! state up front and fail with a descriptive error instead of no-oping.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    replay_events, ActorType, AnalysisOperation, AnalysisResult, EventType, NewOperationEvent,
    OperationEvent, OperationFilter, OperationState, PartNumber, ReplayedOperation, Tier,
    TriggeredBy,
};
use crate::domain::ports::{OperationRepository, SessionRepository};
use crate::services::error_classifier::ClassifiedError;

/// Operation with its event log and any stored result content.
#[derive(Debug, Clone, Serialize)]
pub struct OperationDetails {
    pub operation: AnalysisOperation,
    pub events: Vec<OperationEvent>,
    pub result: Option<AnalysisResult>,
}

/// Outcome of a step taken by the orchestrator.
#[derive(Debug, Clone)]
pub enum StepResult {
    /// The step was recorded and the run may continue.
    Proceed(AnalysisOperation),
    /// An admin paused or cancelled the operation; the run must stop here.
    Halted(AnalysisOperation),
}

impl StepResult {
    pub fn operation(&self) -> &AnalysisOperation {
        match self {
            Self::Proceed(op) | Self::Halted(op) => op,
        }
    }

    pub fn into_operation(self) -> AnalysisOperation {
        match self {
            Self::Proceed(op) | Self::Halted(op) => op,
        }
    }
}

fn actor_for(triggered_by: TriggeredBy) -> ActorType {
    match triggered_by {
        TriggeredBy::User => ActorType::User,
        TriggeredBy::System => ActorType::System,
        TriggeredBy::Admin => ActorType::Admin,
        TriggeredBy::RetryQueue => ActorType::RetryQueue,
    }
}

fn append_note(existing: Option<String>, actor_id: &str, note: &str) -> Option<String> {
    let line = format!("[{}] {}: {}", Utc::now().to_rfc3339(), actor_id, note.trim());
    Some(match existing {
        Some(prev) if !prev.is_empty() => format!("{prev}\n{line}"),
        _ => line,
    })
}

fn invalid(from: OperationState, to: OperationState, reason: &str) -> DomainError {
    DomainError::InvalidStateTransition {
        from: from.to_string(),
        to: to.to_string(),
        reason: reason.to_string(),
    }
}

pub struct AnalysisStateMachine {
    operations: Arc<dyn OperationRepository>,
    sessions: Arc<dyn SessionRepository>,
}

impl AnalysisStateMachine {
    pub fn new(
        operations: Arc<dyn OperationRepository>,
        sessions: Arc<dyn SessionRepository>,
    ) -> Self {
        Self {
            operations,
            sessions,
        }
    }

    async fn require(&self, operation_id: &str) -> DomainResult<AnalysisOperation> {
        self.operations
            .get_operation(operation_id)
            .await?
            .ok_or_else(|| DomainError::OperationNotFound(operation_id.to_string()))
    }

    /// Persist `updated` over `current` and append `event`.
    async fn commit(
        &self,
        current: &AnalysisOperation,
        mut updated: AnalysisOperation,
        event: NewOperationEvent,
    ) -> DomainResult<AnalysisOperation> {
        let all_parts_carried = current.completed_parts >= current.total_parts;
        if updated.state != current.state && !current.state.permits(updated.state, all_parts_carried) {
            return Err(invalid(
                current.state,
                updated.state,
                "not a valid operation transition",
            ));
        }
        updated.updated_at = Utc::now();
        updated.check_invariants()?;
        self.operations
            .apply_transition(&updated, current.state, event)
            .await?;
        Ok(updated)
    }

    /// Like [`commit`](Self::commit), but a row moved to paused or
    /// cancelled by an admin yields [`StepResult::Halted`].
    async fn commit_step(
        &self,
        current: &AnalysisOperation,
        updated: AnalysisOperation,
        event: NewOperationEvent,
    ) -> DomainResult<StepResult> {
        match self.commit(current, updated, event).await {
            Ok(op) => Ok(StepResult::Proceed(op)),
            Err(DomainError::ConcurrencyConflict { .. }) => {
                let fresh = self.require(&current.operation_id).await?;
                if fresh.state.is_running() {
                    return Err(DomainError::ConcurrencyConflict {
                        operation_id: current.operation_id.clone(),
                        expected: current.state.to_string(),
                    });
                }
                info!(
                    operation_id = %fresh.operation_id,
                    state = %fresh.state,
                    "operation changed by another actor, halting run"
                );
                Ok(StepResult::Halted(fresh))
            }
            Err(err) => Err(err),
        }
    }

    async fn create(
        &self,
        operation: AnalysisOperation,
        actor_id: Option<&str>,
    ) -> DomainResult<AnalysisOperation> {
        let mut event = NewOperationEvent::new(
            EventType::OperationStarted,
            actor_for(operation.triggered_by),
        )
        .meta("tier", operation.tier.as_str())
        .meta("triggered_by", operation.triggered_by.as_str())
        .meta("total_parts", operation.total_parts)
        .meta("initial_completed_parts", operation.completed_parts)
        .meta("retry_count", operation.retry_count);
        if let Some(actor_id) = actor_id {
            event = event.actor_id(actor_id);
        }

        operation.check_invariants()?;
        self.operations.create_operation(&operation, event).await?;
        info!(
            operation_id = %operation.operation_id,
            session_id = %operation.session_id,
            tier = %operation.tier,
            triggered_by = %operation.triggered_by,
            "analysis operation started"
        );
        Ok(operation)
    }

    /// Create a new operation for a session.
    ///
    /// `initial_completed_parts` carries over parts finished by an earlier
    /// attempt so progress never goes backwards across attempts.
    pub async fn start_operation(
        &self,
        session_id: &str,
        tier: Tier,
        triggered_by: TriggeredBy,
        initial_completed_parts: u8,
        retry_count: u32,
    ) -> DomainResult<AnalysisOperation> {
        let mut operation =
            AnalysisOperation::new(session_id, tier, triggered_by).with_retry_count(retry_count);
        let carried = initial_completed_parts.min(operation.total_parts);
        operation.completed_parts = carried;
        operation.current_part = carried;
        self.create(operation, None).await
    }

    /// Part boundary: re-read the row and, unless an admin stopped it,
    /// move to `generating` for `part`.
    pub async fn begin_part(
        &self,
        operation_id: &str,
        part: PartNumber,
    ) -> DomainResult<StepResult> {
        let current = self.require(operation_id).await?;
        if !current.state.is_running() {
            return Ok(StepResult::Halted(current));
        }

        let mut updated = current.clone();
        updated.state = OperationState::Generating;
        updated.current_part = part.get();
        let event = NewOperationEvent::new(EventType::PartStarted, ActorType::System).part(part);
        self.commit_step(&current, updated, event).await
    }

    /// Record a generated part.
    ///
    /// If an admin paused or cancelled the operation while the part was in
    /// flight, the part is still recorded (state unchanged) and the run is
    /// told to halt.
    pub async fn complete_part(
        &self,
        operation: &AnalysisOperation,
        part: PartNumber,
        duration_ms: u64,
        token_count: Option<u32>,
        estimated_completion_at: Option<chrono::DateTime<Utc>>,
    ) -> DomainResult<StepResult> {
        let apply = |op: &AnalysisOperation| {
            let mut next = op.clone();
            next.completed_parts = op.completed_parts.max(part.get());
            next.current_part = op.current_part.max(part.get());
            next.last_part_completed_at = Some(Utc::now());
            next.estimated_completion_at = estimated_completion_at;
            next
        };
        let event = || {
            let event = NewOperationEvent::new(EventType::PartCompleted, ActorType::System)
                .part(part)
                .duration_ms(duration_ms);
            match token_count {
                Some(tokens) => event.token_count(tokens),
                None => event,
            }
        };

        let mut updated = apply(operation);
        updated.state = OperationState::PartCompleted;

        match self.commit_step(operation, updated, event()).await? {
            StepResult::Proceed(op) => Ok(StepResult::Proceed(op)),
            StepResult::Halted(fresh) => {
                let recorded = self.commit(&fresh, apply(&fresh), event()).await?;
                Ok(StepResult::Halted(recorded))
            }
        }
    }

    /// Finish the operation. `missing_parts` is non-empty for a
    /// partial-success completion.
    ///
    /// An operation that started with every part carried over completes
    /// straight from `initialized`; the event records `carried_complete`.
    pub async fn complete_operation(
        &self,
        operation: &AnalysisOperation,
        missing_parts: &[u8],
    ) -> DomainResult<StepResult> {
        let mut updated = operation.clone();
        updated.state = OperationState::Completed;
        updated.completed_at = Some(Utc::now());
        updated.estimated_completion_at = None;

        let carried_complete = operation.state == OperationState::Initialized;
        let event = NewOperationEvent::new(EventType::OperationCompleted, ActorType::System)
            .meta("partial", !missing_parts.is_empty())
            .meta("missing_parts", json!(missing_parts))
            .meta("carried_complete", carried_complete);
        self.commit_step(operation, updated, event).await
    }

    /// Record a part failure followed by the operation failure.
    pub async fn fail_operation(
        &self,
        operation: &AnalysisOperation,
        part: Option<PartNumber>,
        error: &ClassifiedError,
    ) -> DomainResult<StepResult> {
        let mut current = operation.clone();

        if let Some(part) = part {
            let event = NewOperationEvent::new(EventType::PartFailed, ActorType::System)
                .part(part)
                .error(error.code.clone(), error.message.clone())
                .meta("category", error.category.as_str());
            match self.commit_step(&current, current.clone(), event).await? {
                StepResult::Proceed(op) => current = op,
                halted @ StepResult::Halted(_) => return Ok(halted),
            }
        }

        let mut updated = current.clone();
        updated.state = OperationState::Failed;
        updated.last_error = Some(error.message.clone());
        updated.failed_part = part.map(|p| p.get());
        updated.estimated_completion_at = None;

        let mut event = NewOperationEvent::new(EventType::OperationFailed, ActorType::System)
            .error(error.code.clone(), error.message.clone())
            .meta("category", error.category.as_str())
            .meta("retryable", error.retryable);
        if let Some(part) = part {
            event = event.part(part);
        }
        self.commit_step(&current, updated, event).await
    }

    /// Admin: pause a running operation.
    #[instrument(skip(self, notes))]
    pub async fn pause_operation(
        &self,
        operation_id: &str,
        actor_id: &str,
        notes: Option<&str>,
    ) -> DomainResult<AnalysisOperation> {
        let current = self.require(operation_id).await?;
        if !matches!(
            current.state,
            OperationState::Generating | OperationState::PartCompleted
        ) {
            return Err(invalid(
                current.state,
                OperationState::Paused,
                "only generating or part_completed operations can be paused",
            ));
        }

        let mut updated = current.clone();
        updated.state = OperationState::Paused;
        if let Some(note) = notes {
            updated.admin_notes = append_note(updated.admin_notes.take(), actor_id, note);
        }
        let event = NewOperationEvent::new(EventType::OperationPaused, ActorType::Admin)
            .actor_id(actor_id)
            .meta("notes", notes.unwrap_or_default());
        let op = self.commit(&current, updated, event).await?;
        info!(operation_id, actor_id, "operation paused by admin");
        Ok(op)
    }

    /// Admin: resume a paused operation back to `generating`.
    #[instrument(skip(self, notes))]
    pub async fn resume_operation(
        &self,
        operation_id: &str,
        actor_id: &str,
        notes: Option<&str>,
    ) -> DomainResult<AnalysisOperation> {
        let current = self.require(operation_id).await?;
        if current.state != OperationState::Paused {
            return Err(invalid(
                current.state,
                OperationState::Generating,
                "only paused operations can be resumed",
            ));
        }

        let mut updated = current.clone();
        updated.state = OperationState::Generating;
        if let Some(note) = notes {
            updated.admin_notes = append_note(updated.admin_notes.take(), actor_id, note);
        }
        let event = NewOperationEvent::new(EventType::OperationResumed, ActorType::Admin)
            .actor_id(actor_id)
            .meta("resume_from_part", current.completed_parts + 1)
            .meta("notes", notes.unwrap_or_default());
        let op = self.commit(&current, updated, event).await?;
        info!(operation_id, actor_id, "operation resumed by admin");
        Ok(op)
    }

    /// Admin: cancel any non-terminal operation.
    #[instrument(skip(self, notes))]
    pub async fn cancel_operation(
        &self,
        operation_id: &str,
        actor_id: &str,
        notes: Option<&str>,
    ) -> DomainResult<AnalysisOperation> {
        let current = self.require(operation_id).await?;
        if current.state.is_terminal() {
            return Err(invalid(
                current.state,
                OperationState::Cancelled,
                "operation already finished",
            ));
        }

        let mut updated = current.clone();
        updated.state = OperationState::Cancelled;
        updated.estimated_completion_at = None;
        if let Some(note) = notes {
            updated.admin_notes = append_note(updated.admin_notes.take(), actor_id, note);
        }
        let event = NewOperationEvent::new(EventType::OperationCancelled, ActorType::Admin)
            .actor_id(actor_id)
            .meta("notes", notes.unwrap_or_default());
        let op = self.commit(&current, updated, event).await?;
        info!(operation_id, actor_id, "operation cancelled by admin");
        Ok(op)
    }

    /// Admin: supersede a failed or cancelled operation with a new one.
    ///
    /// The old row keeps its state and gains an `operation_retried` event
    /// pointing at the new operation.
    #[instrument(skip(self, notes))]
    pub async fn trigger_regeneration(
        &self,
        operation_id: &str,
        actor_id: &str,
        notes: Option<&str>,
    ) -> DomainResult<AnalysisOperation> {
        let current = self.require(operation_id).await?;
        if !matches!(
            current.state,
            OperationState::Failed | OperationState::Cancelled
        ) {
            return Err(invalid(
                current.state,
                OperationState::Initialized,
                "only failed or cancelled operations can be regenerated",
            ));
        }

        let mut fresh = AnalysisOperation::new(&current.session_id, current.tier, TriggeredBy::Admin)
            .with_retry_count(current.retry_count + 1);
        fresh.completed_parts = current.completed_parts;
        fresh.current_part = current.completed_parts;
        if let Some(note) = notes {
            fresh.admin_notes = append_note(None, actor_id, note);
        }
        let fresh = self.create(fresh, Some(actor_id)).await?;

        let event = NewOperationEvent::new(EventType::OperationRetried, ActorType::Admin)
            .actor_id(actor_id)
            .meta("new_operation_id", fresh.operation_id.as_str())
            .meta("notes", notes.unwrap_or_default());
        self.commit(&current, current.clone(), event).await?;

        info!(
            operation_id,
            new_operation_id = %fresh.operation_id,
            actor_id,
            "regeneration triggered by admin"
        );
        Ok(fresh)
    }

    /// Admin: attach a note without changing state.
    pub async fn add_admin_note(
        &self,
        operation_id: &str,
        actor_id: &str,
        note: &str,
    ) -> DomainResult<AnalysisOperation> {
        let current = self.require(operation_id).await?;
        let mut updated = current.clone();
        updated.admin_notes = append_note(updated.admin_notes.take(), actor_id, note);
        let event = NewOperationEvent::new(EventType::AdminIntervention, ActorType::Admin)
            .actor_id(actor_id)
            .meta("notes", note);
        self.commit(&current, updated, event).await
    }

    pub async fn get_operations(
        &self,
        filter: &OperationFilter,
    ) -> DomainResult<Vec<AnalysisOperation>> {
        self.operations.list_operations(filter).await
    }

    pub async fn get_operation(&self, operation_id: &str) -> DomainResult<Option<AnalysisOperation>> {
        self.operations.get_operation(operation_id).await
    }

    pub async fn get_operation_details(&self, operation_id: &str) -> DomainResult<OperationDetails> {
        let operation = self.require(operation_id).await?;
        let events = self.operations.get_events(operation_id).await?;
        let result = self.sessions.get_analysis_result(&operation.session_id).await?;
        Ok(OperationDetails {
            operation,
            events,
            result,
        })
    }

    pub async fn get_operation_by_session_id(
        &self,
        session_id: &str,
    ) -> DomainResult<Option<AnalysisOperation>> {
        self.operations.get_latest_for_session(session_id).await
    }

    pub async fn get_retryable_operations(
        &self,
        max_retries: u32,
    ) -> DomainResult<Vec<AnalysisOperation>> {
        self.operations.list_retryable(max_retries).await
    }

    /// Replay the event log and check it lands on the persisted row.
    pub async fn verify_event_log(&self, operation_id: &str) -> DomainResult<ReplayedOperation> {
        let operation = self.require(operation_id).await?;
        let events = self.operations.get_events(operation_id).await?;
        let replayed = replay_events(&events)?;

        if replayed.state != operation.state || replayed.completed_parts != operation.completed_parts
        {
            warn!(
                operation_id,
                row_state = %operation.state,
                replayed_state = %replayed.state,
                "event log drifted from operation row"
            );
            return Err(DomainError::ValidationFailed(format!(
                "operation {} is {} with {} parts but events replay to {} with {} parts",
                operation_id,
                operation.state,
                operation.completed_parts,
                replayed.state,
                replayed.completed_parts
            )));
        }
        Ok(replayed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_note_accumulates() {
        let first = append_note(None, "0xabc", "looking into it");
        let second = append_note(first, "0xdef", " fixed ");
        let text = second.unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with("0xdef: fixed"));
    }

    #[test]
    fn test_actor_mapping() {
        assert_eq!(actor_for(TriggeredBy::RetryQueue), ActorType::RetryQueue);
        assert_eq!(actor_for(TriggeredBy::Admin), ActorType::Admin);
    }
}
