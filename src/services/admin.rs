//! Operator surface over operations, the retry queue and the circuit breaker.
//!
//! Mutations that put an operation back into a running state also restart
//! orchestration in the background, continuing from the parts already
//! stored for the session.

use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use super::circuit_breaker::CircuitStats;
use super::orchestrator::{AnalysisOrchestrator, AnalysisOutcome, AnalysisRequest, ResumeConfig};
use super::state_machine::OperationDetails;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AnalysisOperation, OperationFilter, QueueStats, ReplayedOperation, TriggeredBy,
};

/// A mutation that restarted orchestration.
pub struct RestartedRun {
    pub operation: AnalysisOperation,
    pub run: JoinHandle<DomainResult<AnalysisOutcome>>,
}

/// Queue and circuit overview for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct SystemOverview {
    pub queue: QueueStats,
    pub circuit: CircuitStats,
}

pub struct AdminService {
    orchestrator: Arc<AnalysisOrchestrator>,
}

impl AdminService {
    pub fn new(orchestrator: Arc<AnalysisOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub async fn list_operations(
        &self,
        filter: &OperationFilter,
    ) -> DomainResult<Vec<AnalysisOperation>> {
        self.orchestrator.state_machine().get_operations(filter).await
    }

    pub async fn get_operation_details(&self, operation_id: &str) -> DomainResult<OperationDetails> {
        self.orchestrator
            .state_machine()
            .get_operation_details(operation_id)
            .await
    }

    pub async fn get_operation_by_session_id(
        &self,
        session_id: &str,
    ) -> DomainResult<Option<AnalysisOperation>> {
        self.orchestrator
            .state_machine()
            .get_operation_by_session_id(session_id)
            .await
    }

    /// Failed operations whose retry count is still below the queue limit.
    pub async fn get_retryable_operations(&self) -> DomainResult<Vec<AnalysisOperation>> {
        let max_retries = self.orchestrator.settings().retry_queue.max_retries;
        self.orchestrator
            .state_machine()
            .get_retryable_operations(max_retries)
            .await
    }

    pub async fn verify_event_log(&self, operation_id: &str) -> DomainResult<ReplayedOperation> {
        self.orchestrator
            .state_machine()
            .verify_event_log(operation_id)
            .await
    }

    pub async fn pause_operation(
        &self,
        operation_id: &str,
        actor_id: &str,
        notes: Option<&str>,
    ) -> DomainResult<AnalysisOperation> {
        self.orchestrator
            .state_machine()
            .pause_operation(operation_id, actor_id, notes)
            .await
    }

    /// Resume a paused operation and continue generating from its next part.
    ///
    /// If the original run is still in flight in this process it picks the
    /// operation back up at its next boundary and the restarted run exits
    /// with `RunAlreadyActive`.
    pub async fn resume_operation(
        &self,
        operation_id: &str,
        actor_id: &str,
        notes: Option<&str>,
    ) -> DomainResult<RestartedRun> {
        let operation = self
            .orchestrator
            .state_machine()
            .resume_operation(operation_id, actor_id, notes)
            .await?;
        self.restart(operation).await
    }

    /// Cancel an operation and drop any queued retry for its session.
    pub async fn cancel_operation(
        &self,
        operation_id: &str,
        actor_id: &str,
        notes: Option<&str>,
    ) -> DomainResult<AnalysisOperation> {
        let operation = self
            .orchestrator
            .state_machine()
            .cancel_operation(operation_id, actor_id, notes)
            .await?;
        self.orchestrator
            .queue()
            .mark_cancelled(&operation.session_id)
            .await?;
        Ok(operation)
    }

    /// Supersede a failed or cancelled operation and run the new one.
    pub async fn trigger_regeneration(
        &self,
        operation_id: &str,
        actor_id: &str,
        notes: Option<&str>,
    ) -> DomainResult<RestartedRun> {
        let operation = self
            .orchestrator
            .state_machine()
            .trigger_regeneration(operation_id, actor_id, notes)
            .await?;
        self.restart(operation).await
    }

    pub async fn add_admin_note(
        &self,
        operation_id: &str,
        actor_id: &str,
        note: &str,
    ) -> DomainResult<AnalysisOperation> {
        self.orchestrator
            .state_machine()
            .add_admin_note(operation_id, actor_id, note)
            .await
    }

    pub async fn get_queue_stats(&self) -> DomainResult<QueueStats> {
        self.orchestrator.queue().stats(chrono::Utc::now()).await
    }

    pub async fn get_circuit_stats(&self) -> CircuitStats {
        self.orchestrator.breaker().get_stats().await
    }

    pub async fn get_overview(&self) -> DomainResult<SystemOverview> {
        let (queue, circuit) = futures::join!(self.get_queue_stats(), self.get_circuit_stats());
        Ok(SystemOverview {
            queue: queue?,
            circuit,
        })
    }

    pub async fn force_reset_circuit(&self, actor_id: &str) -> CircuitStats {
        self.orchestrator.breaker().force_reset().await;
        info!(actor_id, "circuit breaker force-reset by admin");
        self.get_circuit_stats().await
    }

    async fn restart(&self, operation: AnalysisOperation) -> DomainResult<RestartedRun> {
        let session = self
            .orchestrator
            .sessions()
            .get_session(&operation.session_id)
            .await?
            .ok_or_else(|| DomainError::SessionNotFound(operation.session_id.clone()))?;
        let result = self
            .orchestrator
            .sessions()
            .get_analysis_result(&operation.session_id)
            .await?
            .unwrap_or_default();

        let resume = ResumeConfig::from_result(&result, operation.tier, Some(operation.completed_parts))
            .for_operation(&operation.operation_id);
        let request = AnalysisRequest::from_session(&session)
            .with_resume(resume)
            .triggered_by(TriggeredBy::Admin)
            .with_retry_count(operation.retry_count);

        info!(
            operation_id = %operation.operation_id,
            session_id = %operation.session_id,
            resume_from_part = operation.completed_parts + 1,
            "restarting orchestration"
        );
        let run = self.orchestrator.start_analysis_in_background(request);
        Ok(RestartedRun { operation, run })
    }
}
