//! Operation repository port.
//!
//! Every state change of an operation row is written together with its
//! audit event in one transaction, guarded by the expected previous state.

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    AnalysisOperation, NewOperationEvent, OperationEvent, OperationFilter, OperationState,
};
use async_trait::async_trait;

#[async_trait]
pub trait OperationRepository: Send + Sync {
    /// Inserts a new operation row and its creation event atomically
    async fn create_operation(
        &self,
        operation: &AnalysisOperation,
        event: NewOperationEvent,
    ) -> DomainResult<OperationEvent>;

    /// Persists `operation` and appends `event` if the stored row is still
    /// in `expected` state
    ///
    /// The event's previous state is `expected` and its new state is
    /// `operation.state`.
    ///
    /// # Errors
    /// - `OperationNotFound` if the row does not exist
    /// - `ConcurrencyConflict` if the row moved on since it was read
    async fn apply_transition(
        &self,
        operation: &AnalysisOperation,
        expected: OperationState,
        event: NewOperationEvent,
    ) -> DomainResult<OperationEvent>;

    async fn get_operation(&self, operation_id: &str) -> DomainResult<Option<AnalysisOperation>>;

    /// Most recently started operation for a session
    async fn get_latest_for_session(
        &self,
        session_id: &str,
    ) -> DomainResult<Option<AnalysisOperation>>;

    async fn list_operations(&self, filter: &OperationFilter)
        -> DomainResult<Vec<AnalysisOperation>>;

    /// Events of one operation in append order
    async fn get_events(&self, operation_id: &str) -> DomainResult<Vec<OperationEvent>>;

    /// Failed operations with `retry_count < max_retries`
    async fn list_retryable(&self, max_retries: u32) -> DomainResult<Vec<AnalysisOperation>>;
}
