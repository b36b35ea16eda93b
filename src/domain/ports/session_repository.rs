//! Session repository port (trait) for dependency injection.
//!
//! Covers the slice of the product schema the orchestrator reads and
//! writes: the purchased session row and its generated result row.

use crate::domain::errors::DomainResult;
use crate::domain::models::{AnalysisResult, AnalysisSession, ResultUpdate, SessionStatus};
use async_trait::async_trait;

#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Creates a new session together with an empty result row
    ///
    /// # Errors
    /// Returns error if the session ID already exists or the database fails
    async fn create_session(&self, session: &AnalysisSession) -> DomainResult<()>;

    /// Retrieves session by ID
    ///
    /// # Returns
    /// - `Some(AnalysisSession)` if found
    /// - `None` if not found
    async fn get_session(&self, session_id: &str) -> DomainResult<Option<AnalysisSession>>;

    /// Sets the externally visible status
    ///
    /// # Errors
    /// Returns `SessionNotFound` if no row was updated
    async fn update_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> DomainResult<()>;

    /// Applies a sparse update to the result row; `None` fields are kept
    async fn update_analysis_result(&self, session_id: &str, update: ResultUpdate)
        -> DomainResult<()>;

    async fn get_analysis_result(&self, session_id: &str) -> DomainResult<Option<AnalysisResult>>;
}
