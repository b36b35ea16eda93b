use async_trait::async_trait;
use serde::Serialize;

use crate::domain::errors::DomainResult;
use crate::domain::models::Tier;

/// Product analytics event emitted by the orchestrator
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackingEvent {
    PartCompleted {
        session_id: String,
        tier: Tier,
        part: u8,
        duration_ms: u64,
    },
    AnalysisCompleted {
        session_id: String,
        tier: Tier,
        duration_ms: u64,
    },
    PartialSuccess {
        session_id: String,
        tier: Tier,
        completed_parts: u8,
        total_parts: u8,
        missing_parts: Vec<u8>,
    },
    AnalysisQueued {
        session_id: String,
        tier: Tier,
        reason: String,
    },
    AnalysisFailed {
        session_id: String,
        tier: Tier,
        error_code: String,
    },
    RetryAttempt {
        session_id: String,
        tier: Tier,
        part: u8,
        attempt: u32,
        error: String,
    },
}

impl TrackingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PartCompleted { .. } => "part_completed",
            Self::AnalysisCompleted { .. } => "analysis_completed",
            Self::PartialSuccess { .. } => "partial_success",
            Self::AnalysisQueued { .. } => "analysis_queued",
            Self::AnalysisFailed { .. } => "analysis_failed",
            Self::RetryAttempt { .. } => "retry_attempt",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::PartCompleted { session_id, .. }
            | Self::AnalysisCompleted { session_id, .. }
            | Self::PartialSuccess { session_id, .. }
            | Self::AnalysisQueued { session_id, .. }
            | Self::AnalysisFailed { session_id, .. }
            | Self::RetryAttempt { session_id, .. } => session_id,
        }
    }
}

/// Analytics sink. Callers never await it on the critical path.
#[async_trait]
pub trait Tracker: Send + Sync {
    async fn track(&self, event: TrackingEvent) -> DomainResult<()>;
}
