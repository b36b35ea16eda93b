//! Analysis operation: one persisted attempt to run an analysis end to end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::tier::{PartNumber, Tier};
use crate::domain::errors::DomainError;

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Initialized,
    Generating,
    PartCompleted,
    Paused,
    Failed,
    Completed,
    Cancelled,
}

impl OperationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Generating => "generating",
            Self::PartCompleted => "part_completed",
            Self::Paused => "paused",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// No further transitions are possible from this row.
    ///
    /// `Failed` is terminal for the row; the session may still be
    /// regenerated into a new operation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// The orchestrator may keep generating parts in this state.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Initialized | Self::Generating | Self::PartCompleted)
    }

    /// Valid transitions from this state.
    ///
    /// `Generating -> Completed` is only taken for a partial-success
    /// completion; a full completion goes through `PartCompleted`.
    pub fn valid_transitions(&self) -> &'static [OperationState] {
        match self {
            Self::Initialized => &[Self::Generating, Self::Paused, Self::Failed, Self::Cancelled],
            Self::Generating => &[
                Self::PartCompleted,
                Self::Paused,
                Self::Failed,
                Self::Cancelled,
                Self::Completed,
            ],
            Self::PartCompleted => &[
                Self::Generating,
                Self::Completed,
                Self::Paused,
                Self::Failed,
                Self::Cancelled,
            ],
            Self::Paused => &[Self::Generating, Self::Cancelled],
            Self::Failed | Self::Completed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Like [`can_transition_to`](Self::can_transition_to), but also lets an
    /// operation that starts with every part carried over go straight from
    /// `Initialized` to `Completed`.
    pub fn permits(&self, next: Self, all_parts_carried: bool) -> bool {
        self.can_transition_to(next)
            || (all_parts_carried && *self == Self::Initialized && next == Self::Completed)
    }

    pub fn all() -> [OperationState; 7] {
        [
            Self::Initialized,
            Self::Generating,
            Self::PartCompleted,
            Self::Paused,
            Self::Failed,
            Self::Completed,
            Self::Cancelled,
        ]
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| DomainError::ValidationFailed(format!("unknown operation state: {s}")))
    }
}

/// Who started an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    User,
    System,
    Admin,
    RetryQueue,
}

impl TriggeredBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
            Self::Admin => "admin",
            Self::RetryQueue => "retry_queue",
        }
    }
}

impl fmt::Display for TriggeredBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggeredBy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "system" => Ok(Self::System),
            "admin" => Ok(Self::Admin),
            "retry_queue" => Ok(Self::RetryQueue),
            other => Err(DomainError::ValidationFailed(format!("unknown trigger: {other}"))),
        }
    }
}

/// One attempt to run an analysis job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOperation {
    pub operation_id: String,
    pub session_id: String,
    pub tier: Tier,
    pub state: OperationState,
    pub total_parts: u8,
    pub completed_parts: u8,
    /// 0 until the first part starts.
    pub current_part: u8,
    pub started_at: DateTime<Utc>,
    pub last_part_completed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_completion_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub failed_part: Option<u8>,
    pub retry_count: u32,
    pub triggered_by: TriggeredBy,
    pub admin_notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisOperation {
    pub fn new(session_id: impl Into<String>, tier: Tier, triggered_by: TriggeredBy) -> Self {
        let now = Utc::now();
        Self {
            operation_id: format!("op_{}", Uuid::new_v4().simple()),
            session_id: session_id.into(),
            tier,
            state: OperationState::Initialized,
            total_parts: tier.part_count(),
            completed_parts: 0,
            current_part: 0,
            started_at: now,
            last_part_completed_at: None,
            completed_at: None,
            estimated_completion_at: None,
            last_error: None,
            failed_part: None,
            retry_count: 0,
            triggered_by,
            admin_notes: None,
            updated_at: now,
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Percentage of parts completed, 0-100.
    pub fn progress_percentage(&self) -> f64 {
        if self.total_parts == 0 {
            return 0.0;
        }
        f64::from(self.completed_parts) / f64::from(self.total_parts) * 100.0
    }

    /// The next part that still has to be generated.
    pub fn next_part(&self) -> Option<PartNumber> {
        if self.completed_parts >= self.total_parts {
            return None;
        }
        PartNumber::for_tier(self.completed_parts + 1, self.tier).ok()
    }

    /// Check structural invariants of the row.
    pub fn check_invariants(&self) -> Result<(), DomainError> {
        if self.completed_parts > self.total_parts {
            return Err(DomainError::ValidationFailed(format!(
                "operation {} has {} of {} parts completed",
                self.operation_id, self.completed_parts, self.total_parts
            )));
        }
        if self.current_part == 0 && self.completed_parts > 0 {
            return Err(DomainError::ValidationFailed(format!(
                "operation {} completed parts without starting one",
                self.operation_id
            )));
        }
        Ok(())
    }
}

/// Filter for listing operations.
#[derive(Debug, Clone, Default)]
pub struct OperationFilter {
    pub state: Option<OperationState>,
    pub session_id: Option<String>,
    pub tier: Option<Tier>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl OperationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(mut self, state: OperationState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}
