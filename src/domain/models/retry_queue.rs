//! Retry queue items for analyses that failed with a retryable error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::tier::{QueuePriority, Tier};
use crate::domain::errors::DomainError;

pub const DEFAULT_QUEUE_MAX_RETRIES: u32 = 5;

/// Status of a retry queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Pending and processing items count as active for the per-session
    /// uniqueness rule.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(DomainError::ValidationFailed(format!("unknown queue status: {other}"))),
        }
    }
}

/// A pending retry job. At most one active item exists per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryQueueItem {
    pub session_id: String,
    pub tier: Tier,
    pub problem_statement: String,
    pub email: Option<String>,
    /// Retry attempts already started for this item.
    pub retry_count: u32,
    pub max_retries: u32,
    pub priority: QueuePriority,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_retry_at: DateTime<Utc>,
    pub status: QueueStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Enqueue-only: restart the attempt count even over a failed row.
    #[serde(skip)]
    pub fresh_budget: bool,
}

impl RetryQueueItem {
    pub fn new(
        session_id: impl Into<String>,
        tier: Tier,
        problem_statement: impl Into<String>,
        email: Option<String>,
        next_retry_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            tier,
            problem_statement: problem_statement.into(),
            email,
            retry_count: 0,
            max_retries: DEFAULT_QUEUE_MAX_RETRIES,
            priority: tier.queue_priority(),
            last_error: None,
            last_attempt_at: None,
            next_retry_at,
            status: QueueStatus::Pending,
            created_at: now,
            updated_at: now,
            fresh_budget: false,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_last_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    /// Ignore the attempts spent by earlier runs of this session.
    pub fn with_fresh_budget(mut self) -> Self {
        self.fresh_budget = true;
        self
    }

    /// No more attempts may be started.
    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Pending && self.next_retry_at <= now
    }
}

/// Outcome of an enqueue request.
#[derive(Debug, Clone)]
pub enum EnqueueOutcome {
    /// The item is pending and will be retried.
    Queued(RetryQueueItem),
    /// The session already used all retries; the item is now failed.
    Exhausted(RetryQueueItem),
}

/// Aggregate counts for admin visibility.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Pending items whose `next_retry_at` has passed.
    pub due_now: u64,
    pub oldest_pending_at: Option<DateTime<Utc>>,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed + self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_item_priority_follows_tier() {
        let item = RetryQueueItem::new("s", Tier::Full, "p", None, Utc::now());
        assert_eq!(item.priority, QueuePriority::High);
        assert_eq!(item.max_retries, DEFAULT_QUEUE_MAX_RETRIES);
        assert_eq!(item.status, QueueStatus::Pending);
    }

    #[test]
    fn test_exhaustion() {
        let mut item = RetryQueueItem::new("s", Tier::Standard, "p", None, Utc::now())
            .with_max_retries(2);
        assert!(!item.is_exhausted());
        item.retry_count = 2;
        assert!(item.is_exhausted());
    }

    #[test]
    fn test_due() {
        let now = Utc::now();
        let item = RetryQueueItem::new("s", Tier::Medium, "p", None, now + Duration::minutes(5));
        assert!(!item.is_due(now));
        assert!(item.is_due(now + Duration::minutes(6)));
    }
}
