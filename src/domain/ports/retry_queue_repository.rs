use crate::domain::errors::DomainResult;
use crate::domain::models::{EnqueueOutcome, QueueStats, RetryQueueItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Persistence for the background retry queue.
///
/// The store keeps at most one row per session; enqueueing a session that
/// already has a row updates it in place.
#[async_trait]
pub trait RetryQueueRepository: Send + Sync {
    /// Inserts or refreshes the session's item
    ///
    /// Returns `Exhausted` (and marks the item failed) when the stored
    /// `retry_count` already reached `max_retries`.
    async fn enqueue(&self, item: RetryQueueItem) -> DomainResult<EnqueueOutcome>;

    async fn get_item(&self, session_id: &str) -> DomainResult<Option<RetryQueueItem>>;

    /// Pending items due at `now`, highest priority first, then oldest
    async fn fetch_due(&self, now: DateTime<Utc>, limit: u32) -> DomainResult<Vec<RetryQueueItem>>;

    /// Atomically moves a pending item to processing and counts the attempt
    ///
    /// Returns `None` if another worker claimed it or it is exhausted.
    async fn claim(&self, session_id: &str, now: DateTime<Utc>)
        -> DomainResult<Option<RetryQueueItem>>;

    async fn mark_completed(&self, session_id: &str) -> DomainResult<()>;

    async fn mark_failed(&self, session_id: &str, error: &str) -> DomainResult<()>;

    async fn mark_cancelled(&self, session_id: &str) -> DomainResult<()>;

    async fn stats(&self, now: DateTime<Utc>) -> DomainResult<QueueStats>;
}
