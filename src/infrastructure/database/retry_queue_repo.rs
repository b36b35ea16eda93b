use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use super::errors::DatabaseError;
use super::utils::{int_column, parse_column, parse_datetime, parse_optional_datetime};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    EnqueueOutcome, QueuePriority, QueueStats, QueueStatus, RetryQueueItem, Tier,
};
use crate::domain::ports::RetryQueueRepository;

/// `SQLite` implementation of `RetryQueueRepository`
pub struct RetryQueueRepositoryImpl {
    pool: SqlitePool,
}

impl RetryQueueRepositoryImpl {
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_item(row: &SqliteRow) -> Result<RetryQueueItem, DatabaseError> {
        let rank: i64 = row.try_get("priority")?;
        let priority = QueuePriority::from_rank(rank)
            .ok_or_else(|| DatabaseError::parse("priority", format!("unknown rank {rank}")))?;

        Ok(RetryQueueItem {
            session_id: row.try_get("session_id")?,
            tier: parse_column::<Tier>(row, "tier")?,
            problem_statement: row.try_get("problem_statement")?,
            email: row.try_get("email")?,
            retry_count: int_column(row, "retry_count")?,
            max_retries: int_column(row, "max_retries")?,
            priority,
            last_error: row.try_get("last_error")?,
            last_attempt_at: parse_optional_datetime(row.try_get("last_attempt_at")?)?,
            next_retry_at: parse_datetime(&row.try_get::<String, _>("next_retry_at")?)?,
            status: parse_column::<QueueStatus>(row, "status")?,
            created_at: parse_datetime(&row.try_get::<String, _>("created_at")?)?,
            updated_at: parse_datetime(&row.try_get::<String, _>("updated_at")?)?,
            fresh_budget: false,
        })
    }

    async fn fetch_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        session_id: &str,
    ) -> Result<Option<RetryQueueItem>, DatabaseError> {
        let row = sqlx::query("SELECT * FROM retry_queue WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&mut **tx)
            .await?;
        row.as_ref().map(Self::row_to_item).transpose()
    }

    async fn set_status(
        &self,
        session_id: &str,
        status: QueueStatus,
        only_active: bool,
    ) -> DomainResult<()> {
        let guard = if only_active {
            " AND status IN ('pending', 'processing')"
        } else {
            ""
        };
        let sql = format!(
            "UPDATE retry_queue SET status = ?, updated_at = ? WHERE session_id = ?{guard}"
        );
        let result = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            debug!(session_id, status = %status, "retry queue item updated");
        }
        Ok(())
    }
}

#[async_trait]
impl RetryQueueRepository for RetryQueueRepositoryImpl {
    async fn enqueue(&self, item: RetryQueueItem) -> DomainResult<EnqueueOutcome> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let existing = Self::fetch_in_tx(&mut tx, &item.session_id).await?;

        // A finished or cancelled row starts a fresh retry budget, as does
        // any row when the caller asks for one.
        let retry_count = match &existing {
            Some(_) if item.fresh_budget => 0,
            Some(row) if matches!(row.status, QueueStatus::Completed | QueueStatus::Cancelled) => 0,
            Some(row) => row.retry_count,
            None => item.retry_count,
        };

        if retry_count >= item.max_retries {
            sqlx::query(
                r#"
                UPDATE retry_queue
                SET status = 'failed', last_error = COALESCE(?, last_error), updated_at = ?
                WHERE session_id = ?
                "#,
            )
            .bind(&item.last_error)
            .bind(&now)
            .bind(&item.session_id)
            .execute(&mut *tx)
            .await?;

            let stored = Self::fetch_in_tx(&mut tx, &item.session_id).await?;
            tx.commit().await?;
            info!(
                session_id = %item.session_id,
                retry_count,
                max_retries = item.max_retries,
                "retry budget exhausted"
            );
            return Ok(EnqueueOutcome::Exhausted(stored.unwrap_or(RetryQueueItem {
                retry_count,
                status: QueueStatus::Failed,
                ..item
            })));
        }

        sqlx::query(
            r#"
            INSERT INTO retry_queue (
                session_id, tier, problem_statement, email, retry_count, max_retries, priority,
                last_error, last_attempt_at, next_retry_at, status, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, 'pending', ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                tier = excluded.tier,
                problem_statement = excluded.problem_statement,
                email = excluded.email,
                retry_count = excluded.retry_count,
                max_retries = excluded.max_retries,
                priority = excluded.priority,
                last_error = COALESCE(excluded.last_error, retry_queue.last_error),
                next_retry_at = excluded.next_retry_at,
                status = 'pending',
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&item.session_id)
        .bind(item.tier.as_str())
        .bind(&item.problem_statement)
        .bind(&item.email)
        .bind(i64::from(retry_count))
        .bind(i64::from(item.max_retries))
        .bind(item.priority.rank())
        .bind(&item.last_error)
        .bind(item.next_retry_at.to_rfc3339())
        .bind(item.created_at.to_rfc3339())
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let stored = Self::fetch_in_tx(&mut tx, &item.session_id)
            .await?
            .ok_or_else(|| DomainError::DatabaseError("queued item vanished".to_string()))?;
        tx.commit().await?;

        debug!(
            session_id = %stored.session_id,
            retry_count = stored.retry_count,
            next_retry_at = %stored.next_retry_at,
            "session queued for retry"
        );
        Ok(EnqueueOutcome::Queued(stored))
    }

    async fn get_item(&self, session_id: &str) -> DomainResult<Option<RetryQueueItem>> {
        let row = sqlx::query("SELECT * FROM retry_queue WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::row_to_item).transpose()?)
    }

    async fn fetch_due(&self, now: DateTime<Utc>, limit: u32) -> DomainResult<Vec<RetryQueueItem>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM retry_queue
            WHERE status = 'pending' AND next_retry_at <= ?
            ORDER BY priority DESC, created_at ASC
            LIMIT ?
            "#,
        )
        .bind(now.to_rfc3339())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Self::row_to_item(row).map_err(DomainError::from))
            .collect()
    }

    async fn claim(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<RetryQueueItem>> {
        let mut tx = self.pool.begin().await?;
        let now = now.to_rfc3339();

        let result = sqlx::query(
            r#"
            UPDATE retry_queue
            SET status = 'processing',
                retry_count = retry_count + 1,
                last_attempt_at = ?,
                updated_at = ?
            WHERE session_id = ? AND status = 'pending' AND retry_count < max_retries
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let item = Self::fetch_in_tx(&mut tx, session_id).await?;
        tx.commit().await?;
        Ok(item)
    }

    async fn mark_completed(&self, session_id: &str) -> DomainResult<()> {
        self.set_status(session_id, QueueStatus::Completed, true).await
    }

    async fn mark_failed(&self, session_id: &str, error: &str) -> DomainResult<()> {
        sqlx::query(
            "UPDATE retry_queue SET status = 'failed', last_error = ?, updated_at = ? WHERE session_id = ?",
        )
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_cancelled(&self, session_id: &str) -> DomainResult<()> {
        self.set_status(session_id, QueueStatus::Cancelled, true).await
    }

    async fn stats(&self, now: DateTime<Utc>) -> DomainResult<QueueStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM retry_queue GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = QueueStats::default();
        for row in &rows {
            let status = parse_column::<QueueStatus>(row, "status")?;
            let count: u64 = int_column(row, "count")?;
            match status {
                QueueStatus::Pending => stats.pending = count,
                QueueStatus::Processing => stats.processing = count,
                QueueStatus::Completed => stats.completed = count,
                QueueStatus::Failed => stats.failed = count,
                QueueStatus::Cancelled => stats.cancelled = count,
            }
        }

        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN next_retry_at <= ? THEN 1 ELSE 0 END), 0) AS due_now,
                MIN(created_at) AS oldest
            FROM retry_queue
            WHERE status = 'pending'
            "#,
        )
        .bind(now.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        stats.due_now = int_column(&row, "due_now").map_err(DomainError::from)?;
        stats.oldest_pending_at =
            parse_optional_datetime(row.try_get("oldest").map_err(DatabaseError::from)?)
                .map_err(DatabaseError::from)?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AnalysisSession;
    use crate::domain::ports::SessionRepository;
    use crate::infrastructure::database::{DatabaseConnection, SessionRepositoryImpl};
    use chrono::Duration;

    async fn setup(session_ids: &[&str]) -> RetryQueueRepositoryImpl {
        let db = DatabaseConnection::new("sqlite::memory:", 1).await.unwrap();
        db.migrate().await.unwrap();
        let sessions = SessionRepositoryImpl::new(db.pool().clone());
        for id in session_ids {
            let session = AnalysisSession::new(*id, Tier::Full, "problem", None);
            sessions.create_session(&session).await.unwrap();
        }
        RetryQueueRepositoryImpl::new(db.pool().clone())
    }

    fn item(session_id: &str, tier: Tier, due: DateTime<Utc>) -> RetryQueueItem {
        RetryQueueItem::new(session_id, tier, "problem", None, due).with_max_retries(2)
    }

    #[tokio::test]
    async fn test_enqueue_is_unique_per_session() {
        let repo = setup(&["s1"]).await;
        let now = Utc::now();
        repo.enqueue(item("s1", Tier::Full, now)).await.unwrap();
        repo.enqueue(item("s1", Tier::Full, now + Duration::minutes(5)))
            .await
            .unwrap();

        let stats = repo.stats(now).await.unwrap();
        assert_eq!(stats.total(), 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.due_now, 0);
    }

    #[tokio::test]
    async fn test_fetch_due_orders_by_priority() {
        let repo = setup(&["low", "high"]).await;
        let past = Utc::now() - Duration::minutes(1);
        repo.enqueue(item("low", Tier::Standard, past)).await.unwrap();
        repo.enqueue(item("high", Tier::Full, past)).await.unwrap();

        let due = repo.fetch_due(Utc::now(), 10).await.unwrap();
        let ids: Vec<_> = due.iter().map(|i| i.session_id.as_str()).collect();
        assert_eq!(ids, vec!["high", "low"]);
    }

    #[tokio::test]
    async fn test_claim_counts_attempts_until_exhausted() {
        let repo = setup(&["s1"]).await;
        let past = Utc::now() - Duration::minutes(1);

        for attempt in 1..=2 {
            repo.enqueue(item("s1", Tier::Full, past)).await.unwrap();
            let claimed = repo.claim("s1", Utc::now()).await.unwrap().unwrap();
            assert_eq!(claimed.retry_count, attempt);
            assert_eq!(claimed.status, QueueStatus::Processing);
            assert!(repo.claim("s1", Utc::now()).await.unwrap().is_none());
        }

        let outcome = repo.enqueue(item("s1", Tier::Full, past)).await.unwrap();
        match outcome {
            EnqueueOutcome::Exhausted(stored) => assert_eq!(stored.status, QueueStatus::Failed),
            EnqueueOutcome::Queued(_) => panic!("expected exhausted"),
        }
        assert!(repo.fetch_due(Utc::now(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_completed_item_gets_fresh_budget() {
        let repo = setup(&["s1"]).await;
        let past = Utc::now() - Duration::minutes(1);
        repo.enqueue(item("s1", Tier::Medium, past)).await.unwrap();
        repo.claim("s1", Utc::now()).await.unwrap();
        repo.mark_completed("s1").await.unwrap();

        let outcome = repo.enqueue(item("s1", Tier::Medium, past)).await.unwrap();
        match outcome {
            EnqueueOutcome::Queued(stored) => assert_eq!(stored.retry_count, 0),
            EnqueueOutcome::Exhausted(_) => panic!("expected queued"),
        }
    }

    #[tokio::test]
    async fn test_fresh_budget_reopens_exhausted_item() {
        let repo = setup(&["s1"]).await;
        let past = Utc::now() - Duration::minutes(1);
        for _ in 0..2 {
            repo.enqueue(item("s1", Tier::Full, past)).await.unwrap();
            repo.claim("s1", Utc::now()).await.unwrap().unwrap();
        }
        let outcome = repo.enqueue(item("s1", Tier::Full, past)).await.unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Exhausted(_)));

        // A plain enqueue stays exhausted; a fresh budget reopens the row.
        let outcome = repo.enqueue(item("s1", Tier::Full, past)).await.unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Exhausted(_)));
        let outcome = repo
            .enqueue(item("s1", Tier::Full, past).with_fresh_budget())
            .await
            .unwrap();
        match outcome {
            EnqueueOutcome::Queued(stored) => {
                assert_eq!(stored.retry_count, 0);
                assert_eq!(stored.status, QueueStatus::Pending);
            }
            EnqueueOutcome::Exhausted(_) => panic!("expected queued"),
        }
        assert_eq!(repo.fetch_due(Utc::now(), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_only_touches_active_items() {
        let repo = setup(&["s1"]).await;
        repo.enqueue(item("s1", Tier::Standard, Utc::now())).await.unwrap();
        repo.mark_failed("s1", "boom").await.unwrap();
        repo.mark_cancelled("s1").await.unwrap();

        let stored = repo.get_item("s1").await.unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Failed);
        assert_eq!(stored.last_error.as_deref(), Some("boom"));
    }
}
