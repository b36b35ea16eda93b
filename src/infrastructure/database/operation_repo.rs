use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, warn};

use super::errors::DatabaseError;
use super::utils::{
    int_column, optional_int_column, parse_column, parse_datetime, parse_optional_datetime,
};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ActorType, AnalysisOperation, EventType, NewOperationEvent, OperationEvent, OperationFilter,
    OperationState, Tier, TriggeredBy,
};
use crate::domain::ports::OperationRepository;

/// `SQLite` implementation of `OperationRepository`
///
/// Row updates and event inserts share one transaction; the update is
/// guarded by `state = expected` and a zero row count aborts the
/// transaction without writing the event.
pub struct OperationRepositoryImpl {
    pool: SqlitePool,
}

impl OperationRepositoryImpl {
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_operation(row: &SqliteRow) -> Result<AnalysisOperation, DatabaseError> {
        Ok(AnalysisOperation {
            operation_id: row.try_get("operation_id")?,
            session_id: row.try_get("session_id")?,
            tier: parse_column::<Tier>(row, "tier")?,
            state: parse_column::<OperationState>(row, "state")?,
            total_parts: int_column(row, "total_parts")?,
            completed_parts: int_column(row, "completed_parts")?,
            current_part: int_column(row, "current_part")?,
            started_at: parse_datetime(&row.try_get::<String, _>("started_at")?)?,
            last_part_completed_at: parse_optional_datetime(row.try_get("last_part_completed_at")?)?,
            completed_at: parse_optional_datetime(row.try_get("completed_at")?)?,
            estimated_completion_at: parse_optional_datetime(
                row.try_get("estimated_completion_at")?,
            )?,
            last_error: row.try_get("last_error")?,
            failed_part: optional_int_column(row, "failed_part")?,
            retry_count: int_column(row, "retry_count")?,
            triggered_by: parse_column::<TriggeredBy>(row, "triggered_by")?,
            admin_notes: row.try_get("admin_notes")?,
            updated_at: parse_datetime(&row.try_get::<String, _>("updated_at")?)?,
        })
    }

    fn row_to_event(row: &SqliteRow) -> Result<OperationEvent, DatabaseError> {
        let previous_state: Option<String> = row.try_get("previous_state")?;
        let metadata: String = row.try_get("metadata")?;
        Ok(OperationEvent {
            id: row.try_get("id")?,
            operation_id: row.try_get("operation_id")?,
            session_id: row.try_get("session_id")?,
            event_type: parse_column::<EventType>(row, "event_type")?,
            part_number: optional_int_column(row, "part_number")?,
            previous_state: previous_state
                .map(|s| s.parse::<OperationState>())
                .transpose()
                .map_err(|e| DatabaseError::parse("previous_state", e))?,
            new_state: parse_column::<OperationState>(row, "new_state")?,
            error_code: row.try_get("error_code")?,
            error_message: row.try_get("error_message")?,
            duration_ms: optional_int_column(row, "duration_ms")?,
            token_count: optional_int_column(row, "token_count")?,
            actor_type: parse_column::<ActorType>(row, "actor_type")?,
            actor_id: row.try_get("actor_id")?,
            metadata: serde_json::from_str(&metadata)?,
            created_at: parse_datetime(&row.try_get::<String, _>("created_at")?)?,
        })
    }

    async fn insert_event(
        tx: &mut Transaction<'_, Sqlite>,
        operation: &AnalysisOperation,
        previous_state: Option<OperationState>,
        event: NewOperationEvent,
    ) -> Result<OperationEvent, DatabaseError> {
        let created_at = Utc::now();
        let metadata = serde_json::to_string(&event.metadata)?;
        let duration_ms = event
            .duration_ms
            .map(i64::try_from)
            .transpose()
            .map_err(|e| DatabaseError::parse("duration_ms", e))?;

        let result = sqlx::query(
            r#"
            INSERT INTO analysis_operation_events (
                operation_id, session_id, event_type, part_number, previous_state, new_state,
                error_code, error_message, duration_ms, token_count, actor_type, actor_id,
                metadata, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&operation.operation_id)
        .bind(&operation.session_id)
        .bind(event.event_type.as_str())
        .bind(event.part_number.map(i64::from))
        .bind(previous_state.map(|s| s.as_str()))
        .bind(operation.state.as_str())
        .bind(&event.error_code)
        .bind(&event.error_message)
        .bind(duration_ms)
        .bind(event.token_count.map(i64::from))
        .bind(event.actor_type.as_str())
        .bind(&event.actor_id)
        .bind(&metadata)
        .bind(created_at.to_rfc3339())
        .execute(&mut **tx)
        .await?;

        Ok(OperationEvent {
            id: result.last_insert_rowid(),
            operation_id: operation.operation_id.clone(),
            session_id: operation.session_id.clone(),
            event_type: event.event_type,
            part_number: event.part_number,
            previous_state,
            new_state: operation.state,
            error_code: event.error_code,
            error_message: event.error_message,
            duration_ms: event.duration_ms,
            token_count: event.token_count,
            actor_type: event.actor_type,
            actor_id: event.actor_id,
            metadata: event.metadata,
            created_at,
        })
    }
}

fn opt_ts(value: Option<chrono::DateTime<Utc>>) -> Option<String> {
    value.map(|dt| dt.to_rfc3339())
}

#[async_trait]
impl OperationRepository for OperationRepositoryImpl {
    async fn create_operation(
        &self,
        operation: &AnalysisOperation,
        event: NewOperationEvent,
    ) -> DomainResult<OperationEvent> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO analysis_operations (
                operation_id, session_id, tier, state, total_parts, completed_parts, current_part,
                started_at, last_part_completed_at, completed_at, estimated_completion_at,
                last_error, failed_part, retry_count, triggered_by, admin_notes, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&operation.operation_id)
        .bind(&operation.session_id)
        .bind(operation.tier.as_str())
        .bind(operation.state.as_str())
        .bind(i64::from(operation.total_parts))
        .bind(i64::from(operation.completed_parts))
        .bind(i64::from(operation.current_part))
        .bind(operation.started_at.to_rfc3339())
        .bind(opt_ts(operation.last_part_completed_at))
        .bind(opt_ts(operation.completed_at))
        .bind(opt_ts(operation.estimated_completion_at))
        .bind(&operation.last_error)
        .bind(operation.failed_part.map(i64::from))
        .bind(i64::from(operation.retry_count))
        .bind(operation.triggered_by.as_str())
        .bind(&operation.admin_notes)
        .bind(operation.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let event = Self::insert_event(&mut tx, operation, None, event).await?;
        tx.commit().await?;
        Ok(event)
    }

    async fn apply_transition(
        &self,
        operation: &AnalysisOperation,
        expected: OperationState,
        event: NewOperationEvent,
    ) -> DomainResult<OperationEvent> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE analysis_operations SET
                state = ?,
                completed_parts = ?,
                current_part = ?,
                last_part_completed_at = ?,
                completed_at = ?,
                estimated_completion_at = ?,
                last_error = ?,
                failed_part = ?,
                retry_count = ?,
                admin_notes = ?,
                updated_at = ?
            WHERE operation_id = ? AND state = ?
            "#,
        )
        .bind(operation.state.as_str())
        .bind(i64::from(operation.completed_parts))
        .bind(i64::from(operation.current_part))
        .bind(opt_ts(operation.last_part_completed_at))
        .bind(opt_ts(operation.completed_at))
        .bind(opt_ts(operation.estimated_completion_at))
        .bind(&operation.last_error)
        .bind(operation.failed_part.map(i64::from))
        .bind(i64::from(operation.retry_count))
        .bind(&operation.admin_notes)
        .bind(operation.updated_at.to_rfc3339())
        .bind(&operation.operation_id)
        .bind(expected.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            let exists = sqlx::query("SELECT 1 FROM analysis_operations WHERE operation_id = ?")
                .bind(&operation.operation_id)
                .fetch_optional(&self.pool)
                .await?
                .is_some();
            if !exists {
                return Err(DomainError::OperationNotFound(operation.operation_id.clone()));
            }
            warn!(
                operation_id = %operation.operation_id,
                expected = %expected,
                "operation changed since it was read"
            );
            return Err(DomainError::ConcurrencyConflict {
                operation_id: operation.operation_id.clone(),
                expected: expected.to_string(),
            });
        }

        let event = Self::insert_event(&mut tx, operation, Some(expected), event).await?;
        tx.commit().await?;
        debug!(
            operation_id = %operation.operation_id,
            event_type = %event.event_type,
            from = %expected,
            to = %operation.state,
            "operation transition recorded"
        );
        Ok(event)
    }

    async fn get_operation(&self, operation_id: &str) -> DomainResult<Option<AnalysisOperation>> {
        let row = sqlx::query("SELECT * FROM analysis_operations WHERE operation_id = ?")
            .bind(operation_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::row_to_operation).transpose()?)
    }

    async fn get_latest_for_session(
        &self,
        session_id: &str,
    ) -> DomainResult<Option<AnalysisOperation>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM analysis_operations
            WHERE session_id = ?
            ORDER BY started_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(Self::row_to_operation).transpose()?)
    }

    async fn list_operations(
        &self,
        filter: &OperationFilter,
    ) -> DomainResult<Vec<AnalysisOperation>> {
        let mut sql = String::from("SELECT * FROM analysis_operations WHERE 1=1");
        if filter.state.is_some() {
            sql.push_str(" AND state = ?");
        }
        if filter.session_id.is_some() {
            sql.push_str(" AND session_id = ?");
        }
        if filter.tier.is_some() {
            sql.push_str(" AND tier = ?");
        }
        sql.push_str(" ORDER BY started_at DESC, rowid DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        if let Some(state) = filter.state {
            query = query.bind(state.as_str());
        }
        if let Some(session_id) = &filter.session_id {
            query = query.bind(session_id);
        }
        if let Some(tier) = filter.tier {
            query = query.bind(tier.as_str());
        }
        let rows = query
            .bind(i64::from(filter.limit.unwrap_or(100)))
            .bind(i64::from(filter.offset.unwrap_or(0)))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| Self::row_to_operation(row).map_err(DomainError::from))
            .collect()
    }

    async fn get_events(&self, operation_id: &str) -> DomainResult<Vec<OperationEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM analysis_operation_events WHERE operation_id = ? ORDER BY id ASC",
        )
        .bind(operation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Self::row_to_event(row).map_err(DomainError::from))
            .collect()
    }

    async fn list_retryable(&self, max_retries: u32) -> DomainResult<Vec<AnalysisOperation>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM analysis_operations
            WHERE state = ? AND retry_count < ?
            ORDER BY updated_at ASC
            "#,
        )
        .bind(OperationState::Failed.as_str())
        .bind(i64::from(max_retries))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Self::row_to_operation(row).map_err(DomainError::from))
            .collect()
    }
}
