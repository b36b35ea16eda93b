use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::errors::DatabaseError;
use super::utils::{parse_column, parse_datetime, parse_optional_datetime};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AnalysisResult, AnalysisSession, PartNumber, ResultUpdate, SessionStatus, Tier,
};
use crate::domain::ports::SessionRepository;

/// `SQLite` implementation of `SessionRepository`
pub struct SessionRepositoryImpl {
    pool: SqlitePool,
}

impl SessionRepositoryImpl {
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_session(row: &SqliteRow) -> Result<AnalysisSession, DatabaseError> {
        Ok(AnalysisSession {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            tier: parse_column::<Tier>(row, "tier")?,
            problem_statement: row.try_get("problem_statement")?,
            status: parse_column::<SessionStatus>(row, "status")?,
            created_at: parse_datetime(&row.try_get::<String, _>("created_at")?)?,
            updated_at: parse_datetime(&row.try_get::<String, _>("updated_at")?)?,
        })
    }

    fn row_to_result(row: &SqliteRow) -> Result<AnalysisResult, DatabaseError> {
        let mut result = AnalysisResult {
            session_id: row.try_get("session_id")?,
            single_result: row.try_get("single_result")?,
            full_markdown: row.try_get("full_markdown")?,
            is_partial: row.try_get::<i64, _>("is_partial")? != 0,
            updated_at: parse_optional_datetime(row.try_get("updated_at")?)?,
            ..AnalysisResult::default()
        };
        for n in 1..=6u8 {
            let part = PartNumber::new(n).map_err(|e| DatabaseError::parse("part", e))?;
            result.parts[part.index()] = row.try_get(part.column())?;
        }
        Ok(result)
    }
}

#[async_trait]
impl SessionRepository for SessionRepositoryImpl {
    async fn create_session(&self, session: &AnalysisSession) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO analysis_sessions (id, email, tier, problem_statement, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.email)
        .bind(session.tier.as_str())
        .bind(&session.problem_statement)
        .bind(session.status.as_str())
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO analysis_results (session_id, updated_at) VALUES (?, ?)")
            .bind(&session.id)
            .bind(session.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(session_id = %session.id, tier = %session.tier, "session created");
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> DomainResult<Option<AnalysisSession>> {
        let row = sqlx::query("SELECT * FROM analysis_sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(Self::row_to_session).transpose()?)
    }

    async fn update_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> DomainResult<()> {
        let result = sqlx::query("UPDATE analysis_sessions SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }

    async fn update_analysis_result(
        &self,
        session_id: &str,
        update: ResultUpdate,
    ) -> DomainResult<()> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        // Sessions created outside this crate may not have a result row yet.
        sqlx::query(
            "INSERT INTO analysis_results (session_id, updated_at) VALUES (?, ?) ON CONFLICT(session_id) DO NOTHING",
        )
        .bind(session_id)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let part_clause = update
            .part
            .as_ref()
            .map(|(part, _)| format!("{col} = ?,", col = part.column()))
            .unwrap_or_default();
        let sql = format!(
            r#"
            UPDATE analysis_results SET
                single_result = COALESCE(?, single_result),
                full_markdown = COALESCE(?, full_markdown),
                is_partial = COALESCE(?, is_partial),
                {part_clause}
                updated_at = ?
            WHERE session_id = ?
            "#
        );

        let mut query = sqlx::query(&sql)
            .bind(update.single_result)
            .bind(update.full_markdown)
            .bind(update.is_partial.map(i64::from));
        if let Some((_, content)) = update.part {
            query = query.bind(content);
        }
        query.bind(&now).bind(session_id).execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_analysis_result(&self, session_id: &str) -> DomainResult<Option<AnalysisResult>> {
        let row = sqlx::query("SELECT * FROM analysis_results WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(Self::row_to_result).transpose()?)
    }
}
