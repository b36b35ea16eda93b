//! Retry queue background processor.
//!
//! Polls due items on an interval and re-runs the orchestrator for each,
//! resuming from the parts the session already has. Polling is skipped
//! entirely while the shared circuit breaker is open so queued attempts are
//! not spent against a dependency known to be down.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::error_classifier::{ClassifiedError, ErrorCategory};
use super::orchestrator::{AnalysisOrchestrator, AnalysisOutcome, AnalysisRequest, ResumeConfig};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    EnqueueOutcome, QueueStats, RetryQueueConfig, RetryQueueItem, SessionStatus, TriggeredBy,
};

/// Configuration for the retry queue processor.
#[derive(Debug, Clone)]
pub struct RetryProcessorConfig {
    pub poll_interval: Duration,
    /// Items started per poll.
    pub batch_size: u32,
    pub run_on_startup: bool,
}

impl Default for RetryProcessorConfig {
    fn default() -> Self {
        Self::from(&RetryQueueConfig::default())
    }
}

impl From<&RetryQueueConfig> for RetryProcessorConfig {
    fn from(config: &RetryQueueConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            batch_size: config.batch_size.max(1),
            run_on_startup: true,
        }
    }
}

/// What one poll did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    /// Set when the poll was skipped because the circuit is open.
    pub circuit_open_until: Option<DateTime<Utc>>,
    pub due: usize,
    pub started: usize,
    pub completed: usize,
    pub partial: usize,
    pub requeued: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Due items left alone: already claimed elsewhere or running here.
    pub skipped: usize,
}

/// Status of the processor loop.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessorStatus {
    pub running: bool,
    pub total_polls: u64,
    pub failed_polls: u64,
    pub items_started: u64,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Handle to control a running processor.
#[derive(Clone)]
pub struct ProcessorHandle {
    stop_flag: Arc<AtomicBool>,
    wake: Arc<Notify>,
    status: Arc<RwLock<ProcessorStatus>>,
}

impl ProcessorHandle {
    /// Request the loop to stop after the current poll.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    pub async fn status(&self) -> ProcessorStatus {
        self.status.read().await.clone()
    }
}

pub struct RetryQueueProcessor {
    orchestrator: Arc<AnalysisOrchestrator>,
    config: RetryProcessorConfig,
    status: Arc<RwLock<ProcessorStatus>>,
    stop_flag: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl RetryQueueProcessor {
    pub fn new(orchestrator: Arc<AnalysisOrchestrator>, config: RetryProcessorConfig) -> Self {
        Self {
            orchestrator,
            config,
            status: Arc::new(RwLock::new(ProcessorStatus::default())),
            stop_flag: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn handle(&self) -> ProcessorHandle {
        ProcessorHandle {
            stop_flag: Arc::clone(&self.stop_flag),
            wake: Arc::clone(&self.wake),
            status: Arc::clone(&self.status),
        }
    }

    pub fn config(&self) -> &RetryProcessorConfig {
        &self.config
    }

    /// Spawn the polling loop.
    pub fn start(self) -> (ProcessorHandle, JoinHandle<()>) {
        let handle = self.handle();
        let join = tokio::spawn(async move { self.run_loop().await });
        (handle, join)
    }

    async fn run_loop(self) {
        self.status.write().await.running = true;
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "retry queue processor started"
        );

        let mut timer = interval(self.config.poll_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !self.config.run_on_startup {
            timer.tick().await;
        }

        loop {
            tokio::select! {
                _ = timer.tick() => {}
                () = self.wake.notified() => {}
            }
            if self.stop_flag.load(Ordering::Acquire) {
                break;
            }

            let result = self.poll_once().await;
            let mut status = self.status.write().await;
            status.total_polls += 1;
            status.last_poll_at = Some(Utc::now());
            match result {
                Ok(report) => {
                    status.items_started += u64::try_from(report.started).unwrap_or(u64::MAX);
                    if report.started > 0 || report.circuit_open_until.is_some() {
                        info!(?report, "retry queue poll finished");
                    }
                }
                Err(err) => {
                    status.failed_polls += 1;
                    status.last_error = Some(err.to_string());
                    error!(error = %err, "retry queue poll failed");
                }
            }
        }

        self.status.write().await.running = false;
        info!("retry queue processor stopped");
    }

    /// Run one poll: fetch due items and process them in order.
    pub async fn poll_once(&self) -> DomainResult<PollReport> {
        let mut report = PollReport::default();

        if let Some(until) = self.orchestrator.breaker().gate().await {
            debug!(%until, "circuit open, skipping retry queue poll");
            report.circuit_open_until = Some(until);
            return Ok(report);
        }

        let due = self
            .orchestrator
            .queue()
            .fetch_due(Utc::now(), self.config.batch_size)
            .await?;
        report.due = due.len();

        for item in due {
            if self.stop_flag.load(Ordering::Acquire) {
                break;
            }
            self.process_item(item, &mut report).await?;
        }
        Ok(report)
    }

    async fn process_item(&self, item: RetryQueueItem, report: &mut PollReport) -> DomainResult<()> {
        let queue = self.orchestrator.queue();
        let session_id = item.session_id.clone();

        if self.orchestrator.is_running(&session_id) {
            report.skipped += 1;
            return Ok(());
        }

        if item.is_exhausted() {
            self.give_up(&item, "retry attempts exhausted").await?;
            report.failed += 1;
            return Ok(());
        }

        let Some(claimed) = queue.claim(&session_id, Utc::now()).await? else {
            report.skipped += 1;
            return Ok(());
        };

        let Some(session) = self.orchestrator.sessions().get_session(&session_id).await? else {
            warn!(session_id = %session_id, "queued session no longer exists");
            queue.mark_failed(&session_id, "session not found").await?;
            report.failed += 1;
            return Ok(());
        };
        if session.status == SessionStatus::Completed {
            queue.mark_completed(&session_id).await?;
            report.skipped += 1;
            return Ok(());
        }

        let resume = self.resume_config(&claimed).await?;
        info!(
            session_id = %session_id,
            attempt = claimed.retry_count,
            max_retries = claimed.max_retries,
            resume_from_part = resume.resume_from_part(),
            "retrying queued analysis"
        );
        let request = AnalysisRequest::new(
            claimed.session_id.clone(),
            claimed.problem_statement.clone(),
            claimed.tier,
            claimed.email.clone(),
        )
        .with_resume(resume)
        .triggered_by(TriggeredBy::RetryQueue)
        .with_retry_count(claimed.retry_count);

        report.started += 1;
        match self.orchestrator.run_analysis(request).await {
            Ok(AnalysisOutcome::Completed { .. }) => report.completed += 1,
            Ok(AnalysisOutcome::PartialSuccess { .. }) => report.partial += 1,
            Ok(AnalysisOutcome::Queued { .. }) => report.requeued += 1,
            Ok(AnalysisOutcome::Failed { .. }) => report.failed += 1,
            Ok(AnalysisOutcome::Paused { .. } | AnalysisOutcome::Cancelled { .. }) => {
                queue.mark_cancelled(&session_id).await?;
                report.cancelled += 1;
            }
            Err(DomainError::RunAlreadyActive(_)) => {
                self.requeue(&claimed, "run already active").await?;
                report.skipped += 1;
            }
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "queued retry errored");
                if self.requeue(&claimed, &err.to_string()).await? {
                    report.requeued += 1;
                } else {
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }

    /// Resume from the parts recorded by the session's latest operation.
    async fn resume_config(&self, item: &RetryQueueItem) -> DomainResult<ResumeConfig> {
        let Some(result) = self
            .orchestrator
            .sessions()
            .get_analysis_result(&item.session_id)
            .await?
        else {
            return Ok(ResumeConfig::default());
        };
        let latest = self
            .orchestrator
            .state_machine()
            .get_operation_by_session_id(&item.session_id)
            .await?;
        Ok(ResumeConfig::from_result(
            &result,
            item.tier,
            latest.map(|op| op.completed_parts),
        ))
    }

    /// Put a claimed item back to pending. Returns false if that exhausted it.
    async fn requeue(&self, item: &RetryQueueItem, reason: &str) -> DomainResult<bool> {
        let retry = RetryQueueItem::new(
            &item.session_id,
            item.tier,
            &item.problem_statement,
            item.email.clone(),
            Utc::now() + chrono::Duration::from_std(self.config.poll_interval)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
        )
        .with_max_retries(item.max_retries)
        .with_last_error(reason);

        match self.orchestrator.queue().enqueue(retry).await? {
            EnqueueOutcome::Queued(_) => Ok(true),
            EnqueueOutcome::Exhausted(item) => {
                self.give_up(&item, reason).await?;
                Ok(false)
            }
        }
    }

    async fn give_up(&self, item: &RetryQueueItem, reason: &str) -> DomainResult<()> {
        warn!(
            session_id = %item.session_id,
            retry_count = item.retry_count,
            "giving up on queued analysis"
        );
        let error = ClassifiedError {
            category: ErrorCategory::ServerError,
            retryable: false,
            code: "RETRIES_EXHAUSTED".to_string(),
            message: format!(
                "analysis failed after {} queued attempts: {}",
                item.retry_count,
                item.last_error.as_deref().unwrap_or(reason)
            ),
        };
        self.orchestrator
            .fail_session(&item.session_id, item.tier, item.email.as_deref(), &error)
            .await
    }

    pub async fn get_queue_stats(&self) -> DomainResult<QueueStats> {
        self.orchestrator.queue().stats(Utc::now()).await
    }

    pub async fn status(&self) -> ProcessorStatus {
        self.status.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_queue_settings() {
        let settings = RetryQueueConfig {
            poll_interval_secs: 0,
            batch_size: 0,
            ..RetryQueueConfig::default()
        };
        let config = RetryProcessorConfig::from(&settings);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.batch_size, 1);
    }

    #[test]
    fn test_status_default() {
        let status = ProcessorStatus::default();
        assert!(!status.running);
        assert_eq!(status.total_polls, 0);
        assert!(status.last_error.is_none());
    }
}
