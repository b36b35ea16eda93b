//! Analysis orchestrator.
//!
//! Drives one session from `processing` to a terminal outcome: sequential
//! part generation with handoff summaries, in-run retries behind the shared
//! circuit breaker, partial-success delivery, and hand-off to the retry
//! queue when a run fails with a retryable error.
//!
//! Content is persisted before the state event that records it, so a crash
//! between the two can only under-report progress.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use super::best_effort::spawn_best_effort;
use super::circuit_breaker::CircuitBreaker;
use super::error_classifier::{classify_error, AnalysisError, ClassifiedError};
use super::handoff::build_handoff_state;
use super::partial_results::PartialResultsManager;
use super::retry::{backoff_delay, RetryPolicy};
use super::run_guard::RunRegistry;
use super::state_machine::{AnalysisStateMachine, StepResult};
use crate::domain::errors::{DomainError, DomainResult, LlmError};
use crate::domain::models::{
    AnalysisOperation, AnalysisResult, AnalysisSession, Config, EnqueueOutcome, OperationState,
    PartNumber, ResultUpdate, RetryQueueConfig, RetryQueueItem, SessionStatus, Tier, TierPolicy,
    TiersConfig, TriggeredBy,
};
use crate::domain::ports::{
    LlmClient, LlmRequest, LlmResponse, Notifier, OwnerAlert, PromptProvider,
    RetryQueueRepository, SessionRepository, TierPromptConfig, Tracker, TrackingEvent,
};

/// Where a run picks up when earlier parts already exist.
#[derive(Debug, Clone, Default)]
pub struct ResumeConfig {
    /// Parts carried over from earlier attempts, contiguous from part 1.
    pub previous_parts: Vec<(PartNumber, String)>,
    /// Precomputed handoff summary; rebuilt from `previous_parts` if absent.
    pub initial_handoff_state: Option<String>,
    /// Continue this existing running operation instead of creating one.
    pub operation_id: Option<String>,
}

impl ResumeConfig {
    /// Carry over the contiguous prefix of stored parts, at most `limit`.
    ///
    /// Single-shot tiers store their output in `single_result`.
    pub fn from_result(result: &AnalysisResult, tier: Tier, limit: Option<u8>) -> Self {
        let limit = limit.unwrap_or(tier.part_count());
        if tier.is_single_shot() {
            let previous_parts = result
                .single_result
                .clone()
                .filter(|_| limit >= 1)
                .map(|content| vec![(PartNumber::FIRST, content)])
                .unwrap_or_default();
            return Self {
                previous_parts,
                ..Self::default()
            };
        }
        let previous_parts = tier
            .parts()
            .take(usize::from(limit))
            .map_while(|part| result.part(part).map(|content| (part, content.to_string())))
            .collect();
        Self {
            previous_parts,
            ..Self::default()
        }
    }

    pub fn for_operation(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    /// First part the run still has to generate.
    pub fn resume_from_part(&self) -> u8 {
        u8::try_from(self.previous_parts.len()).unwrap_or(u8::MAX).saturating_add(1)
    }
}

/// One request to generate a session's report.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub session_id: String,
    pub problem_statement: String,
    pub tier: Tier,
    pub email: Option<String>,
    pub resume: Option<ResumeConfig>,
    pub triggered_by: TriggeredBy,
    /// Attempts that came before this one, recorded on the new operation.
    pub retry_count: u32,
}

impl AnalysisRequest {
    pub fn new(
        session_id: impl Into<String>,
        problem_statement: impl Into<String>,
        tier: Tier,
        email: Option<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            problem_statement: problem_statement.into(),
            tier,
            email,
            resume: None,
            triggered_by: TriggeredBy::User,
            retry_count: 0,
        }
    }

    pub fn from_session(session: &AnalysisSession) -> Self {
        Self::new(
            session.id.clone(),
            session.problem_statement.clone(),
            session.tier,
            session.email.clone(),
        )
    }

    pub fn with_resume(mut self, resume: ResumeConfig) -> Self {
        self.resume = Some(resume);
        self
    }

    pub fn triggered_by(mut self, triggered_by: TriggeredBy) -> Self {
        self.triggered_by = triggered_by;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

/// How a run ended.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    Completed {
        operation_id: String,
    },
    PartialSuccess {
        operation_id: String,
        completed_parts: u8,
        missing_parts: Vec<u8>,
    },
    /// Handed to the retry queue. No operation exists when the circuit was
    /// already open at start.
    Queued {
        operation_id: Option<String>,
        reason: String,
        next_retry_at: DateTime<Utc>,
    },
    Failed {
        operation_id: Option<String>,
        error: ClassifiedError,
    },
    Paused {
        operation_id: String,
    },
    Cancelled {
        operation_id: String,
    },
}

impl AnalysisOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::PartialSuccess { .. } => "partial_success",
            Self::Queued { .. } => "queued",
            Self::Failed { .. } => "failed",
            Self::Paused { .. } => "paused",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    pub fn operation_id(&self) -> Option<&str> {
        match self {
            Self::Completed { operation_id }
            | Self::PartialSuccess { operation_id, .. }
            | Self::Paused { operation_id }
            | Self::Cancelled { operation_id } => Some(operation_id),
            Self::Queued { operation_id, .. } | Self::Failed { operation_id, .. } => {
                operation_id.as_deref()
            }
        }
    }
}

/// Settings the orchestrator reads from configuration.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorSettings {
    pub tiers: TiersConfig,
    pub retry_queue: RetryQueueConfig,
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            tiers: config.tiers.clone(),
            retry_queue: config.retry_queue.clone(),
        }
    }
}

/// Collaborators of the orchestrator.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub sessions: Arc<dyn SessionRepository>,
    pub state_machine: Arc<AnalysisStateMachine>,
    pub queue: Arc<dyn RetryQueueRepository>,
    pub llm: Arc<dyn LlmClient>,
    pub prompts: Arc<dyn PromptProvider>,
    pub breaker: Arc<CircuitBreaker>,
    pub notifier: Arc<dyn Notifier>,
    pub tracker: Arc<dyn Tracker>,
}

/// Estimated finish time from the mean duration of the parts so far.
pub fn estimate_completion(
    now: DateTime<Utc>,
    durations_ms: &[u64],
    remaining_parts: u8,
) -> Option<DateTime<Utc>> {
    if durations_ms.is_empty() {
        return None;
    }
    let count = u64::try_from(durations_ms.len()).ok()?;
    let mean = durations_ms.iter().sum::<u64>() / count;
    let remaining_ms = mean.checked_mul(u64::from(remaining_parts))?;
    let remaining_ms = i64::try_from(remaining_ms).ok()?;
    Some(now + chrono::Duration::milliseconds(remaining_ms))
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

pub struct AnalysisOrchestrator {
    deps: OrchestratorDeps,
    settings: OrchestratorSettings,
    runs: RunRegistry,
}

impl AnalysisOrchestrator {
    pub fn new(deps: OrchestratorDeps, settings: OrchestratorSettings) -> Self {
        Self {
            deps,
            settings,
            runs: RunRegistry::new(),
        }
    }

    pub fn state_machine(&self) -> &Arc<AnalysisStateMachine> {
        &self.deps.state_machine
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.deps.breaker
    }

    pub fn queue(&self) -> &Arc<dyn RetryQueueRepository> {
        &self.deps.queue
    }

    pub fn sessions(&self) -> &Arc<dyn SessionRepository> {
        &self.deps.sessions
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Whether a run for `session_id` is in progress in this process.
    pub fn is_running(&self, session_id: &str) -> bool {
        self.runs.is_active(session_id)
    }

    /// Spawn [`run_analysis`](Self::run_analysis) on the runtime.
    pub fn start_analysis_in_background(
        self: &Arc<Self>,
        request: AnalysisRequest,
    ) -> JoinHandle<DomainResult<AnalysisOutcome>> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let session_id = request.session_id.clone();
            let result = this.run_analysis(request).await;
            if let Err(err) = &result {
                error!(session_id = %session_id, error = %err, "background analysis run failed");
            }
            result
        })
    }

    /// Run one analysis attempt to a terminal outcome.
    ///
    /// # Errors
    /// `RunAlreadyActive` if this session already has a run in progress.
    /// Storage failures outside part generation are returned as-is.
    #[instrument(
        skip(self, request),
        fields(session_id = %request.session_id, tier = %request.tier, triggered_by = %request.triggered_by)
    )]
    pub async fn run_analysis(&self, request: AnalysisRequest) -> DomainResult<AnalysisOutcome> {
        let _guard = self.runs.try_acquire(&request.session_id)?;

        if let Some(retry_after) = self.deps.breaker.gate().await {
            return self.queue_behind_open_circuit(&request, retry_after).await;
        }

        self.deps
            .sessions
            .update_session_status(&request.session_id, SessionStatus::Processing)
            .await?;

        let prompts = self.deps.prompts.tier_prompt_config(request.tier);
        let policy = self.settings.tiers.policy(request.tier).clone();
        let resume = request.resume.clone().unwrap_or_default();

        let operation = match &resume.operation_id {
            Some(operation_id) => {
                let op = self
                    .deps
                    .state_machine
                    .get_operation(operation_id)
                    .await?
                    .ok_or_else(|| DomainError::OperationNotFound(operation_id.clone()))?;
                if !op.state.is_running() {
                    return Err(DomainError::InvalidStateTransition {
                        from: op.state.to_string(),
                        to: OperationState::Generating.to_string(),
                        reason: "cannot continue an operation that is not running".to_string(),
                    });
                }
                op
            }
            None => {
                let carried = resume.resume_from_part() - 1;
                match self
                    .deps
                    .state_machine
                    .start_operation(
                        &request.session_id,
                        request.tier,
                        request.triggered_by,
                        carried,
                        request.retry_count,
                    )
                    .await
                {
                    Ok(op) => op,
                    Err(err) => {
                        let classified = classify_error(&AnalysisError::from(err));
                        warn!(code = %classified.code, "could not start operation");
                        return self.queue_or_fail(&request, None, classified).await;
                    }
                }
            }
        };

        let mut partials = PartialResultsManager::new(request.tier);
        for (part, content) in &resume.previous_parts {
            if part.get() <= operation.completed_parts {
                partials.mark_part_complete(*part, content.clone())?;
            }
        }
        let handoff = match resume.initial_handoff_state {
            Some(state) => state,
            None => build_handoff_state(
                &request.problem_statement,
                &partials.get_completed_parts(),
                &prompts,
            ),
        };

        self.generate(&request, operation, &prompts, &policy, partials, handoff)
            .await
    }

    async fn generate(
        &self,
        request: &AnalysisRequest,
        operation: AnalysisOperation,
        prompts: &TierPromptConfig,
        policy: &TierPolicy,
        mut partials: PartialResultsManager,
        mut handoff: String,
    ) -> DomainResult<AnalysisOutcome> {
        let run_started = Instant::now();
        let tier = request.tier;
        let mut durations = Vec::new();
        let mut op = operation;

        for n in (op.completed_parts + 1)..=tier.part_count() {
            let part = PartNumber::for_tier(n, tier)?;

            op = match self.deps.state_machine.begin_part(&op.operation_id, part).await {
                Ok(StepResult::Proceed(op)) => op,
                Ok(StepResult::Halted(op)) => return Ok(Self::halted(&op)),
                Err(err) => {
                    return self
                        .step_failed(request, op, None, &partials, prompts, policy, err)
                        .await
                }
            };

            let prompt = if part == PartNumber::FIRST {
                prompts.initial_prompt(&request.problem_statement)
            } else {
                prompts.continue_prompt(part, &handoff)
            };

            let started = Instant::now();
            let response = match self
                .invoke_with_retry(request, part, &prompts.system_prompt, prompt, policy)
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    return self
                        .handle_failure(request, op, Some(part), &partials, prompts, policy, err)
                        .await
                }
            };
            let duration_ms = elapsed_ms(started);

            let update = if tier.is_single_shot() {
                ResultUpdate::single(response.content.clone())
            } else {
                ResultUpdate::part(part, response.content.clone())
            };
            if let Err(err) = self
                .deps
                .sessions
                .update_analysis_result(&request.session_id, update)
                .await
            {
                return self
                    .handle_failure(request, op, Some(part), &partials, prompts, policy, err.into())
                    .await;
            }

            durations.push(duration_ms);
            let eta = estimate_completion(Utc::now(), &durations, tier.part_count() - n);
            op = match self
                .deps
                .state_machine
                .complete_part(&op, part, duration_ms, response.token_count, eta)
                .await
            {
                Ok(StepResult::Proceed(op)) => op,
                Ok(StepResult::Halted(op)) => return Ok(Self::halted(&op)),
                Err(err) => {
                    return self
                        .step_failed(request, op, Some(part), &partials, prompts, policy, err)
                        .await
                }
            };
            // Only parts the operation has recorded count toward the report.
            partials.mark_part_complete(part, response.content)?;

            info!(part = n, total = tier.part_count(), duration_ms, "part completed");
            self.track(TrackingEvent::PartCompleted {
                session_id: request.session_id.clone(),
                tier,
                part: n,
                duration_ms,
            });

            if part.next_in(tier).is_some() {
                handoff = build_handoff_state(
                    &request.problem_statement,
                    &partials.get_completed_parts(),
                    prompts,
                );
            }
        }

        self.finish_success(request, op, &partials, prompts, policy, run_started)
            .await
    }

    async fn invoke_with_retry(
        &self,
        request: &AnalysisRequest,
        part: PartNumber,
        system: &str,
        prompt: String,
        policy: &TierPolicy,
    ) -> Result<LlmResponse, AnalysisError> {
        let llm_request = LlmRequest::new(system, prompt);
        let llm = Arc::clone(&self.deps.llm);

        RetryPolicy::from_tier(policy)
            .execute(
                &self.deps.breaker,
                || {
                    let llm = Arc::clone(&llm);
                    let llm_request = llm_request.clone();
                    async move {
                        let response = llm.invoke(llm_request).await?;
                        if response.content.trim().is_empty() {
                            return Err(LlmError::EmptyResponse);
                        }
                        Ok(response)
                    }
                },
                |attempt, err| {
                    warn!(part = part.get(), attempt, code = %err.code, "retrying LLM call");
                    self.track(TrackingEvent::RetryAttempt {
                        session_id: request.session_id.clone(),
                        tier: request.tier,
                        part: part.get(),
                        attempt,
                        error: err.to_string(),
                    });
                },
            )
            .await
    }

    async fn finish_success(
        &self,
        request: &AnalysisRequest,
        op: AnalysisOperation,
        partials: &PartialResultsManager,
        prompts: &TierPromptConfig,
        policy: &TierPolicy,
        run_started: Instant,
    ) -> DomainResult<AnalysisOutcome> {
        let op = match self.commit_success(request, &op, partials, prompts).await {
            Ok(StepResult::Proceed(op)) => op,
            Ok(StepResult::Halted(op)) => return Ok(Self::halted(&op)),
            Err(err) => {
                return self
                    .step_failed(request, op, None, partials, prompts, policy, err)
                    .await
            }
        };

        self.send_completion_email(request, false).await;
        let duration_ms = elapsed_ms(run_started);
        self.track(TrackingEvent::AnalysisCompleted {
            session_id: request.session_id.clone(),
            tier: request.tier,
            duration_ms,
        });
        info!(operation_id = %op.operation_id, duration_ms, "analysis completed");

        Ok(AnalysisOutcome::Completed {
            operation_id: op.operation_id,
        })
    }

    /// Store the full report and move the operation and session to
    /// completed.
    async fn commit_success(
        &self,
        request: &AnalysisRequest,
        op: &AnalysisOperation,
        partials: &PartialResultsManager,
        prompts: &TierPromptConfig,
    ) -> DomainResult<StepResult> {
        let markdown = partials.generate_full_markdown(prompts);
        self.deps
            .sessions
            .update_analysis_result(&request.session_id, ResultUpdate::markdown(markdown, false))
            .await?;

        let step = self.deps.state_machine.complete_operation(op, &[]).await?;
        if let StepResult::Proceed(_) = step {
            self.deps
                .sessions
                .update_session_status(&request.session_id, SessionStatus::Completed)
                .await?;
            self.deps.queue.mark_completed(&request.session_id).await?;
        }
        Ok(step)
    }

    async fn finish_partial(
        &self,
        request: &AnalysisRequest,
        op: AnalysisOperation,
        partials: &PartialResultsManager,
        prompts: &TierPromptConfig,
    ) -> DomainResult<AnalysisOutcome> {
        let missing: Vec<u8> = partials.missing_parts().iter().map(PartNumber::get).collect();
        let markdown = partials.generate_partial_markdown(prompts);
        self.deps
            .sessions
            .update_analysis_result(&request.session_id, ResultUpdate::markdown(markdown, true))
            .await?;

        let op = match self
            .deps
            .state_machine
            .complete_operation(&op, &missing)
            .await?
        {
            StepResult::Proceed(op) => op,
            StepResult::Halted(op) => return Ok(Self::halted(&op)),
        };
        self.deps
            .sessions
            .update_session_status(&request.session_id, SessionStatus::Completed)
            .await?;
        self.deps.queue.mark_completed(&request.session_id).await?;

        self.send_completion_email(request, true).await;
        self.track(TrackingEvent::PartialSuccess {
            session_id: request.session_id.clone(),
            tier: request.tier,
            completed_parts: partials.completed_count(),
            total_parts: request.tier.part_count(),
            missing_parts: missing.clone(),
        });
        warn!(
            operation_id = %op.operation_id,
            missing_parts = ?missing,
            "delivered partial report, missing parts need backfill"
        );

        Ok(AnalysisOutcome::PartialSuccess {
            operation_id: op.operation_id,
            completed_parts: partials.completed_count(),
            missing_parts: missing,
        })
    }

    /// A state machine step failed mid-run.
    ///
    /// Unless an admin has already paused or cancelled the operation, the
    /// error is handled like any other run failure against the current row.
    #[allow(clippy::too_many_arguments)]
    async fn step_failed(
        &self,
        request: &AnalysisRequest,
        op: AnalysisOperation,
        part: Option<PartNumber>,
        partials: &PartialResultsManager,
        prompts: &TierPromptConfig,
        policy: &TierPolicy,
        err: DomainError,
    ) -> DomainResult<AnalysisOutcome> {
        warn!(operation_id = %op.operation_id, error = %err, "state step failed");
        let op = match self.deps.state_machine.get_operation(&op.operation_id).await {
            Ok(Some(fresh)) => fresh,
            Ok(None) | Err(_) => op,
        };
        if Self::stopped_by_admin(&op) {
            return Ok(Self::halted(&op));
        }
        self.handle_failure(request, op, part, partials, prompts, policy, err.into())
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_failure(
        &self,
        request: &AnalysisRequest,
        op: AnalysisOperation,
        part: Option<PartNumber>,
        partials: &PartialResultsManager,
        prompts: &TierPromptConfig,
        policy: &TierPolicy,
        err: AnalysisError,
    ) -> DomainResult<AnalysisOutcome> {
        let classified = classify_error(&err);
        warn!(
            operation_id = %op.operation_id,
            part = part.map(|p| p.get()),
            code = %classified.code,
            retryable = classified.retryable,
            completed_parts = partials.completed_count(),
            "analysis run failed"
        );

        // A run that generated every part but could not finalize is retried
        // so the queue can deliver the full report.
        if !partials.is_complete()
            && partials.meets_partial_threshold(policy.min_parts_for_partial_success)
        {
            match self.finish_partial(request, op.clone(), partials, prompts).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => warn!(error = %err, "could not deliver partial report"),
            }
        }

        let op = match self
            .deps
            .state_machine
            .fail_operation(&op, part, &classified)
            .await
        {
            Ok(StepResult::Halted(op)) if Self::stopped_by_admin(&op) => {
                return Ok(Self::halted(&op))
            }
            Ok(step) => step.into_operation(),
            Err(err) => {
                error!(
                    operation_id = %op.operation_id,
                    error = %err,
                    "could not record operation failure"
                );
                op
            }
        };

        self.queue_or_fail(request, Some(op.operation_id), classified)
            .await
    }

    /// Queue a retryable failure, or fail the session when the error is
    /// fatal or the retry budget is spent.
    async fn queue_or_fail(
        &self,
        request: &AnalysisRequest,
        operation_id: Option<String>,
        classified: ClassifiedError,
    ) -> DomainResult<AnalysisOutcome> {
        if !classified.retryable {
            self.fail_session(&request.session_id, request.tier, request.email.as_deref(), &classified)
                .await?;
            return Ok(AnalysisOutcome::Failed {
                operation_id,
                error: classified,
            });
        }

        match self.enqueue_retry(request, &classified, None).await? {
            EnqueueOutcome::Queued(item) => {
                self.track(TrackingEvent::AnalysisQueued {
                    session_id: request.session_id.clone(),
                    tier: request.tier,
                    reason: classified.code.clone(),
                });
                info!(
                    operation_id = ?operation_id,
                    next_retry_at = %item.next_retry_at,
                    priority = %item.priority,
                    "analysis queued for retry"
                );
                Ok(AnalysisOutcome::Queued {
                    operation_id,
                    reason: classified.to_string(),
                    next_retry_at: item.next_retry_at,
                })
            }
            EnqueueOutcome::Exhausted(item) => {
                warn!(retry_count = item.retry_count, "retry queue exhausted for session");
                self.fail_session(&request.session_id, request.tier, request.email.as_deref(), &classified)
                    .await?;
                Ok(AnalysisOutcome::Failed {
                    operation_id,
                    error: classified,
                })
            }
        }
    }

    async fn queue_behind_open_circuit(
        &self,
        request: &AnalysisRequest,
        retry_after: DateTime<Utc>,
    ) -> DomainResult<AnalysisOutcome> {
        info!(%retry_after, "circuit open at start, queueing without calling LLM");
        self.deps
            .sessions
            .update_session_status(&request.session_id, SessionStatus::Processing)
            .await?;

        let classified = classify_error(&AnalysisError::CircuitOpen { retry_after });
        match self
            .enqueue_retry(request, &classified, Some(retry_after))
            .await?
        {
            EnqueueOutcome::Queued(item) => {
                if let Some(email) = request.email.as_deref() {
                    if self.deps.notifier.is_email_configured() {
                        if let Err(err) = self
                            .deps
                            .notifier
                            .notify_analysis_delayed(
                                email,
                                &request.session_id,
                                request.tier,
                                "Our analysis service is temporarily busy. Your report is queued and will be generated shortly.",
                            )
                            .await
                        {
                            warn!(error = %err, "failed to send delay notification");
                        }
                    }
                }
                self.track(TrackingEvent::AnalysisQueued {
                    session_id: request.session_id.clone(),
                    tier: request.tier,
                    reason: classified.code.clone(),
                });
                Ok(AnalysisOutcome::Queued {
                    operation_id: None,
                    reason: classified.to_string(),
                    next_retry_at: item.next_retry_at,
                })
            }
            EnqueueOutcome::Exhausted(_) => {
                self.fail_session(&request.session_id, request.tier, request.email.as_deref(), &classified)
                    .await?;
                Ok(AnalysisOutcome::Failed {
                    operation_id: None,
                    error: classified,
                })
            }
        }
    }

    /// Enqueue or refresh the session's retry item.
    ///
    /// The delay grows with the attempts already made for the session and
    /// never precedes `not_before`.
    async fn enqueue_retry(
        &self,
        request: &AnalysisRequest,
        classified: &ClassifiedError,
        not_before: Option<DateTime<Utc>>,
    ) -> DomainResult<EnqueueOutcome> {
        let config = &self.settings.retry_queue;
        // An admin-started run gets a new budget even after exhaustion.
        let fresh_budget = request.triggered_by == TriggeredBy::Admin;
        let attempts = if fresh_budget {
            0
        } else {
            self.deps
                .queue
                .get_item(&request.session_id)
                .await?
                .filter(|item| item.status.is_active())
                .map_or(0, |item| item.retry_count)
        };

        let max = std::time::Duration::from_secs(config.max_delay_secs);
        let delay = backoff_delay(
            std::time::Duration::from_secs(config.base_delay_secs),
            max,
            config.jitter_factor,
            attempts,
        );
        let delay = chrono::Duration::from_std(delay)
            .or_else(|_| chrono::Duration::from_std(max))
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let mut next_retry_at = Utc::now() + delay;
        if let Some(not_before) = not_before {
            next_retry_at = next_retry_at.max(not_before);
        }

        let item = RetryQueueItem::new(
            &request.session_id,
            request.tier,
            &request.problem_statement,
            request.email.clone(),
            next_retry_at,
        )
        .with_max_retries(config.max_retries)
        .with_last_error(classified.to_string());
        let item = if fresh_budget { item.with_fresh_budget() } else { item };
        self.deps.queue.enqueue(item).await
    }

    /// Terminal failure: mark the session failed and tell the people who
    /// need to know.
    pub async fn fail_session(
        &self,
        session_id: &str,
        tier: Tier,
        email: Option<&str>,
        reason: &ClassifiedError,
    ) -> DomainResult<()> {
        self.deps
            .sessions
            .update_session_status(session_id, SessionStatus::Failed)
            .await?;
        self.deps.queue.mark_failed(session_id, &reason.to_string()).await?;

        if let Some(email) = email {
            if self.deps.notifier.is_email_configured() {
                if let Err(err) = self
                    .deps
                    .notifier
                    .notify_analysis_failed(email, session_id, tier, &reason.message)
                    .await
                {
                    warn!(error = %err, "failed to send failure notification");
                }
            }
        }

        if tier.alerts_operator_on_failure() {
            let alert = OwnerAlert::new(
                format!("{} analysis failed", tier.display_name()),
                format!(
                    "Session {session_id} ({tier}) failed permanently.\nError: {reason}\nAction: review the operation and trigger a regeneration."
                ),
            );
            if let Err(err) = self.deps.notifier.notify_owner(alert).await {
                warn!(error = %err, "failed to alert owner");
            }
        }

        self.track(TrackingEvent::AnalysisFailed {
            session_id: session_id.to_string(),
            tier,
            error_code: reason.code.clone(),
        });
        error!(session_id, code = %reason.code, "analysis failed permanently");
        Ok(())
    }

    async fn send_completion_email(&self, request: &AnalysisRequest, is_partial: bool) {
        let Some(email) = request.email.as_deref() else {
            return;
        };
        if !self.deps.notifier.is_email_configured() {
            return;
        }
        if let Err(err) = self
            .deps
            .notifier
            .send_completion_email(email, &request.session_id, request.tier, is_partial)
            .await
        {
            warn!(error = %err, "failed to send completion email");
        }
    }

    fn track(&self, event: TrackingEvent) {
        let tracker = Arc::clone(&self.deps.tracker);
        spawn_best_effort("tracking", async move { tracker.track(event).await });
    }

    fn stopped_by_admin(op: &AnalysisOperation) -> bool {
        matches!(op.state, OperationState::Paused | OperationState::Cancelled)
    }

    fn halted(op: &AnalysisOperation) -> AnalysisOutcome {
        info!(operation_id = %op.operation_id, state = %op.state, "run halted");
        match op.state {
            OperationState::Cancelled => AnalysisOutcome::Cancelled {
                operation_id: op.operation_id.clone(),
            },
            _ => AnalysisOutcome::Paused {
                operation_id: op.operation_id.clone(),
            },
        }
    }
}
