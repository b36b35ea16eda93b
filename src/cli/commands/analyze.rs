//! Implementation of the `strategist analyze` command.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Args;
use serde::Serialize;
use uuid::Uuid;

use super::wait_for_run;
use crate::cli::context::AppContext;
use crate::cli::output::{create_spinner, output, CommandOutput};
use crate::domain::models::{AnalysisSession, EnqueueOutcome, RetryQueueItem, Tier};
use crate::services::{AnalysisOutcome, AnalysisRequest};

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Existing session to analyze
    #[arg(long, conflicts_with_all = ["tier", "problem", "email"])]
    pub session: Option<String>,

    /// Tier for a new session (standard, medium, full)
    #[arg(long, requires = "problem")]
    pub tier: Option<Tier>,

    /// Problem statement for a new session
    #[arg(long, requires = "tier")]
    pub problem: Option<String>,

    /// Email notified on completion
    #[arg(long)]
    pub email: Option<String>,

    /// Run in this process until the analysis finishes instead of handing
    /// it to the worker
    #[arg(long)]
    pub wait: bool,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeOutput {
    pub session_id: String,
    pub tier: Tier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<AnalysisOutcome>,
    /// Set when the session was handed to the worker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_for: Option<chrono::DateTime<Utc>>,
}

impl CommandOutput for AnalyzeOutput {
    fn to_human(&self) -> String {
        let head = format!("Session {} ({})", self.session_id, self.tier.display_name());
        match (&self.outcome, self.queued_for) {
            (Some(outcome), _) => format!("{head}\n{}", describe_outcome(outcome)),
            (None, Some(at)) => format!(
                "{head}\nQueued for the worker at {}. Run `strategist worker` to process it.",
                at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            (None, None) => head,
        }
    }
}

pub(crate) fn describe_outcome(outcome: &AnalysisOutcome) -> String {
    match outcome {
        AnalysisOutcome::Completed { operation_id } => {
            format!("Completed (operation {operation_id})")
        }
        AnalysisOutcome::PartialSuccess {
            operation_id,
            completed_parts,
            missing_parts,
        } => format!(
            "Delivered partial report with {completed_parts} part(s); missing {missing_parts:?} (operation {operation_id})"
        ),
        AnalysisOutcome::Queued {
            reason,
            next_retry_at,
            ..
        } => format!(
            "Queued for retry at {} ({reason})",
            next_retry_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        AnalysisOutcome::Failed { error, .. } => {
            format!("Failed: {} ({})", error.message, error.code)
        }
        AnalysisOutcome::Paused { operation_id } => format!("Paused (operation {operation_id})"),
        AnalysisOutcome::Cancelled { operation_id } => {
            format!("Cancelled (operation {operation_id})")
        }
    }
}

pub async fn execute(args: AnalyzeArgs, json_mode: bool) -> Result<()> {
    let ctx = AppContext::load().await?;
    let sessions = ctx.orchestrator.sessions();

    let session = match (&args.session, args.tier, &args.problem) {
        (Some(id), _, _) => sessions
            .get_session(id)
            .await?
            .with_context(|| format!("Session {id} not found"))?,
        (None, Some(tier), Some(problem)) => {
            let session = AnalysisSession::new(
                format!("sess_{}", Uuid::new_v4().simple()),
                tier,
                problem.clone(),
                args.email.clone(),
            );
            sessions
                .create_session(&session)
                .await
                .context("Failed to create session")?;
            session
        }
        _ => bail!("Either --session or both --tier and --problem are required"),
    };

    if !args.wait {
        let item = RetryQueueItem::new(
            &session.id,
            session.tier,
            &session.problem_statement,
            session.email.clone(),
            Utc::now(),
        )
        .with_max_retries(ctx.config.retry_queue.max_retries);
        let queued_for = match ctx.orchestrator.queue().enqueue(item).await? {
            EnqueueOutcome::Queued(item) => item.next_retry_at,
            EnqueueOutcome::Exhausted(item) => bail!(
                "Session {} already used {} of {} retries",
                item.session_id,
                item.retry_count,
                item.max_retries
            ),
        };
        output(
            &AnalyzeOutput {
                session_id: session.id,
                tier: session.tier,
                outcome: None,
                queued_for: Some(queued_for),
            },
            json_mode,
        );
        return Ok(());
    }

    let spinner = create_spinner(format!("Analyzing session {}", session.id), json_mode);
    let run = ctx
        .orchestrator
        .start_analysis_in_background(AnalysisRequest::from_session(&session));
    let outcome = wait_for_run(&ctx.orchestrator, &session.id, run, &spinner).await?;

    output(
        &AnalyzeOutput {
            session_id: session.id,
            tier: session.tier,
            outcome: Some(outcome),
            queued_for: None,
        },
        json_mode,
    );
    ctx.db.close().await;
    Ok(())
}
