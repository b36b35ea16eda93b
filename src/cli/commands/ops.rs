//! Implementation of the `strategist ops` command.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use super::analyze::describe_outcome;
use super::wait_for_run;
use crate::cli::context::AppContext;
use crate::cli::output::{create_spinner, output, CommandOutput};
use crate::cli::table::{format_events_table, format_operations_table};
use crate::domain::models::{
    AnalysisOperation, OperationFilter, OperationState, ReplayedOperation, Tier,
};
use crate::services::{AnalysisOutcome, OperationDetails, RestartedRun};

#[derive(Args, Debug)]
pub struct OpsArgs {
    #[command(subcommand)]
    pub command: OpsCommand,
}

#[derive(Args, Debug)]
pub struct AdminActionArgs {
    /// Operation id
    pub operation_id: String,

    /// Admin identifier recorded on the event
    #[arg(long)]
    pub actor: String,

    /// Note appended to the operation
    #[arg(long)]
    pub notes: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum OpsCommand {
    /// List operations, newest first
    List {
        #[arg(long)]
        state: Option<OperationState>,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        tier: Option<Tier>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Show an operation with its event log
    Show {
        operation_id: String,
    },
    /// List failed operations that may still be retried
    Retryable,
    /// Replay the event log and compare it with the stored row
    Verify {
        operation_id: String,
    },
    /// Pause at the next part boundary
    Pause(AdminActionArgs),
    /// Resume a paused operation and continue generating
    Resume(AdminActionArgs),
    /// Cancel an operation and any queued retry
    Cancel(AdminActionArgs),
    /// Start a new operation for a failed or cancelled one
    Regenerate(AdminActionArgs),
    /// Append an admin note
    Note {
        operation_id: String,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        note: String,
    },
}

#[derive(Debug, Serialize)]
pub struct OperationList {
    pub operations: Vec<AnalysisOperation>,
}

impl CommandOutput for OperationList {
    fn to_human(&self) -> String {
        if self.operations.is_empty() {
            return "No operations found.".to_string();
        }
        format!(
            "{}\n\nShowing {} operation(s)",
            format_operations_table(&self.operations),
            self.operations.len()
        )
    }
}

impl CommandOutput for OperationDetails {
    fn to_human(&self) -> String {
        let op = &self.operation;
        let mut lines = vec![
            format!("Operation:   {}", op.operation_id),
            format!("Session:     {}", op.session_id),
            format!("Tier:        {} ({})", op.tier, op.tier.display_name()),
            format!("State:       {}", op.state),
            format!(
                "Progress:    {}/{} parts ({:.0}%)",
                op.completed_parts,
                op.total_parts,
                op.progress_percentage()
            ),
            format!("Triggered:   {}", op.triggered_by),
            format!("Retries:     {}", op.retry_count),
            format!("Started:     {}", op.started_at.format("%Y-%m-%d %H:%M:%S UTC")),
        ];
        if let Some(eta) = op.estimated_completion_at {
            lines.push(format!("ETA:         {}", eta.format("%Y-%m-%d %H:%M:%S UTC")));
        }
        if let Some(done) = op.completed_at {
            lines.push(format!("Finished:    {}", done.format("%Y-%m-%d %H:%M:%S UTC")));
        }
        if let Some(error) = &op.last_error {
            let part = op.failed_part.map(|p| format!(" (part {p})")).unwrap_or_default();
            lines.push(format!("Last error:  {error}{part}"));
        }
        if let Some(result) = &self.result {
            let stored = result.completed_parts().len();
            lines.push(format!(
                "Stored:      {stored} part(s){}",
                if result.is_partial { ", partial report" } else { "" }
            ));
        }
        if let Some(notes) = &op.admin_notes {
            lines.push(format!("\nAdmin notes:\n{notes}"));
        }
        lines.push(format!("\nEvents:\n{}", format_events_table(&self.events)));
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct AdminActionOutput {
    pub action: &'static str,
    pub operation: AnalysisOperation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<AnalysisOutcome>,
}

impl CommandOutput for AdminActionOutput {
    fn to_human(&self) -> String {
        let mut line = format!(
            "{}: operation {} is now {}",
            self.action, self.operation.operation_id, self.operation.state
        );
        if let Some(outcome) = &self.outcome {
            line.push('\n');
            line.push_str(&describe_outcome(outcome));
        }
        line
    }
}

#[derive(Debug, Serialize)]
pub struct VerifyOutput {
    pub operation_id: String,
    pub stored_state: OperationState,
    pub stored_completed_parts: u8,
    pub replayed_state: OperationState,
    pub replayed_completed_parts: u8,
    pub consistent: bool,
}

impl CommandOutput for VerifyOutput {
    fn to_human(&self) -> String {
        format!(
            "{} event log for {}: stored {} ({} parts), replayed {} ({} parts)",
            if self.consistent { "Consistent" } else { "INCONSISTENT" },
            self.operation_id,
            self.stored_state,
            self.stored_completed_parts,
            self.replayed_state,
            self.replayed_completed_parts
        )
    }
}

impl VerifyOutput {
    fn new(operation: &AnalysisOperation, replayed: &ReplayedOperation) -> Self {
        Self {
            operation_id: operation.operation_id.clone(),
            stored_state: operation.state,
            stored_completed_parts: operation.completed_parts,
            replayed_state: replayed.state,
            replayed_completed_parts: replayed.completed_parts,
            consistent: operation.state == replayed.state
                && operation.completed_parts == replayed.completed_parts,
        }
    }
}

async fn finish_restart(
    ctx: &AppContext,
    action: &'static str,
    restarted: RestartedRun,
    json_mode: bool,
) -> Result<()> {
    let RestartedRun { operation, run } = restarted;
    let spinner = create_spinner(
        format!("Continuing session {}", operation.session_id),
        json_mode,
    );
    let outcome = wait_for_run(&ctx.orchestrator, &operation.session_id, run, &spinner).await?;
    output(
        &AdminActionOutput {
            action,
            operation,
            outcome: Some(outcome),
        },
        json_mode,
    );
    Ok(())
}

pub async fn execute(args: OpsArgs, json_mode: bool) -> Result<()> {
    let ctx = AppContext::load().await?;
    let admin = ctx.admin();

    match args.command {
        OpsCommand::List {
            state,
            session,
            tier,
            limit,
        } => {
            let filter = OperationFilter {
                state,
                session_id: session,
                tier,
                limit: Some(limit),
                offset: None,
            };
            let operations = admin.list_operations(&filter).await?;
            output(&OperationList { operations }, json_mode);
        }
        OpsCommand::Show { operation_id } => {
            let details = admin
                .get_operation_details(&operation_id)
                .await
                .with_context(|| format!("Failed to load operation {operation_id}"))?;
            output(&details, json_mode);
        }
        OpsCommand::Retryable => {
            let operations = admin.get_retryable_operations().await?;
            output(&OperationList { operations }, json_mode);
        }
        OpsCommand::Verify { operation_id } => {
            let details = admin.get_operation_details(&operation_id).await?;
            let replayed = admin.verify_event_log(&operation_id).await?;
            output(&VerifyOutput::new(&details.operation, &replayed), json_mode);
        }
        OpsCommand::Pause(action) => {
            let operation = admin
                .pause_operation(&action.operation_id, &action.actor, action.notes.as_deref())
                .await?;
            output(
                &AdminActionOutput {
                    action: "paused",
                    operation,
                    outcome: None,
                },
                json_mode,
            );
        }
        OpsCommand::Cancel(action) => {
            let operation = admin
                .cancel_operation(&action.operation_id, &action.actor, action.notes.as_deref())
                .await?;
            output(
                &AdminActionOutput {
                    action: "cancelled",
                    operation,
                    outcome: None,
                },
                json_mode,
            );
        }
        OpsCommand::Resume(action) => {
            let restarted = admin
                .resume_operation(&action.operation_id, &action.actor, action.notes.as_deref())
                .await?;
            finish_restart(&ctx, "resumed", restarted, json_mode).await?;
        }
        OpsCommand::Regenerate(action) => {
            let restarted = admin
                .trigger_regeneration(&action.operation_id, &action.actor, action.notes.as_deref())
                .await?;
            finish_restart(&ctx, "regenerated", restarted, json_mode).await?;
        }
        OpsCommand::Note {
            operation_id,
            actor,
            note,
        } => {
            let operation = admin.add_admin_note(&operation_id, &actor, &note).await?;
            output(
                &AdminActionOutput {
                    action: "noted",
                    operation,
                    outcome: None,
                },
                json_mode,
            );
        }
    }

    ctx.db.close().await;
    Ok(())
}
