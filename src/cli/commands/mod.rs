pub mod analyze;
pub mod init;
pub mod ops;
pub mod queue;
pub mod worker;

use std::time::Duration;

use anyhow::Result;
use indicatif::ProgressBar;
use tokio::task::JoinHandle;

use crate::domain::errors::DomainResult;
use crate::services::{AnalysisOrchestrator, AnalysisOutcome};

/// Await a run, refreshing the spinner with the session's progress
pub(crate) async fn wait_for_run(
    orchestrator: &AnalysisOrchestrator,
    session_id: &str,
    mut run: JoinHandle<DomainResult<AnalysisOutcome>>,
    spinner: &ProgressBar,
) -> Result<AnalysisOutcome> {
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            joined = &mut run => {
                spinner.finish_and_clear();
                return Ok(joined??);
            }
            _ = ticker.tick() => {
                if let Ok(Some(op)) = orchestrator
                    .state_machine()
                    .get_operation_by_session_id(session_id)
                    .await
                {
                    spinner.set_message(format!(
                        "{} {} part {}/{} ({})",
                        op.tier.display_name(),
                        op.operation_id,
                        op.current_part.max(1),
                        op.total_parts,
                        op.state
                    ));
                }
            }
        }
    }
}
