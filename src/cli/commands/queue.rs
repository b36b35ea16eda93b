//! Implementation of the `strategist queue` command.

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::cli::context::AppContext;
use crate::cli::output::{output, CommandOutput};
use crate::cli::table::format_queue_stats;
use crate::domain::models::QueueStats;

#[derive(Args, Debug)]
pub struct QueueArgs {
    #[command(subcommand)]
    pub command: QueueCommand,
}

#[derive(Subcommand, Debug)]
pub enum QueueCommand {
    /// Counts of retry queue items by status
    Stats,
}

impl CommandOutput for QueueStats {
    fn to_human(&self) -> String {
        format!("Retry queue ({} items)\n{}", self.total(), format_queue_stats(self))
    }
}

pub async fn execute(args: QueueArgs, json_mode: bool) -> Result<()> {
    let ctx = AppContext::load().await?;
    match args.command {
        QueueCommand::Stats => {
            let stats = ctx.admin().get_queue_stats().await?;
            output(&stats, json_mode);
        }
    }
    ctx.db.close().await;
    Ok(())
}
