//! Implementation of the `strategist worker` command.

use anyhow::{Context, Result};
use clap::Args;
use std::time::Duration;
use tracing::info;

use crate::cli::context::AppContext;
use crate::cli::output::{output, CommandOutput};
use crate::services::{PollReport, RetryProcessorConfig, RetryQueueProcessor};

#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Run a single poll and exit
    #[arg(long)]
    pub once: bool,

    /// Override the configured poll interval in seconds
    #[arg(long)]
    pub interval: Option<u64>,
}

impl CommandOutput for PollReport {
    fn to_human(&self) -> String {
        if let Some(until) = self.circuit_open_until {
            return format!(
                "Circuit open until {}; nothing processed",
                until.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        format!(
            "{} due, {} started: {} completed, {} partial, {} requeued, {} failed, {} cancelled, {} skipped",
            self.due,
            self.started,
            self.completed,
            self.partial,
            self.requeued,
            self.failed,
            self.cancelled,
            self.skipped
        )
    }
}

pub async fn execute(args: WorkerArgs, json_mode: bool) -> Result<()> {
    let ctx = AppContext::load().await?;

    let mut config = RetryProcessorConfig::from(&ctx.config.retry_queue);
    if let Some(secs) = args.interval {
        config.poll_interval = Duration::from_secs(secs.max(1));
    }
    let processor = RetryQueueProcessor::new(ctx.orchestrator.clone(), config);

    if args.once {
        let report = processor.poll_once().await.context("Retry queue poll failed")?;
        output(&report, json_mode);
        ctx.db.close().await;
        return Ok(());
    }

    info!(
        poll_interval_secs = processor.config().poll_interval.as_secs(),
        batch_size = processor.config().batch_size,
        "retry queue worker starting"
    );
    let (handle, join) = processor.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("shutdown requested; finishing current poll");
    handle.stop();
    join.await.context("Retry queue worker panicked")?;

    let status = handle.status().await;
    info!(
        total_polls = status.total_polls,
        failed_polls = status.failed_polls,
        items_started = status.items_started,
        "retry queue worker stopped"
    );
    ctx.db.close().await;
    Ok(())
}
