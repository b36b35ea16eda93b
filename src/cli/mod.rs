//! Command-line interface for `strategist`.

pub mod commands;
pub mod context;
pub mod output;
pub mod table;

use clap::{Parser, Subcommand};
use console::style;

use commands::{
    analyze::AnalyzeArgs, init::InitArgs, ops::OpsArgs, queue::QueueArgs, worker::WorkerArgs,
};

#[derive(Parser, Debug)]
#[command(name = "strategist", version, about = "Multi-part LLM analysis orchestration")]
pub struct Cli {
    /// Emit machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create .strategist/, write the default config and run migrations
    Init(InitArgs),
    /// Run an analysis for a session
    Analyze(AnalyzeArgs),
    /// Process the retry queue until interrupted
    Worker(WorkerArgs),
    /// Inspect and control analysis operations
    Ops(OpsArgs),
    /// Retry queue and circuit breaker status
    Queue(QueueArgs),
}

/// Print an error the way the selected output mode expects and exit
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let chain: Vec<String> = err.chain().map(ToString::to_string).collect();
        let body = serde_json::json!({ "error": err.to_string(), "causes": chain });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("{} {err}", style("error:").red().bold());
        for cause in err.chain().skip(1) {
            eprintln!("  {} {cause}", style("caused by:").dim());
        }
    }
    std::process::exit(1);
}
