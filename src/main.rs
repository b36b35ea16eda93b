//! Strategist CLI entry point.

use clap::Parser;

use strategist::cli::{commands, handle_error, Cli, Commands};
use strategist::infrastructure::config::ConfigLoader;
use strategist::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Before `init` there is no config yet; defaults apply.
    let log_config = ConfigLoader::load()
        .map(|config| LogConfig::from(&config.logging))
        .unwrap_or_default();
    let _logger = match LoggerImpl::init(&log_config) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("warning: logging disabled: {err:#}");
            None
        }
    };

    let result = match cli.command {
        Commands::Init(args) => commands::init::execute(args, cli.json).await,
        Commands::Analyze(args) => commands::analyze::execute(args, cli.json).await,
        Commands::Worker(args) => commands::worker::execute(args, cli.json).await,
        Commands::Ops(args) => commands::ops::execute(args, cli.json).await,
        Commands::Queue(args) => commands::queue::execute(args, cli.json).await,
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
