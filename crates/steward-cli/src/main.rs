//! Steward command-line entry point.
//!
//! Binary name: `steward`
//!
//! Parses CLI arguments, initializes tracing and application state, then
//! dispatches to the appropriate command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use steward_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let default_filter = if cli.quiet && cli.verbose == 0 {
        "error"
    } else {
        TracingOptions::filter_for_verbosity(cli.verbose)
    };
    let options = TracingOptions {
        json: cli.log_json,
        enable_otel: cli.otel,
        default_filter: default_filter.to_string(),
        ..TracingOptions::default()
    };
    init_tracing(&options).map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "steward", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init(cli.data_dir.clone()).await?;

    match cli.command {
        Commands::Retry { action } => {
            cli::retry::handle_retry_command(action, &state, cli.json).await?;
        }
        Commands::Memory { action } => {
            cli::memory::handle_memory_command(action, &state, cli.json).await?;
        }
        Commands::Config { action } => {
            cli::config::handle_config_command(action, &state, cli.json).await?;
        }
        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}
