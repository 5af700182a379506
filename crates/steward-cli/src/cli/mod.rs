//! CLI command definitions for the `steward` binary.
//!
//! Uses clap derive macros for argument parsing. Commands are grouped by
//! component (e.g., `steward retry pending`, `steward memory context acme`).

pub mod config;
pub mod memory;
pub mod retry;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Inspect the Steward retry queue, memory tiers and configuration.
#[derive(Parser)]
#[command(name = "steward", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    /// Data directory (defaults to $STEWARD_DATA_DIR or ~/.steward).
    #[arg(long, global = true, env = "STEWARD_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect the durable retry queue (stats, pending, dead letters).
    Retry {
        #[command(subcommand)]
        action: retry::RetryCommand,
    },

    /// Inspect tiered memory (context, search, get, health).
    Memory {
        #[command(subcommand)]
        action: memory::MemoryCommand,
    },

    /// Show configuration.
    Config {
        #[command(subcommand)]
        action: config::ConfigCommand,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Shorten a string to at most `max` characters, appending `...` when cut.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}
