//! Configuration CLI subcommands.

use anyhow::{Context, Result};
use clap::Subcommand;
use console::style;
use steward_infra::config::{config_path, load_config_strict};

use crate::state::AppState;

/// Configuration subcommands.
#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration (file values merged with defaults).
    Show,

    /// Print the config file path.
    Path,

    /// Validate the config file, reporting read or parse errors.
    Check,
}

/// Handle a config subcommand.
pub async fn handle_config_command(cmd: ConfigCommand, state: &AppState, json: bool) -> Result<()> {
    let path = config_path(&state.data_dir);

    match cmd {
        ConfigCommand::Show => {
            if json {
                println!("{}", serde_json::to_string_pretty(&state.config)?);
            } else {
                let rendered =
                    toml::to_string_pretty(&state.config).context("failed to render config")?;
                println!("# {}", path.display());
                println!("{rendered}");
            }
        }
        ConfigCommand::Path => {
            if json {
                let result = serde_json::json!({ "path": path });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", path.display());
            }
        }
        ConfigCommand::Check => {
            let loaded = load_config_strict(&state.data_dir).await?;
            if json {
                let result = serde_json::json!({
                    "path": path,
                    "exists": loaded.is_some(),
                    "valid": true,
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if loaded.is_some() {
                println!("  {} {} is valid", style("ok").green(), path.display());
            } else {
                println!(
                    "  {} {} not found, defaults apply",
                    style("i").blue().bold(),
                    path.display()
                );
            }
        }
    }

    Ok(())
}
