//! Retry queue CLI subcommands.
//!
//! Reads the configured retry store without starting the processor, so
//! inspecting never executes a handler.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use crate::cli::truncate;
use crate::state::AppState;

/// Retry queue subcommands.
#[derive(Subcommand)]
pub enum RetryCommand {
    /// Queue statistics.
    Stats,

    /// Active operations, soonest due first.
    Pending,

    /// Permanently failed operations.
    #[command(name = "dead-letters")]
    DeadLetters {
        /// Show only the most recent N records.
        #[arg(long)]
        limit: Option<usize>,
    },
}

/// Handle a retry subcommand.
pub async fn handle_retry_command(cmd: RetryCommand, state: &AppState, json: bool) -> Result<()> {
    state
        .retry_queue
        .load_persisted()
        .await
        .context("failed to load retry operations")?;

    match cmd {
        RetryCommand::Stats => stats(state, json),
        RetryCommand::Pending => pending(state, json),
        RetryCommand::DeadLetters { limit } => dead_letters(state, limit, json).await,
    }
}

fn stats(state: &AppState, json: bool) -> Result<()> {
    let stats = state.retry_queue.stats();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!();
    println!("  {}", style("Retry queue").bold());
    println!();
    println!("  Pending:     {}", style(stats.pending_count).cyan());
    println!(
        "  Processing:  {}",
        if stats.is_processing {
            style("yes").green()
        } else {
            style("no").dim()
        }
    );
    println!("  Storage:     {}", style(&stats.storage_location).dim());
    println!(
        "  Backoff:     {}s x {}^n, {} attempts",
        state.config.retry.base_delay_secs,
        state.config.retry.multiplier,
        state.config.retry.default_max_attempts,
    );
    println!();

    Ok(())
}

fn pending(state: &AppState, json: bool) -> Result<()> {
    let operations = state.retry_queue.pending();

    if json {
        let result = serde_json::json!({
            "operations": operations,
            "count": operations.len(),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if operations.is_empty() {
        println!();
        println!("  {} No pending retry operations.", style("i").blue().bold());
        println!();
        return Ok(());
    }

    let now = Utc::now();
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Operation").fg(Color::White),
        Cell::new("Attempt").fg(Color::White),
        Cell::new("Next Retry").fg(Color::White),
        Cell::new("Last Error").fg(Color::White),
    ]);

    for op in &operations {
        let next = if op.is_due(now) {
            Cell::new("due").fg(Color::Yellow)
        } else {
            Cell::new(op.next_retry_at.format("%Y-%m-%d %H:%M:%S")).fg(Color::DarkGrey)
        };
        table.add_row(vec![
            Cell::new(op.id.to_string()).fg(Color::DarkGrey),
            Cell::new(&op.operation).fg(Color::Cyan),
            Cell::new(format!("{}/{}", op.attempt, op.max_attempts)),
            next,
            Cell::new(truncate(&op.last_error, 60)).fg(Color::Red),
        ]);
    }

    println!();
    println!("  Pending operations ({})", operations.len());
    println!();
    println!("{table}");
    println!();

    Ok(())
}

async fn dead_letters(state: &AppState, limit: Option<usize>, json: bool) -> Result<()> {
    let mut letters = state
        .retry_queue
        .dead_letters()
        .await
        .context("failed to read dead letters")?;

    if let Some(limit) = limit {
        let skip = letters.len().saturating_sub(limit);
        letters.drain(..skip);
    }

    if json {
        let records: Vec<serde_json::Value> = letters
            .iter()
            .map(|letter| {
                let mut value = serde_json::to_value(letter).unwrap_or_default();
                if let Some(obj) = value.as_object_mut() {
                    obj.insert("record_id".to_string(), letter.record_id().into());
                }
                value
            })
            .collect();
        let result = serde_json::json!({
            "dead_letters": records,
            "count": letters.len(),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if letters.is_empty() {
        println!();
        println!("  {} No dead letters.", style("ok").green());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Record").fg(Color::White),
        Cell::new("Operation").fg(Color::White),
        Cell::new("Attempts").fg(Color::White),
        Cell::new("Failed At").fg(Color::White),
        Cell::new("Final Error").fg(Color::White),
    ]);

    for letter in &letters {
        table.add_row(vec![
            Cell::new(letter.record_id()).fg(Color::DarkGrey),
            Cell::new(&letter.operation.operation).fg(Color::Cyan),
            Cell::new(letter.operation.attempt),
            Cell::new(letter.failed_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(truncate(&letter.final_error, 60)).fg(Color::Red),
        ]);
    }

    println!();
    println!("  Dead letters ({})", letters.len());
    println!();
    println!("{table}");
    println!();

    Ok(())
}
