//! Memory CLI subcommands.
//!
//! `context` prints exactly what an AI consumer would receive for a
//! namespace. Episodic history lives in the serving process, so a fresh CLI
//! process only shows long-term insights there.

use anyhow::Result;
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use steward_types::memory::{INSIGHT_MEMORY_TYPE, LongTermWrite};

use crate::cli::truncate;
use crate::state::AppState;

/// Memory subcommands.
#[derive(Subcommand)]
pub enum MemoryCommand {
    /// Show the summarized AI context for a namespace.
    Context {
        /// Namespace (client identifier).
        namespace: String,
    },

    /// List long-term memories of one type, newest first.
    Search {
        /// Namespace (client identifier).
        namespace: String,

        /// Memory type to list.
        #[arg(long = "type", default_value = INSIGHT_MEMORY_TYPE)]
        memory_type: String,
    },

    /// Show the newest long-term memory stored under a key.
    Get {
        /// Namespace (client identifier).
        namespace: String,

        /// Logical key.
        key: String,
    },

    /// Store a curated insight (value is JSON).
    Store {
        /// Namespace (client identifier).
        namespace: String,

        /// Logical key.
        key: String,

        /// JSON value; plain text is stored as a JSON string.
        value: String,

        /// Analysis that produced this insight.
        #[arg(long)]
        source: Option<String>,
    },

    /// Check backend availability.
    Health,
}

/// Handle a memory subcommand.
pub async fn handle_memory_command(cmd: MemoryCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        MemoryCommand::Context { namespace } => context(state, &namespace, json).await,
        MemoryCommand::Search {
            namespace,
            memory_type,
        } => search(state, &namespace, &memory_type, json).await,
        MemoryCommand::Get { namespace, key } => get(state, &namespace, &key, json).await,
        MemoryCommand::Store {
            namespace,
            key,
            value,
            source,
        } => store(state, &namespace, &key, &value, source.as_deref(), json).await,
        MemoryCommand::Health => health(state, json).await,
    }
}

async fn context(state: &AppState, namespace: &str, json: bool) -> Result<()> {
    let ctx = state.memory.context(namespace).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&ctx.to_json())?);
        return Ok(());
    }

    if ctx.is_empty() {
        println!();
        println!(
            "  {} No memory context for '{}'.",
            style("i").blue().bold(),
            style(namespace).cyan(),
        );
        println!();
        return Ok(());
    }

    println!();
    println!("  Context for '{}'", style(namespace).cyan());

    if !ctx.recent_insights().is_empty() {
        println!();
        println!("  {}", style("Recent insights").bold());
        for insight in ctx.recent_insights() {
            let summary = serde_json::to_string(&insight.summary)?;
            println!(
                "    {} {} {}",
                style(insight.created_at.format("%Y-%m-%d")).dim(),
                style(&insight.key).cyan(),
                truncate(&summary, 80),
            );
        }
    }

    if !ctx.episodic_summary().is_empty() {
        println!();
        println!("  {}", style("Recent activity").bold());
        for episode in ctx.episodic_summary() {
            println!(
                "    {} {} ({} in / {} out) {}",
                style(episode.when.format("%Y-%m-%d %H:%M")).dim(),
                style(&episode.kind).cyan(),
                episode.input_size,
                episode.output_size,
                episode.key_insights.join("; "),
            );
        }
    }
    println!();

    Ok(())
}

async fn search(state: &AppState, namespace: &str, memory_type: &str, json: bool) -> Result<()> {
    let entries = state.memory.search(namespace, memory_type).await;

    if json {
        let result = serde_json::json!({
            "namespace": namespace,
            "memory_type": memory_type,
            "entries": entries,
            "count": entries.len(),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!();
        println!(
            "  {} No '{}' memories for '{}'.",
            style("i").blue().bold(),
            memory_type,
            style(namespace).cyan(),
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Key").fg(Color::White),
        Cell::new("Value Preview").fg(Color::White),
        Cell::new("Source").fg(Color::White),
        Cell::new("Stored").fg(Color::White),
    ]);

    for entry in &entries {
        let preview = serde_json::to_string(&entry.value)?;
        table.add_row(vec![
            Cell::new(&entry.key).fg(Color::Cyan),
            Cell::new(truncate(&preview, 60)).fg(Color::DarkGrey),
            Cell::new(entry.source_analysis.as_deref().unwrap_or("-")),
            Cell::new(entry.created_at.format("%Y-%m-%d %H:%M")),
        ]);
    }

    println!();
    println!(
        "  '{}' memories for '{}' ({} entries)",
        memory_type,
        style(namespace).cyan(),
        entries.len(),
    );
    println!();
    println!("{table}");
    println!();

    Ok(())
}

async fn get(state: &AppState, namespace: &str, key: &str, json: bool) -> Result<()> {
    let entry = state.memory.retrieve_long_term(namespace, key).await;

    if json {
        let result = serde_json::json!({
            "namespace": namespace,
            "key": key,
            "entry": entry,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!();
    match entry {
        Some(entry) => {
            println!(
                "  {} = {}",
                style(key).cyan().bold(),
                serde_json::to_string_pretty(&entry.value)?,
            );
            println!("  {}", style(&entry.fingerprint).dim());
        }
        None => {
            println!(
                "  {} Key '{}' not found in '{}'",
                style("i").blue().bold(),
                style(key).cyan(),
                style(namespace).cyan(),
            );
        }
    }
    println!();

    Ok(())
}

async fn store(
    state: &AppState,
    namespace: &str,
    key: &str,
    value_str: &str,
    source: Option<&str>,
    json: bool,
) -> Result<()> {
    // Parse as JSON, fallback to string
    let value: serde_json::Value = serde_json::from_str(value_str)
        .unwrap_or_else(|_| serde_json::Value::String(value_str.to_string()));

    let outcome = state
        .memory
        .store_long_term(namespace, key, &value, source)
        .await;

    if json {
        let result = serde_json::json!({
            "namespace": namespace,
            "key": key,
            "outcome": outcome,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let (mark, message) = match outcome {
        LongTermWrite::Stored => (style("ok").green(), "stored"),
        LongTermWrite::Duplicate => (style("=").blue(), "already stored (duplicate)"),
        LongTermWrite::Rejected => (style("!").red(), "rejected: contains a raw payload field"),
        LongTermWrite::Skipped => (style("!").yellow(), "skipped: long-term memory unavailable"),
    };
    println!();
    println!("  {} '{}' {}", mark, style(key).cyan(), message);
    println!();

    Ok(())
}

async fn health(state: &AppState, json: bool) -> Result<()> {
    let health = state.memory.health().await;

    if json {
        let result = serde_json::json!({
            "short_term": health.short_term,
            "short_term_backend": state.short_term_kind,
            "long_term": health.long_term,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let check_mark = |ok: bool| {
        if ok {
            format!("{}", style("✓").green())
        } else {
            format!("{}", style("✗").red())
        }
    };

    println!();
    println!(
        "  {} Short-term ({})",
        check_mark(health.short_term),
        state.short_term_kind.unwrap_or("unavailable"),
    );
    println!("  {} Long-term (sqlite)", check_mark(health.long_term));
    println!();

    Ok(())
}
