//! Session pointer, event log and configuration handlers.

use super::open_store;
use super::output::{format_age, Output};
use chrono::Utc;
use clap::Subcommand;
use kodama_core::Config;

/// Session subcommands.
#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// Print the active session id
    Get,
    /// Record the active session id
    Set {
        /// Session ID reported by the assistant
        id: String,
    },
}

/// Handle session commands.
pub async fn handle_session(config: &Config, output: &Output, command: SessionCommands) -> anyhow::Result<()> {
    let store = open_store(config).await?;

    match command {
        SessionCommands::Get => {
            let session_id = store.load_session_id().await;
            if output.is_json() {
                return output.json(&serde_json::json!({ "sessionId": session_id }));
            }
            match session_id {
                Some(id) => println!("{}", id),
                None => println!("No active session."),
            }
        }
        SessionCommands::Set { id } => {
            store.save_session_id(&id).await?;
            if !output.is_json() {
                println!("Session set: {}", id.trim());
            }
        }
    }
    Ok(())
}

/// Handle `kodama events`.
pub async fn handle_events(config: &Config, output: &Output, limit: Option<usize>) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let mut events = store.read_events().await?;
    if let Some(limit) = limit {
        let skip = events.len().saturating_sub(limit);
        events.drain(..skip);
    }

    if output.is_json() {
        return output.json(&events);
    }
    if events.is_empty() {
        println!("No events recorded.");
        return Ok(());
    }

    let now = Utc::now();
    for event in &events {
        let event_type = serde_json::to_value(event.event_type)?;
        println!(
            "{:<10} {:<18} {}",
            format_age(event.timestamp, now),
            event_type.as_str().unwrap_or("-"),
            event.snapshot_id.map(|id| id.short()).unwrap_or_default()
        );
    }
    Ok(())
}

/// Handle `kodama config`.
pub fn show_config(config: &Config, output: &Output) -> anyhow::Result<()> {
    let summary = config.summary();
    if output.is_json() {
        return output.json(&summary);
    }

    println!("Data: {}", summary.paths.data.display());
    println!("Snapshots: {}", summary.paths.snapshots.display());
    println!("Trash: {}", summary.paths.trash.display());
    println!("Debug: {}", summary.debug);
    match summary.max_decisions {
        Some(max) => println!("Max decisions: {}", max),
        None => println!("Max decisions: unlimited"),
    }
    println!(
        "Auto-archive: {} (after {} days)",
        if summary.auto_archive { "on" } else { "off" },
        summary.archive_days
    );
    println!("Trash retention: {} days", summary.trash_retention_days);
    println!("Transcript locations:");
    for candidate in &summary.transcript_candidates {
        println!("  {}", candidate.display());
    }
    Ok(())
}
