//! `kodama status` and `kodama protect`.

use super::open_store;
use super::output::Output;
use kodama_core::transcript::format_tokens;
use kodama_core::{
    Config, FixedBudget, Guardian, HealthLevel, ProtectOutcome, TailTranscriptAnalyzer,
    TranscriptAnalyzer,
};
use kodama_snapshot::SnapshotStore;
use serde_json::json;

fn guardian<'a>(config: &Config, store: &'a SnapshotStore, remaining: Option<u8>) -> Guardian<'a> {
    let analyzer: Box<dyn TranscriptAnalyzer> = match remaining {
        Some(percent) => Box::new(FixedBudget::new(percent)),
        None => Box::new(TailTranscriptAnalyzer::from_config(config)),
    };
    let guardian = Guardian::new(store, analyzer);
    match std::env::current_dir() {
        Ok(cwd) => guardian.with_cwd(cwd.display().to_string()),
        Err(_) => guardian,
    }
}

fn level_marker(level: HealthLevel) -> &'static str {
    match level {
        HealthLevel::Healthy => "[ok]",
        HealthLevel::Warning => "[!]",
        HealthLevel::Danger => "[!!]",
    }
}

/// Handle `kodama status`.
pub async fn handle_status(config: &Config, output: &Output, remaining: Option<u8>) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let health = guardian(config, &store, remaining).check_health().await;

    if output.is_json() {
        return output.json(&health);
    }

    println!("{} Session {}", level_marker(health.level), health.level.as_str());
    match &health.transcript {
        Some(info) => println!(
            "Context: {}% remaining ({} of {} tokens)",
            info.remaining_percent,
            format_tokens(info.remaining_tokens),
            format_tokens(info.context_window)
        ),
        None => println!("Context: unknown (no transcript found)"),
    }
    match &health.last_snapshot {
        Some(last) => println!(
            "Last snapshot: {} - {} ({:.1}h ago)",
            last.id.short(),
            last.title,
            last.age_hours
        ),
        None => println!("Last snapshot: none"),
    }
    println!();
    println!("{}", health.suggestion);
    Ok(())
}

/// Handle `kodama protect`.
pub async fn handle_protect(config: &Config, output: &Output, remaining: Option<u8>) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let outcome = guardian(config, &store, remaining).protect().await;

    match outcome {
        ProtectOutcome::Snapshotted(snapshot) => {
            if output.is_json() {
                output.json(&json!({ "action": "snapshot", "id": snapshot.id, "title": snapshot.title }))?;
            } else {
                println!("Automatic snapshot saved: {} - {}", snapshot.id.short(), snapshot.title);
            }
        }
        ProtectOutcome::Warned(message) => {
            if output.is_json() {
                output.json(&json!({ "action": "warn", "message": message }))?;
            } else {
                println!("{}", message);
            }
        }
        ProtectOutcome::NoAction => {
            if output.is_json() {
                output.json(&json!({ "action": null }))?;
            } else {
                println!("No action needed.");
            }
        }
        ProtectOutcome::Failed(message) => {
            anyhow::bail!("Automatic snapshot failed: {}", message);
        }
    }
    Ok(())
}
