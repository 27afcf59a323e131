//! Trash command handlers.
//!
//! Handles listing, restoring and purging trashed snapshots.

use super::open_trash;
use super::output::{confirm, format_age, format_size, truncate, Output};
use chrono::Utc;
use clap::Subcommand;
use kodama_core::Config;
use kodama_snapshot::{restore_many, PurgeReport, TrashItem};
use serde_json::json;

/// Trash subcommands.
#[derive(Subcommand, Debug)]
pub enum TrashCommands {
    /// List trashed snapshots
    List {
        /// Only items whose id starts with this text
        id: Option<String>,
    },
    /// Restore trashed snapshots by id or prefix
    Restore {
        /// Snapshot IDs or prefixes (at least 4 characters)
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Permanently delete everything in the trash
    Empty {
        /// Show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Permanently delete items older than the retention period
    Cleanup {
        /// Retention in days (defaults to KODAMA_TRASH_RETENTION_DAYS)
        #[arg(short, long)]
        days: Option<u32>,
        /// Show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Show trash statistics
    Stats,
}

/// Handle trash commands.
pub async fn handle_trash(config: &Config, output: &Output, command: TrashCommands) -> anyhow::Result<()> {
    let trash = open_trash(config).await?;

    match command {
        TrashCommands::List { id } => {
            let items = match id {
                Some(partial) => trash.find(&partial).await?,
                None => trash.list().await?,
            };
            if output.is_json() {
                return output.json(&items);
            }
            if items.is_empty() {
                println!("Trash is empty.");
                return Ok(());
            }
            print_items(&items);
        }
        TrashCommands::Restore { ids } => {
            let report = restore_many(&trash, &ids).await;
            if output.is_json() {
                output.json(&report)?;
            } else {
                for item in &report.succeeded {
                    println!("Restored {}", item.original_id);
                }
                for failure in &report.failed {
                    println!("Failed to restore {}: {}", failure.id, failure.message);
                }
            }
            if !report.is_clean() {
                anyhow::bail!("{} of {} restore(s) failed", report.failed.len(), ids.len());
            }
        }
        TrashCommands::Empty { dry_run, force } => {
            let candidates = trash.scan().await?;
            if !confirm_purge(output, &candidates, dry_run, force, "Trash contents:")? {
                return Ok(());
            }
            let report = trash.empty().await?;
            print_purge(output, &report)?;
        }
        TrashCommands::Cleanup {
            days,
            dry_run,
            force,
        } => {
            let days = days.filter(|d| *d > 0).unwrap_or(config.trash_retention_days);
            let candidates = trash.preview_cleanup(days).await?;
            let action = format!("Permanently delete items trashed more than {} days ago:", days);
            if !confirm_purge(output, &candidates, dry_run, force, &action)? {
                return Ok(());
            }
            let report = trash.cleanup_old(days).await?;
            print_purge(output, &report)?;
        }
        TrashCommands::Stats => {
            let stats = trash.stats().await?;
            if output.is_json() {
                return output.json(&stats);
            }
            println!("Items: {}", stats.count);
            println!("Size: {}", format_size(stats.total_size));
            if let Some(oldest) = stats.oldest {
                println!("Oldest: {}", format_age(oldest, Utc::now()));
            }
        }
    }
    Ok(())
}

fn print_items(items: &[TrashItem]) {
    let now = Utc::now();
    println!("{:<38} {:<10} {:<10} TITLE", "ID", "TRASHED", "SIZE");
    println!("{}", "-".repeat(90));
    for item in items {
        println!(
            "{:<38} {:<10} {:<10} {}",
            item.original_id,
            format_age(item.trashed_at, now),
            item.size.map(format_size).unwrap_or_else(|| "-".to_string()),
            truncate(item.title.as_deref().unwrap_or("Untitled"), 40)
        );
    }
}

/// Show what a purge would remove and ask for confirmation.
///
/// Returns whether the purge should go ahead. Dry runs never proceed.
fn confirm_purge(
    output: &Output,
    candidates: &[TrashItem],
    dry_run: bool,
    force: bool,
    action: &str,
) -> anyhow::Result<bool> {
    if candidates.is_empty() {
        if output.is_json() {
            output.json(&json!({ "purged": [], "failed": [] }))?;
        } else {
            println!("Nothing to delete.");
        }
        return Ok(false);
    }

    if dry_run {
        if output.is_json() {
            output.json(&json!({ "dryRun": true, "targets": candidates }))?;
        } else {
            println!("{} item(s) would be permanently deleted:", candidates.len());
            print_items(candidates);
        }
        return Ok(false);
    }

    if force {
        return Ok(true);
    }
    if !output.is_json() {
        println!("{}", action);
        print_items(candidates);
    }
    let confirmed = confirm(&format!(
        "Permanently delete {} item(s)? This cannot be undone.",
        candidates.len()
    ))?;
    if !confirmed {
        eprintln!("Cancelled.");
    }
    Ok(confirmed)
}

fn print_purge(output: &Output, report: &PurgeReport) -> anyhow::Result<()> {
    if output.is_json() {
        let failed: Vec<_> = report
            .failed
            .iter()
            .map(|(item, message)| json!({ "id": item.original_id, "message": message }))
            .collect();
        return output.json(&json!({ "purged": report.purged, "failed": failed }));
    }

    println!("Permanently deleted {} item(s)", report.count());
    for (item, message) in &report.failed {
        println!("  failed {}: {}", item.original_id, message);
    }
    Ok(())
}
