//! `kodama delete`: move snapshots to the trash.

use super::output::{confirm, truncate, Output};
use super::{open_store, open_trash};
use clap::Args;
use kodama_core::Config;
use kodama_snapshot::validate::parse_period;
use kodama_snapshot::{trash_many, SnapshotFile, SnapshotStore};
use serde_json::json;
use std::collections::HashSet;

/// Arguments of `kodama delete`.
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Snapshot IDs or prefixes (at least 4 characters)
    #[arg(conflicts_with_all = ["older_than", "pattern"])]
    pub ids: Vec<String>,

    /// Delete snapshots older than a period, e.g. "30 days" or "2 weeks"
    #[arg(long, conflicts_with = "pattern")]
    pub older_than: Option<String>,

    /// Delete snapshots whose id matches a shell pattern, e.g. "0b6f*"
    #[arg(long = "match")]
    pub pattern: Option<String>,

    /// Show what would be deleted without deleting
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub force: bool,
}

/// Handle `kodama delete`.
pub async fn handle_delete(config: &Config, output: &Output, args: DeleteArgs) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let targets = find_targets(&store, &args).await?;

    if targets.is_empty() {
        if output.is_json() {
            output.json(&json!({ "message": "No snapshots found matching criteria" }))?;
        } else {
            println!("No snapshots found matching the given criteria.");
        }
        return Ok(());
    }

    if output.is_json() && args.dry_run {
        let preview: Vec<_> = targets
            .iter()
            .map(|t| json!({ "id": t.id, "title": t.title }))
            .collect();
        return output.json(&json!({ "operation": "delete-preview", "dryRun": true, "targets": preview }));
    }

    if !output.is_json() {
        println!("Found {} snapshot(s) to delete:", targets.len());
        for (index, target) in targets.iter().enumerate() {
            let title = target.title.as_deref().unwrap_or("Untitled");
            println!("{}. {} - {}", index + 1, target.id, truncate(title, 50));
        }
        println!();
    }

    if args.dry_run {
        if !output.is_json() {
            println!("Dry run complete. Run without --dry-run to move these snapshots to the trash.");
        }
        return Ok(());
    }

    if !args.force
        && !confirm(&format!(
            "Move these {} snapshot(s) to the trash?",
            targets.len()
        ))?
    {
        eprintln!("Deletion cancelled.");
        return Ok(());
    }

    let trash = open_trash(config).await?;
    let report = trash_many(&trash, &targets).await;

    if output.is_json() {
        output.json(&report)?;
    } else {
        println!("Moved {} snapshot(s) to the trash", report.succeeded.len());
        if !report.is_clean() {
            println!("Failed to delete {} snapshot(s):", report.failed.len());
            for failure in &report.failed {
                println!("  {}: {}", failure.id, failure.message);
            }
        }
        println!();
        println!("Restore with: kodama trash restore <id>");
        println!(
            "Trashed snapshots are purged by 'kodama trash cleanup' after {} days",
            config.trash_retention_days
        );
    }

    if report.succeeded.is_empty() && !report.is_clean() {
        anyhow::bail!("No snapshots were deleted");
    }
    Ok(())
}

/// Resolve the selection into distinct snapshot files.
///
/// Ids may name archived snapshots. An id that matches nothing, or matches
/// several snapshots, fails the whole command before anything is moved.
async fn find_targets(store: &SnapshotStore, args: &DeleteArgs) -> anyhow::Result<Vec<SnapshotFile>> {
    let found = if let Some(period) = &args.older_than {
        store.find_older_than(parse_period(period)?).await?
    } else if let Some(pattern) = &args.pattern {
        store.find_matching(pattern).await?
    } else if !args.ids.is_empty() {
        let mut files = Vec::with_capacity(args.ids.len());
        for id in &args.ids {
            files.push(store.resolve(id).await?);
        }
        files
    } else {
        anyhow::bail!(
            "No snapshots specified. Use 'kodama delete <id>...', --older-than <period> or --match <pattern>"
        );
    };

    let mut seen = HashSet::new();
    Ok(found.into_iter().filter(|file| seen.insert(file.id)).collect())
}
