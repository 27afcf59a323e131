//! Snapshot command handlers.
//!
//! Handles saving, listing, showing and archiving snapshots.

use super::output::{format_age, truncate, Output};
use super::open_store;
use anyhow::Context as _;
use chrono::Utc;
use clap::Args;
use kodama_core::Config;
use kodama_snapshot::tags::{parse_tags, tag_counts};
use kodama_snapshot::{EventLogEntry, EventType, Snapshot, SnapshotId, SnapshotStore, Step};
use serde_json::json;
use std::io::Read;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, warn};

/// Longest context printed in a context pack.
const PACK_CONTEXT_CHARS: usize = 3000;

/// Arguments of `kodama snap`.
#[derive(Args, Debug)]
pub struct SnapArgs {
    /// Snapshot title
    #[arg(short, long)]
    pub title: String,

    /// Workflow step (requirements, designing, implementing, testing)
    #[arg(short, long, conflicts_with = "advance")]
    pub step: Option<Step>,

    /// Use the step after the latest snapshot's step
    #[arg(long)]
    pub advance: bool,

    /// Free-text context; `-` reads it from stdin
    #[arg(short, long)]
    pub context: Option<String>,

    /// A decision made (repeatable)
    #[arg(short, long = "decision")]
    pub decisions: Vec<String>,

    /// A next step (repeatable)
    #[arg(short, long = "next")]
    pub next_steps: Vec<String>,

    /// Tags, comma or space separated
    #[arg(long)]
    pub tags: Option<String>,
}

/// Handle `kodama snap`.
pub async fn handle_snap(config: &Config, output: &Output, args: SnapArgs) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let cwd = std::env::current_dir()?;

    let context = match args.context.as_deref() {
        Some("-") => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read context from stdin")?;
            text.trim_end().to_string()
        }
        Some(text) => text.to_string(),
        None => String::new(),
    };

    let step = match (args.step, args.advance) {
        (Some(step), _) => Some(step),
        (None, true) => Some(
            store
                .latest()
                .await?
                .and_then(|latest| latest.step)
                .map_or(Step::Requirements, |step| step.next()),
        ),
        (None, false) => None,
    };

    let (branch, commit) = git_info(&cwd).await;
    let mut snapshot = Snapshot::new(args.title)
        .with_context(context)
        .with_decisions(args.decisions)
        .with_next_steps(args.next_steps)
        .with_tags(args.tags.as_deref().map(parse_tags).unwrap_or_default())
        .with_cwd(cwd.display().to_string())
        .with_git(branch, commit);
    if let Some(step) = step {
        snapshot = snapshot.with_step(step);
    }
    if let Some(session_id) = store.load_session_id().await {
        snapshot = snapshot.with_session_id(session_id);
    }

    let path = match store.save(&snapshot).await {
        Ok(path) => path,
        Err(e) => {
            let entry = EventLogEntry::new(EventType::Error).with_field("message", e.to_string());
            if let Err(log_err) = store.append_event(&entry).await {
                debug!(error = %log_err, "Could not record failed save");
            }
            return Err(e.into());
        }
    };

    let archived = if config.auto_archive {
        match store.archive_old(config.archive_days).await {
            Ok(report) => report.moved(),
            Err(e) => {
                warn!(error = %e, "Auto-archive failed");
                0
            }
        }
    } else {
        0
    };

    if output.is_json() {
        output.json(&json!({
            "id": snapshot.id,
            "path": path,
            "archived": archived,
        }))?;
    } else {
        println!("Saved snapshot {} - {}", snapshot.id.short(), snapshot.title);
        if archived > 0 {
            println!(
                "Archived {} snapshot(s) older than {} days",
                archived, config.archive_days
            );
        }
    }
    Ok(())
}

/// Current branch and short commit, when `cwd` is inside a git work tree.
async fn git_info(cwd: &Path) -> (Option<String>, Option<String>) {
    let branch = git_output(cwd, &["branch", "--show-current"]).await;
    let commit = git_output(cwd, &["rev-parse", "--short", "HEAD"]).await;
    (branch, commit)
}

async fn git_output(cwd: &Path, args: &[&str]) -> Option<String> {
    let output = match Command::new("git").args(args).current_dir(cwd).output().await {
        Ok(output) => output,
        Err(e) => {
            debug!(error = %e, "git is not available");
            return None;
        }
    };
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Handle `kodama list`.
pub async fn handle_list(
    config: &Config,
    output: &Output,
    archived: bool,
    tags: Option<String>,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let mut snapshots = match tags.as_deref().map(parse_tags) {
        Some(tags) if !tags.is_empty() => store.list_by_tags(&tags, archived).await?,
        _ => store.list(archived).await?,
    };
    if let Some(limit) = limit {
        snapshots.truncate(limit);
    }

    if output.is_json() {
        return output.json(&snapshots);
    }

    if snapshots.is_empty() {
        println!("No snapshots found.");
        return Ok(());
    }

    let now = Utc::now();
    println!("{:<10} {:<10} {:<13} {:<40} TAGS", "ID", "AGE", "STEP", "TITLE");
    println!("{}", "-".repeat(90));
    for snapshot in &snapshots {
        println!(
            "{:<10} {:<10} {:<13} {:<40} {}",
            snapshot.id.short(),
            format_age(snapshot.timestamp, now),
            snapshot.step.map(|s| s.as_str()).unwrap_or("-"),
            truncate(&snapshot.title, 40),
            snapshot.tags.join(", ")
        );
    }
    Ok(())
}

/// Look up a snapshot by full id or unique prefix; the latest when `id` is `None`.
async fn find_snapshot(store: &SnapshotStore, id: Option<&str>) -> anyhow::Result<Snapshot> {
    let Some(id) = id else {
        return store.latest().await?.context("No snapshots yet. Run 'kodama snap' first");
    };

    let full_id = match SnapshotId::parse(id) {
        Some(full) => full.to_string(),
        None => store.resolve(id).await?.id.to_string(),
    };
    store
        .load(&full_id)
        .await?
        .with_context(|| format!("Snapshot not found: {}", id))
}

/// Handle `kodama show`.
pub async fn handle_show(
    config: &Config,
    output: &Output,
    id: Option<String>,
    pack: bool,
) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let snapshot = find_snapshot(&store, id.as_deref()).await?;

    if pack {
        let mut packed = snapshot.clone();
        packed.cap_decisions(config.max_decisions);
        println!("{}", context_pack(&packed));

        let entry = EventLogEntry::new(EventType::ContextInjected).with_snapshot(snapshot.id);
        if let Err(e) = store.append_event(&entry).await {
            warn!(error = %e, "Could not record context injection");
        }
        return Ok(());
    }

    if output.is_json() {
        return output.json(&snapshot);
    }

    println!("Snapshot: {}", snapshot.id);
    println!("Title: {}", snapshot.title);
    println!("Created: {}", snapshot.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(step) = snapshot.step {
        println!("Step: {}", step);
    }
    if let Some(branch) = &snapshot.git_branch {
        let commit = snapshot.git_commit.as_deref().unwrap_or("-");
        println!("Git: {} ({})", branch, commit);
    }
    if let Some(cwd) = &snapshot.cwd {
        println!("Directory: {}", cwd);
    }
    if !snapshot.tags.is_empty() {
        println!("Tags: {}", snapshot.tags.join(", "));
    }
    if !snapshot.context.is_empty() {
        println!();
        println!("{}", snapshot.context);
    }
    print_list("Decisions", &snapshot.decisions);
    print_list("Next steps", &snapshot.next_steps);
    Ok(())
}

fn print_list(heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    println!();
    println!("{}:", heading);
    for item in items {
        println!("  - {}", item);
    }
}

/// Render a snapshot as a Markdown context pack for a new session.
pub fn context_pack(snapshot: &Snapshot) -> String {
    let bullets = |items: &[String]| {
        if items.is_empty() {
            "- (none)".to_string()
        } else {
            items
                .iter()
                .map(|item| format!("- {}", item))
                .collect::<Vec<_>>()
                .join("\n")
        }
    };

    let mut pack = String::from("# Previous Session Context\n\n");
    pack.push_str(&format!("**Project**: {}\n", snapshot.title));
    pack.push_str(&format!(
        "**Status**: {}\n",
        snapshot.step.map(|s| s.as_str()).unwrap_or("in progress")
    ));
    pack.push_str(&format!(
        "**Saved**: {}\n",
        snapshot.timestamp.format("%Y-%m-%d %H:%M UTC")
    ));
    if let Some(branch) = &snapshot.git_branch {
        match &snapshot.git_commit {
            Some(commit) => pack.push_str(&format!("**Git**: {} @ {}\n", branch, commit)),
            None => pack.push_str(&format!("**Git**: {}\n", branch)),
        }
    }

    let context = if snapshot.context.trim().is_empty() {
        "(no notes)".to_string()
    } else {
        truncate(snapshot.context.trim(), PACK_CONTEXT_CHARS)
    };
    pack.push_str(&format!("\n## Current Context\n{}\n", context));
    pack.push_str(&format!("\n## Key Decisions\n{}\n", bullets(&snapshot.decisions)));
    pack.push_str(&format!("\n## Next Steps\n{}\n", bullets(&snapshot.next_steps)));
    pack.push_str("\n---\n*Note: Never execute destructive commands without explicit confirmation.*");
    pack
}

/// Handle `kodama tags`.
pub async fn handle_tags(config: &Config, output: &Output, archived: bool) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let snapshots = store.list(archived).await?;
    let counts = tag_counts(snapshots.iter().map(|s| s.tags.as_slice()));

    if output.is_json() {
        let map: serde_json::Map<String, serde_json::Value> = counts
            .into_iter()
            .map(|(tag, count)| (tag, json!(count)))
            .collect();
        return output.json(&map);
    }

    if counts.is_empty() {
        println!("No tags in use.");
    }
    for (tag, count) in counts {
        println!("{:<30} {}", tag, count);
    }
    Ok(())
}

/// Handle `kodama archive`.
pub async fn handle_archive(
    config: &Config,
    output: &Output,
    days: Option<u32>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let days = days.filter(|d| *d > 0).unwrap_or(config.archive_days);

    if dry_run {
        let candidates = store.preview_archive(days).await?;
        if output.is_json() {
            let ids: Vec<_> = candidates.iter().map(|f| f.id).collect();
            return output.json(&json!({ "dryRun": true, "days": days, "targets": ids }));
        }
        println!("{} snapshot(s) older than {} days would be archived:", candidates.len(), days);
        for file in &candidates {
            println!("  {} - {}", file.id.short(), file.title.as_deref().unwrap_or("Untitled"));
        }
        return Ok(());
    }

    let report = store.archive_old(days).await?;
    if output.is_json() {
        let failed: Vec<_> = report
            .failed
            .iter()
            .map(|(id, message)| json!({ "id": id, "message": message }))
            .collect();
        return output.json(&json!({ "archived": report.archived, "failed": failed }));
    }

    println!("Archived {} snapshot(s) older than {} days", report.moved(), days);
    for (id, message) in &report.failed {
        println!("  failed {}: {}", id.short(), message);
    }
    Ok(())
}
