//! Kodama - session memory for AI coding assistants.
//!
//! This is the main entry point for the kodama CLI.

mod commands;

use clap::{Parser, Subcommand};
use commands::*;
use kodama_core::Config;

#[derive(Parser)]
#[command(name = "kodama")]
#[command(author, version, about = "Session memory for AI coding assistants", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save a snapshot of the current context
    Snap(SnapArgs),
    /// List snapshots
    List {
        /// Include archived snapshots
        #[arg(short, long)]
        archived: bool,
        /// Only snapshots carrying any of these tags (comma separated)
        #[arg(short, long)]
        tags: Option<String>,
        /// Show at most this many snapshots
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show a snapshot (the latest one by default)
    Show {
        /// Snapshot ID or prefix
        id: Option<String>,
        /// Print as a context pack ready to paste into a new session
        #[arg(long)]
        pack: bool,
    },
    /// Count tag usage across snapshots
    Tags {
        /// Include archived snapshots
        #[arg(short, long)]
        archived: bool,
    },
    /// Move old snapshots into the archive
    Archive {
        /// Age threshold in days (defaults to KODAMA_ARCHIVE_DAYS)
        #[arg(short, long)]
        days: Option<u32>,
        /// Show what would be archived without moving anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Move snapshots to the trash
    Delete(DeleteArgs),
    /// Inspect and manage the trash
    Trash {
        #[command(subcommand)]
        command: TrashCommands,
    },
    /// Show session health
    Status {
        /// Remaining context percentage, instead of reading the transcript
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        remaining: Option<u8>,
    },
    /// Take an automatic snapshot when the context budget runs low
    Protect {
        /// Remaining context percentage, instead of reading the transcript
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        remaining: Option<u8>,
    },
    /// Read or set the active assistant session id
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Show the event log
    Events {
        /// Show only the most recent entries
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Configuration problems are fatal before anything touches the disk.
    let config = Config::from_env()?;
    init_logging(cli.verbose, &config);

    let output = Output::new(cli.json);

    match cli.command {
        Commands::Snap(args) => handle_snap(&config, &output, args).await,
        Commands::List {
            archived,
            tags,
            limit,
        } => handle_list(&config, &output, archived, tags, limit).await,
        Commands::Show { id, pack } => handle_show(&config, &output, id, pack).await,
        Commands::Tags { archived } => handle_tags(&config, &output, archived).await,
        Commands::Archive { days, dry_run } => {
            handle_archive(&config, &output, days, dry_run).await
        }
        Commands::Delete(args) => handle_delete(&config, &output, args).await,
        Commands::Trash { command } => handle_trash(&config, &output, command).await,
        Commands::Status { remaining } => handle_status(&config, &output, remaining).await,
        Commands::Protect { remaining } => handle_protect(&config, &output, remaining).await,
        Commands::Session { command } => handle_session(&config, &output, command).await,
        Commands::Events { limit } => handle_events(&config, &output, limit).await,
        Commands::Config => show_config(&config, &output),
    }
}
