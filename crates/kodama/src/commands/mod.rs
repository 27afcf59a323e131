//! Command handlers for the kodama CLI.
//!
//! Handlers are grouped by the component they drive. Each one takes the
//! resolved [`kodama_core::Config`] and opens only what it needs.

pub mod delete;
pub mod guardian;
pub mod logging;
pub mod output;
pub mod session;
pub mod snapshot;
pub mod trash;

pub use delete::*;
pub use guardian::*;
pub use logging::*;
pub use output::*;
pub use session::*;
pub use snapshot::*;
pub use trash::*;

use kodama_core::Config;
use kodama_snapshot::{SnapshotStore, TrashManager};

/// Open the snapshot store described by `config`.
pub async fn open_store(config: &Config) -> anyhow::Result<SnapshotStore> {
    Ok(SnapshotStore::open(config.paths.clone(), config.snapshot_config()).await?)
}

/// Open the trash described by `config`.
pub async fn open_trash(config: &Config) -> anyhow::Result<TrashManager> {
    Ok(TrashManager::open(config.paths.clone(), config.snapshot_config()).await?)
}
