//! Snapshot storage for kodama.
//!
//! This crate owns everything that persists session context:
//! - The snapshot and event log data model
//! - Validation of ids, snapshots, tags and patterns
//! - [`SnapshotStore`]: save, load, list, archive, event log, session pointer
//! - [`TrashManager`]: soft delete with restore and retention
//! - Batched trash and restore with bounded concurrency
//!
//! # Example
//!
//! ```no_run
//! use kodama_snapshot::{Snapshot, SnapshotConfig, SnapshotStore};
//! use kodama_util::StoragePaths;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let paths = StoragePaths::from_env()?;
//! let store = SnapshotStore::open(paths, SnapshotConfig::default()).await?;
//!
//! let snapshot = Snapshot::new("Auth refactor")
//!     .with_decisions(vec!["Keep sessions server-side".to_string()])
//!     .with_tags(["auth"]);
//! store.save(&snapshot).await?;
//!
//! let latest = store.latest().await?;
//! # Ok(())
//! # }
//! ```

pub mod batch;
mod error;
mod snapshot;
pub mod store;
pub mod tags;
pub mod trash;
pub mod validate;

pub use batch::{restore_many, trash_many, BatchFailure, BatchReport};
pub use error::{SnapshotError, SnapshotResult};
pub use snapshot::{EventLogEntry, EventType, Snapshot, SnapshotId, Step, SCHEMA_VERSION};
pub use store::{ArchiveReport, SnapshotConfig, SnapshotFile, SnapshotStore, DEFAULT_MAX_DECISIONS};
pub use trash::{PurgeReport, TrashItem, TrashManager, TrashStats, DEFAULT_RETENTION_DAYS};
pub use validate::ValidationError;
