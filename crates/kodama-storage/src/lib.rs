//! Crash-safe file storage for kodama.
//!
//! This crate provides the primitives every persisted kodama file goes
//! through:
//! - [`AtomicWriter`]: temp file + fsync + rename under an advisory lock
//! - [`FileLock`]: `<path>.lock` marker files with stale-owner detection
//! - [`recovery`]: removal of leftovers from interrupted operations
//! - [`json`]: size-bounded reads

pub mod atomic;
pub mod error;
pub mod json;
pub mod lock;
pub mod recovery;

pub use atomic::{ensure_dir, AtomicWriter, WriteOptions};
pub use error::{display_target, StorageError, StorageResult};
pub use json::{read_bounded, read_json, DEFAULT_MAX_READ_BYTES};
pub use lock::{FileLock, LockOptions};
pub use recovery::{sweep_dirs, RecoveryOptions, RecoveryReport};
