//! Snapshot error types.

use crate::validate::ValidationError;
use kodama_storage::StorageError;
use thiserror::Error;

/// Result type for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Errors that can occur during snapshot operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Storage layer error (lock contention, failed write, oversized file).
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Input rejected before anything was touched.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A stored file exists but cannot be parsed.
    #[error("Snapshot file corrupted: {0}")]
    Corrupted(String),

    /// Snapshot not found.
    #[error("Snapshot not found: {0}")]
    NotFound(String),

    /// A prefix matched several snapshots.
    #[error("Multiple snapshots match '{prefix}': {}", .matches.join(", "))]
    AmbiguousId { prefix: String, matches: Vec<String> },

    /// The restore destination is already occupied.
    #[error("Cannot restore {0}: a snapshot with this id already exists")]
    RestoreConflict(String),

    /// The index lists a trash file that no longer exists.
    #[error("Trash file for {0} is missing; its entry has been removed")]
    TrashFileMissing(String),

    /// Operation failed.
    #[error("Snapshot operation failed: {0}")]
    OperationFailed(String),
}

impl SnapshotError {
    /// Create a not found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Create an operation failed error.
    pub fn operation_failed(message: impl Into<String>) -> Self {
        Self::OperationFailed(message.into())
    }

    /// Create a corrupted file error.
    pub fn corrupted(target: impl Into<String>) -> Self {
        Self::Corrupted(target.into())
    }

    /// Whether the user can simply run the command again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_retryable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_lists_candidates() {
        let err = SnapshotError::AmbiguousId {
            prefix: "abcd".to_string(),
            matches: vec!["abcd1".to_string(), "abcd2".to_string()],
        };
        assert_eq!(err.to_string(), "Multiple snapshots match 'abcd': abcd1, abcd2");
    }

    #[test]
    fn lock_timeout_is_retryable() {
        let err = SnapshotError::from(StorageError::LockTimeout {
            target: "a.json".to_string(),
        });
        assert!(err.is_retryable());
        assert!(err.to_string().contains("try again"));
        assert!(!SnapshotError::not_found("x").is_retryable());
    }
}
