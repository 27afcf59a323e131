//! Storage error types.

use std::path::Path;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Variants carrying a `target` hold a display name for the file involved.
/// Unless path exposure is enabled that is only the file name, so messages
/// never leak the full directory layout.
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The advisory lock stayed held for the whole acquisition window.
    #[error("could not acquire lock on {target}: another kodama process is writing it, try again")]
    LockTimeout { target: String },

    /// The atomic write failed before the destination was replaced.
    #[error("failed to write {target}: {source}")]
    WriteFailed {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// File exceeds the configured read limit.
    #[error("{target} is too large ({size} bytes, limit {limit})")]
    TooLarge { target: String, size: u64, limit: u64 },

    /// Path cannot be used as a storage target.
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

impl StorageError {
    /// Create an invalid path error.
    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::InvalidPath(message.into())
    }

    /// Whether the user can simply run the command again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

/// Name used for `path` in error messages.
pub fn display_target(path: &Path, expose_paths: bool) -> String {
    if expose_paths {
        return path.display().to_string();
    }
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "<unnamed>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_mentions_retry() {
        let err = StorageError::LockTimeout {
            target: "abc.json".to_string(),
        };
        assert!(err.to_string().contains("try again"));
        assert!(err.is_retryable());
    }

    #[test]
    fn write_failed_hides_directory_by_default() {
        let path = Path::new("/home/dev/.local/share/kodama-claude/snapshots/abc.json");
        let err = StorageError::WriteFailed {
            target: display_target(path, false),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        };
        let message = err.to_string();
        assert!(message.contains("abc.json"));
        assert!(!message.contains("/home/dev"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn display_target_exposes_path_in_debug() {
        let path = Path::new("/tmp/x/abc.json");
        assert_eq!(display_target(path, true), "/tmp/x/abc.json");
    }

    #[test]
    fn too_large_formats_sizes() {
        let err = StorageError::TooLarge {
            target: "big.json".to_string(),
            size: 2048,
            limit: 1024,
        };
        assert_eq!(err.to_string(), "big.json is too large (2048 bytes, limit 1024)");
    }

    #[test]
    fn storage_error_json_wraps_serde_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err = StorageError::from(json_err);
        assert!(err.to_string().contains("JSON error"));
    }
}
