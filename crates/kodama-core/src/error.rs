//! Error types for the core crate.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Snapshot store or trash error.
    #[error(transparent)]
    Snapshot(#[from] kodama_snapshot::SnapshotError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] kodama_storage::StorageError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Base directories could not be resolved.
    #[error("{0}")]
    Paths(#[from] kodama_util::Error),

    /// A path variable holds something unusable.
    #[error("invalid path in {name}: {value}")]
    InvalidPath { name: String, value: String },
}

impl CoreError {
    /// Whether the process should stop instead of degrading.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_fatal() {
        let err = CoreError::from(ConfigError::from(kodama_util::Error::missing_home()));
        assert!(err.is_fatal());
        assert!(err.to_string().contains("HOME"));

        let io = CoreError::from(std::io::Error::new(std::io::ErrorKind::Other, "x"));
        assert!(!io.is_fatal());
    }
}
