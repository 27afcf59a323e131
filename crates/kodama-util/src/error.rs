//! Error handling utilities.
//!
//! A small error type shared by the leaf utilities of kodama. Higher layers
//! wrap it in their own `thiserror` enums.

use std::fmt;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for kodama utilities.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// `HOME` is needed to derive a base directory but is unset or empty.
    MissingHome,
    /// A resolved base directory is unusable (e.g. relative).
    InvalidBase,
}

impl Error {
    /// Create a new error with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Create a missing `HOME` error.
    pub fn missing_home() -> Self {
        Self::new(ErrorKind::MissingHome, "HOME environment variable is not set")
    }

    /// Create an invalid base directory error.
    pub fn invalid_base(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidBase, message)
    }

    /// Whether this error must stop the process at startup.
    ///
    /// Every path resolution failure is; nothing can be stored without a root.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, ErrorKind::MissingHome | ErrorKind::InvalidBase)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_home_is_fatal() {
        let err = Error::missing_home();
        assert_eq!(err.kind(), ErrorKind::MissingHome);
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "HOME environment variable is not set");
    }

    #[test]
    fn test_invalid_base_is_fatal() {
        let err = Error::invalid_base("base directory must be absolute: data");
        assert_eq!(err.kind(), ErrorKind::InvalidBase);
        assert!(err.is_fatal());
        assert!(err.to_string().contains("absolute"));
    }
}
