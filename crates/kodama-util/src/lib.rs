//! Shared utilities for kodama.
//!
//! This crate provides common utilities used across the kodama workspace:
//! - Storage path resolution (XDG layout)
//! - Logging setup with tracing
//! - A small error type for configuration failures

pub mod error;
pub mod log;
pub mod path;

pub use error::{Error, ErrorKind, Result};
pub use path::StoragePaths;
