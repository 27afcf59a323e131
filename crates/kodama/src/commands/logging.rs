//! Logging initialization.
//!
//! Logs always go to stderr; stdout is reserved for command output so
//! `--json` stays parseable.

use kodama_core::Config;
use kodama_util::log::{self, LogConfig, LogLevel};
use std::io::IsTerminal;

/// Initialize logging from the `--verbose` flag and `KODAMA_DEBUG`.
///
/// `RUST_LOG` overrides both.
pub fn init_logging(verbose: bool, config: &Config) {
    let level = if verbose {
        LogLevel::Debug
    } else {
        config.log_level()
    };

    log::init(LogConfig {
        level,
        include_location: config.debug,
        ansi: std::io::stderr().is_terminal(),
    });
    tracing::debug!(data = %config.paths.data.display(), "Logging initialized");
}
