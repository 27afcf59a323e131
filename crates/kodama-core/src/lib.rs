//! Core services for kodama.
//!
//! - [`Config`]: configuration resolved once from the environment
//! - [`transcript`]: remaining context budget of the assistant session
//! - [`guardian`]: health evaluation and automatic protection

pub mod config;
pub mod error;
pub mod guardian;
pub mod transcript;

pub use config::{Config, ConfigSummary, DEFAULT_ARCHIVE_DAYS};
pub use error::{ConfigError, CoreError, CoreResult};
pub use guardian::{
    evaluate, AutoAction, Evaluation, Guardian, GuardianConfig, HealthLevel, HealthStatus,
    LastSnapshot, ProtectOutcome,
};
pub use transcript::{
    FixedBudget, TailTranscriptAnalyzer, TranscriptAnalyzer, TranscriptInfo, TranscriptStatus,
};
