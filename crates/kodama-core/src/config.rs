//! Configuration for kodama.
//!
//! Configuration comes from the environment only and is resolved once at
//! startup into an explicit [`Config`] that is passed by reference:
//! - `HOME`, `XDG_DATA_HOME`, `XDG_CONFIG_HOME`: base directories
//! - `KODAMA_DEBUG`: debug logging and full paths in error messages
//! - `KODAMA_NO_LIMIT`, `KODAMA_MAX_DECISIONS`: decision display cap
//! - `KODAMA_AUTO_ARCHIVE`, `KODAMA_ARCHIVE_DAYS`: archiving after `snap`
//! - `KODAMA_TRASH_RETENTION_DAYS`: trash retention
//! - `CLAUDE_TRANSCRIPT_PATH`: transcript location override
//!
//! Malformed numeric values fall back to their defaults.

use crate::error::{ConfigError, CoreResult};
use kodama_snapshot::{SnapshotConfig, DEFAULT_MAX_DECISIONS, DEFAULT_RETENTION_DAYS};
use kodama_storage::WriteOptions;
use kodama_util::log::LogLevel;
use kodama_util::StoragePaths;
use serde::Serialize;
use std::path::PathBuf;

/// Default archive threshold in days.
pub const DEFAULT_ARCHIVE_DAYS: u32 = 30;

/// Resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Storage layout.
    pub paths: StoragePaths,

    /// Debug mode: verbose logs and full paths in errors.
    pub debug: bool,

    /// Decisions shown by `latest`. `None` means unlimited.
    pub max_decisions: Option<usize>,

    /// Archive old snapshots after each `snap`.
    pub auto_archive: bool,

    pub archive_days: u32,

    pub trash_retention_days: u32,

    /// Explicit transcript location.
    pub transcript_override: Option<PathBuf>,

    /// Home directory, when known. Used for default transcript locations.
    pub home: Option<PathBuf>,
}

impl Config {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> CoreResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> CoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let paths = StoragePaths::from_lookup(&lookup).map_err(ConfigError::from)?;

        let no_limit = flag(lookup("KODAMA_NO_LIMIT"));
        let max_decisions = if no_limit {
            None
        } else {
            Some(positive(lookup("KODAMA_MAX_DECISIONS")).unwrap_or(DEFAULT_MAX_DECISIONS))
        };

        let transcript_override = match lookup("CLAUDE_TRANSCRIPT_PATH") {
            Some(value) if value.contains('\0') => {
                return Err(ConfigError::InvalidPath {
                    name: "CLAUDE_TRANSCRIPT_PATH".to_string(),
                    value: value.replace('\0', "\\0"),
                }
                .into());
            }
            Some(value) if !value.trim().is_empty() => Some(PathBuf::from(value)),
            _ => None,
        };

        Ok(Self {
            paths,
            debug: flag(lookup("KODAMA_DEBUG")),
            max_decisions,
            auto_archive: lookup("KODAMA_AUTO_ARCHIVE").as_deref() != Some("false"),
            archive_days: positive(lookup("KODAMA_ARCHIVE_DAYS")).unwrap_or(DEFAULT_ARCHIVE_DAYS),
            trash_retention_days: positive(lookup("KODAMA_TRASH_RETENTION_DAYS"))
                .unwrap_or(DEFAULT_RETENTION_DAYS),
            transcript_override,
            home: lookup("HOME")
                .filter(|h| !h.trim().is_empty())
                .map(PathBuf::from),
        })
    }

    /// Store configuration derived from this configuration.
    pub fn snapshot_config(&self) -> SnapshotConfig {
        SnapshotConfig {
            max_decisions: self.max_decisions,
            write: WriteOptions::default().with_expose_paths(self.debug),
            ..SnapshotConfig::default()
        }
    }

    /// Default log level for kodama crates.
    pub fn log_level(&self) -> LogLevel {
        if self.debug {
            LogLevel::Debug
        } else {
            LogLevel::Warn
        }
    }

    /// Transcript locations to search, in order.
    pub fn transcript_candidates(&self) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(path) = &self.transcript_override {
            candidates.push(path.clone());
        }
        if let Some(home) = &self.home {
            candidates.push(
                home.join(".claude")
                    .join("sessions")
                    .join("current")
                    .join("transcript.jsonl"),
            );
            candidates.push(
                home.join(".local")
                    .join("share")
                    .join("claude")
                    .join("transcript.jsonl"),
            );
        }
        candidates
    }

    /// Printable view of the effective configuration.
    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            paths: self.paths.clone(),
            debug: self.debug,
            max_decisions: self.max_decisions,
            auto_archive: self.auto_archive,
            archive_days: self.archive_days,
            trash_retention_days: self.trash_retention_days,
            transcript_candidates: self.transcript_candidates(),
        }
    }
}

/// Serializable summary printed by `kodama config`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSummary {
    pub paths: StoragePaths,
    pub debug: bool,
    /// `null` when unlimited.
    pub max_decisions: Option<usize>,
    pub auto_archive: bool,
    pub archive_days: u32,
    pub trash_retention_days: u32,
    pub transcript_candidates: Vec<PathBuf>,
}

fn flag(value: Option<String>) -> bool {
    matches!(value.as_deref().map(str::trim), Some("true") | Some("1"))
}

fn positive<T>(value: Option<String>) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    value
        .and_then(|v| v.trim().parse::<T>().ok())
        .filter(|v| *v > T::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> CoreResult<Config> {
        let mut map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        map.entry("HOME".to_string())
            .or_insert_with(|| "/home/dev".to_string());
        Config::from_lookup(move |name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert!(!config.debug);
        assert_eq!(config.max_decisions, Some(5));
        assert!(config.auto_archive);
        assert_eq!(config.archive_days, 30);
        assert_eq!(config.trash_retention_days, 7);
        assert_eq!(config.log_level(), LogLevel::Warn);
        assert!(!config.snapshot_config().expose_paths());
    }

    #[test]
    fn test_flags() {
        let config = config(&[("KODAMA_DEBUG", "1"), ("KODAMA_NO_LIMIT", "true")]).unwrap();
        assert!(config.debug);
        assert_eq!(config.max_decisions, None);
        assert_eq!(config.log_level(), LogLevel::Debug);
        assert!(config.snapshot_config().expose_paths());
        assert!(config.snapshot_config().write.lock.expose_paths);

        let config = super::tests::config(&[("KODAMA_DEBUG", "yes")]).unwrap();
        assert!(!config.debug);
    }

    #[test]
    fn test_numeric_values_fall_back() {
        let config = config(&[
            ("KODAMA_MAX_DECISIONS", "12"),
            ("KODAMA_ARCHIVE_DAYS", "0"),
            ("KODAMA_TRASH_RETENTION_DAYS", "soon"),
        ])
        .unwrap();
        assert_eq!(config.max_decisions, Some(12));
        assert_eq!(config.archive_days, 30);
        assert_eq!(config.trash_retention_days, 7);

        let config = super::tests::config(&[("KODAMA_MAX_DECISIONS", "-3")]).unwrap();
        assert_eq!(config.max_decisions, Some(5));
    }

    #[test]
    fn test_auto_archive_only_disabled_by_false() {
        assert!(!config(&[("KODAMA_AUTO_ARCHIVE", "false")]).unwrap().auto_archive);
        assert!(config(&[("KODAMA_AUTO_ARCHIVE", "0")]).unwrap().auto_archive);
    }

    #[test]
    fn test_transcript_candidates_prefer_override() {
        let config = config(&[("CLAUDE_TRANSCRIPT_PATH", "/tmp/t.jsonl")]).unwrap();
        let candidates = config.transcript_candidates();
        assert_eq!(candidates[0], PathBuf::from("/tmp/t.jsonl"));
        assert_eq!(
            candidates[1],
            PathBuf::from("/home/dev/.claude/sessions/current/transcript.jsonl")
        );
        assert_eq!(candidates.len(), 3);
    }

    #[test]
    fn test_missing_home_is_fatal() {
        let err = Config::from_lookup(|_| None).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_summary_serializes() {
        let summary = config(&[]).unwrap().summary();
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["maxDecisions"], 5);
        assert_eq!(value["archiveDays"], 30);
        assert!(value["paths"]["snapshots"]
            .as_str()
            .unwrap()
            .ends_with("kodama-claude/snapshots"));
    }
}
