//! The context guardian.
//!
//! Combines the remaining context budget with the age of the latest snapshot
//! into a health level, a suggestion and an optional automatic action.
//! [`evaluate`] is pure; [`Guardian`] gathers its inputs and acts on them.

use crate::transcript::{TranscriptAnalyzer, TranscriptInfo};
use chrono::Utc;
use kodama_snapshot::{Snapshot, SnapshotId, SnapshotStore};
use serde::Serialize;
use tracing::{debug, info};

/// Reported session health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    Warning,
    Danger,
}

impl HealthLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Danger => "danger",
        }
    }
}

/// What the guardian wants done right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoAction {
    Snapshot,
    Warn,
}

/// Guardian thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuardianConfig {
    /// Remaining percentage at or below which a snapshot is taken.
    pub auto_snapshot_threshold: u8,
    /// Remaining percentage at or below which a warning is raised.
    pub warning_threshold: u8,
    /// Snapshots younger than this suppress the warning.
    pub snapshot_interval_hours: f64,
    /// Snapshots younger than this suppress the automatic snapshot.
    pub fresh_guard_hours: f64,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            auto_snapshot_threshold: 10,
            warning_threshold: 30,
            snapshot_interval_hours: 1.0,
            fresh_guard_hours: 0.1,
        }
    }
}

/// Outcome of [`evaluate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub level: HealthLevel,
    pub suggestion: String,
    pub auto_action: Option<AutoAction>,
}

/// Decide health, suggestion and action from the two guardian inputs.
///
/// `remaining` is the remaining context percentage, `age_hours` the age of
/// the latest snapshot. Either may be unknown.
pub fn evaluate(config: &GuardianConfig, remaining: Option<u8>, age_hours: Option<f64>) -> Evaluation {
    Evaluation {
        level: health_level(remaining, age_hours),
        suggestion: suggestion(remaining, age_hours),
        auto_action: auto_action(config, remaining, age_hours),
    }
}

fn health_level(remaining: Option<u8>, age_hours: Option<f64>) -> HealthLevel {
    let Some(remaining) = remaining else {
        return match age_hours {
            Some(age) if age <= 3.0 => HealthLevel::Healthy,
            _ => HealthLevel::Warning,
        };
    };

    match remaining {
        0..=9 => HealthLevel::Danger,
        10..=29 => match age_hours {
            Some(age) if age <= 2.0 => HealthLevel::Warning,
            _ => HealthLevel::Danger,
        },
        _ => match age_hours {
            Some(age) if age > 4.0 => HealthLevel::Warning,
            _ => HealthLevel::Healthy,
        },
    }
}

fn auto_action(config: &GuardianConfig, remaining: Option<u8>, age_hours: Option<f64>) -> Option<AutoAction> {
    let remaining = remaining?;

    if remaining <= config.auto_snapshot_threshold {
        // A snapshot was just taken; do not pile another on top.
        return match age_hours {
            Some(age) if age < config.fresh_guard_hours => None,
            _ => Some(AutoAction::Snapshot),
        };
    }

    if remaining <= config.warning_threshold {
        let stale = age_hours.map_or(true, |age| age > config.snapshot_interval_hours);
        if stale {
            return Some(AutoAction::Warn);
        }
    }
    None
}

fn suggestion(remaining: Option<u8>, age_hours: Option<f64>) -> String {
    let Some(remaining) = remaining else {
        return match age_hours {
            None => "No session info. Run 'kodama snap' to create a first snapshot".to_string(),
            Some(age) if age > 3.0 => format!(
                "Last snapshot {}h ago. Consider 'kodama snap'",
                age.round()
            ),
            Some(_) => "Session healthy. Keep coding!".to_string(),
        };
    };

    if remaining < 10 {
        return "Critical! Run 'kodama snap' immediately to avoid context loss".to_string();
    }
    if remaining < 30 {
        return match age_hours {
            Some(age) if age <= 1.0 => format!("{}% remaining. Recent snapshot exists", remaining),
            _ => format!("{}% remaining. Run 'kodama snap' soon", remaining),
        };
    }
    match age_hours {
        Some(age) if age > 3.0 => format!(
            "{}% remaining. Consider a snapshot ({}h old)",
            remaining,
            age.round()
        ),
        _ => format!("{}% remaining. All good!", remaining),
    }
}

/// Summary of the latest snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastSnapshot {
    pub id: SnapshotId,
    pub title: String,
    pub age_hours: f64,
}

/// Result of a health check. Computed on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub level: HealthLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_percent: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_snapshot: Option<LastSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<TranscriptInfo>,
    pub suggestion: String,
    pub auto_action: Option<AutoAction>,
}

/// What [`Guardian::protect`] did.
#[derive(Debug, Clone)]
pub enum ProtectOutcome {
    /// An automatic snapshot was saved.
    Snapshotted(Snapshot),
    /// The budget is getting low; the message is the suggestion.
    Warned(String),
    NoAction,
    /// The automatic snapshot could not be written.
    Failed(String),
}

/// Health checks and automatic protection over a snapshot store.
pub struct Guardian<'a> {
    store: &'a SnapshotStore,
    analyzer: Box<dyn TranscriptAnalyzer>,
    config: GuardianConfig,
    cwd: Option<String>,
}

impl<'a> Guardian<'a> {
    pub fn new(store: &'a SnapshotStore, analyzer: Box<dyn TranscriptAnalyzer>) -> Self {
        Self {
            store,
            analyzer,
            config: GuardianConfig::default(),
            cwd: None,
        }
    }

    pub fn with_config(mut self, config: GuardianConfig) -> Self {
        self.config = config;
        self
    }

    /// Directory recorded on automatic snapshots.
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn config(&self) -> &GuardianConfig {
        &self.config
    }

    /// Gather the transcript signal and the latest snapshot, then evaluate.
    ///
    /// An unreadable store counts as having no snapshot.
    pub async fn check_health(&self) -> HealthStatus {
        let transcript = self.analyzer.analyze().await;

        let last_snapshot = match self.store.latest().await {
            Ok(latest) => latest.map(|snapshot| LastSnapshot {
                age_hours: snapshot.age_hours(Utc::now()),
                id: snapshot.id,
                title: snapshot.title,
            }),
            Err(e) => {
                debug!(error = %e, "Could not read latest snapshot");
                None
            }
        };

        let remaining = transcript.as_ref().map(|t| t.remaining_percent);
        let evaluation = evaluate(
            &self.config,
            remaining,
            last_snapshot.as_ref().map(|s| s.age_hours),
        );

        HealthStatus {
            level: evaluation.level,
            remaining_percent: remaining,
            last_snapshot,
            transcript,
            suggestion: evaluation.suggestion,
            auto_action: evaluation.auto_action,
        }
    }

    /// Check health and carry out the automatic action, if any.
    pub async fn protect(&self) -> ProtectOutcome {
        let health = self.check_health().await;
        match health.auto_action {
            Some(AutoAction::Snapshot) => {
                let used = health.remaining_percent.map_or(100, |r| 100 - r.min(100));
                self.auto_snapshot(used).await
            }
            Some(AutoAction::Warn) => ProtectOutcome::Warned(health.suggestion),
            None => ProtectOutcome::NoAction,
        }
    }

    async fn auto_snapshot(&self, used_percent: u8) -> ProtectOutcome {
        let mut snapshot = Snapshot::new(format!("Auto-save at {}% usage", used_percent))
            .with_context("Automatic snapshot by the kodama guardian")
            .with_tags(["auto"]);
        if let Some(cwd) = &self.cwd {
            snapshot = snapshot.with_cwd(cwd.clone());
        }
        if let Some(session_id) = self.store.load_session_id().await {
            snapshot = snapshot.with_session_id(session_id);
        }

        match self.store.save(&snapshot).await {
            Ok(_) => {
                info!(id = %snapshot.id, used_percent, "Automatic snapshot saved");
                ProtectOutcome::Snapshotted(snapshot)
            }
            Err(e) => {
                debug!(error = %e, "Failed to create automatic snapshot");
                ProtectOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(remaining: Option<u8>, age: Option<f64>) -> Evaluation {
        evaluate(&GuardianConfig::default(), remaining, age)
    }

    #[test]
    fn test_level_without_transcript() {
        assert_eq!(eval(None, None).level, HealthLevel::Warning);
        assert_eq!(eval(None, Some(2.5)).level, HealthLevel::Healthy);
        assert_eq!(eval(None, Some(3.5)).level, HealthLevel::Warning);
        assert_eq!(eval(None, None).auto_action, None);
    }

    #[test]
    fn test_level_with_transcript() {
        assert_eq!(eval(Some(50), Some(1.0)).level, HealthLevel::Healthy);
        assert_eq!(eval(Some(50), None).level, HealthLevel::Healthy);
        assert_eq!(eval(Some(30), Some(5.0)).level, HealthLevel::Warning);
        assert_eq!(eval(Some(20), Some(1.5)).level, HealthLevel::Warning);
        assert_eq!(eval(Some(20), Some(2.5)).level, HealthLevel::Danger);
        assert_eq!(eval(Some(20), None).level, HealthLevel::Danger);
        assert_eq!(eval(Some(9), Some(0.0)).level, HealthLevel::Danger);
    }

    #[test]
    fn test_auto_actions() {
        assert_eq!(eval(Some(5), Some(10.0)).auto_action, Some(AutoAction::Snapshot));
        assert_eq!(eval(Some(10), None).auto_action, Some(AutoAction::Snapshot));
        // Fresh snapshot suppresses the automatic one.
        assert_eq!(eval(Some(5), Some(0.05)).auto_action, None);

        assert_eq!(eval(Some(25), Some(2.0)).auto_action, Some(AutoAction::Warn));
        assert_eq!(eval(Some(30), None).auto_action, Some(AutoAction::Warn));
        assert_eq!(eval(Some(25), Some(0.5)).auto_action, None);
        assert_eq!(eval(Some(50), Some(1.0)).auto_action, None);
    }

    #[test]
    fn test_custom_thresholds() {
        let config = GuardianConfig {
            auto_snapshot_threshold: 40,
            ..GuardianConfig::default()
        };
        assert_eq!(
            evaluate(&config, Some(35), Some(5.0)).auto_action,
            Some(AutoAction::Snapshot)
        );
    }

    #[test]
    fn test_suggestions_are_deterministic() {
        assert_eq!(eval(Some(5), None).suggestion, eval(Some(5), None).suggestion);
        assert!(eval(Some(5), None).suggestion.starts_with("Critical!"));
        assert_eq!(eval(Some(25), Some(0.5)).suggestion, "25% remaining. Recent snapshot exists");
        assert_eq!(eval(Some(25), None).suggestion, "25% remaining. Run 'kodama snap' soon");
        assert_eq!(
            eval(Some(60), Some(4.4)).suggestion,
            "60% remaining. Consider a snapshot (4h old)"
        );
        assert_eq!(eval(None, Some(5.0)).suggestion, "Last snapshot 5h ago. Consider 'kodama snap'");
    }

    #[test]
    fn test_status_serialization() {
        let status = HealthStatus {
            level: HealthLevel::Danger,
            remaining_percent: Some(5),
            last_snapshot: None,
            transcript: None,
            suggestion: "s".to_string(),
            auto_action: Some(AutoAction::Snapshot),
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["level"], "danger");
        assert_eq!(value["remainingPercent"], 5);
        assert_eq!(value["autoAction"], "snapshot");
        assert!(value.get("lastSnapshot").is_none());
    }
}
