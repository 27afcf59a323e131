//! Snapshot data structures.

use crate::tags::normalize_tags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Schema version written into every snapshot.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Unique identifier for a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(Uuid);

impl SnapshotId {
    /// Create a new random snapshot ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a full snapshot ID.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self)
    }

    /// File name of the snapshot on disk.
    pub fn file_name(&self) -> String {
        format!("{}.json", self.0)
    }

    /// First eight characters, for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SnapshotId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Workflow stage a snapshot was taken in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Requirements,
    Designing,
    Implementing,
    Testing,
}

impl Step {
    pub const ALL: [Step; 4] = [
        Step::Requirements,
        Step::Designing,
        Step::Implementing,
        Step::Testing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Requirements => "requirements",
            Step::Designing => "designing",
            Step::Implementing => "implementing",
            Step::Testing => "testing",
        }
    }

    /// The stage that follows this one. Testing is terminal.
    pub fn next(&self) -> Step {
        match self {
            Step::Requirements => Step::Designing,
            Step::Designing => Step::Implementing,
            Step::Implementing | Step::Testing => Step::Testing,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Step {
    type Err = String;

    /// Accepts the canonical names, common aliases and unambiguous prefixes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        let alias = match normalized.as_str() {
            "req" | "requirement" => Some(Step::Requirements),
            "design" => Some(Step::Designing),
            "impl" | "implement" => Some(Step::Implementing),
            "test" | "tests" => Some(Step::Testing),
            _ => None,
        };
        if let Some(step) = alias {
            return Ok(step);
        }
        if !normalized.is_empty() {
            if let Some(step) = Step::ALL
                .iter()
                .find(|step| step.as_str().starts_with(&normalized))
            {
                return Ok(*step);
            }
        }
        Err(format!(
            "unknown step '{}', expected one of: requirements, designing, implementing, testing",
            s
        ))
    }
}

/// A point-in-time record of development context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Schema version.
    pub version: String,

    /// Unique identifier, also the file stem on disk.
    pub id: SnapshotId,

    /// Display title.
    pub title: String,

    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<Step>,

    /// Free-text notes.
    #[serde(default)]
    pub context: String,

    /// Decisions made so far, oldest first.
    #[serde(default)]
    pub decisions: Vec<String>,

    #[serde(default)]
    pub next_steps: Vec<String>,

    /// Normalized tags.
    #[serde(default)]
    pub tags: Vec<String>,

    /// External assistant session active when the snapshot was taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
}

impl Snapshot {
    /// Create a new snapshot with a fresh id and the current time.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            version: SCHEMA_VERSION.to_string(),
            id: SnapshotId::new(),
            title: title.into(),
            timestamp: Utc::now(),
            step: None,
            context: String::new(),
            decisions: Vec::new(),
            next_steps: Vec::new(),
            tags: Vec::new(),
            claude_session_id: None,
            cwd: None,
            git_branch: None,
            git_commit: None,
        }
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_decisions(mut self, decisions: Vec<String>) -> Self {
        self.decisions = decisions;
        self
    }

    pub fn with_next_steps(mut self, next_steps: Vec<String>) -> Self {
        self.next_steps = next_steps;
        self
    }

    /// Set tags, normalizing and de-duplicating them.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = normalize_tags(tags);
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.claude_session_id = Some(session_id.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_git(mut self, branch: Option<String>, commit: Option<String>) -> Self {
        self.git_branch = branch;
        self.git_commit = commit;
        self
    }

    /// Override the creation time.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Keep only the most recent `limit` decisions. `None` keeps all.
    pub fn cap_decisions(&mut self, limit: Option<usize>) {
        if let Some(limit) = limit {
            if self.decisions.len() > limit {
                let excess = self.decisions.len() - limit;
                self.decisions.drain(..excess);
            }
        }
    }

    /// Hours elapsed between the snapshot and `now`. Never negative.
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        let millis = (now - self.timestamp).num_milliseconds().max(0);
        millis as f64 / 3_600_000.0
    }
}

/// Kind of an event log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SnapshotCreated,
    SnapshotSent,
    ContextInjected,
    Error,
}

/// One line of the append-only event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLogEntry {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<SnapshotId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl EventLogEntry {
    pub fn new(event_type: EventType) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            snapshot_id: None,
            metadata: None,
        }
    }

    pub fn with_snapshot(mut self, id: SnapshotId) -> Self {
        self.snapshot_id = Some(id);
        self
    }

    /// Attach one metadata field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata
            .get_or_insert_with(Default::default)
            .insert(key.into(), value.into());
        self
    }
}
