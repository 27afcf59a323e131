//! Builder patterns for constructing test objects.

use chrono::{Duration, Utc};
use kodama_snapshot::{Snapshot, SnapshotId, Step};

/// Builder for test snapshots.
///
/// # Example
///
/// ```rust
/// use kodama_test_utils::builders::SnapshotBuilder;
///
/// let snapshot = SnapshotBuilder::new("Auth work")
///     .decisions(10)
///     .tag("auth")
///     .hours_ago(3)
///     .build();
///
/// assert_eq!(snapshot.decisions.len(), 10);
/// ```
pub struct SnapshotBuilder {
    snapshot: Snapshot,
    tags: Vec<String>,
}

impl SnapshotBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            snapshot: Snapshot::new(title),
            tags: Vec::new(),
        }
    }

    /// Use a fixed id.
    pub fn id(mut self, id: &str) -> Self {
        self.snapshot.id = SnapshotId::parse(id).expect("Invalid snapshot id in test");
        self
    }

    /// Add `count` numbered decisions, `decision 1` first.
    pub fn decisions(mut self, count: usize) -> Self {
        self.snapshot.decisions = (1..=count).map(|i| format!("decision {}", i)).collect();
        self
    }

    pub fn next_step(mut self, step: impl Into<String>) -> Self {
        self.snapshot.next_steps.push(step.into());
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.snapshot.step = Some(step);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.snapshot.context = context.into();
        self
    }

    /// Date the snapshot `hours` in the past.
    pub fn hours_ago(mut self, hours: i64) -> Self {
        self.snapshot.timestamp = Utc::now() - Duration::hours(hours);
        self
    }

    pub fn minutes_ago(mut self, minutes: i64) -> Self {
        self.snapshot.timestamp = Utc::now() - Duration::minutes(minutes);
        self
    }

    pub fn build(self) -> Snapshot {
        let tags = self.tags;
        self.snapshot.with_tags(tags)
    }
}
