//! Input validation.
//!
//! Everything a user can type that ends up in a file name, and every snapshot
//! before it is written, passes through here first.

use crate::snapshot::{Snapshot, SCHEMA_VERSION};
use crate::tags::normalize_tag;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

/// Longest id text accepted anywhere.
pub const MAX_ID_LEN: usize = 100;

/// Shortest prefix accepted for prefix lookups.
pub const MIN_PREFIX_LEN: usize = 4;

/// Rejected input. Nothing has been written when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid snapshot id '{id}': {reason}")]
    InvalidId { id: String, reason: &'static str },

    #[error("snapshot title must not be empty")]
    EmptyTitle,

    #[error("unsupported snapshot version '{0}', expected 1.0.0")]
    UnsupportedVersion(String),

    #[error("tag '{0}' is not normalized")]
    InvalidTag(String),

    #[error("invalid pattern '{0}'")]
    InvalidPattern(String),

    #[error("invalid time period '{0}', use a form like \"30 days\", \"2 weeks\" or \"1 month\"")]
    InvalidPeriod(String),

    #[error("path is outside the snapshot directory")]
    PathOutsideStore,
}

fn invalid_id(id: &str, reason: &'static str) -> ValidationError {
    let mut shown: String = id.chars().take(MAX_ID_LEN).collect();
    shown.retain(|c| c != '\0');
    ValidationError::InvalidId { id: shown, reason }
}

/// Reject id text that could escape the storage directories.
pub fn validate_id_text(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(invalid_id(id, "empty"));
    }
    if id.chars().count() > MAX_ID_LEN {
        return Err(invalid_id(id, "too long"));
    }
    if id.contains("..") || id.contains('/') || id.contains('\\') || id.contains('\0') {
        return Err(invalid_id(id, "contains path characters"));
    }
    Ok(())
}

/// Like [`validate_id_text`], and at least [`MIN_PREFIX_LEN`] characters.
pub fn validate_prefix(prefix: &str) -> Result<(), ValidationError> {
    validate_id_text(prefix)?;
    if prefix.chars().count() < MIN_PREFIX_LEN {
        return Err(invalid_id(prefix, "use at least 4 characters"));
    }
    Ok(())
}

/// Check a snapshot before it is written.
pub fn validate_snapshot(snapshot: &Snapshot) -> Result<(), ValidationError> {
    if snapshot.version != SCHEMA_VERSION {
        return Err(ValidationError::UnsupportedVersion(snapshot.version.clone()));
    }
    if snapshot.title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle);
    }

    let mut seen = HashSet::new();
    for tag in &snapshot.tags {
        if tag.is_empty() || normalize_tag(tag) != *tag || !seen.insert(tag) {
            return Err(ValidationError::InvalidTag(tag.clone()));
        }
    }
    Ok(())
}

/// Compile a shell-style pattern matched against snapshot ids.
pub fn compile_pattern(pattern: &str) -> Result<glob::Pattern, ValidationError> {
    let trimmed = pattern.trim();
    if trimmed.is_empty() || trimmed.contains('/') || trimmed.contains('\\') || trimmed.contains("..") {
        return Err(ValidationError::InvalidPattern(pattern.to_string()));
    }
    glob::Pattern::new(trimmed).map_err(|_| ValidationError::InvalidPattern(pattern.to_string()))
}

/// Parse `"<n> day(s)|week(s)|month(s)|year(s)"`.
///
/// Months count as thirty days and years as 365.
pub fn parse_period(period: &str) -> Result<Duration, ValidationError> {
    let invalid = || ValidationError::InvalidPeriod(period.to_string());
    let trimmed = period.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (amount, unit) = trimmed.split_at(split);
    let amount: u64 = amount.parse().map_err(|_| invalid())?;

    let days_per_unit = match unit.trim().to_lowercase().as_str() {
        "day" | "days" | "d" => 1,
        "week" | "weeks" | "w" => 7,
        "month" | "months" => 30,
        "year" | "years" => 365,
        _ => return Err(invalid()),
    };
    amount
        .checked_mul(days_per_unit * 24 * 60 * 60)
        .map(Duration::from_secs)
        .ok_or_else(invalid)
}
