//! Context budget estimation from the assistant's transcript.
//!
//! The transcript is a JSONL file the assistant appends to. Only its tail is
//! read, and the last `"context_window"` / `"context_used"` numbers found
//! there describe the current session.

use crate::config::Config;
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

/// Bytes read from the end of the transcript.
pub const TAIL_BYTES: u64 = 64 * 1024;

static WINDOW_REGEX: OnceLock<Regex> = OnceLock::new();
static USED_REGEX: OnceLock<Regex> = OnceLock::new();

fn window_regex() -> &'static Regex {
    WINDOW_REGEX.get_or_init(|| {
        Regex::new(r#""context_window"\s*:\s*(\d+)"#)
            .expect("Invalid regex pattern - this is a compile-time constant")
    })
}

fn used_regex() -> &'static Regex {
    USED_REGEX.get_or_init(|| {
        Regex::new(r#""context_used"\s*:\s*(\d+)"#)
            .expect("Invalid regex pattern - this is a compile-time constant")
    })
}

/// Coarse budget status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptStatus {
    Healthy,
    Warning,
    Danger,
}

/// Token usage of the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptInfo {
    pub context_window: u64,
    pub context_used: u64,
    pub remaining_tokens: u64,
    pub remaining_percent: u8,
    pub status: TranscriptStatus,
}

impl TranscriptInfo {
    /// Derive the remaining budget. `None` when the window is zero.
    pub fn from_usage(context_window: u64, context_used: u64) -> Option<Self> {
        if context_window == 0 {
            return None;
        }
        let remaining_tokens = context_window.saturating_sub(context_used);
        let percent = (remaining_tokens as f64 / context_window as f64 * 100.0).round();
        let remaining_percent = percent.clamp(0.0, 100.0) as u8;
        let status = match remaining_percent {
            30.. => TranscriptStatus::Healthy,
            10..=29 => TranscriptStatus::Warning,
            _ => TranscriptStatus::Danger,
        };
        Some(Self {
            context_window,
            context_used,
            remaining_tokens,
            remaining_percent,
            status,
        })
    }
}

/// Source of the remaining context budget.
#[async_trait]
pub trait TranscriptAnalyzer: Send + Sync {
    /// Current usage, or `None` when it cannot be determined.
    async fn analyze(&self) -> Option<TranscriptInfo>;
}

/// Reads the tail of the first transcript file that exists.
#[derive(Debug, Clone)]
pub struct TailTranscriptAnalyzer {
    candidates: Vec<PathBuf>,
}

impl TailTranscriptAnalyzer {
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        Self { candidates }
    }

    /// Search the locations named by the configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.transcript_candidates())
    }

    /// The first candidate that exists on disk.
    pub async fn locate(&self) -> Option<PathBuf> {
        for candidate in &self.candidates {
            if fs::try_exists(candidate).await.unwrap_or(false) {
                return Some(candidate.clone());
            }
        }
        None
    }
}

#[async_trait]
impl TranscriptAnalyzer for TailTranscriptAnalyzer {
    async fn analyze(&self) -> Option<TranscriptInfo> {
        let path = self.locate().await?;
        match read_tail(&path, TAIL_BYTES).await {
            Ok(text) => {
                let (window, used) = parse_usage(&text)?;
                TranscriptInfo::from_usage(window, used)
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Could not read transcript");
                None
            }
        }
    }
}

/// Reports a fixed remaining percentage.
#[derive(Debug, Clone, Copy)]
pub struct FixedBudget {
    remaining_percent: u8,
}

impl FixedBudget {
    pub fn new(remaining_percent: u8) -> Self {
        Self {
            remaining_percent: remaining_percent.min(100),
        }
    }
}

#[async_trait]
impl TranscriptAnalyzer for FixedBudget {
    async fn analyze(&self) -> Option<TranscriptInfo> {
        let used = 100 - u64::from(self.remaining_percent);
        TranscriptInfo::from_usage(100, used)
    }
}

/// Last `(context_window, context_used)` pair mentioned in `text`.
pub fn parse_usage(text: &str) -> Option<(u64, u64)> {
    let last = |re: &Regex| {
        re.captures_iter(text)
            .last()
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
    };
    Some((last(window_regex())?, last(used_regex())?))
}

async fn read_tail(path: &Path, max_bytes: u64) -> std::io::Result<String> {
    let mut file = fs::File::open(path).await?;
    let size = file.metadata().await?.len();
    let start = size.saturating_sub(max_bytes);
    file.seek(SeekFrom::Start(start)).await?;

    let mut buf = Vec::with_capacity((size - start) as usize);
    file.take(max_bytes).read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Compact token count, e.g. `1.2M` or `45K`.
pub fn format_tokens(tokens: u64) -> String {
    if tokens >= 1_000_000 {
        format!("{:.1}M", tokens as f64 / 1_000_000.0)
    } else if tokens >= 1_000 {
        format!("{:.0}K", tokens as f64 / 1_000.0)
    } else {
        tokens.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_from_usage() {
        let info = TranscriptInfo::from_usage(200_000, 150_000).unwrap();
        assert_eq!(info.remaining_tokens, 50_000);
        assert_eq!(info.remaining_percent, 25);
        assert_eq!(info.status, TranscriptStatus::Warning);

        let over = TranscriptInfo::from_usage(100, 150).unwrap();
        assert_eq!(over.remaining_tokens, 0);
        assert_eq!(over.status, TranscriptStatus::Danger);

        assert!(TranscriptInfo::from_usage(0, 10).is_none());
        assert_eq!(
            TranscriptInfo::from_usage(100, 70).unwrap().status,
            TranscriptStatus::Healthy
        );
    }

    #[test]
    fn test_parse_usage_takes_last_values() {
        let text = r#"{"context_window": 200000, "context_used": 1000}
{"context_window":200000,"context_used":190000}"#;
        assert_eq!(parse_usage(text), Some((200_000, 190_000)));
        assert_eq!(parse_usage(r#"{"context_window": 10}"#), None);
        assert_eq!(parse_usage("nothing here"), None);
    }

    #[tokio::test]
    async fn test_tail_analyzer_reads_first_existing_candidate() {
        let dir = tempdir().unwrap();
        let transcript = dir.path().join("transcript.jsonl");
        let mut content = String::new();
        // Old usage lines pushed out of the tail window.
        for _ in 0..2000 {
            content.push_str("{\"context_window\":1000,\"context_used\":1}\n");
        }
        content.push_str(&"x".repeat(TAIL_BYTES as usize));
        content.push_str("{\"context_window\":1000,\"context_used\":950}\n");
        std::fs::write(&transcript, content).unwrap();

        let analyzer =
            TailTranscriptAnalyzer::new(vec![dir.path().join("missing.jsonl"), transcript.clone()]);
        assert_eq!(analyzer.locate().await, Some(transcript));

        let info = analyzer.analyze().await.unwrap();
        assert_eq!(info.remaining_percent, 5);
        assert_eq!(info.status, TranscriptStatus::Danger);
    }

    #[tokio::test]
    async fn test_tail_analyzer_without_transcript() {
        let dir = tempdir().unwrap();
        let analyzer = TailTranscriptAnalyzer::new(vec![dir.path().join("none.jsonl")]);
        assert!(analyzer.analyze().await.is_none());

        let empty = dir.path().join("empty.jsonl");
        std::fs::write(&empty, "").unwrap();
        assert!(TailTranscriptAnalyzer::new(vec![empty]).analyze().await.is_none());
    }

    #[tokio::test]
    async fn test_fixed_budget() {
        let info = FixedBudget::new(42).analyze().await.unwrap();
        assert_eq!(info.remaining_percent, 42);
        assert_eq!(FixedBudget::new(250).analyze().await.unwrap().remaining_percent, 100);
    }

    #[test]
    fn test_format_tokens() {
        assert_eq!(format_tokens(950), "950");
        assert_eq!(format_tokens(45_000), "45K");
        assert_eq!(format_tokens(1_200_000), "1.2M");
    }
}
