//! Crash recovery.
//!
//! An interrupted write leaves `<name>.tmp.<uuid>` behind and a killed
//! process leaves its `<name>.lock`. Both are swept when a store opens.

use crate::atomic::TEMP_MARKER;
use crate::lock::{is_stale, older_than, LockOptions, LOCK_SUFFIX, STALE_MARKER};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

/// Age thresholds for the sweep.
#[derive(Debug, Clone)]
pub struct RecoveryOptions {
    /// Orphaned temp files older than this are removed.
    pub temp_max_age: Duration,
    /// Lock files older than this are removed even if their owner looks alive.
    pub lock_max_age: Duration,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            temp_max_age: Duration::from_secs(60 * 60),
            lock_max_age: Duration::from_secs(10 * 60),
        }
    }
}

/// What a sweep removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub temp_files: usize,
    pub lock_files: usize,
}

impl RecoveryReport {
    pub fn total(&self) -> usize {
        self.temp_files + self.lock_files
    }

    fn merge(&mut self, other: RecoveryReport) {
        self.temp_files += other.temp_files;
        self.lock_files += other.lock_files;
    }
}

/// Sweep a single directory, non-recursively. A missing directory is empty.
pub async fn sweep_dir(dir: &Path, options: &RecoveryOptions) -> io::Result<RecoveryReport> {
    let mut report = RecoveryReport::default();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(e),
    };

    let grace = LockOptions::default().unreadable_grace;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();

        if is_orphan_temp(&name) {
            if older_than(&path, options.temp_max_age).await && remove(&path).await {
                report.temp_files += 1;
            }
        } else if name.contains(STALE_MARKER) {
            // A fresh grave may still be under re-check by the contender that moved it.
            if older_than(&path, grace).await && remove(&path).await {
                report.lock_files += 1;
            }
        } else if name.ends_with(LOCK_SUFFIX) {
            let abandoned =
                is_stale(&path, grace).await || older_than(&path, options.lock_max_age).await;
            if abandoned && remove(&path).await {
                report.lock_files += 1;
            }
        }
    }

    Ok(report)
}

/// Sweep several directories. Failures on one directory are logged and skipped.
pub async fn sweep_dirs(dirs: &[PathBuf], options: &RecoveryOptions) -> RecoveryReport {
    let mut report = RecoveryReport::default();
    for dir in dirs {
        match sweep_dir(dir, options).await {
            Ok(found) => report.merge(found),
            Err(e) => debug!(dir = %dir.display(), error = %e, "Recovery sweep skipped directory"),
        }
    }
    if report.total() > 0 {
        info!(
            temp_files = report.temp_files,
            lock_files = report.lock_files,
            "Cleaned up leftovers from interrupted operations"
        );
    }
    report
}

fn is_orphan_temp(name: &str) -> bool {
    name.rfind(TEMP_MARKER)
        .map(|at| Uuid::parse_str(&name[at + TEMP_MARKER.len()..]).is_ok())
        .unwrap_or(false)
}

async fn remove(path: &Path) -> bool {
    match fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Failed to remove leftover file");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atomic::temp_path_for;
    use filetime::{set_file_mtime, FileTime};
    use std::time::SystemTime;
    use tempfile::tempdir;

    fn age(path: &Path, secs: u64) {
        let past = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(secs));
        set_file_mtime(path, past).unwrap();
    }

    #[test]
    fn temp_names_need_a_uuid_suffix() {
        assert!(is_orphan_temp(&format!("a.json.tmp.{}", Uuid::new_v4())));
        assert!(!is_orphan_temp("a.json.tmp.notes"));
        assert!(!is_orphan_temp("a.json"));
    }

    #[tokio::test]
    async fn old_temp_files_are_removed_fresh_ones_kept() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a.json");
        let old = temp_path_for(&target);
        let fresh = temp_path_for(&target);
        std::fs::write(&old, b"partial").unwrap();
        std::fs::write(&fresh, b"in flight").unwrap();
        std::fs::write(&target, b"{}").unwrap();
        age(&old, 2 * 60 * 60);

        let report = sweep_dir(dir.path(), &RecoveryOptions::default()).await.unwrap();

        assert_eq!(report, RecoveryReport { temp_files: 1, lock_files: 0 });
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(target.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dead_and_ancient_locks_are_removed() {
        let dir = tempdir().unwrap();
        let dead = dir.path().join("a.json.lock");
        let live = dir.path().join("b.json.lock");
        let ancient = dir.path().join("c.json.lock");
        let grave = dir.path().join(format!("d.json.lock.stale.{}", Uuid::new_v4()));
        std::fs::write(&dead, "2147483000").unwrap();
        std::fs::write(&live, std::process::id().to_string()).unwrap();
        std::fs::write(&ancient, std::process::id().to_string()).unwrap();
        std::fs::write(&grave, "1").unwrap();
        let fresh_grave = dir.path().join(format!("e.json.lock.stale.{}", Uuid::new_v4()));
        std::fs::write(&fresh_grave, "1").unwrap();
        age(&ancient, 20 * 60);
        age(&grave, 60);

        let report = sweep_dir(dir.path(), &RecoveryOptions::default()).await.unwrap();

        assert_eq!(report.lock_files, 3);
        assert!(!dead.exists());
        assert!(live.exists());
        assert!(!ancient.exists());
        assert!(!grave.exists());
        assert!(fresh_grave.exists());
    }

    #[tokio::test]
    async fn missing_directories_are_empty() {
        let dir = tempdir().unwrap();
        let report = sweep_dirs(
            &[dir.path().join("missing"), dir.path().to_path_buf()],
            &RecoveryOptions::default(),
        )
        .await;
        assert_eq!(report.total(), 0);
    }
}
