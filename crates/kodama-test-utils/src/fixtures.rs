//! Test fixtures for reproducible storage layouts.

use kodama_snapshot::{SnapshotConfig, SnapshotStore, TrashManager};
use kodama_util::StoragePaths;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// A temporary data and config root, removed when dropped.
///
/// # Example
///
/// ```rust
/// use kodama_test_utils::fixtures::TestDataDir;
///
/// let data = TestDataDir::new();
/// assert!(data.paths().snapshots.starts_with(data.root()));
/// ```
pub struct TestDataDir {
    temp_dir: TempDir,
    paths: StoragePaths,
}

impl TestDataDir {
    /// Create an empty layout under a fresh temporary directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let paths = StoragePaths::from_lookup(|name| match name {
            "XDG_DATA_HOME" => Some(temp_dir.path().join("share").display().to_string()),
            "XDG_CONFIG_HOME" => Some(temp_dir.path().join("config").display().to_string()),
            "HOME" => Some(temp_dir.path().display().to_string()),
            _ => None,
        })
        .expect("Failed to resolve storage paths");
        Self { temp_dir, paths }
    }

    /// The temporary directory everything lives under.
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    /// Environment a process should see to use this layout.
    pub fn env(&self) -> HashMap<String, String> {
        let root = self.root();
        HashMap::from([
            ("HOME".to_string(), root.display().to_string()),
            (
                "XDG_DATA_HOME".to_string(),
                root.join("share").display().to_string(),
            ),
            (
                "XDG_CONFIG_HOME".to_string(),
                root.join("config").display().to_string(),
            ),
        ])
    }

    /// Open a store with default configuration.
    pub async fn store(&self) -> SnapshotStore {
        self.store_with(SnapshotConfig::default()).await
    }

    pub async fn store_with(&self, config: SnapshotConfig) -> SnapshotStore {
        SnapshotStore::open(self.paths.clone(), config)
            .await
            .expect("Failed to open snapshot store")
    }

    /// Open the trash with default configuration.
    pub async fn trash(&self) -> TrashManager {
        TrashManager::open(self.paths.clone(), SnapshotConfig::default())
            .await
            .expect("Failed to open trash")
    }

    /// Write raw bytes as a live snapshot file, bypassing validation.
    pub fn write_raw_snapshot(&self, file_name: &str, contents: &str) -> PathBuf {
        let path = self.paths.snapshots.join(file_name);
        std::fs::create_dir_all(&self.paths.snapshots).expect("Failed to create snapshots dir");
        std::fs::write(&path, contents)
            .unwrap_or_else(|e| panic!("Failed to write {}: {}", path.display(), e));
        path
    }

    /// Write a transcript tail reporting the given usage.
    pub fn write_transcript(&self, context_window: u64, context_used: u64) -> PathBuf {
        let path = self.root().join("transcript.jsonl");
        let line = format!(
            "{{\"type\":\"usage\",\"context_window\":{},\"context_used\":{}}}\n",
            context_window, context_used
        );
        std::fs::write(&path, line).expect("Failed to write transcript");
        path
    }
}

impl Default for TestDataDir {
    fn default() -> Self {
        Self::new()
    }
}

/// Set a file's modification time to `age` in the past.
pub fn age_file(path: &Path, age: Duration) {
    let past = SystemTime::now() - age;
    filetime::set_file_mtime(path, filetime::FileTime::from_system_time(past))
        .unwrap_or_else(|e| panic!("Failed to age {}: {}", path.display(), e));
}

/// `days` as a duration.
pub fn days(days: u64) -> Duration {
    Duration::from_secs(days * 24 * 60 * 60)
}
