//! Snapshot storage implementation.

use crate::snapshot::{EventLogEntry, EventType, Snapshot, SnapshotId};
use crate::tags::normalize_tags;
use crate::validate::{compile_pattern, validate_id_text, validate_prefix, validate_snapshot};
use crate::{SnapshotError, SnapshotResult};
use kodama_storage::{
    display_target, ensure_dir, read_bounded, sweep_dirs, AtomicWriter, RecoveryOptions,
    WriteOptions, DEFAULT_MAX_READ_BYTES,
};
use kodama_util::StoragePaths;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

/// Decisions shown by default when reading the latest snapshot.
pub const DEFAULT_MAX_DECISIONS: usize = 5;

/// Configuration for snapshot storage.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Display cap applied by [`SnapshotStore::latest`]. `None` is unlimited.
    pub max_decisions: Option<usize>,

    /// Largest file read into memory.
    pub max_read_bytes: u64,

    /// Lock bounds and path exposure for writes.
    pub write: WriteOptions,

    /// Thresholds for the startup sweep.
    pub recovery: RecoveryOptions,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_decisions: Some(DEFAULT_MAX_DECISIONS),
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
            write: WriteOptions::default(),
            recovery: RecoveryOptions::default(),
        }
    }
}

impl SnapshotConfig {
    /// Whether error messages may contain full paths.
    pub fn expose_paths(&self) -> bool {
        self.write.expose_paths
    }
}

/// A snapshot file found on disk, without its full content.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotFile {
    pub id: SnapshotId,
    pub path: PathBuf,
    /// Title, if the file could be read.
    pub title: Option<String>,
    pub archived: bool,
    pub modified: SystemTime,
}

/// Outcome of an archive pass.
#[derive(Debug, Clone, Default)]
pub struct ArchiveReport {
    pub archived: Vec<SnapshotId>,
    pub failed: Vec<(SnapshotId, String)>,
}

impl ArchiveReport {
    /// Number of files relocated.
    pub fn moved(&self) -> usize {
        self.archived.len()
    }
}

/// Storage for snapshots.
///
/// ```text
/// snapshots/
///   <id>.json            # live snapshots
///   archive/
///     <id>.json          # relocated, unmodified
/// events.jsonl           # append-only event log
/// .session               # active external session id
/// ```
pub struct SnapshotStore {
    paths: StoragePaths,
    config: SnapshotConfig,
    writer: AtomicWriter,
}

impl SnapshotStore {
    /// Open the store, creating directories and sweeping crash leftovers.
    pub async fn open(paths: StoragePaths, config: SnapshotConfig) -> SnapshotResult<Self> {
        ensure_dir(&paths.snapshots).await?;
        ensure_dir(&paths.archive).await?;

        sweep_dirs(
            &[
                paths.data.clone(),
                paths.snapshots.clone(),
                paths.archive.clone(),
                paths.trash.clone(),
            ],
            &config.recovery,
        )
        .await;

        let writer = AtomicWriter::new(config.write.clone());
        Ok(Self {
            paths,
            config,
            writer,
        })
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// Live location of a snapshot.
    pub fn snapshot_path(&self, id: &SnapshotId) -> PathBuf {
        self.paths.snapshots.join(id.file_name())
    }

    /// Archive location of a snapshot.
    pub fn archive_path(&self, id: &SnapshotId) -> PathBuf {
        self.paths.archive.join(id.file_name())
    }

    /// Validate and persist a snapshot, then log a `snapshot_created` event.
    pub async fn save(&self, snapshot: &Snapshot) -> SnapshotResult<PathBuf> {
        validate_snapshot(snapshot)?;

        let path = self.snapshot_path(&snapshot.id);
        self.writer.write_json(&path, snapshot).await?;
        info!(id = %snapshot.id, title = %snapshot.title, "Saved snapshot");

        let event = EventLogEntry::new(EventType::SnapshotCreated)
            .with_snapshot(snapshot.id)
            .with_field("title", snapshot.title.clone());
        if let Err(e) = self.append_event(&event).await {
            warn!(id = %snapshot.id, error = %e, "Snapshot saved but event log append failed");
        }

        Ok(path)
    }

    /// Load a snapshot by its full id from the live or archive directory.
    pub async fn load(&self, id: &str) -> SnapshotResult<Option<Snapshot>> {
        validate_id_text(id)?;
        let file_name = format!("{}.json", id);

        for dir in [&self.paths.snapshots, &self.paths.archive] {
            if let Some(snapshot) = self.read_snapshot(&dir.join(&file_name)).await? {
                return Ok(Some(snapshot));
            }
        }
        Ok(None)
    }

    /// The most recently written live snapshot, with the decision cap applied.
    pub async fn latest(&self) -> SnapshotResult<Option<Snapshot>> {
        let mut files = list_snapshot_files(&self.paths.snapshots).await?;
        files.sort_by(|a, b| b.2.cmp(&a.2));

        for (_, path, _) in files {
            match self.read_snapshot(&path).await {
                Ok(Some(mut snapshot)) => {
                    snapshot.cap_decisions(self.config.max_decisions);
                    return Ok(Some(snapshot));
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Skipping unreadable snapshot"),
            }
        }
        Ok(None)
    }

    /// All readable snapshots, newest first.
    pub async fn list(&self, include_archived: bool) -> SnapshotResult<Vec<Snapshot>> {
        let mut dirs = vec![&self.paths.snapshots];
        if include_archived {
            dirs.push(&self.paths.archive);
        }

        let mut snapshots = Vec::new();
        for dir in dirs {
            for (_, path, _) in list_snapshot_files(dir).await? {
                match self.read_snapshot(&path).await {
                    Ok(Some(snapshot)) => snapshots.push(snapshot),
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Skipping unreadable snapshot"),
                }
            }
        }

        snapshots.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(snapshots)
    }

    /// Snapshots carrying any of `tags`.
    pub async fn list_by_tags(
        &self,
        tags: &[String],
        include_archived: bool,
    ) -> SnapshotResult<Vec<Snapshot>> {
        let wanted = normalize_tags(tags);
        let snapshots = self.list(include_archived).await?;
        Ok(snapshots
            .into_iter()
            .filter(|s| s.tags.iter().any(|t| wanted.contains(t)))
            .collect())
    }

    /// Find a snapshot by full id or unique prefix.
    ///
    /// Live snapshots are searched first; the archive only when no live file
    /// matches.
    pub async fn resolve(&self, id_or_prefix: &str) -> SnapshotResult<SnapshotFile> {
        validate_prefix(id_or_prefix)?;

        for (dir, archived) in [(&self.paths.snapshots, false), (&self.paths.archive, true)] {
            let files = list_snapshot_files(dir).await?;
            if let Some(chosen) = pick_file(files, id_or_prefix)? {
                return Ok(self.describe(chosen, archived).await);
            }
        }
        Err(SnapshotError::not_found(id_or_prefix))
    }

    /// Live snapshots whose file was last modified more than `age` ago.
    pub async fn find_older_than(&self, age: Duration) -> SnapshotResult<Vec<SnapshotFile>> {
        let cutoff = SystemTime::now()
            .checked_sub(age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut found = Vec::new();
        for file in list_snapshot_files(&self.paths.snapshots).await? {
            if file.2 < cutoff {
                found.push(self.describe(file, false).await);
            }
        }
        Ok(found)
    }

    /// Live snapshots whose id matches a shell-style pattern.
    pub async fn find_matching(&self, pattern: &str) -> SnapshotResult<Vec<SnapshotFile>> {
        let pattern = compile_pattern(pattern)?;
        let mut found = Vec::new();
        for file in list_snapshot_files(&self.paths.snapshots).await? {
            if pattern.matches(&file.0.to_string()) {
                found.push(self.describe(file, false).await);
            }
        }
        Ok(found)
    }

    /// Snapshots [`SnapshotStore::archive_old`] would move.
    pub async fn preview_archive(&self, max_age_days: u32) -> SnapshotResult<Vec<SnapshotFile>> {
        self.find_older_than(days(max_age_days)).await
    }

    /// Move live snapshots older than `max_age_days` into the archive.
    ///
    /// Per-file failures are collected and never stop the pass.
    pub async fn archive_old(&self, max_age_days: u32) -> SnapshotResult<ArchiveReport> {
        let candidates = self.preview_archive(max_age_days).await?;
        let mut report = ArchiveReport::default();

        for file in candidates {
            match self.archive_one(&file).await {
                Ok(()) => report.archived.push(file.id),
                Err(e) => {
                    warn!(id = %file.id, error = %e, "Failed to archive snapshot");
                    report.failed.push((file.id, e.to_string()));
                }
            }
        }

        if report.moved() > 0 {
            info!(count = report.moved(), "Archived old snapshots");
        }
        Ok(report)
    }

    async fn archive_one(&self, file: &SnapshotFile) -> SnapshotResult<()> {
        let guard = self.writer.lock(&file.path).await?;
        let result = async {
            let dest = self.archive_path(&file.id);
            if fs::try_exists(&dest).await? {
                return Err(SnapshotError::operation_failed(format!(
                    "{} already exists in the archive",
                    file.id
                )));
            }
            fs::rename(&file.path, &dest).await?;
            debug!(id = %file.id, "Archived snapshot");
            Ok(())
        }
        .await;
        guard.release().await;
        result
    }

    /// Append one entry to the event log.
    pub async fn append_event(&self, entry: &EventLogEntry) -> SnapshotResult<()> {
        let line = serde_json::to_string(entry)?;
        self.writer.append_line(&self.paths.events, &line).await?;
        Ok(())
    }

    /// All parseable event log entries, oldest first.
    pub async fn read_events(&self) -> SnapshotResult<Vec<EventLogEntry>> {
        let content = match fs::read_to_string(&self.paths.events).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => debug!(line = number + 1, error = %e, "Skipping malformed event"),
            }
        }
        Ok(entries)
    }

    /// Persist the active external session id.
    pub async fn save_session_id(&self, session_id: &str) -> SnapshotResult<()> {
        let session_id = session_id.trim();
        if session_id.is_empty() || session_id.contains('\n') {
            return Err(SnapshotError::operation_failed("session id must be a single non-empty line"));
        }
        self.writer
            .write(&self.paths.session, session_id.as_bytes())
            .await?;
        Ok(())
    }

    /// The stored session id, if any. Read errors count as none.
    pub async fn load_session_id(&self) -> Option<String> {
        match fs::read_to_string(&self.paths.session).await {
            Ok(content) => {
                let trimmed = content.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!(error = %e, "Could not read session pointer");
                }
                None
            }
        }
    }

    async fn read_snapshot(&self, path: &Path) -> SnapshotResult<Option<Snapshot>> {
        let expose = self.config.expose_paths();
        let Some(bytes) = read_bounded(path, self.config.max_read_bytes, expose).await? else {
            return Ok(None);
        };

        let snapshot: Snapshot = serde_json::from_slice(&bytes)
            .map_err(|_| SnapshotError::corrupted(display_target(path, expose)))?;

        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if snapshot.id.to_string() != stem {
            return Err(SnapshotError::corrupted(format!(
                "{} (id does not match file name)",
                display_target(path, expose)
            )));
        }
        Ok(Some(snapshot))
    }

    async fn describe(&self, file: (SnapshotId, PathBuf, SystemTime), archived: bool) -> SnapshotFile {
        let (id, path, modified) = file;
        let title = match self.read_snapshot(&path).await {
            Ok(Some(snapshot)) => Some(snapshot.title),
            _ => None,
        };
        SnapshotFile {
            id,
            path,
            title,
            archived,
            modified,
        }
    }
}

/// Exact match first, then a unique prefix. `None` when nothing matches.
fn pick_file(
    mut files: Vec<(SnapshotId, PathBuf, SystemTime)>,
    id_or_prefix: &str,
) -> SnapshotResult<Option<(SnapshotId, PathBuf, SystemTime)>> {
    if let Some(index) = files.iter().position(|(id, _, _)| id.to_string() == id_or_prefix) {
        return Ok(Some(files.swap_remove(index)));
    }
    let mut matches: Vec<_> = files
        .into_iter()
        .filter(|(id, _, _)| id.to_string().starts_with(id_or_prefix))
        .collect();
    match matches.len() {
        0 => Ok(None),
        1 => Ok(Some(matches.remove(0))),
        _ => Err(SnapshotError::AmbiguousId {
            prefix: id_or_prefix.to_string(),
            matches: matches.iter().map(|(id, _, _)| id.to_string()).collect(),
        }),
    }
}

fn days(count: u32) -> Duration {
    Duration::from_secs(u64::from(count) * 24 * 60 * 60)
}

/// `<uuid>.json` files in `dir` with their modification time.
///
/// Temp files, locks and other names are ignored. A missing directory is empty.
pub(crate) async fn list_snapshot_files(
    dir: &Path,
) -> io::Result<Vec<(SnapshotId, PathBuf, SystemTime)>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
            continue;
        };
        let Some(id) = SnapshotId::parse(stem) else {
            continue;
        };
        if id.to_string() != stem {
            continue;
        }
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        files.push((id, entry.path(), modified));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::TempDir;

    async fn setup_test() -> (TempDir, SnapshotStore) {
        let temp_dir = TempDir::new().unwrap();
        let paths = StoragePaths::under(temp_dir.path().join("data"), temp_dir.path().join("config"));
        let store = SnapshotStore::open(paths, SnapshotConfig::default())
            .await
            .unwrap();
        (temp_dir, store)
    }

    fn age_file(path: &Path, days: u64) {
        let past = SystemTime::now() - Duration::from_secs(days * 24 * 60 * 60);
        set_file_mtime(path, FileTime::from_system_time(past)).unwrap();
    }

    #[tokio::test]
    async fn test_open_creates_directories() {
        let (_temp, store) = setup_test().await;
        assert!(store.paths().snapshots.is_dir());
        assert!(store.paths().archive.is_dir());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (_temp, store) = setup_test().await;
        let snapshot = Snapshot::new("Auth work")
            .with_context("Working on login")
            .with_decisions(vec!["use JWT".to_string()])
            .with_tags(["Auth", "backend"]);

        let path = store.save(&snapshot).await.unwrap();
        assert_eq!(path, store.snapshot_path(&snapshot.id));

        let loaded = store.load(&snapshot.id.to_string()).await.unwrap();
        assert_eq!(loaded, Some(snapshot));
    }

    #[tokio::test]
    async fn test_save_rejects_invalid_snapshot() {
        let (_temp, store) = setup_test().await;
        let snapshot = Snapshot::new("  ");

        let err = store.save(&snapshot).await.unwrap_err();
        assert!(matches!(err, SnapshotError::Validation(_)));
        assert!(!store.snapshot_path(&snapshot.id).exists());
        assert!(store.read_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_logs_event() {
        let (_temp, store) = setup_test().await;
        let snapshot = Snapshot::new("Evented");
        store.save(&snapshot).await.unwrap();

        let events = store.read_events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::SnapshotCreated);
        assert_eq!(events[0].snapshot_id, Some(snapshot.id));
    }

    #[tokio::test]
    async fn test_load_rejects_traversal_and_handles_missing() {
        let (_temp, store) = setup_test().await;
        assert!(matches!(
            store.load("../etc/passwd").await,
            Err(SnapshotError::Validation(_))
        ));
        assert!(store.load(&SnapshotId::new().to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_reports_corruption() {
        let (_temp, store) = setup_test().await;
        let id = SnapshotId::new();
        std::fs::write(store.snapshot_path(&id), "{ broken").unwrap();

        let err = store.load(&id.to_string()).await.unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupted(_)));
    }

    #[tokio::test]
    async fn test_latest_caps_decisions_without_touching_file() {
        let (_temp, store) = setup_test().await;
        let decisions: Vec<String> = (1..=10).map(|i| format!("decision {}", i)).collect();
        let snapshot = Snapshot::new("Many decisions").with_decisions(decisions);
        store.save(&snapshot).await.unwrap();

        let latest = store.latest().await.unwrap().unwrap();
        assert_eq!(latest.decisions.len(), 5);
        assert_eq!(latest.decisions[0], "decision 6");

        let raw = store.load(&snapshot.id.to_string()).await.unwrap().unwrap();
        assert_eq!(raw.decisions.len(), 10);
    }

    #[tokio::test]
    async fn test_latest_unlimited_decisions() {
        let temp_dir = TempDir::new().unwrap();
        let paths = StoragePaths::under(temp_dir.path().join("data"), temp_dir.path().join("config"));
        let config = SnapshotConfig {
            max_decisions: None,
            ..SnapshotConfig::default()
        };
        let store = SnapshotStore::open(paths, config).await.unwrap();
        let decisions: Vec<String> = (1..=10).map(|i| i.to_string()).collect();
        store
            .save(&Snapshot::new("All").with_decisions(decisions))
            .await
            .unwrap();

        assert_eq!(store.latest().await.unwrap().unwrap().decisions.len(), 10);
    }

    #[tokio::test]
    async fn test_latest_skips_corrupt_newest() {
        let (_temp, store) = setup_test().await;
        let good = Snapshot::new("Good");
        let good_path = store.save(&good).await.unwrap();
        age_file(&good_path, 1);

        std::fs::write(store.snapshot_path(&SnapshotId::new()), "not json").unwrap();

        let latest = store.latest().await.unwrap().unwrap();
        assert_eq!(latest.id, good.id);
    }

    #[tokio::test]
    async fn test_latest_empty_store() {
        let (_temp, store) = setup_test().await;
        assert!(store.latest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_sorted_and_archive_optional() {
        let (_temp, store) = setup_test().await;
        let older = Snapshot::new("Older").with_timestamp(chrono::Utc::now() - chrono::Duration::hours(2));
        let newer = Snapshot::new("Newer");
        let older_path = store.save(&older).await.unwrap();
        store.save(&newer).await.unwrap();

        let listed = store.list(false).await.unwrap();
        assert_eq!(listed.iter().map(|s| s.id).collect::<Vec<_>>(), vec![newer.id, older.id]);

        age_file(&older_path, 40);
        store.archive_old(30).await.unwrap();
        assert_eq!(store.list(false).await.unwrap().len(), 1);
        assert_eq!(store.list(true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_list_by_tags() {
        let (_temp, store) = setup_test().await;
        store.save(&Snapshot::new("A").with_tags(["api"])).await.unwrap();
        store.save(&Snapshot::new("B").with_tags(["ui"])).await.unwrap();

        let found = store.list_by_tags(&["API".to_string()], false).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "A");
    }

    #[tokio::test]
    async fn test_resolve_exact_prefix_and_ambiguity() {
        let (_temp, store) = setup_test().await;
        let a = Snapshot::new("A");
        store.save(&a).await.unwrap();

        let full = a.id.to_string();
        let resolved = store.resolve(&full).await.unwrap();
        assert_eq!(resolved.id, a.id);
        assert_eq!(resolved.title.as_deref(), Some("A"));

        let by_prefix = store.resolve(&full[..6]).await.unwrap();
        assert_eq!(by_prefix.id, a.id);

        assert!(matches!(
            store.resolve(&full[..3]).await,
            Err(SnapshotError::Validation(_))
        ));
        assert!(matches!(
            store.resolve("ffffffff-0000").await,
            Err(SnapshotError::NotFound(_))
        ));

        // Two ids sharing a prefix.
        let twin_a: SnapshotId = SnapshotId::parse("abcd0000-0000-4000-8000-000000000001").unwrap();
        let twin_b: SnapshotId = SnapshotId::parse("abcd0000-0000-4000-8000-000000000002").unwrap();
        let mut first = Snapshot::new("Twin A");
        first.id = twin_a;
        let mut second = Snapshot::new("Twin B");
        second.id = twin_b;
        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();

        assert!(matches!(
            store.resolve("abcd0000").await,
            Err(SnapshotError::AmbiguousId { .. })
        ));
        assert_eq!(
            store.resolve(&twin_b.to_string()).await.unwrap().id,
            twin_b
        );
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_archive() {
        let (_temp, store) = setup_test().await;
        let old = Snapshot::new("Archived work");
        let old_path = store.save(&old).await.unwrap();
        age_file(&old_path, 40);
        store.archive_old(30).await.unwrap();

        let found = store.resolve(&old.id.to_string()[..8]).await.unwrap();
        assert_eq!(found.id, old.id);
        assert!(found.archived);
        assert_eq!(found.path, store.archive_path(&old.id));
        assert_eq!(found.title.as_deref(), Some("Archived work"));

        // A live match wins over the archive.
        let mut live_twin = Snapshot::new("Live again");
        live_twin.id = old.id;
        store.save(&live_twin).await.unwrap();
        let found = store.resolve(&old.id.to_string()).await.unwrap();
        assert!(!found.archived);
        assert_eq!(found.title.as_deref(), Some("Live again"));
    }

    #[tokio::test]
    async fn test_find_targets() {
        let (_temp, store) = setup_test().await;
        let old = Snapshot::new("Old");
        let fresh = Snapshot::new("Fresh");
        let old_path = store.save(&old).await.unwrap();
        store.save(&fresh).await.unwrap();
        age_file(&old_path, 10);

        let older = store.find_older_than(days(7)).await.unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].id, old.id);

        let prefix = &old.id.to_string()[..8];
        let matching = store.find_matching(&format!("{}*", prefix)).await.unwrap();
        assert!(matching.iter().any(|f| f.id == old.id));
        assert_eq!(store.find_matching("*").await.unwrap().len(), 2);
        assert!(store.find_matching("../*").await.is_err());
    }

    #[tokio::test]
    async fn test_archive_is_lossless_and_never_overwrites() {
        let (_temp, store) = setup_test().await;
        let old = Snapshot::new("Old");
        let keep = Snapshot::new("Keep");
        let old_path = store.save(&old).await.unwrap();
        store.save(&keep).await.unwrap();
        let before = std::fs::read(&old_path).unwrap();
        age_file(&old_path, 31);

        let preview = store.preview_archive(30).await.unwrap();
        assert_eq!(preview.len(), 1);
        assert!(old_path.exists());

        let report = store.archive_old(30).await.unwrap();
        assert_eq!(report.moved(), 1);
        assert!(!old_path.exists());
        assert_eq!(std::fs::read(store.archive_path(&old.id)).unwrap(), before);
        assert!(store.snapshot_path(&keep.id).exists());

        // Loading still finds the archived snapshot.
        assert!(store.load(&old.id.to_string()).await.unwrap().is_some());

        // A live copy with the same id is not moved over the archived one.
        std::fs::write(&old_path, b"different").unwrap();
        age_file(&old_path, 31);
        let report = store.archive_old(30).await.unwrap();
        assert_eq!(report.moved(), 0);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(std::fs::read(store.archive_path(&old.id)).unwrap(), before);
    }

    #[tokio::test]
    async fn test_events_skip_malformed_lines() {
        let (_temp, store) = setup_test().await;
        store
            .append_event(&EventLogEntry::new(EventType::ContextInjected))
            .await
            .unwrap();
        let mut content = std::fs::read_to_string(&store.paths().events).unwrap();
        content.push_str("garbage\n");
        std::fs::write(&store.paths().events, content).unwrap();
        store
            .append_event(&EventLogEntry::new(EventType::Error).with_field("message", "boom"))
            .await
            .unwrap();

        let events = store.read_events().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, EventType::Error);
    }

    #[tokio::test]
    async fn test_session_pointer() {
        let (_temp, store) = setup_test().await;
        assert!(store.load_session_id().await.is_none());

        store.save_session_id("  sess-42\n").await.unwrap();
        assert_eq!(store.load_session_id().await.as_deref(), Some("sess-42"));

        store.save_session_id("sess-43").await.unwrap();
        assert_eq!(store.load_session_id().await.as_deref(), Some("sess-43"));

        assert!(store.save_session_id("   ").await.is_err());
    }

    #[tokio::test]
    async fn test_open_sweeps_orphaned_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let paths = StoragePaths::under(temp_dir.path().join("data"), temp_dir.path().join("config"));
        std::fs::create_dir_all(&paths.snapshots).unwrap();
        let orphan = paths
            .snapshots
            .join(format!("{}.tmp.{}", SnapshotId::new().file_name(), uuid::Uuid::new_v4()));
        std::fs::write(&orphan, b"partial").unwrap();
        age_file(&orphan, 1);

        let _store = SnapshotStore::open(paths, SnapshotConfig::default()).await.unwrap();
        assert!(!orphan.exists());
    }
}
