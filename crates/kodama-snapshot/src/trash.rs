//! Soft delete with restore.
//!
//! Trashed snapshots are renamed into `.trash/<id>_<stamp>.json` and listed in
//! `.trash/metadata.json`. The index is reconciled against the directory on
//! every listing, so a crash between the rename and the index update heals
//! itself on the next read.

use crate::snapshot::{Snapshot, SnapshotId};
use crate::store::SnapshotConfig;
use crate::validate::{validate_id_text, validate_prefix, ValidationError};
use crate::{SnapshotError, SnapshotResult};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use kodama_storage::{ensure_dir, read_bounded, read_json, sweep_dirs, AtomicWriter, FileLock};
use kodama_util::path::has_parent_component;
use kodama_util::StoragePaths;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Version written into the trash index.
pub const TRASH_INDEX_VERSION: &str = "1.0.0";

/// Days a trashed snapshot is kept by default.
pub const DEFAULT_RETENTION_DAYS: u32 = 7;

/// Longest title stored in the index.
const MAX_TITLE_LEN: usize = 200;

/// Stamp bumps tried before giving up on a free trash name.
const MAX_NAME_ATTEMPTS: usize = 1000;

/// Stamp format embedded in trash file names.
const STAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S-%3fZ";

/// One trashed snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrashItem {
    pub original_id: String,
    /// Where a restore puts the file back. Always the live directory.
    pub original_path: PathBuf,
    pub trashed_path: PathBuf,
    pub trashed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrashIndex {
    version: String,
    #[serde(default)]
    items: Vec<TrashItem>,
}

impl Default for TrashIndex {
    fn default() -> Self {
        Self {
            version: TRASH_INDEX_VERSION.to_string(),
            items: Vec::new(),
        }
    }
}

/// Outcome of a permanent deletion pass.
#[derive(Debug, Clone, Default)]
pub struct PurgeReport {
    pub purged: Vec<TrashItem>,
    /// Items that could not be removed, with the reason. They stay in the index.
    pub failed: Vec<(TrashItem, String)>,
}

impl PurgeReport {
    pub fn count(&self) -> usize {
        self.purged.len()
    }
}

/// Summary of the trash contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrashStats {
    pub count: usize,
    pub total_size: u64,
    pub oldest: Option<DateTime<Utc>>,
}

/// Manages the trash directory and its index.
pub struct TrashManager {
    paths: StoragePaths,
    config: SnapshotConfig,
    writer: AtomicWriter,
    /// Serializes index updates within this process. The lock file covers
    /// other processes.
    index_mutex: Mutex<()>,
}

impl TrashManager {
    /// Open the trash, creating its directory and sweeping crash leftovers.
    pub async fn open(paths: StoragePaths, config: SnapshotConfig) -> SnapshotResult<Self> {
        ensure_dir(&paths.trash).await?;
        sweep_dirs(&[paths.trash.clone()], &config.recovery).await;

        let writer = AtomicWriter::new(config.write.clone());
        Ok(Self {
            paths,
            config,
            writer,
            index_mutex: Mutex::new(()),
        })
    }

    /// Move a snapshot file into the trash.
    ///
    /// `path` must be `<id>.json` directly inside the live or archive
    /// directory.
    pub async fn move_to_trash(
        &self,
        path: &Path,
        id: &str,
        title: Option<&str>,
    ) -> SnapshotResult<TrashItem> {
        validate_id_text(id)?;
        self.check_snapshot_path(path, id)?;

        let size = match fs::metadata(path).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SnapshotError::not_found(id));
            }
            Err(e) => return Err(e.into()),
        };

        let trashed_at = Utc::now();
        let trashed_path = self.paths.trash.join(trash_file_name(id, trashed_at));
        let item = TrashItem {
            original_id: id.to_string(),
            original_path: self.paths.snapshots.join(format!("{}.json", id)),
            trashed_path,
            trashed_at,
            title: title.map(truncate_title),
            size: Some(size),
        };

        let source_guard = self.writer.lock(path).await?;
        let result = self.record_trashed(path, item).await;
        source_guard.release().await;
        let item = result?;

        info!(id = %id, trashed = %item.trashed_path.display(), "Moved snapshot to trash");
        Ok(item)
    }

    /// Restore a trashed snapshot by full id or unique prefix.
    ///
    /// The snapshot always goes back to the live directory. An occupied
    /// destination is never overwritten.
    pub async fn restore(&self, id_or_prefix: &str) -> SnapshotResult<TrashItem> {
        validate_prefix(id_or_prefix)?;

        let _in_process = self.index_mutex.lock().await;
        let guard = self.writer.lock(&self.paths.trash_metadata).await?;
        let result = self.restore_locked(&guard, id_or_prefix).await;
        guard.release().await;
        result
    }

    async fn restore_locked(&self, guard: &FileLock, id_or_prefix: &str) -> SnapshotResult<TrashItem> {
        let mut index = self.load_index().await;
        let position = pick_item(&index.items, id_or_prefix)?;
        let item = index.items[position].clone();

        if !self.in_trash(&item.trashed_path) || !fs::try_exists(&item.trashed_path).await? {
            index.items.remove(position);
            self.persist_index(guard, &index).await?;
            warn!(id = %item.original_id, "Trash entry pointed at a missing file");
            return Err(SnapshotError::TrashFileMissing(item.original_id));
        }

        validate_id_text(&item.original_id)?;
        let dest = self.paths.snapshots.join(format!("{}.json", item.original_id));
        ensure_dir(&self.paths.snapshots).await?;

        let dest_guard = self.writer.lock(&dest).await?;
        let result = async {
            if fs::try_exists(&dest).await? {
                return Err(SnapshotError::RestoreConflict(item.original_id.clone()));
            }
            fs::rename(&item.trashed_path, &dest).await?;

            index.items.remove(position);
            if let Err(e) = self.persist_index(guard, &index).await {
                if let Err(undo) = fs::rename(&dest, &item.trashed_path).await {
                    warn!(id = %item.original_id, error = %undo, "Could not undo restore");
                }
                return Err(e);
            }
            Ok(())
        }
        .await;
        dest_guard.release().await;
        result?;

        info!(id = %item.original_id, "Restored snapshot from trash");
        Ok(TrashItem {
            original_path: dest,
            ..item
        })
    }

    /// Reconciled trash contents, newest first.
    ///
    /// Entries whose file is gone are dropped and trash files without an
    /// entry are adopted. The index is rewritten when anything changed.
    pub async fn list(&self) -> SnapshotResult<Vec<TrashItem>> {
        let _in_process = self.index_mutex.lock().await;
        let guard = self.writer.lock(&self.paths.trash_metadata).await?;
        let result = async {
            let mut index = self.load_index().await;
            if self.reconcile(&mut index).await? {
                self.persist_index(&guard, &index).await?;
            }
            Ok(index.items)
        }
        .await;
        guard.release().await;
        result.map(sorted_newest_first)
    }

    /// Like [`TrashManager::list`] without writing anything.
    pub async fn scan(&self) -> SnapshotResult<Vec<TrashItem>> {
        let mut index = self.load_index().await;
        self.reconcile(&mut index).await?;
        Ok(sorted_newest_first(index.items))
    }

    /// Items [`TrashManager::cleanup_old`] would purge.
    pub async fn preview_cleanup(&self, retention_days: u32) -> SnapshotResult<Vec<TrashItem>> {
        let cutoff = retention_cutoff(retention_days);
        Ok(self
            .scan()
            .await?
            .into_iter()
            .filter(|item| item.trashed_at < cutoff)
            .collect())
    }

    /// Permanently delete items trashed more than `retention_days` ago.
    pub async fn cleanup_old(&self, retention_days: u32) -> SnapshotResult<PurgeReport> {
        let cutoff = retention_cutoff(retention_days);
        let report = self.purge(|item| item.trashed_at < cutoff).await?;
        if report.count() > 0 {
            info!(count = report.count(), retention_days, "Purged old trash items");
        }
        Ok(report)
    }

    /// Permanently delete everything in the trash.
    pub async fn empty(&self) -> SnapshotResult<PurgeReport> {
        let report = self.purge(|_| true).await?;
        info!(count = report.count(), "Emptied trash");
        Ok(report)
    }

    /// Items whose id equals or starts with `partial_id`.
    ///
    /// Input that fails the id guard matches nothing.
    pub async fn find(&self, partial_id: &str) -> SnapshotResult<Vec<TrashItem>> {
        if validate_id_text(partial_id).is_err() {
            return Ok(Vec::new());
        }
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|item| item.original_id.starts_with(partial_id))
            .collect())
    }

    /// Count, total size and oldest entry of the reconciled trash.
    pub async fn stats(&self) -> SnapshotResult<TrashStats> {
        let items = self.list().await?;
        Ok(TrashStats {
            count: items.len(),
            total_size: items.iter().filter_map(|item| item.size).sum(),
            oldest: items.iter().map(|item| item.trashed_at).min(),
        })
    }

    async fn purge<F>(&self, select: F) -> SnapshotResult<PurgeReport>
    where
        F: Fn(&TrashItem) -> bool,
    {
        let _in_process = self.index_mutex.lock().await;
        let guard = self.writer.lock(&self.paths.trash_metadata).await?;
        let result = async {
            let mut index = self.load_index().await;
            self.reconcile(&mut index).await?;

            let mut report = PurgeReport::default();
            let mut kept = Vec::new();
            for item in index.items.drain(..) {
                if !select(&item) {
                    kept.push(item);
                    continue;
                }
                match fs::remove_file(&item.trashed_path).await {
                    Ok(()) => report.purged.push(item),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => report.purged.push(item),
                    Err(e) => {
                        warn!(id = %item.original_id, error = %e, "Failed to delete trash item");
                        report.failed.push((item.clone(), e.to_string()));
                        kept.push(item);
                    }
                }
            }
            index.items = kept;
            self.persist_index(&guard, &index).await?;
            Ok(report)
        }
        .await;
        guard.release().await;
        result
    }

    async fn record_trashed(&self, source: &Path, item: TrashItem) -> SnapshotResult<TrashItem> {
        let _in_process = self.index_mutex.lock().await;
        let guard = self.writer.lock(&self.paths.trash_metadata).await?;
        let result = async {
            let mut index = self.load_index().await;
            let item = self.claim_free_name(&index, item).await?;
            fs::rename(source, &item.trashed_path).await?;
            index.items.push(item.clone());
            if let Err(e) = self.persist_index(&guard, &index).await {
                if let Err(undo) = fs::rename(&item.trashed_path, source).await {
                    warn!(id = %item.original_id, error = %undo, "Could not undo trash move");
                }
                return Err(e);
            }
            Ok(item)
        }
        .await;
        guard.release().await;
        result
    }

    /// Move `item` to a trash name nothing else uses yet.
    ///
    /// Every trash rename happens under the metadata lock, so a name that is
    /// free here stays free until the rename. On a collision the stamp is
    /// advanced a millisecond at a time, keeping the name parseable.
    async fn claim_free_name(&self, index: &TrashIndex, mut item: TrashItem) -> SnapshotResult<TrashItem> {
        for _ in 0..MAX_NAME_ATTEMPTS {
            let taken = index.items.iter().any(|other| other.trashed_path == item.trashed_path)
                || fs::try_exists(&item.trashed_path).await?;
            if !taken {
                return Ok(item);
            }
            debug!(id = %item.original_id, "Trash name in use, advancing stamp");
            item.trashed_at = item.trashed_at + chrono::Duration::milliseconds(1);
            item.trashed_path = self
                .paths
                .trash
                .join(trash_file_name(&item.original_id, item.trashed_at));
        }
        Err(SnapshotError::operation_failed(format!(
            "no free trash name for {}",
            item.original_id
        )))
    }

    async fn load_index(&self) -> TrashIndex {
        let path = &self.paths.trash_metadata;
        match read_json::<TrashIndex>(path, self.config.max_read_bytes, self.config.expose_paths()).await {
            Ok(Some(index)) => index,
            Ok(None) => TrashIndex::default(),
            Err(e) => {
                warn!(error = %e, "Trash index unreadable, rebuilding from directory");
                TrashIndex::default()
            }
        }
    }

    async fn persist_index(&self, guard: &FileLock, index: &TrashIndex) -> SnapshotResult<()> {
        let content = serde_json::to_vec_pretty(index)?;
        self.writer.write_locked(guard, &content).await?;
        Ok(())
    }

    /// Make the index match the directory. Returns whether anything changed.
    async fn reconcile(&self, index: &mut TrashIndex) -> SnapshotResult<bool> {
        let before = index.items.len();
        let mut kept = Vec::with_capacity(before);
        for item in index.items.drain(..) {
            if self.in_trash(&item.trashed_path) && fs::try_exists(&item.trashed_path).await.unwrap_or(false) {
                kept.push(item);
            } else {
                debug!(id = %item.original_id, "Dropping trash entry without a file");
            }
        }
        let mut changed = kept.len() != before;

        let known: HashSet<PathBuf> = kept.iter().map(|item| item.trashed_path.clone()).collect();
        for path in self.trash_files().await? {
            if known.contains(&path) {
                continue;
            }
            if let Some(item) = self.adopt(&path).await {
                debug!(id = %item.original_id, "Adopted trash file without an entry");
                kept.push(item);
                changed = true;
            }
        }

        index.items = kept;
        Ok(changed)
    }

    async fn trash_files(&self) -> SnapshotResult<Vec<PathBuf>> {
        let mut entries = match fs::read_dir(&self.paths.trash).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_str().and_then(parse_trash_file_name).is_some() {
                files.push(entry.path());
            }
        }
        Ok(files)
    }

    async fn adopt(&self, path: &Path) -> Option<TrashItem> {
        let name = path.file_name()?.to_str()?;
        let (id, stamp) = parse_trash_file_name(name)?;
        let metadata = fs::metadata(path).await.ok()?;

        let trashed_at = stamp.or_else(|| metadata.modified().ok().map(DateTime::<Utc>::from))?;
        let title = match read_bounded(path, self.config.max_read_bytes, false).await {
            Ok(Some(bytes)) => serde_json::from_slice::<Snapshot>(&bytes).ok().map(|s| truncate_title(&s.title)),
            _ => None,
        };

        Some(TrashItem {
            original_id: id.to_string(),
            original_path: self.paths.snapshots.join(id.file_name()),
            trashed_path: path.to_path_buf(),
            trashed_at,
            title,
            size: Some(metadata.len()),
        })
    }

    fn in_trash(&self, path: &Path) -> bool {
        path.parent() == Some(self.paths.trash.as_path()) && !has_parent_component(path)
    }

    fn check_snapshot_path(&self, path: &Path, id: &str) -> SnapshotResult<()> {
        if has_parent_component(path) {
            return Err(ValidationError::PathOutsideStore.into());
        }
        let parent = path.parent();
        let in_store = parent == Some(self.paths.snapshots.as_path())
            || parent == Some(self.paths.archive.as_path());
        let expected = format!("{}.json", id);
        let named_for_id = path.file_name().and_then(|n| n.to_str()) == Some(expected.as_str());
        if !in_store || !named_for_id {
            return Err(ValidationError::PathOutsideStore.into());
        }
        Ok(())
    }
}

fn pick_item(items: &[TrashItem], id_or_prefix: &str) -> SnapshotResult<usize> {
    if let Some(exact) = items.iter().position(|item| item.original_id == id_or_prefix) {
        return Ok(exact);
    }
    let matches: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.original_id.starts_with(id_or_prefix))
        .map(|(i, _)| i)
        .collect();
    match matches.as_slice() {
        [] => Err(SnapshotError::not_found(id_or_prefix)),
        [only] => Ok(*only),
        _ => Err(SnapshotError::AmbiguousId {
            prefix: id_or_prefix.to_string(),
            matches: matches.iter().map(|&i| items[i].original_id.clone()).collect(),
        }),
    }
}

fn trash_file_name(id: &str, trashed_at: DateTime<Utc>) -> String {
    let stamp = trashed_at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("{}_{}.json", id, stamp)
}

/// Split `<uuid>_<stamp>.json` into its id and, when parseable, its stamp.
fn parse_trash_file_name(name: &str) -> Option<(SnapshotId, Option<DateTime<Utc>>)> {
    let stem = name.strip_suffix(".json")?;
    let (id, stamp) = stem.split_once('_')?;
    let id = SnapshotId::parse(id)?;
    let stamp = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc());
    Some((id, stamp))
}

fn truncate_title(title: &str) -> String {
    title.chars().take(MAX_TITLE_LEN).collect()
}

fn retention_cutoff(days: u32) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::days(i64::from(days))
}

fn sorted_newest_first(mut items: Vec<TrashItem>) -> Vec<TrashItem> {
    items.sort_by(|a, b| b.trashed_at.cmp(&a.trashed_at));
    items
}
