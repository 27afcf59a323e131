//! Bounded-concurrency batch operations.
//!
//! Ids are processed in groups of [`BATCH_SIZE`]; each group runs
//! concurrently and completes before the next one starts.

use crate::store::SnapshotFile;
use crate::trash::{TrashItem, TrashManager};
use crate::SnapshotResult;
use futures::future::join_all;
use serde::Serialize;
use std::future::Future;
use tracing::debug;

/// Items processed concurrently per group.
pub const BATCH_SIZE: usize = 5;

/// One item that failed in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub id: String,
    pub message: String,
}

/// Aggregate outcome of a batch. Failures never abort the batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport<T> {
    pub succeeded: Vec<T>,
    pub failed: Vec<BatchFailure>,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<T> BatchReport<T> {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Run `op` over `items` in groups of [`BATCH_SIZE`].
///
/// Failures are labelled with the item's `as_ref()` text.
pub async fn run_batched<I, T, F, Fut>(items: &[I], op: F) -> BatchReport<T>
where
    I: AsRef<str> + Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = SnapshotResult<T>>,
{
    let mut report = BatchReport::default();
    for (group, chunk) in items.chunks(BATCH_SIZE).enumerate() {
        debug!(group, size = chunk.len(), "Running batch group");
        let results = join_all(chunk.iter().cloned().map(&op)).await;
        for (id, result) in chunk.iter().zip(results) {
            match result {
                Ok(value) => report.succeeded.push(value),
                Err(e) => report.failed.push(BatchFailure {
                    id: id.as_ref().to_string(),
                    message: e.to_string(),
                }),
            }
        }
    }
    report
}

/// Restore several trashed snapshots.
pub async fn restore_many(trash: &TrashManager, ids: &[String]) -> BatchReport<TrashItem> {
    run_batched(ids, |id| async move { trash.restore(&id).await }).await
}

/// Move several snapshot files into the trash.
pub async fn trash_many(trash: &TrashManager, targets: &[SnapshotFile]) -> BatchReport<TrashItem> {
    run_batched(targets, |target| async move {
        let id = target.id.to_string();
        trash
            .move_to_trash(&target.path, &id, target.title.as_deref())
            .await
    })
    .await
}

impl AsRef<str> for SnapshotFile {
    fn as_ref(&self) -> &str {
        self.path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Snapshot, SnapshotConfig, SnapshotError, SnapshotStore};
    use kodama_util::StoragePaths;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_groups_never_exceed_batch_size() {
        let ids: Vec<String> = (0..12).map(|i| i.to_string()).collect();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let report = run_batched(&ids, |id| {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                if id == "7" {
                    Err(SnapshotError::not_found(id))
                } else {
                    Ok(id)
                }
            }
        })
        .await;

        assert_eq!(report.succeeded.len(), 11);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].id, "7");
        assert!(peak.load(Ordering::SeqCst) <= BATCH_SIZE);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_trash_and_restore_many() {
        let temp = TempDir::new().unwrap();
        let paths = StoragePaths::under(temp.path().join("data"), temp.path().join("config"));
        let store = SnapshotStore::open(paths.clone(), SnapshotConfig::default())
            .await
            .unwrap();
        let trash = TrashManager::open(paths, SnapshotConfig::default())
            .await
            .unwrap();

        for i in 0..7 {
            store.save(&Snapshot::new(format!("Snapshot {}", i))).await.unwrap();
        }
        let targets = store.find_matching("*").await.unwrap();
        assert_eq!(targets.len(), 7);

        let trashed = trash_many(&trash, &targets).await;
        assert!(trashed.is_clean(), "{:?}", trashed.failed);
        assert_eq!(trash.list().await.unwrap().len(), 7);
        assert!(store.list(false).await.unwrap().is_empty());

        let mut ids: Vec<String> = targets.iter().map(|t| t.id.to_string()).collect();
        ids.push("00000000-missing".to_string());
        let restored = restore_many(&trash, &ids).await;
        assert_eq!(restored.succeeded.len(), 7);
        assert_eq!(restored.failed.len(), 1);
        assert_eq!(store.list(false).await.unwrap().len(), 7);
        assert!(trash.list().await.unwrap().is_empty());
    }
}
