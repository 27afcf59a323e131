//! Advisory file locks.
//!
//! A lock on `<path>` is the marker file `<path>.lock`, created with
//! create-new semantics and holding the owner's pid. Because the marker lives
//! on the filesystem it serializes writers in this process and in any other
//! kodama process touching the same path.
//!
//! Staleness is judged by probing the recorded pid. That is a liveness
//! heuristic only: pids get reused and containers have their own pid
//! namespaces.

use crate::atomic::ensure_dir;
use crate::error::{display_target, StorageError, StorageResult};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Suffix appended to the target file name to form the lock file name.
pub const LOCK_SUFFIX: &str = ".lock";

/// Marker inside the name of a lock file that is being broken.
pub const STALE_MARKER: &str = ".lock.stale.";

/// Longest pause between two acquisition attempts.
const MAX_PAUSE: Duration = Duration::from_millis(100);

/// Bounds for lock acquisition.
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Total time budget for acquiring the lock.
    pub timeout: Duration,
    /// Number of create attempts within the budget.
    pub retries: u32,
    /// A lock file whose content is not a pid is treated as stale once it is
    /// older than this. Protects a lock whose owner has created the file but
    /// not yet written its pid.
    pub unreadable_grace: Duration,
    /// Whether error messages may contain full paths.
    pub expose_paths: bool,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            retries: 5,
            unreadable_grace: Duration::from_secs(2),
            expose_paths: false,
        }
    }
}

/// A held advisory lock. Released on drop.
#[derive(Debug)]
pub struct FileLock {
    target: PathBuf,
    lock_path: PathBuf,
    released: bool,
}

impl FileLock {
    /// Acquire the lock for `target`, waiting at most `options.timeout`.
    pub async fn acquire(target: &Path, options: &LockOptions) -> StorageResult<Self> {
        let lock_path = lock_path_for(target)?;
        if let Some(parent) = lock_path.parent() {
            ensure_dir(parent).await?;
        }

        let attempts = options.retries.max(1);
        let pause = MAX_PAUSE.min(options.timeout / attempts);
        let started = Instant::now();

        for attempt in 0..attempts {
            if started.elapsed() > options.timeout {
                break;
            }

            match try_create(&lock_path).await {
                Ok(()) => {
                    trace!(path = %lock_path.display(), attempt, "Acquired lock");
                    return Ok(Self {
                        target: target.to_path_buf(),
                        lock_path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    let broken = is_stale(&lock_path, options.unreadable_grace).await
                        && break_stale(&lock_path, options.unreadable_grace).await;
                    if !broken {
                        trace!(path = %lock_path.display(), attempt, "Lock busy");
                        tokio::time::sleep(pause).await;
                    }
                }
                Err(e) => return Err(StorageError::Io(e)),
            }
        }

        Err(StorageError::LockTimeout {
            target: display_target(target, options.expose_paths),
        })
    }

    /// The path this lock protects.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// The marker file backing this lock.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Release the lock now instead of at drop.
    pub async fn release(mut self) {
        self.released = true;
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.lock_path.display(), error = %e, "Failed to release lock"),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

/// Lock file path for a target: `<target>.lock`.
pub fn lock_path_for(target: &Path) -> StorageResult<PathBuf> {
    let name = target
        .file_name()
        .ok_or_else(|| StorageError::invalid_path("lock target has no file name"))?;
    let mut lock_name = name.to_os_string();
    lock_name.push(LOCK_SUFFIX);
    Ok(target.with_file_name(lock_name))
}

async fn try_create(lock_path: &Path) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(lock_path).await?;
    let written = async {
        file.write_all(std::process::id().to_string().as_bytes())
            .await?;
        file.flush().await
    }
    .await;

    if let Err(e) = written {
        drop(file);
        let _ = fs::remove_file(lock_path).await;
        return Err(e);
    }
    Ok(())
}

/// Whether the lock at `lock_path` belongs to nobody.
///
/// A lock is stale when its recorded pid no longer exists, or when it holds
/// no readable pid and is older than `unreadable_grace`.
pub async fn is_stale(lock_path: &Path, unreadable_grace: Duration) -> bool {
    match fs::read_to_string(lock_path).await {
        Ok(content) => match content.trim().parse::<u32>() {
            Ok(pid) => !process_alive(pid),
            Err(_) => older_than(lock_path, unreadable_grace).await,
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(_) => older_than(lock_path, unreadable_grace).await,
    }
}

/// Remove a stale lock by moving it aside first.
///
/// Only one contender can win the rename, so two processes never both
/// believe they removed the same lock. The file that was moved is judged
/// again: between the staleness check and the rename another process may
/// have broken the old lock and created its own. A live lock is linked back
/// into place and the attempt counts as contention.
///
/// Returns whether a stale lock was removed.
pub(crate) async fn break_stale(lock_path: &Path, unreadable_grace: Duration) -> bool {
    let mut grave_name = lock_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    grave_name.push(format!(".stale.{}", Uuid::new_v4()));
    let grave = lock_path.with_file_name(grave_name);

    if let Err(e) = fs::rename(lock_path, &grave).await {
        trace!(path = %lock_path.display(), error = %e, "Stale lock already handled");
        return false;
    }

    if !is_stale(&grave, unreadable_grace).await {
        // No-clobber: if yet another lock appeared meanwhile, it stays.
        match fs::hard_link(&grave, lock_path).await {
            Ok(()) => debug!(path = %lock_path.display(), "Lock was taken over; put it back"),
            Err(e) => warn!(
                path = %lock_path.display(),
                error = %e,
                "Could not put back a live lock moved aside"
            ),
        }
        let _ = fs::remove_file(&grave).await;
        return false;
    }

    let _ = fs::remove_file(&grave).await;
    debug!(path = %lock_path.display(), "Removed stale lock");
    true
}

pub(crate) async fn older_than(path: &Path, age: Duration) -> bool {
    match fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => SystemTime::now()
            .duration_since(modified)
            .map(|elapsed| elapsed > age)
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// Whether a process with this pid exists.
#[cfg(unix)]
#[allow(unsafe_code)]
pub fn process_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    // Signal 0 performs the permission and existence checks only.
    let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
    result == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

// TODO(windows): check liveness with OpenProcess; until then locks only expire by age.
#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fast() -> LockOptions {
        LockOptions {
            timeout: Duration::from_millis(200),
            retries: 4,
            ..LockOptions::default()
        }
    }

    #[test]
    fn lock_path_appends_suffix() {
        let path = lock_path_for(Path::new("/data/snapshots/abc.json")).unwrap();
        assert_eq!(path, PathBuf::from("/data/snapshots/abc.json.lock"));
    }

    #[tokio::test]
    async fn acquire_writes_pid_and_drop_releases() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a.json");

        let lock = FileLock::acquire(&target, &fast()).await.unwrap();
        let content = std::fs::read_to_string(lock.lock_path()).unwrap();
        assert_eq!(content, std::process::id().to_string());

        drop(lock);
        assert!(!dir.path().join("a.json.lock").exists());
    }

    #[tokio::test]
    async fn second_acquire_times_out_while_held() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a.json");

        let held = FileLock::acquire(&target, &fast()).await.unwrap();
        let err = FileLock::acquire(&target, &fast()).await.unwrap_err();
        assert!(matches!(err, StorageError::LockTimeout { .. }));

        held.release().await;
        let again = FileLock::acquire(&target, &fast()).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn waiter_succeeds_once_holder_releases() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a.json");
        let options = LockOptions::default();

        let held = FileLock::acquire(&target, &options).await.unwrap();
        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            held.release().await;
        });

        let waited = FileLock::acquire(&target, &options).await;
        releaser.await.unwrap();
        assert!(waited.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dead_owner_lock_is_broken() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a.json");
        // pid_max on Linux never reaches this value.
        std::fs::write(dir.path().join("a.json.lock"), "2147483000").unwrap();

        let lock = FileLock::acquire(&target, &fast()).await.unwrap();
        let content = std::fs::read_to_string(lock.lock_path()).unwrap();
        assert_eq!(content, std::process::id().to_string());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(STALE_MARKER))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn late_breaker_leaves_new_owner_alone() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a.json");
        let lock_file = dir.path().join("a.json.lock");
        std::fs::write(&lock_file, "2147483000").unwrap();

        // One contender sees the dead owner, then stalls.
        assert!(is_stale(&lock_file, Duration::from_secs(2)).await);

        // Another breaks the stale lock and takes it.
        let holder = FileLock::acquire(&target, &fast()).await.unwrap();

        // The stalled contender now tries to break what it judged stale.
        assert!(!break_stale(&lock_file, Duration::from_secs(2)).await);
        assert_eq!(
            std::fs::read_to_string(&lock_file).unwrap(),
            std::process::id().to_string()
        );

        let err = FileLock::acquire(&target, &fast()).await.unwrap_err();
        assert!(matches!(err, StorageError::LockTimeout { .. }));

        let graves: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(STALE_MARKER))
            .collect();
        assert!(graves.is_empty());

        holder.release().await;
        assert!(FileLock::acquire(&target, &fast()).await.is_ok());
    }

    #[tokio::test]
    async fn fresh_unreadable_lock_is_respected() {
        let dir = tempdir().unwrap();
        let lock_file = dir.path().join("a.json.lock");
        std::fs::write(&lock_file, "").unwrap();
        assert!(!is_stale(&lock_file, Duration::from_secs(5)).await);

        let past = filetime::FileTime::from_system_time(SystemTime::now() - Duration::from_secs(30));
        filetime::set_file_mtime(&lock_file, past).unwrap();
        assert!(is_stale(&lock_file, Duration::from_secs(5)).await);
    }

    #[test]
    fn current_process_is_alive() {
        assert!(process_alive(std::process::id()));
    }
}
