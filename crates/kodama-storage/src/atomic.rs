//! Atomic file writes.
//!
//! Every persisted file goes through [`AtomicWriter`]: the content is written
//! to a temporary sibling, synced, and renamed over the destination while the
//! destination's advisory lock is held. A reader therefore sees either the
//! old file or the new one, never a torn write.

use crate::error::{display_target, StorageError, StorageResult};
use crate::lock::{FileLock, LockOptions};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};
use uuid::Uuid;

/// Marker inside temporary file names: `<name>.tmp.<uuid>`.
pub const TEMP_MARKER: &str = ".tmp.";

/// Options shared by every write.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Lock acquisition bounds.
    pub lock: LockOptions,
    /// Whether error messages may contain full paths.
    pub expose_paths: bool,
}

impl WriteOptions {
    /// Options with path exposure toggled for both writes and locks.
    pub fn with_expose_paths(mut self, expose: bool) -> Self {
        self.expose_paths = expose;
        self.lock.expose_paths = expose;
        self
    }
}

/// Point at which a test write stops, leaving the disk as a crash would.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Halt {
    AfterTempWrite,
    BeforeRename,
}

/// Writes files with temp-file + fsync + rename under an advisory lock.
#[derive(Debug, Clone, Default)]
pub struct AtomicWriter {
    options: WriteOptions,
    #[cfg(test)]
    halt: Option<Halt>,
}

impl AtomicWriter {
    /// Create a writer with the given options.
    pub fn new(options: WriteOptions) -> Self {
        Self {
            options,
            #[cfg(test)]
            halt: None,
        }
    }

    /// The options this writer was built with.
    pub fn options(&self) -> &WriteOptions {
        &self.options
    }

    /// Acquire the advisory lock for `path`.
    ///
    /// Hold the returned guard across a read-modify-write and finish with
    /// [`AtomicWriter::write_locked`].
    pub async fn lock(&self, path: &Path) -> StorageResult<FileLock> {
        FileLock::acquire(path, &self.options.lock).await
    }

    /// Atomically replace `path` with `content`.
    pub async fn write(&self, path: &Path, content: &[u8]) -> StorageResult<()> {
        let guard = self.lock(path).await?;
        let result = self.commit(path, content).await;
        guard.release().await;
        result
    }

    /// Atomically replace the file protected by an already-held lock.
    pub async fn write_locked(&self, guard: &FileLock, content: &[u8]) -> StorageResult<()> {
        self.commit(guard.target(), content).await
    }

    /// Serialize `value` as pretty JSON and write it atomically.
    pub async fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> StorageResult<()> {
        let content = serde_json::to_vec_pretty(value)?;
        self.write(path, &content).await
    }

    /// Append one line to `path`.
    ///
    /// The existing content is read under the lock and the whole file is
    /// replaced atomically, so a crash mid-append never truncates the file.
    pub async fn append_line(&self, path: &Path, line: &str) -> StorageResult<()> {
        let guard = self.lock(path).await?;
        let result = async {
            let mut content = match fs::read(path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
                Err(e) => return Err(StorageError::Io(e)),
            };
            if !content.is_empty() && !content.ends_with(b"\n") {
                content.push(b'\n');
            }
            content.extend_from_slice(line.trim_end_matches('\n').as_bytes());
            content.push(b'\n');
            self.commit(path, &content).await
        }
        .await;
        guard.release().await;
        result
    }

    async fn commit(&self, path: &Path, content: &[u8]) -> StorageResult<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| StorageError::invalid_path("write target has no parent directory"))?;

        check_same_filesystem(path).await;

        ensure_dir(dir).await.map_err(|e| self.write_failed(path, e))?;

        let temp = temp_path_for(path);
        if let Err(e) = write_temp(&temp, content).await {
            discard(&temp).await;
            return Err(self.write_failed(path, e));
        }

        #[cfg(test)]
        if self.halt == Some(Halt::AfterTempWrite) {
            return Err(simulated_crash());
        }

        sync_dir(dir).await;

        #[cfg(test)]
        if self.halt == Some(Halt::BeforeRename) {
            return Err(simulated_crash());
        }

        if let Err(e) = fs::rename(&temp, path).await {
            discard(&temp).await;
            return Err(self.write_failed(path, e));
        }

        sync_dir(dir).await;
        trace!(path = %path.display(), bytes = content.len(), "Wrote file atomically");
        Ok(())
    }

    fn write_failed(&self, path: &Path, source: io::Error) -> StorageError {
        StorageError::WriteFailed {
            target: display_target(path, self.options.expose_paths),
            source,
        }
    }
}

/// Temporary sibling for `path`, unique per write.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!("{}{}", TEMP_MARKER, Uuid::new_v4()));
    path.with_file_name(name)
}

/// Create `dir` and its missing parents, private to the user on unix.
pub async fn ensure_dir(dir: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(dir).await
}

async fn write_temp(temp: &Path, content: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(temp).await?;
    file.write_all(content).await?;
    file.flush().await?;
    file.sync_all().await
}

async fn discard(temp: &Path) {
    if let Err(e) = fs::remove_file(temp).await {
        if e.kind() != io::ErrorKind::NotFound {
            debug!(path = %temp.display(), error = %e, "Failed to remove temporary file");
        }
    }
}

/// Flush directory metadata. Some filesystems refuse; that is not fatal.
async fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        let synced = match fs::File::open(dir).await {
            Ok(handle) => handle.sync_all().await,
            Err(e) => Err(e),
        };
        if let Err(e) = synced {
            debug!(dir = %dir.display(), error = %e, "Directory fsync unsupported");
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
}

/// Log when the destination and its directory live on different devices.
///
/// The rename is then not atomic. The write still proceeds.
async fn check_same_filesystem(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;

        let Some(parent) = kodama_util::path::existing_ancestor(path) else {
            return;
        };
        let (Ok(dest), Ok(dir)) = (fs::metadata(path).await, fs::metadata(&parent).await) else {
            return;
        };
        if dest.dev() != dir.dev() {
            debug!(
                path = %path.display(),
                "Destination is on a different filesystem; rename is not atomic (degraded mode)"
            );
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

#[cfg(test)]
fn simulated_crash() -> StorageError {
    StorageError::Io(io::Error::new(io::ErrorKind::Interrupted, "simulated crash"))
}
