//! Bounded reads of JSON documents.

use crate::error::{display_target, StorageError, StorageResult};
use serde::de::DeserializeOwned;
use std::io;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncReadExt;

/// Default ceiling for any single file read into memory.
pub const DEFAULT_MAX_READ_BYTES: u64 = 1024 * 1024;

/// Read a whole file, refusing anything larger than `limit` bytes.
///
/// Returns `Ok(None)` when the file does not exist.
pub async fn read_bounded(path: &Path, limit: u64, expose_paths: bool) -> StorageResult<Option<Vec<u8>>> {
    let file = match fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::Io(e)),
    };

    let too_large = |size: u64| StorageError::TooLarge {
        target: display_target(path, expose_paths),
        size,
        limit,
    };

    let size = file.metadata().await?.len();
    if size > limit {
        return Err(too_large(size));
    }

    // The file may grow between the metadata call and the read.
    let mut buf = Vec::with_capacity(size as usize);
    file.take(limit + 1).read_to_end(&mut buf).await?;
    if buf.len() as u64 > limit {
        return Err(too_large(buf.len() as u64));
    }
    Ok(Some(buf))
}

/// Read and deserialize a JSON file with the size ceiling applied.
pub async fn read_json<T: DeserializeOwned>(
    path: &Path,
    limit: u64,
    expose_paths: bool,
) -> StorageResult<Option<T>> {
    match read_bounded(path, limit, expose_paths).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Doc {
        name: String,
    }

    #[tokio::test]
    async fn missing_file_is_none() {
        let dir = tempdir().unwrap();
        let read = read_bounded(&dir.path().join("nope.json"), 10, false).await.unwrap();
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn oversized_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.json");
        std::fs::write(&path, vec![b'x'; 64]).unwrap();

        let err = read_bounded(&path, 32, false).await.unwrap_err();
        assert!(matches!(err, StorageError::TooLarge { size: 64, limit: 32, .. }));
        assert!(err.to_string().starts_with("big.json"));
    }

    #[tokio::test]
    async fn read_json_parses_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, r#"{"name":"kodama"}"#).unwrap();

        let doc: Option<Doc> = read_json(&path, DEFAULT_MAX_READ_BYTES, false).await.unwrap();
        assert_eq!(doc, Some(Doc { name: "kodama".to_string() }));
    }

    #[tokio::test]
    async fn read_json_reports_malformed_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = read_json::<Doc>(&path, DEFAULT_MAX_READ_BYTES, false).await.unwrap_err();
        assert!(matches!(err, StorageError::Json(_)));
    }
}
