//! Filesystem blob store
//!
//! Stores each pipeline log as `<root>/<pipeline_id>.log`. Uploads go to a
//! uniquely named partial file first and are renamed into place, so readers
//! never observe a half-written log and concurrent uploads for the same
//! pipeline cannot interleave.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{BlobError, BlobReader, BlobStore, Result};

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, pipeline_id: i64) -> PathBuf {
        self.root.join(format!("{}.log", pipeline_id))
    }
}

async fn write_exact(
    path: &Path,
    reader: &mut (dyn AsyncRead + Send + Unpin),
    size: u64,
) -> Result<()> {
    let mut file = File::create(path).await?;

    // One extra byte detects readers longer than announced
    let mut limited = reader.take(size + 1);
    let written = tokio::io::copy(&mut limited, &mut file).await?;

    if written != size {
        return Err(BlobError::SizeMismatch {
            expected: size,
            actual: written,
        });
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload_log(
        &self,
        pipeline_id: i64,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
    ) -> Result<()> {
        fs::create_dir_all(&self.root).await?;

        let partial = self.root.join(format!(
            ".{}.{}.partial",
            pipeline_id,
            Uuid::new_v4().simple()
        ));

        if let Err(e) = write_exact(&partial, reader, size).await {
            if let Err(rm) = fs::remove_file(&partial).await {
                warn!("Failed to remove partial log {}: {}", partial.display(), rm);
            }
            return Err(e);
        }

        fs::rename(&partial, self.path_for(pipeline_id)).await?;

        debug!(pipeline_id, size, "Stored pipeline log");
        Ok(())
    }

    async fn download_log(&self, pipeline_id: i64) -> Result<BlobReader> {
        match File::open(self.path_for(pipeline_id)).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(pipeline_id))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_all(mut reader: BlobReader) -> Vec<u8> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path().join("logs"));

        let content = b"$ echo A\nA\n$ echo B\nB\n";
        store
            .upload_log(42, &mut &content[..], content.len() as u64)
            .await
            .unwrap();

        let downloaded = read_all(store.download_log(42).await.unwrap()).await;
        assert_eq!(downloaded, content);
    }

    #[tokio::test]
    async fn test_reupload_replaces_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        store.upload_log(1, &mut &b"first"[..], 5).await.unwrap();
        store.upload_log(1, &mut &b"second"[..], 6).await.unwrap();

        let downloaded = read_all(store.download_log(1).await.unwrap()).await;
        assert_eq!(downloaded, b"second");
    }

    #[tokio::test]
    async fn test_size_mismatch_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        let result = store.upload_log(5, &mut &b"short"[..], 10).await;
        assert!(matches!(
            result,
            Err(BlobError::SizeMismatch {
                expected: 10,
                actual: 5
            })
        ));

        assert!(store.download_log(5).await.err().unwrap().is_not_found());
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_missing_log_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        assert!(matches!(
            store.download_log(404).await,
            Err(BlobError::NotFound(404))
        ));
    }
}
