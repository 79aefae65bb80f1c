//! In-memory blob store

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{BlobError, BlobReader, BlobStore, Result};

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<i64, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw content of a stored log
    pub fn get(&self, pipeline_id: i64) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(&pipeline_id).cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload_log(
        &self,
        pipeline_id: i64,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
    ) -> Result<()> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;

        if buf.len() as u64 != size {
            return Err(BlobError::SizeMismatch {
                expected: size,
                actual: buf.len() as u64,
            });
        }

        self.blobs.lock().unwrap().insert(pipeline_id, buf);
        Ok(())
    }

    async fn download_log(&self, pipeline_id: i64) -> Result<BlobReader> {
        let content = self
            .get(pipeline_id)
            .ok_or(BlobError::NotFound(pipeline_id))?;
        Ok(Box::new(Cursor::new(content)))
    }
}
