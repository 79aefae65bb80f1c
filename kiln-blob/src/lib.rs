//! Kiln Log Sink
//!
//! Durable blob storage for the aggregated transcript of a pipeline run,
//! keyed by pipeline ID.
//!
//! - [`BlobStore`]: upload and download contract
//! - [`FsBlobStore`]: one file per pipeline under a root directory
//! - [`MemoryBlobStore`]: in-process store used by tests

mod fs;
mod memory;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Result type alias for blob operations
pub type Result<T> = std::result::Result<T, BlobError>;

/// Reader over a stored blob
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no log stored for pipeline {0}")]
    NotFound(i64),

    /// The reader yielded a different number of bytes than announced
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
}

impl BlobError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores the log of a pipeline, replacing any previous upload
    ///
    /// The blob becomes visible only once all `size` bytes were written.
    async fn upload_log(
        &self,
        pipeline_id: i64,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
    ) -> Result<()>;

    /// Opens the stored log of a pipeline
    async fn download_log(&self, pipeline_id: i64) -> Result<BlobReader>;
}
