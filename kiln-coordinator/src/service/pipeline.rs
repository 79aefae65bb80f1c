//! Pipeline Service
//!
//! Read access to pipelines, their command logs and stored transcripts.

use kiln_blob::{BlobError, BlobReader};
use kiln_core::dto::pipeline::PipelineDetails;

use crate::state::AppState;
use crate::storage::StorageError;

/// Service error type
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline {0} not found")]
    NotFound(i64),

    #[error("no log stored for pipeline {0}")]
    LogNotFound(i64),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("blob store error: {0}")]
    Blob(BlobError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Get a pipeline together with its command logs
pub async fn get_pipeline(state: &AppState, id: i64) -> Result<PipelineDetails> {
    let pipeline = state
        .storage
        .get_pipeline(id)
        .await?
        .ok_or(PipelineError::NotFound(id))?;

    let logs = state.storage.list_pipeline_logs(id).await?;

    Ok(PipelineDetails { pipeline, logs })
}

/// Open the transcript a runner uploaded for a pipeline
pub async fn open_log(state: &AppState, id: i64) -> Result<BlobReader> {
    state.blobs.download_log(id).await.map_err(|e| match e {
        BlobError::NotFound(id) => PipelineError::LogNotFound(id),
        other => PipelineError::Blob(other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHarness;
    use kiln_blob::BlobStore;
    use kiln_core::domain::log::PipelineLog;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_get_pipeline_with_logs() {
        let harness = TestHarness::new();
        let id = harness.create_pipeline("abc123");
        for order in [1, 0] {
            harness
                .state
                .storage
                .create_pipeline_log(&PipelineLog {
                    pipeline_id: id,
                    order,
                    cmd: format!("step {}", order),
                    output: String::new(),
                    exit_code: 0,
                })
                .await
                .unwrap();
        }

        let details = get_pipeline(&harness.state, id).await.unwrap();
        assert_eq!(details.pipeline.id, id);
        let orders: Vec<_> = details.logs.iter().map(|l| l.order).collect();
        assert_eq!(orders, vec![0, 1]);

        assert!(matches!(
            get_pipeline(&harness.state, 404).await,
            Err(PipelineError::NotFound(404))
        ));
    }

    #[tokio::test]
    async fn test_open_log() {
        let harness = TestHarness::new();
        let transcript = b"A\nB\n";
        harness
            .blobs
            .upload_log(3, &mut &transcript[..], transcript.len() as u64)
            .await
            .unwrap();

        let mut reader = open_log(&harness.state, 3).await.unwrap();
        let mut content = Vec::new();
        reader.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, transcript);

        assert!(matches!(
            open_log(&harness.state, 4).await,
            Err(PipelineError::LogNotFound(4))
        ));
    }
}
