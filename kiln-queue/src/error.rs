//! Error types for the work queue

use thiserror::Error;

/// Result type alias for queue operations
pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Broker storage failed or is unreachable
    #[error("queue database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to encode work item: {0}")]
    Encode(#[source] serde_json::Error),

    /// The message could not be decoded and was dropped
    #[error("dropped undecodable message {id}: {source}")]
    Decode {
        id: i64,
        #[source]
        source: serde_json::Error,
    },

    #[error("queue is unavailable")]
    Unavailable,

    #[error("unknown delivery tag {0}")]
    UnknownDelivery(i64),
}
