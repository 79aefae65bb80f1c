//! Kiln Work Queue
//!
//! Durable, at-least-once FIFO transport of [`Work`] from the coordinator to
//! the runners.
//!
//! - [`WorkQueue`]: publish, receive, acknowledge
//! - [`PgWorkQueue`]: Postgres-backed queue with lease-based redelivery
//! - [`MemoryWorkQueue`]: in-process queue used by tests
//! - [`stream`]: turns a queue into an unbounded delivery stream
//!
//! A received message stays leased until it is acknowledged. If the consumer
//! dies first, the lease runs out and the message is delivered again, so
//! consumers must tolerate duplicates.

pub mod error;
pub mod memory;
pub mod postgres;
mod stream;

pub use error::{QueueError, Result};
pub use memory::MemoryWorkQueue;
pub use postgres::PgWorkQueue;
pub use stream::stream;

use async_trait::async_trait;
use kiln_core::domain::work::Work;

/// Default name of the queue carrying work items
pub const DEFAULT_QUEUE: &str = "work";

/// Opaque handle identifying one delivery of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryTag(pub i64);

/// A message handed to a consumer
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub work: Work,
    /// The message was delivered before and never acknowledged
    pub redelivered: bool,
}

/// Broker abstraction used by both coordinator and runner
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Publishes a persistent message
    ///
    /// Returns once the message is durably stored.
    async fn send(&self, work: &Work) -> Result<()>;

    /// Leases the oldest available message, if any
    async fn receive(&self) -> Result<Option<Delivery>>;

    /// Removes a delivered message for good
    async fn ack(&self, tag: DeliveryTag) -> Result<()>;

    /// Releases a delivered message so it can be received again
    async fn nack(&self, tag: DeliveryTag) -> Result<()>;
}

/// Encodes a work item into the wire payload
pub(crate) fn encode(work: &Work) -> Result<Vec<u8>> {
    serde_json::to_vec(work).map_err(QueueError::Encode)
}

/// Decodes a wire payload back into a work item
pub(crate) fn decode(id: i64, payload: &[u8]) -> Result<Work> {
    serde_json::from_slice(payload).map_err(|source| QueueError::Decode { id, source })
}
