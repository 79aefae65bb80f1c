//! In-memory work queue
//!
//! Behaves like the Postgres queue (FIFO, leases, redelivery) inside a single
//! process. Used by tests across the workspace.

use async_trait::async_trait;
use kiln_core::domain::work::Work;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::{Delivery, DeliveryTag, QueueError, Result, WorkQueue, decode, encode};

#[derive(Default)]
struct State {
    next_id: i64,
    /// Ready messages keyed by id, so iteration order is FIFO
    ready: BTreeMap<i64, Message>,
    in_flight: HashMap<i64, Message>,
    unavailable: bool,
}

struct Message {
    payload: Vec<u8>,
    delivery_count: u32,
}

/// In-process implementation of [`WorkQueue`]
#[derive(Default)]
pub struct MemoryWorkQueue {
    state: Mutex<State>,
}

impl MemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the broker going down (or coming back)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    /// Returns every leased message to the ready set
    ///
    /// Models a consumer crash between receive and ack.
    pub fn redeliver_unacked(&self) {
        let mut state = self.state.lock().unwrap();
        let in_flight: Vec<_> = state.in_flight.drain().collect();
        state.ready.extend(in_flight);
    }

    /// Messages waiting to be received
    pub fn ready_len(&self) -> usize {
        self.state.lock().unwrap().ready.len()
    }

    /// Messages received but not yet acknowledged
    pub fn in_flight_len(&self) -> usize {
        self.state.lock().unwrap().in_flight.len()
    }

    /// Decoded copies of the ready messages, oldest first
    pub fn pending_work(&self) -> Vec<Work> {
        let state = self.state.lock().unwrap();
        state
            .ready
            .iter()
            .filter_map(|(id, message)| decode(*id, &message.payload).ok())
            .collect()
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn send(&self, work: &Work) -> Result<()> {
        let payload = encode(work)?;
        let mut state = self.state.lock().unwrap();

        if state.unavailable {
            return Err(QueueError::Unavailable);
        }

        state.next_id += 1;
        let id = state.next_id;
        state.ready.insert(
            id,
            Message {
                payload,
                delivery_count: 0,
            },
        );

        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>> {
        let mut state = self.state.lock().unwrap();

        if state.unavailable {
            return Err(QueueError::Unavailable);
        }

        let Some((id, mut message)) = state.ready.pop_first() else {
            return Ok(None);
        };

        message.delivery_count += 1;

        // Undecodable messages are dropped, mirroring the Postgres queue
        let work = decode(id, &message.payload)?;

        let redelivered = message.delivery_count > 1;
        state.in_flight.insert(id, message);

        Ok(Some(Delivery {
            tag: DeliveryTag(id),
            work,
            redelivered,
        }))
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .in_flight
            .remove(&tag.0)
            .map(|_| ())
            .ok_or(QueueError::UnknownDelivery(tag.0))
    }

    async fn nack(&self, tag: DeliveryTag) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let message = state
            .in_flight
            .remove(&tag.0)
            .ok_or(QueueError::UnknownDelivery(tag.0))?;
        state.ready.insert(tag.0, message);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use kiln_core::domain::pipeline::{Pipeline, PipelineStatus};
    use kiln_core::domain::work::OAuthToken;

    pub(crate) fn work(id: i64) -> Work {
        Work {
            pipeline: Pipeline {
                id,
                status: PipelineStatus::Pending,
                commit: format!("commit-{id}"),
                clone_url: "https://git.example.com/acme/widget.git".to_string(),
                url: format!("https://ci.example.com/acme/widget/pipelines/{id}"),
                started_at: None,
                finished_at: None,
                repo_id: 1,
            },
            token: OAuthToken::bearer("token"),
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryWorkQueue::new();
        queue.send(&work(1)).await.unwrap();
        queue.send(&work(2)).await.unwrap();

        let first = queue.receive().await.unwrap().unwrap();
        let second = queue.receive().await.unwrap().unwrap();

        assert_eq!(first.work.pipeline.id, 1);
        assert_eq!(second.work.pipeline.id, 2);
        assert!(queue.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ack_removes_message() {
        let queue = MemoryWorkQueue::new();
        queue.send(&work(1)).await.unwrap();

        let delivery = queue.receive().await.unwrap().unwrap();
        assert_eq!(queue.in_flight_len(), 1);

        queue.ack(delivery.tag).await.unwrap();
        assert_eq!(queue.in_flight_len(), 0);
        assert_eq!(queue.ready_len(), 0);
        assert!(matches!(
            queue.ack(delivery.tag).await,
            Err(QueueError::UnknownDelivery(_))
        ));
    }

    #[tokio::test]
    async fn test_unacked_message_is_redelivered() {
        let queue = MemoryWorkQueue::new();
        queue.send(&work(1)).await.unwrap();

        let first = queue.receive().await.unwrap().unwrap();
        assert!(!first.redelivered);

        queue.redeliver_unacked();

        let second = queue.receive().await.unwrap().unwrap();
        assert!(second.redelivered);
        assert_eq!(second.work, first.work);
    }

    #[tokio::test]
    async fn test_nack_keeps_position() {
        let queue = MemoryWorkQueue::new();
        queue.send(&work(1)).await.unwrap();
        queue.send(&work(2)).await.unwrap();

        let first = queue.receive().await.unwrap().unwrap();
        queue.nack(first.tag).await.unwrap();

        let again = queue.receive().await.unwrap().unwrap();
        assert_eq!(again.work.pipeline.id, 1);
        assert!(again.redelivered);
    }

    #[tokio::test]
    async fn test_unavailable_queue_rejects_send() {
        let queue = MemoryWorkQueue::new();
        queue.set_unavailable(true);

        assert!(matches!(
            queue.send(&work(1)).await,
            Err(QueueError::Unavailable)
        ));
        assert_eq!(queue.ready_len(), 0);

        queue.set_unavailable(false);
        queue.send(&work(1)).await.unwrap();
        assert_eq!(queue.pending_work().len(), 1);
    }
}
