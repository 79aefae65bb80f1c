//! Delivery stream
//!
//! Adapts the pull-based [`WorkQueue::receive`] into an unbounded stream.
//! The stream never ends; an empty queue is polled again after
//! `poll_interval`. Receive errors are yielded so the consumer can log them
//! and back off, after which the stream resumes from unacknowledged
//! messages.

use futures::Stream;
use std::sync::Arc;
use std::time::Duration;

use crate::{Delivery, Result, WorkQueue};

pub fn stream<Q>(queue: Arc<Q>, poll_interval: Duration) -> impl Stream<Item = Result<Delivery>>
where
    Q: WorkQueue + ?Sized,
{
    futures::stream::unfold(queue, move |queue| async move {
        loop {
            match queue.receive().await {
                Ok(Some(delivery)) => return Some((Ok(delivery), queue)),
                Ok(None) => tokio::time::sleep(poll_interval).await,
                Err(e) => return Some((Err(e), queue)),
            }
        }
    })
}
