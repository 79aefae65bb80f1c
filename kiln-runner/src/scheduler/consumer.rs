//! Work consumer
//!
//! Receives deliveries from the work queue and runs each in its own task.
//! A permit of the worker pool is taken *before* the next delivery is
//! received, so a busy runner leaves messages to other runners instead of
//! leasing them.
//!
//! A finished run is acknowledged. A run that panics is released right away
//! so another runner can pick it up without waiting for the lease.

use anyhow::{Context as AnyhowContext, Result};
use futures::{FutureExt, StreamExt};
use kiln_queue::{Delivery, WorkQueue};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::service::ExecutionService;

/// Consumer that continuously receives and executes work items
pub struct WorkConsumer {
    queue: Arc<dyn WorkQueue>,
    executor: Arc<dyn ExecutionService>,
    semaphore: Arc<Semaphore>,
    poll_interval: Duration,
    /// Pause after a receive error before trying again
    error_backoff: Duration,
}

impl WorkConsumer {
    /// Creates a new consumer running at most `max_parallel` pipelines
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        executor: Arc<dyn ExecutionService>,
        max_parallel: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            executor,
            semaphore: Arc::new(Semaphore::new(max_parallel)),
            poll_interval,
            error_backoff: Duration::from_secs(5),
        }
    }

    /// Runs until `shutdown` resolves, then waits for in-flight runs
    ///
    /// Nothing new is received once shutdown is signalled. Runs already in
    /// progress finish, report and acknowledge normally.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!(
            "Starting work consumer (workers: {}, poll interval: {:?})",
            self.semaphore.available_permits(),
            self.poll_interval
        );

        let deliveries = kiln_queue::stream(self.queue.clone(), self.poll_interval);
        futures::pin_mut!(deliveries);
        tokio::pin!(shutdown);

        let mut tasks = JoinSet::new();

        loop {
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!("Pipeline task panicked: {}", e);
                }
            }

            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = self.semaphore.clone().acquire_owned() => {
                    permit.context("Worker pool closed")?
                }
            };

            let next = tokio::select! {
                _ = &mut shutdown => break,
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => self.spawn_run(&mut tasks, delivery, permit),
                Some(Err(e)) => {
                    drop(permit);
                    error!("Failed to receive work: {}", e);
                    debug!("Retrying in {:?}", self.error_backoff);

                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(self.error_backoff) => {}
                    }
                }
                None => break,
            }
        }

        if !tasks.is_empty() {
            info!("Waiting for {} in-flight pipeline(s)", tasks.len());
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Pipeline task panicked: {}", e);
            }
        }

        info!("Work consumer stopped");
        Ok(())
    }

    /// Spawns a task running one delivery; the permit is released when it ends
    fn spawn_run(&self, tasks: &mut JoinSet<()>, delivery: Delivery, permit: OwnedSemaphorePermit) {
        let queue = Arc::clone(&self.queue);
        let executor = Arc::clone(&self.executor);

        tasks.spawn(async move {
            let _permit = permit;
            let id = delivery.work.pipeline.id;

            if delivery.redelivered {
                info!(pipeline_id = id, "Received redelivered work item");
            } else {
                debug!(pipeline_id = id, "Received work item");
            }

            let run = AssertUnwindSafe(executor.execute(&delivery.work))
                .catch_unwind()
                .await;

            match run {
                Ok(summary) => {
                    debug!(pipeline_id = id, outcome = ?summary.outcome, "Run complete");

                    // An unacknowledged delivery comes back once its lease runs out
                    if let Err(e) = queue.ack(delivery.tag).await {
                        warn!(pipeline_id = id, "Failed to acknowledge work item: {}", e);
                    }
                }
                Err(_) => {
                    error!(pipeline_id = id, "Pipeline run panicked, releasing work item");

                    if let Err(e) = queue.nack(delivery.tag).await {
                        warn!(pipeline_id = id, "Failed to release work item: {}", e);
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::RunSummary;
    use async_trait::async_trait;
    use kiln_core::domain::pipeline::{Outcome, Pipeline, PipelineStatus};
    use kiln_core::domain::work::{OAuthToken, Work};
    use kiln_queue::MemoryWorkQueue;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[derive(Default)]
    struct FakeExecutor {
        delay: Duration,
        panic_on: Option<i64>,
        started: Mutex<Vec<i64>>,
        completed: Mutex<Vec<i64>>,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    impl FakeExecutor {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }

        fn started(&self) -> Vec<i64> {
            self.started.lock().unwrap().clone()
        }

        fn completed(&self) -> Vec<i64> {
            self.completed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExecutionService for FakeExecutor {
        async fn execute(&self, work: &Work) -> RunSummary {
            self.started.lock().unwrap().push(work.pipeline.id);
            if self.panic_on == Some(work.pipeline.id) {
                panic!("executor bug");
            }
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(running, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;

            self.running.fetch_sub(1, Ordering::SeqCst);
            self.completed.lock().unwrap().push(work.pipeline.id);

            RunSummary {
                outcome: Outcome::Success,
                error: None,
            }
        }
    }

    fn work(id: i64) -> Work {
        Work {
            pipeline: Pipeline {
                id,
                status: PipelineStatus::Pending,
                commit: "abc123".to_string(),
                clone_url: "https://github.com/acme/widget.git".to_string(),
                url: format!("https://ci.example.com/pipelines/{}", id),
                started_at: None,
                finished_at: None,
                repo_id: 1,
            },
            token: OAuthToken::bearer("t"),
        }
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    struct Running {
        stop: oneshot::Sender<()>,
        handle: tokio::task::JoinHandle<Result<()>>,
    }

    impl Running {
        async fn shutdown(self) {
            let _ = self.stop.send(());
            self.handle.await.unwrap().unwrap();
        }
    }

    fn start(consumer: WorkConsumer) -> Running {
        let (stop, rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            consumer
                .run(async {
                    let _ = rx.await;
                })
                .await
        });
        Running { stop, handle }
    }

    fn consumer(
        queue: &Arc<MemoryWorkQueue>,
        executor: &Arc<FakeExecutor>,
        max_parallel: usize,
    ) -> WorkConsumer {
        let mut consumer = WorkConsumer::new(
            queue.clone(),
            executor.clone(),
            max_parallel,
            Duration::from_millis(10),
        );
        consumer.error_backoff = Duration::from_millis(20);
        consumer
    }

    #[tokio::test]
    async fn test_runs_and_acks_every_item() {
        let queue = Arc::new(MemoryWorkQueue::new());
        for id in 1..=3 {
            queue.send(&work(id)).await.unwrap();
        }
        let executor = Arc::new(FakeExecutor::default());

        let running = start(consumer(&queue, &executor, 1));
        wait_until(|| executor.completed().len() == 3).await;
        running.shutdown().await;

        assert_eq!(executor.started(), vec![1, 2, 3]);
        assert_eq!(queue.ready_len(), 0);
        assert_eq!(queue.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let queue = Arc::new(MemoryWorkQueue::new());
        for id in 1..=6 {
            queue.send(&work(id)).await.unwrap();
        }
        let executor = Arc::new(FakeExecutor::with_delay(Duration::from_millis(50)));

        let running = start(consumer(&queue, &executor, 2));
        wait_until(|| executor.completed().len() == 6).await;
        running.shutdown().await;

        assert_eq!(executor.max_running.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_busy_runner_leaves_work_in_queue() {
        let queue = Arc::new(MemoryWorkQueue::new());
        for id in 1..=3 {
            queue.send(&work(id)).await.unwrap();
        }
        let executor = Arc::new(FakeExecutor::with_delay(Duration::from_millis(300)));

        let running = start(consumer(&queue, &executor, 1));
        wait_until(|| executor.started().len() == 1).await;

        // Only the running item is leased
        assert_eq!(queue.in_flight_len(), 1);
        assert_eq!(queue.ready_len(), 2);

        running.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_runs() {
        let queue = Arc::new(MemoryWorkQueue::new());
        queue.send(&work(1)).await.unwrap();
        queue.send(&work(2)).await.unwrap();
        let executor = Arc::new(FakeExecutor::with_delay(Duration::from_millis(200)));

        let running = start(consumer(&queue, &executor, 1));
        wait_until(|| executor.started().len() == 1).await;
        running.shutdown().await;

        // The first run finished and was acked; the second was never received
        assert_eq!(executor.completed(), vec![1]);
        assert_eq!(queue.in_flight_len(), 0);
        assert_eq!(queue.pending_work()[0].pipeline.id, 2);
    }

    #[tokio::test]
    async fn test_recovers_from_receive_errors() {
        let queue = Arc::new(MemoryWorkQueue::new());
        queue.send(&work(4)).await.unwrap();
        queue.set_unavailable(true);
        let executor = Arc::new(FakeExecutor::default());

        let running = start(consumer(&queue, &executor, 1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(executor.started().is_empty());

        queue.set_unavailable(false);
        wait_until(|| executor.completed() == vec![4]).await;
        running.shutdown().await;

        assert_eq!(queue.ready_len(), 0);
    }

    #[tokio::test]
    async fn test_redelivered_item_runs_again() {
        let queue = Arc::new(MemoryWorkQueue::new());
        queue.send(&work(5)).await.unwrap();

        // A previous consumer leased it and died before acking
        queue.receive().await.unwrap().unwrap();
        queue.redeliver_unacked();

        let executor = Arc::new(FakeExecutor::default());
        let running = start(consumer(&queue, &executor, 1));
        wait_until(|| executor.completed() == vec![5]).await;
        running.shutdown().await;

        assert_eq!(queue.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn test_panicking_run_is_released() {
        let queue = Arc::new(MemoryWorkQueue::new());
        queue.send(&work(13)).await.unwrap();
        let executor = Arc::new(FakeExecutor {
            panic_on: Some(13),
            ..Default::default()
        });

        let running = start(consumer(&queue, &executor, 1));
        // Released right away, so it is received again without a lease expiry
        wait_until(|| executor.started().len() >= 2).await;
        running.shutdown().await;

        assert!(executor.completed().is_empty());
        assert_eq!(queue.in_flight_len(), 0);
        assert_eq!(queue.ready_len(), 1);
    }
}
