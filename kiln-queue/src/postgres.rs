//! Postgres work queue
//!
//! Messages live in the `work_queue` table. Receiving a message leases it
//! with `FOR UPDATE SKIP LOCKED`, so concurrent runners never receive the
//! same message while its lease is valid. Acknowledging deletes the row; a
//! lease that runs out makes the message available again.

use async_trait::async_trait;
use kiln_core::domain::work::Work;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, error};

use crate::{Delivery, DeliveryTag, QueueError, Result, WorkQueue, decode, encode};

/// Postgres-backed implementation of [`WorkQueue`]
#[derive(Debug, Clone)]
pub struct PgWorkQueue {
    pool: PgPool,
    queue: String,
    lease: Duration,
}

impl PgWorkQueue {
    /// Creates a queue handle
    ///
    /// # Arguments
    /// * `pool` - Connection pool of the broker database
    /// * `queue` - Name of the queue (messages of other queues are ignored)
    /// * `lease` - How long a received message stays invisible to other
    ///   consumers; must exceed the longest pipeline run
    pub fn new(pool: PgPool, queue: impl Into<String>, lease: Duration) -> Self {
        Self {
            pool,
            queue: queue.into(),
            lease,
        }
    }
}

/// Creates the queue table if it does not exist
pub async fn run_migrations(pool: &PgPool) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS work_queue (
            id BIGSERIAL PRIMARY KEY,
            queue VARCHAR(255) NOT NULL,
            payload BYTEA NOT NULL,
            enqueued_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            locked_until TIMESTAMPTZ,
            delivery_count INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_work_queue_queue_id ON work_queue(queue, id)")
        .execute(pool)
        .await?;

    Ok(())
}

#[derive(sqlx::FromRow)]
struct LeasedRow {
    id: i64,
    payload: Vec<u8>,
    delivery_count: i32,
}

#[async_trait]
impl WorkQueue for PgWorkQueue {
    async fn send(&self, work: &Work) -> Result<()> {
        let payload = encode(work)?;

        sqlx::query("INSERT INTO work_queue (queue, payload) VALUES ($1, $2)")
            .bind(&self.queue)
            .bind(payload)
            .execute(&self.pool)
            .await?;

        debug!(queue = %self.queue, pipeline_id = work.pipeline.id, "Work published");
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>> {
        let row = sqlx::query_as::<_, LeasedRow>(
            r#"
            UPDATE work_queue
            SET locked_until = now() + make_interval(secs => $2),
                delivery_count = delivery_count + 1
            WHERE id = (
                SELECT id FROM work_queue
                WHERE queue = $1
                  AND (locked_until IS NULL OR locked_until < now())
                ORDER BY id
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, payload, delivery_count
            "#,
        )
        .bind(&self.queue)
        .bind(self.lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        match decode(row.id, &row.payload) {
            Ok(work) => Ok(Some(Delivery {
                tag: DeliveryTag(row.id),
                work,
                redelivered: row.delivery_count > 1,
            })),
            Err(e) => {
                // A poison message would otherwise be redelivered forever
                error!(message_id = row.id, "Dropping undecodable work message: {}", e);
                self.ack(DeliveryTag(row.id)).await?;
                Err(e)
            }
        }
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<()> {
        let result = sqlx::query("DELETE FROM work_queue WHERE id = $1")
            .bind(tag.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::UnknownDelivery(tag.0));
        }

        Ok(())
    }

    async fn nack(&self, tag: DeliveryTag) -> Result<()> {
        let result = sqlx::query("UPDATE work_queue SET locked_until = NULL WHERE id = $1")
            .bind(tag.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::UnknownDelivery(tag.0));
        }

        Ok(())
    }
}
