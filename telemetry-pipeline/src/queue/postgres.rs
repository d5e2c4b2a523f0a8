use std::time::Duration;

use sqlx::postgres::PgPool;
use time::OffsetDateTime;

use crate::pipeline::{clamp_receive, MessageQueue, PipelineError, QueueMessage, ReceiptHandle};

/// Floor for the pause between claim attempts during a long-poll.
pub const MIN_POLL_STEP: Duration = Duration::from_millis(10);

/// Durable queue kept in a Postgres table.
///
/// Receivers claim rows with `FOR UPDATE SKIP LOCKED` and push their
/// `visible_at` forward by the visibility timeout. The receipt handle pins the
/// delivery (`id:receive_count`), so a consumer holding an expired receipt
/// cannot delete a copy that has since been handed to someone else.
pub struct PgQueue {
    pool: PgPool,
    visibility_timeout: Duration,
    poll_step: Duration,
}

#[derive(sqlx::FromRow)]
struct ClaimedRow {
    id: i64,
    body: String,
    enqueued_at: OffsetDateTime,
    receive_count: i32,
}

impl PgQueue {
    pub fn new(pool: PgPool, visibility_timeout: Duration, poll_step: Duration) -> Self {
        Self {
            pool,
            visibility_timeout,
            poll_step: poll_step.max(MIN_POLL_STEP),
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reading_queue (
                id BIGSERIAL PRIMARY KEY,
                body TEXT NOT NULL,
                enqueued_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                visible_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                receive_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(queue_error)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS reading_queue_visible_idx ON reading_queue (visible_at, id)",
        )
        .execute(&self.pool)
        .await
        .map_err(queue_error)?;

        Ok(())
    }

    async fn claim(&self, max_messages: usize) -> Result<Vec<QueueMessage>, sqlx::Error> {
        let mut rows: Vec<ClaimedRow> = sqlx::query_as(
            r#"
            WITH next AS (
                SELECT id
                FROM reading_queue
                WHERE visible_at <= now()
                ORDER BY id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE reading_queue q
            SET visible_at = now() + make_interval(secs => $2),
                receive_count = q.receive_count + 1
            FROM next
            WHERE q.id = next.id
            RETURNING q.id, q.body, q.enqueued_at, q.receive_count
            "#,
        )
        .bind(max_messages as i64)
        .bind(self.visibility_timeout.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        rows.sort_by_key(|r| r.id);

        Ok(rows
            .into_iter()
            .map(|r| QueueMessage {
                body: r.body,
                receipt: ReceiptHandle(format!("{}:{}", r.id, r.receive_count)),
                delivery_count: r.receive_count.max(0) as u32,
                enqueued_at: r.enqueued_at,
            })
            .collect())
    }
}

fn queue_error(e: sqlx::Error) -> PipelineError {
    PipelineError::Queue(e.to_string())
}

fn parse_receipt(receipt: &ReceiptHandle) -> Result<(i64, i32), PipelineError> {
    let malformed = || PipelineError::Queue(format!("malformed receipt handle {receipt}"));
    let (id, count) = receipt.0.split_once(':').ok_or_else(malformed)?;

    Ok((
        id.parse().map_err(|_| malformed())?,
        count.parse().map_err(|_| malformed())?,
    ))
}

#[async_trait::async_trait]
impl MessageQueue for PgQueue {
    async fn enqueue(&self, body: &str) -> Result<(), PipelineError> {
        sqlx::query("INSERT INTO reading_queue (body) VALUES ($1)")
            .bind(body)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(queue_error)
    }

    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, PipelineError> {
        let (max_messages, wait) = clamp_receive(max_messages, wait);
        let started = tokio::time::Instant::now();

        loop {
            let batch = self.claim(max_messages).await.map_err(queue_error)?;
            let elapsed = started.elapsed();
            if !batch.is_empty() || elapsed >= wait {
                return Ok(batch);
            }

            tokio::time::sleep(self.poll_step.min(wait - elapsed)).await;
        }
    }

    async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), PipelineError> {
        let (id, receive_count) = parse_receipt(receipt)?;

        let result = sqlx::query("DELETE FROM reading_queue WHERE id = $1 AND receive_count = $2")
            .bind(id)
            .bind(receive_count)
            .execute(&self.pool)
            .await
            .map_err(queue_error)?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::Queue(format!(
                "receipt handle {receipt} is stale or already deleted"
            )));
        }

        Ok(())
    }
}
