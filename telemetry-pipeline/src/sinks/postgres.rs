use std::{future::Future, time::Duration};

use sqlx::postgres::PgPool;
use telemetry_client::{db, NewRow};

use crate::pipeline::{PipelineError, ReadingStore};

/// `water_data` writer with a short in-place retry before reporting failure.
///
/// Exhausting the retries surfaces `PipelineError::Storage`; the worker then
/// leaves the message on the queue so it comes back after the visibility
/// timeout.
pub struct PgReadingStore {
    pool: PgPool,
    max_retries: u32,
    retry_backoff: Duration,
}

impl PgReadingStore {
    pub fn new(pool: PgPool, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            pool,
            max_retries,
            retry_backoff,
        }
    }
}

/// Run `f` until it succeeds or has failed `max_retries + 1` times, sleeping
/// `backoff * attempt` between tries.
async fn with_retries<F, Fut, T>(
    op: &'static str,
    max_retries: u32,
    backoff: Duration,
    mut f: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt: u32 = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_retries => {
                attempt += 1;
                let sleep_for = backoff * attempt;
                tracing::warn!(error = %e, attempt, op, "storage call failed, retrying with backoff");
                tokio::time::sleep(sleep_for).await;
            }
            Err(e) => {
                tracing::error!(error = %e, op, "storage call failed, giving up");
                metrics::counter!("storage_errors_total").increment(1);
                return Err(PipelineError::Storage(e.to_string()));
            }
        }
    }
}

#[async_trait::async_trait]
impl ReadingStore for PgReadingStore {
    async fn ensure_schema(&self) -> Result<(), PipelineError> {
        // Runs every cycle; a failure is retried by the next one.
        db::ensure_water_data_table(&self.pool)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))
    }

    async fn insert(&self, row: &NewRow) -> Result<(), PipelineError> {
        let id = with_retries("insert_reading", self.max_retries, self.retry_backoff, || {
            db::insert_reading(&self.pool, row)
        })
        .await?;

        tracing::debug!(row_id = id, device_id = %row.device_id, "reading stored");
        Ok(())
    }
}
