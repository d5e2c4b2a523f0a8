//! Client construction shared by the binaries. Failures here are fatal.

use std::{sync::Arc, time::Duration};

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::{
    config::{AppConfig, QueueKind},
    pipeline::MessageQueue,
    queue::{InMemoryQueue, PgQueue},
    sinks::PgReadingStore,
};

pub async fn connect(uri: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(uri)
        .await?;
    Ok(pool)
}

/// Build the configured queue and make sure its backing table exists.
pub async fn build_queue(cfg: &AppConfig) -> anyhow::Result<Arc<dyn MessageQueue>> {
    let visibility = cfg.queue.visibility_timeout();

    match cfg.queue.kind {
        QueueKind::Memory => {
            tracing::info!(
                visibility_timeout_secs = cfg.queue.visibility_timeout_secs,
                "using in-memory queue"
            );
            Ok(Arc::new(InMemoryQueue::new(visibility)))
        }
        QueueKind::Postgres => {
            let poll_step = cfg.queue.poll_step()?;
            let pool = connect(cfg.queue_uri()?, cfg.queue.max_connections).await?;
            let queue = PgQueue::new(pool, visibility, poll_step);
            queue.ensure_schema().await?;
            tracing::info!(
                region = cfg.queue.region.as_deref().unwrap_or("-"),
                visibility_timeout_secs = cfg.queue.visibility_timeout_secs,
                "using postgres queue"
            );
            Ok(Arc::new(queue))
        }
    }
}

pub async fn build_store(cfg: &AppConfig) -> anyhow::Result<Arc<PgReadingStore>> {
    let pool = connect(cfg.storage_uri()?, cfg.storage.max_connections).await?;
    Ok(Arc::new(PgReadingStore::new(
        pool,
        cfg.storage.max_retries,
        Duration::from_millis(cfg.storage.retry_backoff_ms),
    )))
}
