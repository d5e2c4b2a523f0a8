use anyhow::Result;
use telemetry_pipeline::{bootstrap, config::AppConfig, metrics_server, observability, shutdown, IngestionWorker};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = AppConfig::load()?;
    let _log_guard = observability::init_tracing(&cfg.logging, "ingestion-worker")?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr).await?;
    }

    let settings = cfg.worker.settings()?;
    let queue = bootstrap::build_queue(&cfg).await?;
    let store = bootstrap::build_store(&cfg).await?;

    IngestionWorker::new(queue, store, settings)
        .run(shutdown::signal_token())
        .await;

    Ok(())
}
