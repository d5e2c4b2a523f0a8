use anyhow::Result;
use telemetry_pipeline::{
    bootstrap,
    config::{AppConfig, QueueKind},
    intake, metrics_server, observability, shutdown, IntakeService,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = AppConfig::load()?;
    let _log_guard = observability::init_tracing(&cfg.logging, "intake-server")?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr).await?;
    }

    if cfg.queue.kind == QueueKind::Memory {
        tracing::warn!("in-memory queue is not visible to a separate ingestion-worker process");
    }

    let queue = bootstrap::build_queue(&cfg).await?;
    let service = IntakeService::new(queue);

    intake::serve(&cfg.intake.http_bind_addr, service, shutdown::signal_token()).await?;

    Ok(())
}
