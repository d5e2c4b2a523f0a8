use anyhow::Result;
use telemetry_pipeline::{
    bootstrap,
    config::{AppConfig, QueueKind},
    intake, metrics_server, observability, shutdown, IngestionWorker, IntakeService,
};

/// Intake and worker in one process, sharing one queue client.
#[tokio::main]
async fn main() -> Result<()> {
    let cfg = AppConfig::load()?;
    let _log_guard = observability::init_tracing(&cfg.logging, "telemetry-pipeline")?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr).await?;
    }

    if cfg.queue.kind == QueueKind::Memory {
        tracing::warn!("in-memory queue: readings not yet stored are lost on exit");
    }

    let queue = bootstrap::build_queue(&cfg).await?;
    let store = bootstrap::build_store(&cfg).await?;
    let shutdown = shutdown::signal_token();

    let service = IntakeService::new(queue.clone());
    let worker = IngestionWorker::new(queue, store, cfg.worker.settings()?);

    let server = {
        let shutdown = shutdown.clone();
        let bind_addr = cfg.intake.http_bind_addr.clone();
        async move {
            let res = intake::serve(&bind_addr, service, shutdown.clone()).await;
            // Stop the worker too if the server could not start.
            shutdown.cancel();
            res
        }
    };

    let (served, ()) = tokio::join!(server, worker.run(shutdown.clone()));
    served?;

    Ok(())
}
