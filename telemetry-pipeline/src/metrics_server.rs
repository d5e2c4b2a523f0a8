use std::net::SocketAddr;

use axum::{extract::State, routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::pipeline::PipelineError;

static PROM_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the process-wide Prometheus recorder (once) and serve `/metrics`
/// on `bind_addr`. The listener is bound before returning, so a taken port is
/// reported to the caller instead of only being logged.
pub async fn init(bind_addr: &str) -> Result<(), PipelineError> {
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| PipelineError::Config(format!("invalid metrics bind addr {bind_addr}: {e}")))?;

    let handle = PROM_HANDLE
        .get_or_try_init(|| PrometheusBuilder::new().install_recorder())
        .map_err(|e| PipelineError::Config(format!("failed to install metrics recorder: {e}")))?
        .clone();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| PipelineError::Config(format!("failed to bind metrics listener on {addr}: {e}")))?;

    tracing::info!(%addr, "metrics server listening");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router(handle).into_make_service()).await {
            tracing::error!(error = %e, "metrics server error");
        }
    });

    Ok(())
}

pub fn router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(render))
        .with_state(handle)
}

async fn render(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
