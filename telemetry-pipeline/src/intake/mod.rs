use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::{
    pipeline::{MessageQueue, PipelineError},
    schema::{self, ReadingFields},
    transform,
};

pub const QUEUED_MESSAGE: &str = "Data received and queued";
pub const INVALID_PAYLOAD_ERROR: &str = "Invalid payload";
pub const QUEUE_FAILED_ERROR: &str = "Failed to queue message";

/// Validates device readings and hands them to the queue.
///
/// Holds no state besides the queue client; clones share it.
#[derive(Clone)]
pub struct IntakeService {
    queue: Arc<dyn MessageQueue>,
}

impl IntakeService {
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self { queue }
    }

    /// Validate `payload` and enqueue it in the canonical message format.
    ///
    /// Enqueue failures are returned, not retried; the device resends.
    pub async fn submit_reading(&self, payload: Value) -> Result<(), PipelineError> {
        metrics::counter!("intake_requests_total").increment(1);

        let fields = match parse_payload(payload).and_then(transform::validate_intake) {
            Ok(f) => f,
            Err(e) => {
                metrics::counter!("intake_rejected_total").increment(1);
                tracing::warn!(error = %e, "invalid payload received");
                return Err(e);
            }
        };

        let body = schema::encode(&fields)?;

        if let Err(e) = self.queue.enqueue(&body).await {
            metrics::counter!("intake_enqueue_failed_total").increment(1);
            tracing::error!(error = %e, "failed to enqueue reading");
            return Err(e);
        }

        tracing::info!(
            device_code = %field_text(&fields.device_code),
            time = %field_text(&fields.time),
            level = %field_text(&fields.level),
            flow = %field_text(&fields.flow),
            energy = %field_text(&fields.energy),
            "data received"
        );

        Ok(())
    }
}

fn parse_payload(payload: Value) -> Result<ReadingFields, PipelineError> {
    if !payload.is_object() {
        return Err(PipelineError::InvalidPayload(
            "payload must be a JSON object".to_string(),
        ));
    }

    serde_json::from_value(payload).map_err(|e| PipelineError::InvalidPayload(e.to_string()))
}

fn field_text(v: &Option<Value>) -> String {
    match v {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

pub fn router(service: IntakeService) -> Router {
    Router::new()
        .route("/", post(submit))
        .with_state(service)
}

async fn submit(
    State(service): State<IntakeService>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let payload = match payload {
        Ok(Json(v)) => v,
        Err(rejection) => {
            metrics::counter!("intake_rejected_total").increment(1);
            tracing::warn!(error = %rejection, "unreadable request body");
            return error_response(&PipelineError::InvalidPayload(rejection.body_text()));
        }
    };

    match service.submit_reading(payload).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "message": QUEUED_MESSAGE }))).into_response(),
        Err(e) => error_response(&e),
    }
}

fn error_response(err: &PipelineError) -> Response {
    let (status, message) = match err {
        PipelineError::InvalidPayload(_) => (StatusCode::BAD_REQUEST, INVALID_PAYLOAD_ERROR),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, QUEUE_FAILED_ERROR),
    };

    (status, Json(json!({ "error": message }))).into_response()
}

/// Serve the intake router on `bind_addr` until `shutdown` is cancelled.
pub async fn serve(
    bind_addr: &str,
    service: IntakeService,
    shutdown: CancellationToken,
) -> Result<(), PipelineError> {
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| PipelineError::Config(format!("invalid intake bind addr {bind_addr}: {e}")))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| PipelineError::Config(format!("failed to bind intake listener on {addr}: {e}")))?;

    tracing::info!(%addr, "intake server listening");

    axum::serve(listener, router(service).into_make_service())
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| PipelineError::Server(e.to_string()))?;

    tracing::info!("intake server stopped");
    Ok(())
}
