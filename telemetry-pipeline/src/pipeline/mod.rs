use std::{fmt, time::Duration};

use telemetry_client::NewRow;
use time::OffsetDateTime;

/// Upper bound on messages returned by one `receive` call.
pub const MAX_RECEIVE_BATCH: usize = 10;
/// Upper bound on a single long-poll wait.
pub const MAX_RECEIVE_WAIT: Duration = Duration::from_secs(20);

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("queue unavailable: {0}")]
    Queue(String),
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("storage unavailable: {0}")]
    Storage(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("server error: {0}")]
    Server(String),
}

/// Opaque token identifying one delivery of a message. Only good for `delete`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(pub String);

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One delivery of a queued body.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub body: String,
    pub receipt: ReceiptHandle,
    /// 1 on first delivery, incremented on every redelivery.
    pub delivery_count: u32,
    pub enqueued_at: OffsetDateTime,
}

/// At-least-once queue with visibility-timeout semantics.
///
/// A message returned by `receive` stays hidden from other receivers until its
/// visibility window lapses; if `delete` is not called by then it is handed out
/// again with a fresh receipt.
#[async_trait::async_trait]
pub trait MessageQueue: Send + Sync {
    async fn enqueue(&self, body: &str) -> Result<(), PipelineError>;

    /// Long-poll for up to `wait` and return at most `max_messages` bodies.
    /// An empty vector means nothing became visible in time.
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, PipelineError>;

    async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), PipelineError>;
}

/// Insert-only storage for decoded readings.
#[async_trait::async_trait]
pub trait ReadingStore: Send + Sync {
    /// Create or upgrade the target table. Idempotent.
    async fn ensure_schema(&self) -> Result<(), PipelineError>;

    async fn insert(&self, row: &NewRow) -> Result<(), PipelineError>;
}

/// Clamp caller-supplied receive parameters to what any queue backend accepts.
pub fn clamp_receive(max_messages: usize, wait: Duration) -> (usize, Duration) {
    (max_messages.clamp(1, MAX_RECEIVE_BATCH), wait.min(MAX_RECEIVE_WAIT))
}
