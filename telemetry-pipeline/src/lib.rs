pub mod bootstrap;
pub mod config;
pub mod intake;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod queue;
pub mod schema;
pub mod shutdown;
pub mod sinks;
pub mod transform;
pub mod worker;

pub use intake::IntakeService;
pub use pipeline::{MessageQueue, PipelineError, QueueMessage, ReadingStore, ReceiptHandle};
pub use worker::{CycleOutcome, CycleReport, IngestionWorker, WorkerSettings};
