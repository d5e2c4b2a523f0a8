#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use telemetry_client::NewRow;
use telemetry_pipeline::{
    queue::InMemoryQueue, worker::WorkerSettings, IngestionWorker, IntakeService, MessageQueue,
    PipelineError, QueueMessage, ReadingStore, ReceiptHandle,
};

pub const VISIBILITY: Duration = Duration::from_secs(30);

/// In-memory queue with switchable failures and a delete counter.
pub struct FlakyQueue {
    pub inner: InMemoryQueue,
    pub fail_enqueue: AtomicBool,
    pub fail_receive: AtomicBool,
    pub fail_delete: AtomicBool,
    pub deletes: AtomicUsize,
}

impl FlakyQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryQueue::new(VISIBILITY),
            fail_enqueue: AtomicBool::new(false),
            fail_receive: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            deletes: AtomicUsize::new(0),
        })
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl MessageQueue for FlakyQueue {
    async fn enqueue(&self, body: &str) -> Result<(), PipelineError> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(PipelineError::Queue("access denied".to_string()));
        }
        self.inner.enqueue(body).await
    }

    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, PipelineError> {
        if self.fail_receive.load(Ordering::SeqCst) {
            return Err(PipelineError::Queue("connection reset".to_string()));
        }
        self.inner.receive(max_messages, wait).await
    }

    async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), PipelineError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(PipelineError::Queue("throttled".to_string()));
        }
        self.inner.delete(receipt).await?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Row sink that can be told to fail, globally or for one device.
#[derive(Default)]
pub struct FakeStore {
    pub rows: Mutex<Vec<NewRow>>,
    pub fail_inserts: AtomicBool,
    pub fail_schema: AtomicBool,
    pub fail_device: Mutex<Option<String>>,
    pub schema_calls: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rows(&self) -> Vec<NewRow> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ReadingStore for FakeStore {
    async fn ensure_schema(&self) -> Result<(), PipelineError> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_schema.load(Ordering::SeqCst) {
            return Err(PipelineError::Storage("permission denied for schema".to_string()));
        }
        Ok(())
    }

    async fn insert(&self, row: &NewRow) -> Result<(), PipelineError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(PipelineError::Storage("connection refused".to_string()));
        }
        if self.fail_device.lock().unwrap().as_deref() == Some(row.device_id.as_str()) {
            return Err(PipelineError::Storage("deadlock detected".to_string()));
        }
        self.rows.lock().unwrap().push(row.clone());
        Ok(())
    }
}

pub fn settings() -> WorkerSettings {
    WorkerSettings {
        receive_wait: Duration::ZERO,
        ..WorkerSettings::default()
    }
}

pub fn pipeline() -> (IntakeService, IngestionWorker, Arc<FlakyQueue>, Arc<FakeStore>) {
    let queue = FlakyQueue::new();
    let store = FakeStore::new();
    let intake = IntakeService::new(queue.clone());
    let worker = IngestionWorker::new(queue.clone(), store.clone(), settings());
    (intake, worker, queue, store)
}
