use std::{sync::Arc, time::Duration};

use time::OffsetDateTime;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{
    pipeline::{MessageQueue, PipelineError, QueueMessage, ReadingStore, MAX_RECEIVE_BATCH},
    schema::{self, MessageVersion},
    transform,
};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub max_messages: usize,
    pub receive_wait: Duration,
    /// Version assumed for bodies without a `schemaVersion` tag; `None` drops them.
    pub untagged_version: Option<MessageVersion>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_messages: MAX_RECEIVE_BATCH,
            receive_wait: Duration::from_secs(5),
            untagged_version: Some(MessageVersion::V2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    NoMessages,
    Processed,
    /// A queue call failed; the rest of the batch waits for redelivery.
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub received: usize,
    pub inserted: usize,
    pub dropped: usize,
    pub failed: usize,
    pub deleted: usize,
    pub outcome: CycleOutcome,
}

impl CycleReport {
    fn new(received: usize) -> Self {
        Self {
            received,
            inserted: 0,
            dropped: 0,
            failed: 0,
            deleted: 0,
            outcome: if received == 0 {
                CycleOutcome::NoMessages
            } else {
                CycleOutcome::Processed
            },
        }
    }
}

/// Drains the queue into storage.
///
/// Each message is handled on its own: a valid reading is inserted and then
/// deleted, an invalid one is deleted without insert, and a failed insert
/// leaves the message on the queue for redelivery.
pub struct IngestionWorker {
    queue: Arc<dyn MessageQueue>,
    store: Arc<dyn ReadingStore>,
    settings: WorkerSettings,
}

impl IngestionWorker {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        store: Arc<dyn ReadingStore>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            store,
            settings,
        }
    }

    /// Run one poll cycle to completion. Never fails; errors end up in the report.
    pub async fn run_cycle(&self) -> CycleReport {
        if let Err(e) = self.store.ensure_schema().await {
            tracing::error!(error = %e, "error creating table");
        }

        let messages = match self
            .queue
            .receive(self.settings.max_messages, self.settings.receive_wait)
            .await
        {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(error = %e, "queue receive failed");
                metrics::counter!("worker_cycles_aborted_total").increment(1);
                let mut report = CycleReport::new(0);
                report.outcome = CycleOutcome::Aborted(e.to_string());
                return report;
            }
        };

        let mut report = CycleReport::new(messages.len());

        for msg in &messages {
            if let Err(e) = self.process_message(msg, &mut report).await {
                tracing::error!(error = %e, receipt = %msg.receipt, "queue delete failed, ending cycle");
                metrics::counter!("worker_cycles_aborted_total").increment(1);
                report.outcome = CycleOutcome::Aborted(e.to_string());
                break;
            }
        }

        report
    }

    /// Returns `Err` only for queue failures, which end the cycle.
    async fn process_message(
        &self,
        msg: &QueueMessage,
        report: &mut CycleReport,
    ) -> Result<(), PipelineError> {
        let decoded = schema::decode(&msg.body, self.settings.untagged_version)
            .and_then(|m| {
                let version = m.version();
                transform::validate_message(m).map(|row| (version, row))
            });

        let (version, row) = match decoded {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    body = %msg.body,
                    delivery_count = msg.delivery_count,
                    "dropping invalid message"
                );
                self.queue.delete(&msg.receipt).await?;
                report.deleted += 1;
                report.dropped += 1;
                metrics::counter!("worker_messages_dropped_total").increment(1);
                return Ok(());
            }
        };

        if let Err(e) = self.store.insert(&row).await {
            tracing::error!(
                error = %e,
                device_id = %row.device_id,
                delivery_count = msg.delivery_count,
                "insert failed, leaving message for redelivery"
            );
            report.failed += 1;
            metrics::counter!("worker_insert_failed_total").increment(1);
            return Ok(());
        }
        report.inserted += 1;
        metrics::counter!("worker_messages_inserted_total").increment(1);

        self.queue.delete(&msg.receipt).await?;
        report.deleted += 1;

        let latency = OffsetDateTime::now_utc() - msg.enqueued_at;
        metrics::histogram!("ingest_end_to_end_latency_seconds").record(latency.as_seconds_f64());

        tracing::info!(
            body = %msg.body,
            schema_version = u8::from(version),
            "processed message"
        );
        Ok(())
    }

    /// Run cycles on a fixed interval until `shutdown` fires.
    ///
    /// Cycles never overlap: a slow cycle delays the next tick instead of
    /// stacking up behind it.
    pub async fn run(&self, shutdown: CancellationToken) {
        let period = self.settings.poll_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(poll_interval_ms = period.as_millis() as u64, "ingestion worker started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                report = self.run_cycle() => log_report(&report),
            }
        }

        tracing::info!("ingestion worker stopped");
    }
}

fn log_report(report: &CycleReport) {
    match &report.outcome {
        CycleOutcome::NoMessages => tracing::debug!("no messages"),
        CycleOutcome::Processed => tracing::info!(
            received = report.received,
            inserted = report.inserted,
            dropped = report.dropped,
            failed = report.failed,
            "cycle complete"
        ),
        CycleOutcome::Aborted(reason) => tracing::warn!(
            received = report.received,
            inserted = report.inserted,
            deleted = report.deleted,
            reason = %reason,
            "cycle ended early"
        ),
    }
}
