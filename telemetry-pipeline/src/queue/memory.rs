use std::{collections::VecDeque, time::Duration};

use time::OffsetDateTime;
use tokio::{
    sync::{Mutex, Notify},
    time::Instant,
};

use crate::pipeline::{clamp_receive, MessageQueue, PipelineError, QueueMessage, ReceiptHandle};

/// Process-local queue with the same delivery contract as the durable one.
///
/// Messages are handed out in enqueue order. A received message is hidden for
/// `visibility_timeout`; afterwards it is visible again and the next `receive`
/// delivers it with a new receipt. Nothing survives a restart.
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    visibility_timeout: Duration,
}

#[derive(Default)]
struct QueueState {
    next_id: u64,
    messages: VecDeque<StoredMessage>,
}

struct StoredMessage {
    id: u64,
    body: String,
    enqueued_at: OffsetDateTime,
    visible_at: Instant,
    receipt: Option<ReceiptHandle>,
    delivery_count: u32,
}

impl InMemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            visibility_timeout,
        }
    }

    /// Messages not yet deleted, visible or not.
    pub async fn depth(&self) -> usize {
        self.state.lock().await.messages.len()
    }

    /// Messages currently hidden by an outstanding delivery.
    pub async fn in_flight(&self) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .await
            .messages
            .iter()
            .filter(|m| m.visible_at > now)
            .count()
    }

    async fn take_visible(&self, max_messages: usize) -> (Vec<QueueMessage>, Option<Instant>) {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let mut batch = Vec::new();
        let mut next_visible: Option<Instant> = None;

        for msg in state.messages.iter_mut() {
            if msg.visible_at > now {
                next_visible = Some(next_visible.map_or(msg.visible_at, |t| t.min(msg.visible_at)));
                continue;
            }
            if batch.len() == max_messages {
                continue;
            }

            msg.delivery_count += 1;
            msg.visible_at = now + self.visibility_timeout;
            let receipt = ReceiptHandle(format!("{}-{}", msg.id, msg.delivery_count));
            msg.receipt = Some(receipt.clone());

            batch.push(QueueMessage {
                body: msg.body.clone(),
                receipt,
                delivery_count: msg.delivery_count,
                enqueued_at: msg.enqueued_at,
            });
        }

        (batch, next_visible)
    }
}

#[async_trait::async_trait]
impl MessageQueue for InMemoryQueue {
    async fn enqueue(&self, body: &str) -> Result<(), PipelineError> {
        {
            let mut state = self.state.lock().await;
            state.next_id += 1;
            let id = state.next_id;
            state.messages.push_back(StoredMessage {
                id,
                body: body.to_string(),
                enqueued_at: OffsetDateTime::now_utc(),
                visible_at: Instant::now(),
                receipt: None,
                delivery_count: 0,
            });
        }

        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, PipelineError> {
        let (max_messages, wait) = clamp_receive(max_messages, wait);
        let deadline = Instant::now() + wait;

        loop {
            // Register for wakeups before looking, so an enqueue in between is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (batch, next_visible) = self.take_visible(max_messages).await;
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }

            let wake_at = next_visible.map_or(deadline, |t| t.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        let pos = state
            .messages
            .iter()
            .position(|m| m.receipt.as_ref() == Some(receipt))
            .ok_or_else(|| PipelineError::Queue(format!("unknown or stale receipt handle {receipt}")))?;

        state.messages.remove(pos);
        Ok(())
    }
}
