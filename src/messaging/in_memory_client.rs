//! # In-Memory Queue Client
//!
//! [`QueueClient`] that keeps messages in process memory with pgmq-like
//! semantics: monotonic ids per queue, a visibility timeout on every read,
//! redelivery of messages that are not deleted, and polls that wait up to
//! their `max_wait`. Visibility uses tokio's clock, so tests running with
//! paused time advance it deterministically.
//!
//! Operations can be made to fail a fixed number of times per queue with
//! [`InMemoryQueueClient::fail_next`].

use super::errors::{MessagingError, MessagingResult};
use super::queue_client::{PollOptions, QueueClient, QueueMessage};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Re-check interval while a poll waits for a visible message
const POLL_STEP: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOp {
    Poll,
    Delete,
    Send,
    SetVisibility,
}

impl QueueOp {
    fn as_str(self) -> &'static str {
        match self {
            QueueOp::Poll => "poll",
            QueueOp::Delete => "delete",
            QueueOp::Send => "send",
            QueueOp::SetVisibility => "set_vt",
        }
    }
}

#[derive(Debug, Clone)]
struct InMemoryMessage {
    id: i64,
    payload: serde_json::Value,
    enqueued_at: chrono::DateTime<chrono::Utc>,
    read_count: i32,
    /// Hidden until this instant after a read
    invisible_until: Option<Instant>,
}

impl InMemoryMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.map_or(true, |until| until <= now)
    }

    fn to_record(&self) -> QueueMessage {
        QueueMessage {
            msg_id: self.id,
            read_count: self.read_count,
            enqueued_at: self.enqueued_at,
            payload: self.payload.clone(),
        }
    }
}

#[derive(Debug)]
struct InMemoryQueue {
    messages: VecDeque<InMemoryMessage>,
    next_id: i64,
    deleted: Vec<i64>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self {
            messages: VecDeque::new(),
            next_id: 1,
            deleted: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    queues: HashMap<String, InMemoryQueue>,
    injected_failures: HashMap<(String, QueueOp), u32>,
}

impl State {
    fn take_injected_failure(&mut self, queue_name: &str, op: QueueOp) -> MessagingResult<()> {
        let key = (queue_name.to_string(), op);
        match self.injected_failures.get_mut(&key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(MessagingError::queue_operation(
                    queue_name,
                    op.as_str(),
                    "injected failure",
                ))
            }
            _ => Ok(()),
        }
    }

    fn queue_mut(&mut self, queue_name: &str) -> MessagingResult<&mut InMemoryQueue> {
        self.queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))
    }
}

/// In-memory client implementation for testing
#[derive(Debug, Default)]
pub struct InMemoryQueueClient {
    state: Mutex<State>,
}

impl InMemoryQueueClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls of `op` on `queue_name` fail
    pub fn fail_next(&self, op: QueueOp, queue_name: &str, times: u32) {
        self.state
            .lock()
            .injected_failures
            .insert((queue_name.to_string(), op), times);
    }

    /// Every message still in the queue, visible or not, in id order
    pub fn messages(&self, queue_name: &str) -> Vec<QueueMessage> {
        self.state
            .lock()
            .queues
            .get(queue_name)
            .map(|queue| queue.messages.iter().map(InMemoryMessage::to_record).collect())
            .unwrap_or_default()
    }

    /// Number of messages a poll would currently return
    pub fn visible_len(&self, queue_name: &str) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .queues
            .get(queue_name)
            .map(|queue| queue.messages.iter().filter(|m| m.is_visible(now)).count())
            .unwrap_or(0)
    }

    /// Ids removed by `delete`, in call order
    pub fn deleted_ids(&self, queue_name: &str) -> Vec<i64> {
        self.state
            .lock()
            .queues
            .get(queue_name)
            .map(|queue| queue.deleted.clone())
            .unwrap_or_default()
    }

    fn try_claim(
        &self,
        queue_name: &str,
        options: &PollOptions,
    ) -> MessagingResult<Vec<QueueMessage>> {
        let mut state = self.state.lock();
        let queue = state.queue_mut(queue_name)?;
        let now = Instant::now();
        let limit = usize::try_from(options.max_messages).unwrap_or(0);

        let claimed = queue
            .messages
            .iter_mut()
            .filter(|message| message.is_visible(now))
            .take(limit)
            .map(|message| {
                message.read_count += 1;
                message.invisible_until = Some(now + options.visibility_timeout);
                message.to_record()
            })
            .collect();
        Ok(claimed)
    }
}

#[async_trait]
impl QueueClient for InMemoryQueueClient {
    async fn create_queue(&self, queue_name: &str) -> MessagingResult<()> {
        self.state
            .lock()
            .queues
            .entry(queue_name.to_string())
            .or_default();
        Ok(())
    }

    async fn poll(
        &self,
        queue_name: &str,
        options: PollOptions,
    ) -> MessagingResult<Vec<QueueMessage>> {
        self.state
            .lock()
            .take_injected_failure(queue_name, QueueOp::Poll)?;

        let deadline = Instant::now() + options.max_wait;
        loop {
            let claimed = self.try_claim(queue_name, &options)?;
            let now = Instant::now();
            if !claimed.is_empty() || now >= deadline {
                return Ok(claimed);
            }
            tokio::time::sleep(POLL_STEP.min(deadline - now)).await;
        }
    }

    async fn set_visibility_timeout(
        &self,
        queue_name: &str,
        msg_id: i64,
        delay: Duration,
    ) -> MessagingResult<()> {
        let mut state = self.state.lock();
        state.take_injected_failure(queue_name, QueueOp::SetVisibility)?;
        let queue = state.queue_mut(queue_name)?;
        if let Some(message) = queue.messages.iter_mut().find(|m| m.id == msg_id) {
            message.invisible_until = Some(Instant::now() + delay);
        }
        Ok(())
    }

    async fn delete(&self, queue_name: &str, msg_ids: &[i64]) -> MessagingResult<()> {
        let mut state = self.state.lock();
        state.take_injected_failure(queue_name, QueueOp::Delete)?;
        let queue = state.queue_mut(queue_name)?;
        for id in msg_ids {
            if let Some(position) = queue.messages.iter().position(|m| m.id == *id) {
                queue.messages.remove(position);
                queue.deleted.push(*id);
            }
        }
        Ok(())
    }

    async fn send(&self, queue_name: &str, payload: &serde_json::Value) -> MessagingResult<i64> {
        let mut state = self.state.lock();
        state.take_injected_failure(queue_name, QueueOp::Send)?;
        let queue = state.queue_mut(queue_name)?;

        let id = queue.next_id;
        queue.next_id += 1;
        queue.messages.push_back(InMemoryMessage {
            id,
            payload: payload.clone(),
            enqueued_at: chrono::Utc::now(),
            read_count: 0,
            invisible_until: None,
        });
        Ok(id)
    }
}
