//! # Queue Store Interface
//!
//! The narrow surface the stage loops need from a durable, at-least-once
//! queue: poll with a bounded wait, ack by deleting, hide an in-flight message
//! for a while, and plain send.

use super::errors::MessagingResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Stage-agnostic record returned by a poll
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    /// Queue-assigned id, monotonic within a queue; used only for ack
    pub msg_id: i64,
    /// Number of times the message has been read, including this one
    pub read_count: i32,
    pub enqueued_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Parameters of a single poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Longest time to wait for a visible message
    pub max_wait: Duration,
    pub max_messages: i32,
    /// How long read messages stay hidden before being redelivered
    pub visibility_timeout: Duration,
}

impl PollOptions {
    pub fn visibility_timeout_seconds(&self) -> i32 {
        i32::try_from(self.visibility_timeout.as_secs()).unwrap_or(i32::MAX)
    }
}

#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Create a queue if it doesn't exist
    async fn create_queue(&self, queue_name: &str) -> MessagingResult<()>;

    /// Read up to `max_messages`, waiting up to `max_wait`. Empty means the
    /// wait elapsed with nothing visible.
    async fn poll(&self, queue_name: &str, options: PollOptions)
        -> MessagingResult<Vec<QueueMessage>>;

    /// Make an in-flight message visible again `delay` from now instead of at
    /// the end of its read's visibility timeout. Unknown ids are ignored.
    async fn set_visibility_timeout(
        &self,
        queue_name: &str,
        msg_id: i64,
        delay: Duration,
    ) -> MessagingResult<()>;

    /// Acknowledge messages by deleting them
    async fn delete(&self, queue_name: &str, msg_ids: &[i64]) -> MessagingResult<()>;

    /// Send a JSON payload, returning the new message id
    async fn send(&self, queue_name: &str, payload: &serde_json::Value) -> MessagingResult<i64>;
}
