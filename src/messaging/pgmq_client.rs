//! # PostgreSQL Message Queue Client (pgmq-rs)
//!
//! [`QueueClient`] over the pgmq extension. The client shares its connection
//! pool with the Postgres state store so queue and relational state are
//! reached through one pool.

use super::errors::{MessagingError, MessagingResult};
use super::queue_client::{PollOptions, QueueClient, QueueMessage};
use async_trait::async_trait;
use pgmq::{types::Message, PGMQueue};
use std::time::Duration;
use tracing::{debug, info};

/// Interval between pgmq's internal re-reads while a poll is waiting
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// pgmq-rs based queue client
#[derive(Debug, Clone)]
pub struct PgmqQueueClient {
    pgmq: PGMQueue,
}

impl PgmqQueueClient {
    /// Create new pgmq client using existing connection pool (BYOP - Bring Your Own Pool)
    pub async fn new_with_pool(pool: sqlx::PgPool) -> Self {
        info!("🚀 Creating pgmq client with shared connection pool");
        let pgmq = PGMQueue::new_with_pool(pool).await;
        Self { pgmq }
    }

    /// Drop a queue and its archive
    pub async fn drop_queue(&self, queue_name: &str) -> MessagingResult<()> {
        self.pgmq
            .destroy(queue_name)
            .await
            .map_err(|e| MessagingError::from_pgmq(queue_name, "drop", e))?;
        info!("🗑️ Queue dropped: {}", queue_name);
        Ok(())
    }

    /// Get reference to underlying connection pool
    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pgmq.connection
    }
}

impl From<Message<serde_json::Value>> for QueueMessage {
    fn from(message: Message<serde_json::Value>) -> Self {
        Self {
            msg_id: message.msg_id,
            read_count: message.read_ct,
            enqueued_at: message.enqueued_at,
            payload: message.message,
        }
    }
}

#[async_trait]
impl QueueClient for PgmqQueueClient {
    async fn create_queue(&self, queue_name: &str) -> MessagingResult<()> {
        debug!("📋 Creating queue: {}", queue_name);
        self.pgmq
            .create(queue_name)
            .await
            .map_err(|e| MessagingError::from_pgmq(queue_name, "create", e))?;
        info!("✅ Queue created: {}", queue_name);
        Ok(())
    }

    async fn poll(
        &self,
        queue_name: &str,
        options: PollOptions,
    ) -> MessagingResult<Vec<QueueMessage>> {
        let messages = self
            .pgmq
            .read_batch_with_poll::<serde_json::Value>(
                queue_name,
                Some(options.visibility_timeout_seconds()),
                options.max_messages,
                Some(options.max_wait),
                Some(POLL_INTERVAL),
            )
            .await
            .map_err(|e| MessagingError::from_pgmq(queue_name, "poll", e))?
            .unwrap_or_default();

        if !messages.is_empty() {
            debug!(
                "📨 Read {} messages from queue: {}",
                messages.len(),
                queue_name
            );
        }
        Ok(messages.into_iter().map(QueueMessage::from).collect())
    }

    async fn set_visibility_timeout(
        &self,
        queue_name: &str,
        msg_id: i64,
        delay: Duration,
    ) -> MessagingResult<()> {
        let seconds = vt_seconds(delay);
        debug!(
            "⏳ Setting visibility of message {} on queue {} to {}s",
            msg_id, queue_name, seconds
        );
        sqlx::query("SELECT msg_id FROM pgmq.set_vt($1::text, $2::bigint, $3::integer)")
            .bind(queue_name)
            .bind(msg_id)
            .bind(seconds)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "set_vt", e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, queue_name: &str, msg_ids: &[i64]) -> MessagingResult<()> {
        debug!("🗑️ Deleting messages {:?} from queue: {}", msg_ids, queue_name);
        self.pgmq
            .delete_batch(queue_name, msg_ids)
            .await
            .map_err(|e| MessagingError::from_pgmq(queue_name, "delete", e))?;
        Ok(())
    }

    async fn send(&self, queue_name: &str, payload: &serde_json::Value) -> MessagingResult<i64> {
        let message_id = self
            .pgmq
            .send(queue_name, payload)
            .await
            .map_err(|e| MessagingError::from_pgmq(queue_name, "send", e))?;
        debug!(
            "📤 Message sent to queue: {} with id: {}",
            queue_name, message_id
        );
        Ok(message_id)
    }
}

/// pgmq visibility timeouts are whole seconds; round up so a short delay
/// still hides the message
fn vt_seconds(delay: Duration) -> i32 {
    i32::try_from(delay.as_millis().div_ceil(1000)).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vt_seconds_rounds_up() {
        assert_eq!(vt_seconds(Duration::ZERO), 0);
        assert_eq!(vt_seconds(Duration::from_millis(250)), 1);
        assert_eq!(vt_seconds(Duration::from_millis(1000)), 1);
        assert_eq!(vt_seconds(Duration::from_millis(1500)), 2);
    }

    async fn test_client() -> Option<PgmqQueueClient> {
        let Ok(database_url) = std::env::var("TEST_DATABASE_URL") else {
            println!("Skipping pgmq test - no TEST_DATABASE_URL provided");
            return None;
        };
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .expect("Failed to create connection pool");
        Some(PgmqQueueClient::new_with_pool(pool).await)
    }

    #[tokio::test]
    async fn test_shared_pool_pattern() {
        let Some(client) = test_client().await else {
            return;
        };
        assert!(!client.pool().is_closed());
    }

    #[tokio::test]
    async fn test_send_poll_delete_cycle() {
        let Some(client) = test_client().await else {
            return;
        };
        let queue = "lecture_orchestrator_cycle_test";
        client.create_queue(queue).await.expect("Failed to create queue");

        let payload = json!({"lecture_id": "L-test", "slide_number": 1, "slide_id": "s1"});
        let msg_id = client.send(queue, &payload).await.expect("Failed to send");
        assert!(msg_id > 0, "Message ID should be positive");

        let options = PollOptions {
            max_wait: Duration::from_secs(2),
            max_messages: 1,
            visibility_timeout: Duration::from_secs(30),
        };
        let messages = client.poll(queue, options).await.expect("Failed to poll");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].msg_id, msg_id);
        assert_eq!(messages[0].payload, payload);
        assert_eq!(messages[0].read_count, 1);

        client
            .set_visibility_timeout(queue, msg_id, Duration::ZERO)
            .await
            .expect("Failed to set visibility");
        let again = client.poll(queue, options).await.expect("Failed to re-poll");
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].read_count, 2);

        client.delete(queue, &[msg_id]).await.expect("Failed to delete");
        client.drop_queue(queue).await.expect("Failed to drop queue");
    }
}
