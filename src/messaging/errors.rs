//! # Messaging Error Types
//!
//! Failures raised by a [`QueueClient`](super::QueueClient) or while decoding a
//! job payload. Every queue-level variant names the queue it concerns.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessagingError {
    /// A poll, ack, send or create against a queue failed
    #[error("Queue operation '{operation}' on {queue_name} failed: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Could not encode message: {message}")]
    MessageSerialization { message: String },

    /// Payload is not a job this stage can process
    #[error("Could not decode message: {message}")]
    MessageDeserialization { message: String },

    #[error("Queue database error: {message}")]
    Database { message: String },
}

impl MessagingError {
    pub fn queue_operation(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn queue_not_found(queue_name: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue_name: queue_name.into(),
        }
    }

    pub fn message_deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    /// Attach the queue and operation to a pgmq failure
    pub fn from_pgmq(queue_name: &str, operation: &str, err: pgmq::errors::PgmqError) -> Self {
        Self::queue_operation(queue_name, operation, err.to_string())
    }
}

impl From<sqlx::Error> for MessagingError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() || err.is_eof() {
            Self::message_deserialization(err.to_string())
        } else {
            Self::MessageSerialization {
                message: err.to_string(),
            }
        }
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;
