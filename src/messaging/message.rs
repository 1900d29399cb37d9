//! # Job Messages
//!
//! Decoding of stage job payloads read from a queue. The wire format is a JSON
//! object carrying the parent lecture and the slide's position in it:
//!
//! ```json
//! { "slide_id": "s-42", "lecture_id": "L1", "slide_number": 3 }
//! ```
//!
//! Stage-specific extra fields are retained so the job can be forwarded to the
//! processing service or a dead-letter queue exactly as it arrived.

use super::errors::{MessagingError, MessagingResult};
use super::queue_client::QueueMessage;
use crate::models::StepResultKey;
use serde::{Deserialize, Serialize};

/// Decoded job payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slide_id: Option<String>,
    pub lecture_id: String,
    pub slide_number: i32,
    /// Any other stage-specific fields, kept verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl JobPayload {
    pub fn new(lecture_id: impl Into<String>, slide_number: i32) -> Self {
        Self {
            slide_id: None,
            lecture_id: lecture_id.into(),
            slide_number,
            extra: serde_json::Map::new(),
        }
    }

    /// Convert to JSON for queue storage
    pub fn to_json(&self) -> MessagingResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn step_key(&self) -> StepResultKey {
        StepResultKey::new(self.lecture_id.clone(), self.slide_number)
    }
}

/// A decoded job together with the queue metadata needed to ack it
#[derive(Debug, Clone, PartialEq)]
pub struct JobMessage {
    pub msg_id: i64,
    pub read_count: i32,
    pub payload: JobPayload,
    /// The payload exactly as read from the queue
    pub raw: serde_json::Value,
}

impl JobMessage {
    /// Decode a queue record. Anything that is not an object with a string
    /// `lecture_id` and an integer `slide_number` is a deserialization error.
    pub fn decode(message: &QueueMessage) -> MessagingResult<Self> {
        if !message.payload.is_object() {
            return Err(MessagingError::message_deserialization(format!(
                "message {} payload is not a JSON object",
                message.msg_id
            )));
        }
        let payload: JobPayload = serde_json::from_value(message.payload.clone()).map_err(|e| {
            MessagingError::message_deserialization(format!("message {}: {e}", message.msg_id))
        })?;

        Ok(Self {
            msg_id: message.msg_id,
            read_count: message.read_count,
            payload,
            raw: message.payload.clone(),
        })
    }

    pub fn lecture_id(&self) -> &str {
        &self.payload.lecture_id
    }

    pub fn slide_number(&self) -> i32 {
        self.payload.slide_number
    }
}
