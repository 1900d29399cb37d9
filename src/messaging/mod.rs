//! # Messaging Module
//!
//! Queue store access for the stage loops: the [`QueueClient`] interface, a
//! pgmq implementation sharing the state store's pool, an in-memory
//! implementation for tests, and job payload decoding.

pub mod errors;
pub mod in_memory_client;
pub mod message;
pub mod pgmq_client;
pub mod queue_client;

pub use errors::{MessagingError, MessagingResult};
pub use in_memory_client::{InMemoryQueueClient, QueueOp};
pub use message::{JobMessage, JobPayload};
pub use pgmq_client::PgmqQueueClient;
pub use queue_client::{PollOptions, QueueClient, QueueMessage};
