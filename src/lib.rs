#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Lecture Orchestrator
//!
//! Ordered, retrying job orchestration for the lecture processing pipeline.
//!
//! ## Overview
//!
//! Each pipeline stage (ingestion, embedding, explanation, summary) owns a pgmq
//! queue and a dead-letter queue. A stage loop drains its queue one message at
//! a time, keeps the slides of a lecture in order, calls the external
//! processing service with bounded retry and backoff, and dead-letters jobs
//! whose retries are exhausted while marking the lecture as failed.
//!
//! ## Module Organization
//!
//! - [`config`] - Layered configuration and validation
//! - [`logging`] - Structured logging initialisation
//! - [`error`] - Crate-wide error type
//! - [`database`] - Shared Postgres pool
//! - [`messaging`] - Queue store interface, pgmq and in-memory clients, job decoding
//! - [`models`] - Lecture status and error detail records
//! - [`state`] - Persisted-state interface with Postgres and in-memory stores
//! - [`orchestration`] - Ordering gate, dispatcher, failure router and stage loops
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lecture_orchestrator::config::ConfigManager;
//! use lecture_orchestrator::orchestration::OrchestrationSystem;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let system = OrchestrationSystem::bootstrap(manager.config().clone()).await?;
//!
//! let cancel = CancellationToken::new();
//! let _stats = system.run(cancel).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod state;

pub use config::{ConfigManager, OrchestratorConfig, StageConfig};
pub use error::{OrchestratorError, OrchestratorResult};
pub use messaging::{
    InMemoryQueueClient, JobMessage, JobPayload, PgmqQueueClient, QueueClient, QueueMessage,
};
pub use models::{ErrorDetails, LectureStatus};
pub use orchestration::{
    OrchestrationSystem, ProcessingClient, Stage, StageOrchestrator, StageStatsSnapshot,
};
pub use state::{InMemoryStateStore, PgStateStore, StateStore};
