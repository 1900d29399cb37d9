//! # Crate Error Types
//!
//! Umbrella error for the orchestrator. Component errors (configuration,
//! messaging, persisted state, processing client) convert into [`OrchestratorError`] with `?`.

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::orchestration::dispatcher::DispatchError;
use crate::state::StateError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("State store error: {0}")]
    State(#[from] StateError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Processing client error: {0}")]
    ProcessingClient(#[from] DispatchError),

    #[error("Dead-letter routing incomplete for lecture {lecture_id}: failed steps {failed_steps:?}")]
    DeadLetterRouting {
        lecture_id: String,
        failed_steps: Vec<&'static str>,
    },

    #[error("Stage task join error: {0}")]
    TaskJoin(String),
}

impl OrchestratorError {
    pub fn dead_letter_routing(lecture_id: impl Into<String>, failed_steps: Vec<&'static str>) -> Self {
        Self::DeadLetterRouting {
            lecture_id: lecture_id.into(),
            failed_steps,
        }
    }
}

impl From<tokio::task::JoinError> for OrchestratorError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}

pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;
