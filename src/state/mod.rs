//! # Persisted State
//!
//! The relational state the stage loops read and write: existence of per-slide
//! result rows (the ordering signal) and the lecture status written when a job
//! is dead-lettered.

pub mod in_memory;
pub mod postgres;

use crate::models::{ErrorDetails, LectureStatusRecord};
use async_trait::async_trait;
use thiserror::Error;

pub use in_memory::InMemoryStateStore;
pub use postgres::PgStateStore;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("State query failed: {operation}: {message}")]
    Query { operation: String, message: String },

    #[error("Invalid table identifier: {table}")]
    InvalidIdentifier { table: String },

    #[error("Could not decode {field} for lecture {lecture_id}: {message}")]
    Decode {
        lecture_id: String,
        field: String,
        message: String,
    },
}

impl StateError {
    pub fn query(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Query {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn decode(
        lecture_id: impl Into<String>,
        field: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Decode {
            lecture_id: lecture_id.into(),
            field: field.into(),
            message: message.to_string(),
        }
    }
}

pub type StateResult<T> = Result<T, StateError>;

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Whether `result_table` holds a row for `(lecture_id, slide_number)`
    async fn step_result_exists(
        &self,
        result_table: &str,
        lecture_id: &str,
        slide_number: i32,
    ) -> StateResult<bool>;

    /// Set the lecture's status to failed with structured detail. Returns the
    /// number of rows updated; zero is not an error.
    async fn mark_failed(&self, lecture_id: &str, details: &ErrorDetails) -> StateResult<u64>;

    async fn lecture_status(&self, lecture_id: &str) -> StateResult<Option<LectureStatusRecord>>;
}
