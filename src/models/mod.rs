//! # Persisted Models
//!
//! Records the orchestrator reads or writes in the relational store. Only the
//! fields the stage loops touch are modelled here; the rest of each table is
//! owned by the API service.

pub mod lecture;

pub use lecture::{ErrorDetails, LectureStatus, LectureStatusRecord, StepResultKey};
