//! # Orchestration Engine
//!
//! Per-stage control loops that drain a job queue in order and with bounded
//! retries.
//!
//! ## Core Components
//!
//! - **OrderingGate**: defers a slide until its predecessor's result row exists
//! - **RetryingDispatcher**: posts a job to the processing service with
//!   per-attempt timeouts and exponential backoff ([`BackoffPolicy`])
//! - **FailureRouter**: marks the lecture failed, dead-letters the job and acks it
//! - **StageOrchestrator**: the poll/process/ack loop for one stage
//! - **OrchestrationSystem**: runs one loop per enabled stage under a shared
//!   cancellation token

pub mod backoff_calculator;
pub mod bootstrap;
pub mod dispatcher;
pub mod failure_router;
pub mod ordering_gate;
pub mod stage;
pub mod stage_orchestrator;
pub mod stats;

pub use backoff_calculator::BackoffPolicy;
pub use bootstrap::OrchestrationSystem;
pub use dispatcher::{
    DispatchError, DispatchFailure, DispatchSuccess, HttpProcessingClient, ProcessingClient,
    RetryingDispatcher,
};
pub use failure_router::FailureRouter;
pub use ordering_gate::{DeferReason, GateDecision, OrderingGate};
pub use stage::Stage;
pub use stage_orchestrator::{IterationOutcome, StageOrchestrator};
pub use stats::{StageStats, StageStatsSnapshot};
