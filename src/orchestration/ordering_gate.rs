//! # Ordering Gate
//!
//! Keeps slides of a lecture in order: slide `n` may only be dispatched once
//! the result row for slide `n - 1` exists. The gate only reads state; the
//! caller decides how to defer.

use crate::models::StepResultKey;
use crate::state::StateStore;
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Ready,
    RetryLater(DeferReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferReason {
    /// Predecessor result row does not exist yet
    PredecessorPending,
    /// The existence query failed
    LookupFailed(String),
}

impl GateDecision {
    pub fn is_ready(&self) -> bool {
        matches!(self, GateDecision::Ready)
    }
}

pub struct OrderingGate {
    /// `None` for unordered stages
    result_table: Option<String>,
    state: Arc<dyn StateStore>,
}

impl std::fmt::Debug for OrderingGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderingGate")
            .field("result_table", &self.result_table)
            .finish()
    }
}

impl OrderingGate {
    pub fn new(result_table: Option<String>, state: Arc<dyn StateStore>) -> Self {
        Self {
            result_table,
            state,
        }
    }

    /// Gate that lets every job through
    pub fn unordered(state: Arc<dyn StateStore>) -> Self {
        Self::new(None, state)
    }

    pub fn is_ordered(&self) -> bool {
        self.result_table.is_some()
    }

    pub async fn check_predecessor(&self, lecture_id: &str, slide_number: i32) -> GateDecision {
        let Some(table) = self.result_table.as_deref() else {
            return GateDecision::Ready;
        };
        let Some(predecessor) = StepResultKey::new(lecture_id, slide_number).predecessor() else {
            return GateDecision::Ready;
        };

        match self
            .state
            .step_result_exists(table, &predecessor.lecture_id, predecessor.slide_number)
            .await
        {
            Ok(true) => GateDecision::Ready,
            Ok(false) => {
                debug!(
                    lecture_id,
                    slide_number,
                    table,
                    "Predecessor result not found"
                );
                GateDecision::RetryLater(DeferReason::PredecessorPending)
            }
            Err(e) => {
                error!(
                    lecture_id,
                    slide_number,
                    table,
                    error = %e,
                    "Predecessor lookup failed"
                );
                GateDecision::RetryLater(DeferReason::LookupFailed(e.to_string()))
            }
        }
    }
}
