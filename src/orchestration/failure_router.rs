//! # Failure Router
//!
//! Handles a job whose dispatch attempts are exhausted: mark the lecture
//! failed, forward the original payload to the dead-letter queue and ack the
//! original message. Each step is attempted regardless of the others and
//! logged on its own; the ack is always attempted.

use super::dispatcher::DispatchError;
use super::stage::Stage;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::messaging::{JobMessage, QueueClient};
use crate::models::ErrorDetails;
use crate::state::StateStore;
use std::sync::Arc;
use tracing::{error, warn};

pub const STEP_STATUS_UPDATE: &str = "status_update";
pub const STEP_DEAD_LETTER_SEND: &str = "dead_letter_send";
pub const STEP_ACK: &str = "ack";

pub struct FailureRouter {
    stage: Stage,
    queue_name: String,
    dead_letter_queue_name: String,
    queue: Arc<dyn QueueClient>,
    state: Arc<dyn StateStore>,
}

impl std::fmt::Debug for FailureRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureRouter")
            .field("stage", &self.stage)
            .field("queue_name", &self.queue_name)
            .field("dead_letter_queue_name", &self.dead_letter_queue_name)
            .finish()
    }
}

impl FailureRouter {
    pub fn new(
        stage: Stage,
        queue_name: impl Into<String>,
        dead_letter_queue_name: impl Into<String>,
        queue: Arc<dyn QueueClient>,
        state: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            stage,
            queue_name: queue_name.into(),
            dead_letter_queue_name: dead_letter_queue_name.into(),
            queue,
            state,
        }
    }

    /// Returns [`OrchestratorError::DeadLetterRouting`] naming the steps that
    /// failed; all steps have been attempted by then.
    pub async fn route_to_dead_letter(
        &self,
        job: &JobMessage,
        err: &DispatchError,
    ) -> OrchestratorResult<()> {
        let mut failed_steps = Vec::new();
        let details = ErrorDetails::new(self.stage, err.to_string());

        match self.state.mark_failed(job.lecture_id(), &details).await {
            Ok(0) => warn!(
                stage = %self.stage,
                lecture_id = %job.lecture_id(),
                "No lecture row updated while marking failed"
            ),
            Ok(_) => {}
            Err(e) => {
                error!(
                    stage = %self.stage,
                    lecture_id = %job.lecture_id(),
                    error = %e,
                    "Failed to mark lecture as failed"
                );
                failed_steps.push(STEP_STATUS_UPDATE);
            }
        }

        if let Err(e) = self.queue.send(&self.dead_letter_queue_name, &job.raw).await {
            error!(
                stage = %self.stage,
                queue = %self.dead_letter_queue_name,
                msg_id = job.msg_id,
                lecture_id = %job.lecture_id(),
                error = %e,
                "Failed to send job to dead-letter queue"
            );
            failed_steps.push(STEP_DEAD_LETTER_SEND);
        }

        if let Err(e) = self.queue.delete(&self.queue_name, &[job.msg_id]).await {
            error!(
                stage = %self.stage,
                queue = %self.queue_name,
                msg_id = job.msg_id,
                error = %e,
                "Failed to delete dead-lettered message"
            );
            failed_steps.push(STEP_ACK);
        }

        warn!(
            stage = %self.stage,
            msg_id = job.msg_id,
            lecture_id = %job.lecture_id(),
            slide_number = job.slide_number(),
            dead_letter_queue = %self.dead_letter_queue_name,
            error = %err,
            "Retries exhausted, job routed to dead-letter queue"
        );

        if failed_steps.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::dead_letter_routing(
                job.lecture_id(),
                failed_steps,
            ))
        }
    }
}
