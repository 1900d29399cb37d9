//! # Stage Orchestrator
//!
//! The control loop of one pipeline stage. Each iteration polls the stage
//! queue, takes the first message, discards it if undecodable, passes it
//! through the [`OrderingGate`], dispatches it with the
//! [`RetryingDispatcher`] and then either acks it or hands it to the
//! [`FailureRouter`].
//!
//! Exactly one message is in flight per loop. Cancellation is checked at the
//! top of every iteration; an in-flight dispatch runs to completion.
//!
//! A deferred job is hidden for `defer_interval * (n + 2)`, where `n` counts
//! earlier deferrals since the loop last made progress, capped at the
//! visibility timeout. Below the cap the hold outlasts the pause that follows it.
//! Polls return messages in id order, so the growing hold lets a ready job
//! queued behind several blocked ones reach the front.

use super::dispatcher::{ProcessingClient, RetryingDispatcher};
use super::failure_router::FailureRouter;
use super::ordering_gate::{DeferReason, GateDecision, OrderingGate};
use super::stage::Stage;
use super::stats::{StageStats, StageStatsSnapshot};
use crate::config::StageConfig;
use crate::messaging::{JobMessage, PollOptions, QueueClient, QueueMessage};
use crate::state::StateStore;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What a single loop iteration did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// Poll returned nothing
    Idle,
    PollFailed,
    PoisonDiscarded,
    /// Left un-acked for a later poll
    Deferred,
    Completed,
    DeadLettered,
}

pub struct StageOrchestrator {
    orchestrator_id: Uuid,
    stage: Stage,
    config: StageConfig,
    queue: Arc<dyn QueueClient>,
    gate: OrderingGate,
    dispatcher: RetryingDispatcher,
    router: FailureRouter,
    stats: Arc<StageStats>,
    consecutive_deferrals: AtomicU32,
}

impl std::fmt::Debug for StageOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageOrchestrator")
            .field("orchestrator_id", &self.orchestrator_id)
            .field("stage", &self.stage)
            .field("queue", &self.config.queue_name)
            .field("gate", &self.gate)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl StageOrchestrator {
    pub fn new(
        stage: Stage,
        config: StageConfig,
        endpoint: impl Into<String>,
        queue: Arc<dyn QueueClient>,
        state: Arc<dyn StateStore>,
        client: Arc<dyn ProcessingClient>,
    ) -> Self {
        let gate = OrderingGate::new(
            config.ordering_table().map(str::to_string),
            state.clone(),
        );
        let dispatcher = RetryingDispatcher::new(stage, endpoint, &config, client);
        let router = FailureRouter::new(
            stage,
            config.queue_name.clone(),
            config.dead_letter_queue_name.clone(),
            queue.clone(),
            state,
        );

        Self {
            orchestrator_id: Uuid::new_v4(),
            stage,
            config,
            queue,
            gate,
            dispatcher,
            router,
            stats: Arc::new(StageStats::default()),
            consecutive_deferrals: AtomicU32::new(0),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn stats(&self) -> Arc<StageStats> {
        self.stats.clone()
    }

    fn poll_options(&self) -> PollOptions {
        PollOptions {
            max_wait: self.config.poll_timeout(),
            max_messages: self.config.poll_max_messages,
            visibility_timeout: self.config.visibility_timeout(),
        }
    }

    /// Run until `cancel` fires, returning the final counters
    pub async fn run(&self, cancel: CancellationToken) -> StageStatsSnapshot {
        info!(
            orchestrator_id = %self.orchestrator_id,
            stage = %self.stage,
            queue = %self.config.queue_name,
            endpoint = %self.dispatcher.endpoint(),
            ordered = self.gate.is_ordered(),
            "Starting stage orchestrator"
        );

        while !cancel.is_cancelled() {
            match self.run_iteration().await {
                IterationOutcome::PollFailed => {
                    pause(self.config.poll_error_delay(), &cancel).await;
                }
                IterationOutcome::Deferred => {
                    pause(self.config.defer_interval(), &cancel).await;
                }
                _ => {}
            }
        }

        let snapshot = self.stats.snapshot();
        info!(
            orchestrator_id = %self.orchestrator_id,
            stage = %self.stage,
            stats = ?snapshot,
            "Stage orchestrator stopped"
        );
        snapshot
    }

    /// One poll/process cycle. Never fails; every error is logged and
    /// reflected in the outcome.
    pub async fn run_iteration(&self) -> IterationOutcome {
        let queue_name = self.config.queue_name.as_str();
        StageStats::incr(&self.stats.polls);

        let messages = match self.queue.poll(queue_name, self.poll_options()).await {
            Ok(messages) => messages,
            Err(e) => {
                StageStats::incr(&self.stats.poll_errors);
                error!(
                    stage = %self.stage,
                    queue = queue_name,
                    error = %e,
                    "Failed to poll queue"
                );
                return IterationOutcome::PollFailed;
            }
        };

        let batch_size = messages.len();
        let Some(message) = messages.into_iter().next() else {
            return IterationOutcome::Idle;
        };
        StageStats::incr(&self.stats.messages_received);
        if batch_size > 1 {
            debug!(
                stage = %self.stage,
                queue = queue_name,
                batch_size,
                "Processing first message of batch; the rest are redelivered later"
            );
        }

        let job = match JobMessage::decode(&message) {
            Ok(job) => job,
            Err(e) => return self.discard_poison(&message, &e.to_string()).await,
        };

        if let GateDecision::RetryLater(reason) = self
            .gate
            .check_predecessor(job.lecture_id(), job.slide_number())
            .await
        {
            StageStats::incr(&self.stats.deferred);
            let reason = match reason {
                DeferReason::PredecessorPending => "predecessor_pending".to_string(),
                DeferReason::LookupFailed(e) => format!("lookup_failed: {e}"),
            };
            info!(
                stage = %self.stage,
                msg_id = job.msg_id,
                lecture_id = %job.lecture_id(),
                slide_number = job.slide_number(),
                read_count = job.read_count,
                reason = %reason,
                "Deferring job until its predecessor completes"
            );
            let deferrals = self.consecutive_deferrals.fetch_add(1, Ordering::Relaxed);
            let hold = self.deferral_hold(deferrals);
            if let Err(e) = self
                .queue
                .set_visibility_timeout(queue_name, job.msg_id, hold)
                .await
            {
                warn!(
                    stage = %self.stage,
                    queue = queue_name,
                    msg_id = job.msg_id,
                    error = %e,
                    "Failed to shorten visibility of deferred job"
                );
            }
            return IterationOutcome::Deferred;
        }

        self.consecutive_deferrals.store(0, Ordering::Relaxed);
        match self.dispatcher.dispatch(&job).await {
            Ok(_) => {
                if let Err(e) = self.queue.delete(queue_name, &[job.msg_id]).await {
                    StageStats::incr(&self.stats.ack_failures);
                    error!(
                        stage = %self.stage,
                        queue = queue_name,
                        msg_id = job.msg_id,
                        error = %e,
                        "Failed to ack processed message"
                    );
                }
                StageStats::incr(&self.stats.completed);
                IterationOutcome::Completed
            }
            Err(failure) => {
                if let Err(e) = self
                    .router
                    .route_to_dead_letter(&job, &failure.last_error)
                    .await
                {
                    error!(
                        stage = %self.stage,
                        msg_id = job.msg_id,
                        error = %e,
                        "Dead-letter routing incomplete"
                    );
                }
                StageStats::incr(&self.stats.dead_lettered);
                IterationOutcome::DeadLettered
            }
        }
    }

    /// How long a job deferred after `prior` consecutive deferrals stays hidden
    fn deferral_hold(&self, prior: u32) -> Duration {
        self.config
            .defer_interval()
            .saturating_mul(prior.saturating_add(2))
            .min(self.config.visibility_timeout())
    }

    async fn discard_poison(&self, message: &QueueMessage, reason: &str) -> IterationOutcome {
        let queue_name = self.config.queue_name.as_str();
        self.consecutive_deferrals.store(0, Ordering::Relaxed);
        warn!(
            stage = %self.stage,
            queue = queue_name,
            msg_id = message.msg_id,
            error = reason,
            "Discarding undecodable message"
        );
        if let Err(e) = self.queue.delete(queue_name, &[message.msg_id]).await {
            StageStats::incr(&self.stats.ack_failures);
            error!(
                stage = %self.stage,
                queue = queue_name,
                msg_id = message.msg_id,
                error = %e,
                "Failed to delete undecodable message"
            );
        }
        StageStats::incr(&self.stats.poison_discarded);
        IterationOutcome::PoisonDiscarded
    }
}

/// Sleep for `duration` unless cancelled first
async fn pause(duration: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{InMemoryQueueClient, QueueOp};
    use crate::orchestration::dispatcher::DispatchError;
    use crate::state::InMemoryStateStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Succeeds unless told to fail; records every body it receives
    #[derive(Default)]
    struct RecordingClient {
        fail: bool,
        bodies: Mutex<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl ProcessingClient for RecordingClient {
        async fn post_job(
            &self,
            _url: &str,
            body: &serde_json::Value,
            _timeout: Duration,
        ) -> Result<(), DispatchError> {
            self.bodies.lock().push(body.clone());
            if self.fail {
                Err(DispatchError::Status {
                    status: 503,
                    body: String::new(),
                })
            } else {
                Ok(())
            }
        }
    }

    struct Harness {
        queue: Arc<InMemoryQueueClient>,
        state: Arc<InMemoryStateStore>,
        client: Arc<RecordingClient>,
        orchestrator: StageOrchestrator,
    }

    async fn harness(stage: Stage, fail: bool) -> Harness {
        let mut config = StageConfig::for_stage(stage);
        config.poll_timeout_seconds = 1;
        let queue = Arc::new(InMemoryQueueClient::new());
        queue.create_queue(&config.queue_name).await.unwrap();
        queue.create_queue(&config.dead_letter_queue_name).await.unwrap();
        let state = Arc::new(InMemoryStateStore::new());
        let client = Arc::new(RecordingClient {
            fail,
            ..Default::default()
        });
        let orchestrator = StageOrchestrator::new(
            stage,
            config,
            "http://svc/verb",
            queue.clone(),
            state.clone(),
            client.clone(),
        );
        Harness {
            queue,
            state,
            client,
            orchestrator,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_queue_is_idle() {
        let h = harness(Stage::Embedding, false).await;
        assert_eq!(h.orchestrator.run_iteration().await, IterationOutcome::Idle);
        assert_eq!(h.orchestrator.stats().snapshot().polls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_acks_message() {
        let h = harness(Stage::Embedding, false).await;
        let id = h
            .queue
            .send("embedding", &json!({"lecture_id": "L1", "slide_number": 4}))
            .await
            .unwrap();

        assert_eq!(h.orchestrator.run_iteration().await, IterationOutcome::Completed);
        assert_eq!(h.queue.deleted_ids("embedding"), vec![id]);
        assert!(h.queue.messages("embedding_dlq").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poison_message_is_deleted_without_dispatch() {
        let h = harness(Stage::Explanation, false).await;
        let id = h.queue.send("explanation", &json!({"oops": 1})).await.unwrap();

        assert_eq!(
            h.orchestrator.run_iteration().await,
            IterationOutcome::PoisonDiscarded
        );
        assert_eq!(h.queue.deleted_ids("explanation"), vec![id]);
        assert!(h.client.bodies.lock().is_empty());
        assert!(h.queue.messages("explanation_dlq").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_job_is_deferred_and_left_unacked() {
        let h = harness(Stage::Explanation, false).await;
        h.queue
            .send("explanation", &json!({"lecture_id": "L1", "slide_number": 2}))
            .await
            .unwrap();

        assert_eq!(h.orchestrator.run_iteration().await, IterationOutcome::Deferred);
        assert!(h.client.bodies.lock().is_empty());
        assert_eq!(h.queue.messages("explanation").len(), 1);
        assert!(h.queue.deleted_ids("explanation").is_empty());

        h.state.record_step_result("explanations", "L1", 1);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(h.orchestrator.run_iteration().await, IterationOutcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_job_returns_long_before_visibility_timeout() {
        let h = harness(Stage::Explanation, false).await;
        h.queue
            .send("explanation", &json!({"lecture_id": "L1", "slide_number": 2}))
            .await
            .unwrap();

        assert_eq!(h.orchestrator.run_iteration().await, IterationOutcome::Deferred);
        assert_eq!(h.queue.visible_len("explanation"), 0);
        tokio::time::advance(Duration::from_millis(1_999)).await;
        assert_eq!(h.queue.visible_len("explanation"), 0);
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(h.queue.visible_len("explanation"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferral_hold_grows_until_progress() {
        let h = harness(Stage::Explanation, false).await;
        assert_eq!(h.orchestrator.deferral_hold(0), Duration::from_secs(2));
        assert_eq!(h.orchestrator.deferral_hold(4), Duration::from_secs(6));
        assert_eq!(h.orchestrator.deferral_hold(1_000), Duration::from_secs(30));

        for n in [3, 2] {
            h.queue
                .send("explanation", &json!({"lecture_id": "L1", "slide_number": n}))
                .await
                .unwrap();
        }
        assert_eq!(h.orchestrator.run_iteration().await, IterationOutcome::Deferred);
        assert_eq!(h.orchestrator.run_iteration().await, IterationOutcome::Deferred);
        assert_eq!(h.orchestrator.consecutive_deferrals.load(Ordering::Relaxed), 2);

        h.queue
            .send("explanation", &json!({"lecture_id": "L1", "slide_number": 1}))
            .await
            .unwrap();
        assert_eq!(h.orchestrator.run_iteration().await, IterationOutcome::Completed);
        assert_eq!(h.orchestrator.consecutive_deferrals.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_reset_failure_still_defers() {
        let h = harness(Stage::Explanation, false).await;
        h.queue
            .send("explanation", &json!({"lecture_id": "L1", "slide_number": 2}))
            .await
            .unwrap();
        h.queue.fail_next(QueueOp::SetVisibility, "explanation", 1);

        assert_eq!(h.orchestrator.run_iteration().await, IterationOutcome::Deferred);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(h.queue.visible_len("explanation"), 0);
        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(h.queue.visible_len("explanation"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unordered_stage_skips_gate() {
        let h = harness(Stage::Summary, false).await;
        h.queue
            .send("summary", &json!({"lecture_id": "L1", "slide_number": 9}))
            .await
            .unwrap();

        assert_eq!(h.orchestrator.run_iteration().await, IterationOutcome::Completed);
        assert_eq!(h.state.lookup_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_dead_letters() {
        let h = harness(Stage::Ingestion, true).await;
        let payload = json!({"lecture_id": "L1", "slide_number": 1});
        h.queue.send("ingestion", &payload).await.unwrap();

        assert_eq!(
            h.orchestrator.run_iteration().await,
            IterationOutcome::DeadLettered
        );
        assert_eq!(h.client.bodies.lock().len(), 5);
        let dead = h.queue.messages("ingestion_dlq");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].payload, payload);
        assert!(h.queue.messages("ingestion").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failure_is_recoverable() {
        let h = harness(Stage::Embedding, false).await;
        h.queue.fail_next(QueueOp::Poll, "embedding", 1);

        assert_eq!(h.orchestrator.run_iteration().await, IterationOutcome::PollFailed);
        assert_eq!(h.orchestrator.run_iteration().await, IterationOutcome::Idle);
        assert_eq!(h.orchestrator.stats().snapshot().poll_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_on_cancellation() {
        let h = harness(Stage::Embedding, false).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let snapshot = h.orchestrator.run(cancel).await;
        assert_eq!(snapshot.polls, 0);
    }
}
