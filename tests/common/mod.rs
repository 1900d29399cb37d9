//! Shared fixtures for stage loop integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use lecture_orchestrator::config::StageConfig;
use lecture_orchestrator::messaging::{InMemoryQueueClient, QueueClient};
use lecture_orchestrator::orchestration::{DispatchError, ProcessingClient, Stage, StageOrchestrator};
use lecture_orchestrator::state::{InMemoryStateStore, StateStore};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// A call observed by [`FakeProcessingService`]
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedCall {
    pub lecture_id: String,
    pub slide_number: i32,
    pub body: serde_json::Value,
    /// Whether the predecessor's result row existed when the call arrived
    pub predecessor_present: bool,
}

/// Stand-in for the processing service. On success it writes the result row
/// the ordering gate looks for, as the real service does.
pub struct FakeProcessingService {
    state: Arc<InMemoryStateStore>,
    result_table: String,
    script: Mutex<VecDeque<Result<(), DispatchError>>>,
    latency: Duration,
    calls: Mutex<Vec<ObservedCall>>,
}

impl FakeProcessingService {
    pub fn new(state: Arc<InMemoryStateStore>, result_table: &str) -> Self {
        Self {
            state,
            result_table: result_table.to_string(),
            script: Mutex::new(VecDeque::new()),
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Responses for the first calls; later calls succeed
    pub fn with_script(self, script: Vec<Result<(), DispatchError>>) -> Self {
        *self.script.lock() = script.into();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<ObservedCall> {
        self.calls.lock().clone()
    }

    pub fn slide_order(&self) -> Vec<i32> {
        self.calls.lock().iter().map(|call| call.slide_number).collect()
    }
}

#[async_trait]
impl ProcessingClient for FakeProcessingService {
    async fn post_job(
        &self,
        _url: &str,
        body: &serde_json::Value,
        _timeout: Duration,
    ) -> Result<(), DispatchError> {
        let lecture_id = body["lecture_id"].as_str().unwrap_or_default().to_string();
        let slide_number = body["slide_number"].as_i64().unwrap_or_default() as i32;

        let predecessor_present = slide_number <= 1
            || self
                .state
                .step_result_exists(&self.result_table, &lecture_id, slide_number - 1)
                .await
                .unwrap_or(false);

        self.calls.lock().push(ObservedCall {
            lecture_id: lecture_id.clone(),
            slide_number,
            body: body.clone(),
            predecessor_present,
        });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let outcome = self.script.lock().pop_front().unwrap_or(Ok(()));
        if outcome.is_ok() {
            self.state
                .record_step_result(&self.result_table, &lecture_id, slide_number);
        }
        outcome
    }
}

pub fn server_error() -> Result<(), DispatchError> {
    Err(DispatchError::Status {
        status: 500,
        body: "internal error".to_string(),
    })
}

/// Explanation stage settings with short waits
pub fn explanation_config() -> StageConfig {
    let mut config = StageConfig::for_stage(Stage::Explanation);
    config.poll_timeout_seconds = 1;
    config.visibility_timeout_seconds = 2;
    config
}

pub struct StageHarness {
    pub queue: Arc<InMemoryQueueClient>,
    pub state: Arc<InMemoryStateStore>,
    pub service: Arc<FakeProcessingService>,
    pub orchestrator: Arc<StageOrchestrator>,
    pub config: StageConfig,
}

impl StageHarness {
    pub async fn new(
        config: StageConfig,
        build_service: impl FnOnce(Arc<InMemoryStateStore>) -> FakeProcessingService,
    ) -> Self {
        let queue = Arc::new(InMemoryQueueClient::new());
        queue.create_queue(&config.queue_name).await.unwrap();
        queue
            .create_queue(&config.dead_letter_queue_name)
            .await
            .unwrap();
        let state = Arc::new(InMemoryStateStore::new());
        let service = Arc::new(build_service(state.clone()));

        let orchestrator = Arc::new(StageOrchestrator::new(
            Stage::Explanation,
            config.clone(),
            "http://processing-service/explain",
            queue.clone(),
            state.clone(),
            service.clone(),
        ));

        Self {
            queue,
            state,
            service,
            orchestrator,
            config,
        }
    }

    pub async fn enqueue(&self, payload: serde_json::Value) -> i64 {
        self.queue
            .send(&self.config.queue_name, &payload)
            .await
            .unwrap()
    }

    /// Wait (in tokio time) until `condition` holds or `limit` elapses
    pub async fn wait_until(&self, limit: Duration, condition: impl Fn(&Self) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if condition(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        condition(self)
    }
}
