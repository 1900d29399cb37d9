//! # Retrying Dispatcher
//!
//! Sends a job to the stage's processing-service endpoint with a per-attempt
//! timeout, retrying failed attempts with exponential backoff. The dispatcher
//! touches neither the queue nor persisted state.

use super::backoff_calculator::BackoffPolicy;
use super::stage::Stage;
use crate::config::StageConfig;
use crate::constants::MAX_ERROR_BODY_BYTES;
use crate::messaging::JobMessage;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Failure of a single dispatch attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("processing service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("transport error: {message}")]
    Transport { message: String },
}

impl DispatchError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

/// Transport seam between the dispatcher and the processing service
#[async_trait]
pub trait ProcessingClient: Send + Sync {
    /// POST `body` as JSON to `url`. Any 2xx is success.
    async fn post_job(
        &self,
        url: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<(), DispatchError>;
}

/// reqwest-backed [`ProcessingClient`]
#[derive(Debug, Clone)]
pub struct HttpProcessingClient {
    client: reqwest::Client,
}

impl HttpProcessingClient {
    pub fn new() -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("lecture-orchestrator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DispatchError::transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ProcessingClient for HttpProcessingClient {
    async fn post_job(
        &self,
        url: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<(), DispatchError> {
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(e, timeout))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DispatchError::Status {
            status: status.as_u16(),
            body: truncate_body(body),
        })
    }
}

fn classify_reqwest_error(err: reqwest::Error, timeout: Duration) -> DispatchError {
    if err.is_timeout() {
        DispatchError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else {
        DispatchError::transport(err.to_string())
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY_BYTES {
        let mut cut = MAX_ERROR_BODY_BYTES;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSuccess {
    pub attempts: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchFailure {
    pub attempts: u32,
    pub last_error: DispatchError,
}

pub struct RetryingDispatcher {
    stage: Stage,
    endpoint: String,
    max_retries: u32,
    backoff: BackoffPolicy,
    request_timeout: Duration,
    client: Arc<dyn ProcessingClient>,
}

impl std::fmt::Debug for RetryingDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingDispatcher")
            .field("stage", &self.stage)
            .field("endpoint", &self.endpoint)
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl RetryingDispatcher {
    pub fn new(
        stage: Stage,
        endpoint: impl Into<String>,
        config: &StageConfig,
        client: Arc<dyn ProcessingClient>,
    ) -> Self {
        Self {
            stage,
            endpoint: endpoint.into(),
            max_retries: config.max_retries.max(1),
            backoff: BackoffPolicy::from_stage_config(config),
            request_timeout: config.request_timeout(),
            client,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Post the job's original payload until one attempt succeeds or
    /// `max_retries` attempts have failed. Sleeps between attempts only.
    pub async fn dispatch(&self, job: &JobMessage) -> Result<DispatchSuccess, DispatchFailure> {
        let started = Instant::now();
        let mut attempt = 1;

        loop {
            debug!(
                stage = %self.stage,
                msg_id = job.msg_id,
                lecture_id = %job.lecture_id(),
                slide_number = job.slide_number(),
                attempt,
                endpoint = %self.endpoint,
                "Dispatching job"
            );

            match self
                .client
                .post_job(&self.endpoint, &job.raw, self.request_timeout)
                .await
            {
                Ok(()) => {
                    info!(
                        stage = %self.stage,
                        msg_id = job.msg_id,
                        lecture_id = %job.lecture_id(),
                        slide_number = job.slide_number(),
                        attempt,
                        "Job processed"
                    );
                    return Ok(DispatchSuccess {
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    });
                }
                Err(e) => {
                    error!(
                        stage = %self.stage,
                        msg_id = job.msg_id,
                        lecture_id = %job.lecture_id(),
                        slide_number = job.slide_number(),
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "Dispatch attempt failed"
                    );
                    if attempt >= self.max_retries {
                        return Err(DispatchFailure {
                            attempts: attempt,
                            last_error: e,
                        });
                    }
                    tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}
