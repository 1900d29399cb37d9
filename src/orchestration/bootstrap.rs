//! # Orchestration Bootstrap
//!
//! Wires the shared components (database pool, pgmq queue client, Postgres
//! state store, HTTP processing client) and runs one [`StageOrchestrator`]
//! per enabled stage, each on its own tokio task.

use super::dispatcher::{HttpProcessingClient, ProcessingClient};
use super::stage::Stage;
use super::stage_orchestrator::StageOrchestrator;
use super::stats::StageStatsSnapshot;
use crate::config::OrchestratorConfig;
use crate::database::DatabaseConnection;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::messaging::{PgmqQueueClient, QueueClient};
use crate::state::{PgStateStore, StateStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Multi-stage orchestration system
pub struct OrchestrationSystem {
    config: OrchestratorConfig,
    queue: Arc<dyn QueueClient>,
    state: Arc<dyn StateStore>,
    client: Arc<dyn ProcessingClient>,
    database: Option<DatabaseConnection>,
}

impl std::fmt::Debug for OrchestrationSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationSystem")
            .field("environment", &self.config.environment)
            .field("enabled_stages", &self.config.enabled_stages())
            .field("database", &self.database.is_some())
            .finish()
    }
}

impl OrchestrationSystem {
    /// Connect the shared pool, build the production components and create
    /// queues when configured to
    pub async fn bootstrap(config: OrchestratorConfig) -> OrchestratorResult<Self> {
        info!("🚀 Bootstrapping orchestration system");

        let database = DatabaseConnection::connect(&config.database).await?;
        let pool = database.pool().clone();
        let queue = Arc::new(PgmqQueueClient::new_with_pool(pool.clone()).await);
        let state = Arc::new(PgStateStore::new(pool));
        let client = Arc::new(HttpProcessingClient::new()?);

        let mut system = Self::with_components(config, queue, state, client);
        system.database = Some(database);

        if system.config.queues.create_on_startup {
            system.create_queues().await?;
        }
        Ok(system)
    }

    /// Assemble from already-built components
    pub fn with_components(
        config: OrchestratorConfig,
        queue: Arc<dyn QueueClient>,
        state: Arc<dyn StateStore>,
        client: Arc<dyn ProcessingClient>,
    ) -> Self {
        Self {
            config,
            queue,
            state,
            client,
            database: None,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn database(&self) -> Option<&DatabaseConnection> {
        self.database.as_ref()
    }

    /// Create the main and dead-letter queue of every enabled stage
    pub async fn create_queues(&self) -> OrchestratorResult<()> {
        for stage in self.config.enabled_stages() {
            let stage_config = self.config.stages.get(stage);
            for queue_name in [
                &stage_config.queue_name,
                &stage_config.dead_letter_queue_name,
            ] {
                self.queue.create_queue(queue_name).await?;
            }
            info!(
                stage = %stage,
                queue = %stage_config.queue_name,
                dead_letter_queue = %stage_config.dead_letter_queue_name,
                "✅ Stage queues ready"
            );
        }
        Ok(())
    }

    pub fn stage_orchestrators(&self) -> Vec<StageOrchestrator> {
        self.config
            .enabled_stages()
            .into_iter()
            .map(|stage| {
                let stage_config = self.config.stages.get(stage).clone();
                let endpoint = self
                    .config
                    .processing_service
                    .endpoint(&stage_config.endpoint_verb);
                StageOrchestrator::new(
                    stage,
                    stage_config,
                    endpoint,
                    self.queue.clone(),
                    self.state.clone(),
                    self.client.clone(),
                )
            })
            .collect()
    }

    /// Run every enabled stage until `cancel` fires. Waits for all stage tasks
    /// to exit; a panicked stage task is reported after the others finish.
    pub async fn run(
        &self,
        cancel: CancellationToken,
    ) -> OrchestratorResult<Vec<(Stage, StageStatsSnapshot)>> {
        let handles: Vec<_> = self
            .stage_orchestrators()
            .into_iter()
            .map(|orchestrator| {
                let stage = orchestrator.stage();
                let token = cancel.child_token();
                (
                    stage,
                    tokio::spawn(async move { orchestrator.run(token).await }),
                )
            })
            .collect();

        info!(stages = handles.len(), "Orchestration system running");

        let mut snapshots = Vec::with_capacity(handles.len());
        let mut first_failure = None;
        for (stage, handle) in handles {
            match handle.await {
                Ok(snapshot) => snapshots.push((stage, snapshot)),
                Err(e) => {
                    error!(stage = %stage, error = %e, "Stage task failed");
                    first_failure.get_or_insert(OrchestratorError::from(e));
                }
            }
        }

        info!("🛑 Orchestration system stopped");
        match first_failure {
            Some(err) => Err(err),
            None => Ok(snapshots),
        }
    }

    /// Close the shared pool, if this system owns one
    pub async fn shutdown(self) {
        if let Some(database) = self.database {
            database.close().await;
        }
    }
}
