//! # Orchestrator Configuration
//!
//! Typed configuration for the stage loops, the shared database pool, the
//! processing service and logging. Values are layered by [`ConfigManager`]:
//! built-in defaults, `config/orchestrator.toml`, an environment-specific
//! override file and finally `ORCHESTRATOR__*` environment variables.
//!
//! Configuration is handed to every component through its constructor; no
//! loop reads configuration on its own.
//!
//! ```toml
//! [processing_service]
//! base_url = "http://python-service:8000"
//!
//! [stages.explanation]
//! max_retries = 5
//! backoff_initial_seconds = 1
//! backoff_max_seconds = 10
//! ordered = true
//! result_table = "explanations"
//! ```

pub mod error;
pub mod loader;

use crate::constants::{defaults, tables, DEAD_LETTER_SUFFIX};
use crate::orchestration::stage::Stage;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/orchestrator.toml`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    /// Deployment environment (development, test, production, ...)
    pub environment: String,

    /// Shared Postgres pool used by both the queue and the persisted state
    pub database: DatabaseConfig,

    /// External processing service receiving dispatched jobs
    pub processing_service: ProcessingServiceConfig,

    /// Queue bootstrap behaviour
    pub queues: QueuesConfig,

    /// Structured logging settings
    pub logging: LoggingConfig,

    /// Per-stage loop settings
    pub stages: StagesConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::for_environment("development")
    }
}

impl OrchestratorConfig {
    /// Defaults for a given environment
    pub fn for_environment(environment: &str) -> Self {
        Self {
            environment: environment.to_string(),
            database: DatabaseConfig::default(),
            processing_service: ProcessingServiceConfig::default(),
            queues: QueuesConfig::default(),
            logging: LoggingConfig::default(),
            stages: StagesConfig::default(),
        }
    }

    /// Validate the merged configuration before any component is built
    pub fn validate(&self) -> ConfigResult<()> {
        self.processing_service.validate()?;
        self.database.validate()?;
        for stage in Stage::ALL {
            self.stages.get(stage).validate(stage)?;
        }
        Ok(())
    }

    /// Stages whose loop should run, in pipeline order
    pub fn enabled_stages(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|stage| self.stages.get(*stage).enabled)
            .collect()
    }
}

/// Database connection and pooling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Connection URL; falls back to `DATABASE_URL` when empty at load time
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: defaults::DATABASE_MAX_CONNECTIONS,
            acquire_timeout_seconds: defaults::DATABASE_ACQUIRE_TIMEOUT_SECONDS,
        }
    }
}

impl DatabaseConfig {
    /// Resolved connection URL
    pub fn database_url(&self) -> ConfigResult<&str> {
        if self.url.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "database.url",
                "database configuration (or DATABASE_URL)",
            ));
        }
        Ok(&self.url)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                "0",
                "pool must allow at least one connection",
            ));
        }
        Ok(())
    }
}

/// External processing service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessingServiceConfig {
    /// Base URL; stage endpoints are `{base_url}/{endpoint_verb}`
    pub base_url: String,
}

impl Default for ProcessingServiceConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::PROCESSING_SERVICE_BASE_URL.to_string(),
        }
    }
}

impl ProcessingServiceConfig {
    /// Full endpoint URL for a stage verb, tolerating a trailing slash on the base
    pub fn endpoint(&self, verb: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), verb)
    }

    fn validate(&self) -> ConfigResult<()> {
        reqwest::Url::parse(&self.base_url).map_err(|e| {
            ConfigurationError::invalid_value(
                "processing_service.base_url",
                &self.base_url,
                e.to_string(),
            )
        })?;
        Ok(())
    }
}

/// Queue bootstrap configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueuesConfig {
    /// Create main and dead-letter queues for enabled stages on startup
    pub create_on_startup: bool,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            create_on_startup: true,
        }
    }
}

/// Structured logging configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Filter directive; empty means environment-derived
    pub level: String,
    /// Directory for the JSON log file; empty disables file output
    pub log_directory: String,
    /// Emit JSON on the console instead of the human-readable format
    pub json_console: bool,
}

/// One [`StageConfig`] per pipeline stage
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StagesConfig {
    pub ingestion: StageConfig,
    pub embedding: StageConfig,
    pub explanation: StageConfig,
    pub summary: StageConfig,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            ingestion: StageConfig::for_stage(Stage::Ingestion),
            embedding: StageConfig::for_stage(Stage::Embedding),
            explanation: StageConfig::for_stage(Stage::Explanation),
            summary: StageConfig::for_stage(Stage::Summary),
        }
    }
}

impl StagesConfig {
    pub fn get(&self, stage: Stage) -> &StageConfig {
        match stage {
            Stage::Ingestion => &self.ingestion,
            Stage::Embedding => &self.embedding,
            Stage::Explanation => &self.explanation,
            Stage::Summary => &self.summary,
        }
    }

    pub fn get_mut(&mut self, stage: Stage) -> &mut StageConfig {
        match stage {
            Stage::Ingestion => &mut self.ingestion,
            Stage::Embedding => &mut self.embedding,
            Stage::Explanation => &mut self.explanation,
            Stage::Summary => &mut self.summary,
        }
    }
}

/// Settings for a single stage loop
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct StageConfig {
    pub enabled: bool,
    pub queue_name: String,
    pub dead_letter_queue_name: String,
    /// Path segment appended to the processing service base URL
    pub endpoint_verb: String,
    /// Longest time a single poll waits for a message
    pub poll_timeout_seconds: u64,
    pub poll_max_messages: i32,
    /// How long a read message stays invisible before redelivery
    pub visibility_timeout_seconds: i32,
    /// Total dispatch attempts before dead-lettering
    pub max_retries: u32,
    pub backoff_initial_seconds: u64,
    pub backoff_max_seconds: u64,
    pub request_timeout_seconds: u64,
    /// Pause after an ordering deferral. The deferred job itself stays hidden
    /// for two intervals, one more for each further deferral before the loop
    /// makes progress, never longer than the visibility timeout.
    pub defer_interval_ms: u64,
    /// Pause after a failed poll
    pub poll_error_delay_ms: u64,
    /// Gate dispatch on the predecessor's result row
    pub ordered: bool,
    /// Table holding one row per `(lecture_id, slide_number)` result
    pub result_table: String,
}

impl StageConfig {
    /// Defaults for a stage: queue named after the stage, `<queue>_dlq` dead-letter
    /// queue, and ordering only for the explanation stage.
    pub fn for_stage(stage: Stage) -> Self {
        let ordered = matches!(stage, Stage::Explanation);
        Self {
            enabled: true,
            queue_name: stage.as_str().to_string(),
            dead_letter_queue_name: format!("{}{DEAD_LETTER_SUFFIX}", stage.as_str()),
            endpoint_verb: stage.default_endpoint_verb().to_string(),
            poll_timeout_seconds: defaults::POLL_TIMEOUT_SECONDS,
            poll_max_messages: defaults::POLL_MAX_MESSAGES,
            visibility_timeout_seconds: defaults::VISIBILITY_TIMEOUT_SECONDS,
            max_retries: defaults::MAX_RETRIES,
            backoff_initial_seconds: defaults::BACKOFF_INITIAL_SECONDS,
            backoff_max_seconds: defaults::BACKOFF_MAX_SECONDS,
            request_timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            defer_interval_ms: defaults::DEFER_INTERVAL_MS,
            poll_error_delay_ms: defaults::POLL_ERROR_DELAY_MS,
            ordered,
            result_table: if ordered {
                tables::EXPLANATIONS.to_string()
            } else {
                String::new()
            },
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_seconds)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.visibility_timeout_seconds).unwrap_or(0))
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_secs(self.backoff_initial_seconds)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn defer_interval(&self) -> Duration {
        Duration::from_millis(self.defer_interval_ms)
    }

    pub fn poll_error_delay(&self) -> Duration {
        Duration::from_millis(self.poll_error_delay_ms)
    }

    /// Result table consulted by the ordering gate, if the stage is ordered
    pub fn ordering_table(&self) -> Option<&str> {
        self.ordered.then_some(self.result_table.as_str())
    }

    pub fn validate(&self, stage: Stage) -> ConfigResult<()> {
        let field = |name: &str| format!("stages.{}.{name}", stage.as_str());

        if self.queue_name.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                field("queue_name"),
                "stage configuration",
            ));
        }
        if self.dead_letter_queue_name.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                field("dead_letter_queue_name"),
                "stage configuration",
            ));
        }
        if self.dead_letter_queue_name == self.queue_name {
            return Err(ConfigurationError::invalid_value(
                field("dead_letter_queue_name"),
                &self.dead_letter_queue_name,
                "dead-letter queue must differ from the main queue",
            ));
        }
        if self.endpoint_verb.trim_matches('/').is_empty() {
            return Err(ConfigurationError::missing_required_field(
                field("endpoint_verb"),
                "stage configuration",
            ));
        }
        if self.max_retries == 0 {
            return Err(ConfigurationError::invalid_value(
                field("max_retries"),
                "0",
                "at least one dispatch attempt is required",
            ));
        }
        if self.poll_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                field("poll_timeout_seconds"),
                "0",
                "a poll must be allowed to wait for messages",
            ));
        }
        if self.poll_max_messages < 1 {
            return Err(ConfigurationError::invalid_value(
                field("poll_max_messages"),
                self.poll_max_messages.to_string(),
                "must be at least 1",
            ));
        }
        if self.visibility_timeout_seconds < 1 {
            return Err(ConfigurationError::invalid_value(
                field("visibility_timeout_seconds"),
                self.visibility_timeout_seconds.to_string(),
                "must be at least 1",
            ));
        }
        if self.backoff_initial_seconds > self.backoff_max_seconds {
            return Err(ConfigurationError::invalid_value(
                field("backoff_initial_seconds"),
                self.backoff_initial_seconds.to_string(),
                format!(
                    "initial backoff exceeds backoff_max_seconds ({})",
                    self.backoff_max_seconds
                ),
            ));
        }
        if self.request_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                field("request_timeout_seconds"),
                "0",
                "per-attempt timeout must be positive",
            ));
        }
        if self.ordered && !is_valid_table_identifier(&self.result_table) {
            return Err(ConfigurationError::invalid_value(
                field("result_table"),
                &self.result_table,
                "expected a SQL identifier, optionally schema-qualified",
            ));
        }
        Ok(())
    }
}

/// `name` or `schema.name`, each part `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_valid_table_identifier(identifier: &str) -> bool {
    let parts: Vec<&str> = identifier.split('.').collect();
    if parts.is_empty() || parts.len() > 2 {
        return false;
    }
    parts.iter().all(|part| {
        let mut chars = part.chars();
        match chars.next() {
            Some(first) if first.is_ascii_alphabetic() || first == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_defaults() {
        let config = OrchestratorConfig::default();
        let explanation = config.stages.get(Stage::Explanation);
        assert_eq!(explanation.queue_name, "explanation");
        assert_eq!(explanation.dead_letter_queue_name, "explanation_dlq");
        assert_eq!(explanation.endpoint_verb, "explain");
        assert_eq!(explanation.max_retries, 5);
        assert_eq!(explanation.ordering_table(), Some("explanations"));

        let summary = config.stages.get(Stage::Summary);
        assert_eq!(summary.endpoint_verb, "summarize");
        assert_eq!(summary.ordering_table(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let service = ProcessingServiceConfig {
            base_url: "http://python:8000/".to_string(),
        };
        assert_eq!(service.endpoint("explain"), "http://python:8000/explain");
    }

    #[test]
    fn test_rejects_zero_retries() {
        let mut config = OrchestratorConfig::default();
        config.stages.get_mut(Stage::Embedding).max_retries = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stages.embedding.max_retries"));
    }

    #[test]
    fn test_rejects_zero_poll_timeout() {
        let mut config = OrchestratorConfig::default();
        config.stages.get_mut(Stage::Summary).poll_timeout_seconds = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::InvalidValue { ref field, .. } if field == "stages.summary.poll_timeout_seconds"
        ));
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let mut stage = StageConfig::for_stage(Stage::Explanation);
        stage.backoff_initial_seconds = 30;
        stage.backoff_max_seconds = 10;
        assert!(stage.validate(Stage::Explanation).is_err());
    }

    #[test]
    fn test_rejects_dead_letter_equal_to_main_queue() {
        let mut stage = StageConfig::for_stage(Stage::Ingestion);
        stage.dead_letter_queue_name = stage.queue_name.clone();
        assert!(stage.validate(Stage::Ingestion).is_err());
    }

    #[test]
    fn test_rejects_unsafe_result_table() {
        let mut stage = StageConfig::for_stage(Stage::Explanation);
        stage.result_table = "explanations; DROP TABLE lectures".to_string();
        assert!(stage.validate(Stage::Explanation).is_err());

        // Unordered stages ignore the table entirely
        stage.ordered = false;
        assert!(stage.validate(Stage::Explanation).is_ok());
    }

    #[test]
    fn test_rejects_unparsable_base_url() {
        let mut config = OrchestratorConfig::default();
        config.processing_service.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_table_identifier_rules() {
        assert!(is_valid_table_identifier("explanations"));
        assert!(is_valid_table_identifier("public.explanations"));
        assert!(is_valid_table_identifier("_slide_results2"));
        assert!(!is_valid_table_identifier(""));
        assert!(!is_valid_table_identifier("2fast"));
        assert!(!is_valid_table_identifier("a.b.c"));
        assert!(!is_valid_table_identifier("bad-name"));
    }

    #[test]
    fn test_enabled_stages_preserve_pipeline_order() {
        let mut config = OrchestratorConfig::default();
        config.stages.get_mut(Stage::Embedding).enabled = false;
        assert_eq!(
            config.enabled_stages(),
            vec![Stage::Ingestion, Stage::Explanation, Stage::Summary]
        );
    }

    #[test]
    fn test_database_url_required() {
        let database = DatabaseConfig::default();
        assert!(matches!(
            database.database_url(),
            Err(ConfigurationError::MissingRequiredField { .. })
        ));
    }
}
