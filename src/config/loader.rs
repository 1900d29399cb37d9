//! Configuration Loader
//!
//! Environment-aware layered loading. Sources, lowest precedence first:
//!
//! 1. built-in defaults for the detected environment (with `DATABASE_URL` and
//!    `PROCESSING_SERVICE_BASE_URL` folded in when set)
//! 2. `<dir>/orchestrator.toml`
//! 3. `<dir>/orchestrator.<environment>.toml`
//! 4. `ORCHESTRATOR__SECTION__KEY` environment variables

use super::error::{ConfigResult, ConfigurationError};
use super::OrchestratorConfig;
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_FILE_STEM: &str = "orchestrator";
const DEFAULT_ENV_PREFIX: &str = "ORCHESTRATOR";
const ENV_SEPARATOR: &str = "__";

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: OrchestratorConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection from `./config`
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Useful for testing without modifying global environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_env_prefix(config_dir, environment, DEFAULT_ENV_PREFIX)
    }

    /// Full loader with a caller-chosen environment variable prefix
    pub fn load_with_env_prefix(
        config_dir: Option<PathBuf>,
        environment: &str,
        env_prefix: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        let config = Self::build_config(&config_directory, environment, env_prefix)?;
        config.validate()?;

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: OrchestratorConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            environment: config.environment.clone(),
            config,
            config_directory: PathBuf::from("config"),
        }))
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Log the loaded configuration: a summary at info and the sanitized
    /// view at debug. Call once a subscriber is installed.
    pub fn log_loaded(&self) {
        info!(
            environment = %self.environment,
            config_directory = %self.config_directory.display(),
            enabled_stages = ?self.config.enabled_stages(),
            processing_service = %self.config.processing_service.base_url,
            "Configuration loaded successfully"
        );
        debug!(
            "Configuration loaded: {}",
            serde_json::to_string(&self.debug_config())
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );
    }

    /// Sanitized configuration for debugging; credentials are masked
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    /// `ORCHESTRATOR_ENV`, then `APP_ENV`, defaulting to `development`
    pub fn detect_environment() -> String {
        env::var("ORCHESTRATOR_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn build_config(
        config_directory: &Path,
        environment: &str,
        env_prefix: &str,
    ) -> ConfigResult<OrchestratorConfig> {
        let defaults = Self::environment_defaults(environment);
        let defaults_source = Config::try_from(&defaults)
            .map_err(|e| ConfigurationError::source_error("defaults", e))?;

        let base_path = config_directory.join(format!("{BASE_FILE_STEM}.toml"));
        let env_path = config_directory.join(format!("{BASE_FILE_STEM}.{environment}.toml"));

        let merged = Config::builder()
            .add_source(defaults_source)
            .add_source(File::from(base_path).format(FileFormat::Toml).required(false))
            .add_source(File::from(env_path).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;

        merged
            .try_deserialize::<OrchestratorConfig>()
            .map_err(ConfigurationError::deserialization_error)
    }

    fn environment_defaults(environment: &str) -> OrchestratorConfig {
        let mut defaults = OrchestratorConfig::for_environment(environment);
        if let Ok(url) = env::var("DATABASE_URL") {
            defaults.database.url = url;
        }
        if let Ok(base_url) = env::var("PROCESSING_SERVICE_BASE_URL") {
            defaults.processing_service.base_url = base_url;
        }
        defaults
    }

    fn sanitize_config_for_logging(config: &OrchestratorConfig) -> serde_json::Value {
        let mut config_json = serde_json::json!(config);

        if let Some(url) = config_json
            .pointer_mut("/database/url")
            .and_then(|value| value.as_str().map(mask_url_password))
        {
            config_json["database"]["url"] = serde_json::Value::String(url);
        }

        let sensitive_patterns = ["password", "secret", "token", "credential", "api_key"];
        Self::sanitize_json_recursive(&mut config_json, &sensitive_patterns);
        config_json
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    if sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern))
                    {
                        *val = serde_json::Value::String("[MASKED]".to_string());
                    } else {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                    }
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }
}

/// Replace the password component of a connection URL
fn mask_url_password(raw: &str) -> String {
    match reqwest::Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            if url.set_password(Some("***")).is_ok() {
                url.to_string()
            } else {
                "[MASKED]".to_string()
            }
        }
        Ok(_) => raw.to_string(),
        Err(_) if raw.is_empty() => String::new(),
        Err(_) => "[MASKED]".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::stage::Stage;
    use std::fs;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_defaults_when_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::load_with_env_prefix(
            Some(dir.path().to_path_buf()),
            "test",
            "ORCH_LOADER_EMPTY",
        )
        .unwrap();

        assert_eq!(manager.environment(), "test");
        assert_eq!(manager.config().environment, "test");
        let explanation = manager.config().stages.get(Stage::Explanation);
        assert_eq!(explanation.queue_name, "explanation");
        assert_eq!(explanation.max_retries, 5);
    }

    #[test]
    fn test_partial_stage_table_keeps_stage_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "orchestrator.toml",
            r#"
[processing_service]
base_url = "http://python-service:8000"

[stages.explanation]
max_retries = 7
backoff_max_seconds = 20
"#,
        );

        let manager = ConfigManager::load_with_env_prefix(
            Some(dir.path().to_path_buf()),
            "test",
            "ORCH_LOADER_PARTIAL",
        )
        .unwrap();
        let config = manager.config();
        let explanation = config.stages.get(Stage::Explanation);

        assert_eq!(explanation.max_retries, 7);
        assert_eq!(explanation.backoff_max_seconds, 20);
        assert_eq!(explanation.queue_name, "explanation");
        assert_eq!(explanation.result_table, "explanations");
        assert_eq!(config.processing_service.base_url, "http://python-service:8000");
    }

    #[test]
    fn test_environment_file_overrides_base_file() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "orchestrator.toml",
            "[stages.summary]\nrequest_timeout_seconds = 60\nenabled = true\n",
        );
        write(
            dir.path(),
            "orchestrator.production.toml",
            "[stages.summary]\nenabled = false\n",
        );

        let manager = ConfigManager::load_with_env_prefix(
            Some(dir.path().to_path_buf()),
            "production",
            "ORCH_LOADER_LAYERED",
        )
        .unwrap();
        let summary = manager.config().stages.get(Stage::Summary);

        assert!(!summary.enabled);
        assert_eq!(summary.request_timeout_seconds, 60);
        assert!(!manager.config().enabled_stages().contains(&Stage::Summary));
    }

    #[test]
    fn test_environment_variables_override_files() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "orchestrator.toml",
            "[stages.embedding]\npoll_max_messages = 4\n",
        );
        env::set_var("ORCH_LOADER_ENVVAR__STAGES__EMBEDDING__POLL_MAX_MESSAGES", "9");

        let result = ConfigManager::load_with_env_prefix(
            Some(dir.path().to_path_buf()),
            "test",
            "ORCH_LOADER_ENVVAR",
        );
        env::remove_var("ORCH_LOADER_ENVVAR__STAGES__EMBEDDING__POLL_MAX_MESSAGES");

        let manager = result.unwrap();
        assert_eq!(
            manager.config().stages.get(Stage::Embedding).poll_max_messages,
            9
        );
    }

    #[test]
    fn test_invalid_file_value_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "orchestrator.toml",
            "[stages.ingestion]\nmax_retries = 0\n",
        );

        let result = ConfigManager::load_with_env_prefix(
            Some(dir.path().to_path_buf()),
            "test",
            "ORCH_LOADER_INVALID",
        );
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidValue { ref field, .. }) if field == "stages.ingestion.max_retries"
        ));
    }

    #[test]
    fn test_malformed_toml_is_a_source_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "orchestrator.toml", "[stages.ingestion\nbroken");

        let result = ConfigManager::load_with_env_prefix(
            Some(dir.path().to_path_buf()),
            "test",
            "ORCH_LOADER_MALFORMED",
        );
        assert!(matches!(result, Err(ConfigurationError::SourceError { .. })));
    }

    /// Collects formatted log output for assertions
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_log_loaded_emits_masked_configuration() {
        let mut config = OrchestratorConfig::for_environment("test");
        config.database.url = "postgresql://app:hunter2@db:5432/lectures".to_string();
        let manager = ConfigManager::from_config(config).unwrap();

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || manager.log_loaded());

        let output = String::from_utf8(logs.0.lock().clone()).unwrap();
        assert!(output.contains("Configuration loaded successfully"));
        assert!(output.contains("Configuration loaded: {"));
        assert!(output.contains("db:5432"));
        assert!(!output.contains("hunter2"));
    }

    #[test]
    fn test_debug_config_masks_database_password() {
        let mut config = OrchestratorConfig::for_environment("test");
        config.database.url = "postgresql://app:hunter2@db:5432/lectures".to_string();
        let manager = ConfigManager::from_config(config).unwrap();

        let debug = manager.debug_config();
        let url = debug["database"]["url"].as_str().unwrap();
        assert!(!url.contains("hunter2"));
        assert!(url.contains("app"));
        assert!(url.contains("db:5432"));
    }
}
