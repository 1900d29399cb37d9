//! # Structured Logging Module
//!
//! Environment-aware structured logging: a console layer (human-readable or
//! JSON) plus an optional JSON file under `logging.log_directory`.

use crate::config::LoggingConfig;
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process. `RUST_LOG` takes
/// precedence over `logging.level`, which takes precedence over the
/// environment default.
pub fn init_structured_logging(config: &LoggingConfig, environment: &str) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let log_level = resolve_log_level(config, environment);
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&log_level));

        let mut file_error = None;
        let mut log_path = None;
        let file_layer = if config.log_directory.is_empty() {
            None
        } else {
            let log_dir = PathBuf::from(&config.log_directory);
            match fs::create_dir_all(&log_dir) {
                Ok(()) => {
                    let log_filename = log_file_name(environment);
                    log_path = Some(log_dir.join(&log_filename));
                    let file_appender = tracing_appender::rolling::never(&log_dir, log_filename);
                    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
                    // The writer must outlive every span; the process owns it from here on.
                    std::mem::forget(guard);
                    Some(
                        fmt::layer()
                            .with_writer(file_writer)
                            .with_target(true)
                            .with_thread_ids(true)
                            .with_ansi(false)
                            .json(),
                    )
                }
                Err(e) => {
                    file_error = Some(e);
                    None
                }
            }
        };

        let json_console = config.json_console.then(|| {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .json()
        });
        let plain_console = (!config.json_console).then(|| {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
        });

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(json_console)
            .with(plain_console)
            .with(file_layer);

        if subscriber.try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        }

        if let Some(e) = file_error {
            tracing::warn!(
                log_directory = %config.log_directory,
                error = %e,
                "Could not create log directory; file output disabled"
            );
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            level = %log_level,
            log_file = ?log_path,
            "🔧 Structured logging initialized"
        );
    });
}

fn log_file_name(environment: &str) -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    format!("{}.{}.{}.log", environment, process::id(), timestamp)
}

fn resolve_log_level(config: &LoggingConfig, environment: &str) -> String {
    if config.level.trim().is_empty() {
        default_log_level(environment).to_string()
    } else {
        config.level.clone()
    }
}

/// Get log level based on environment
fn default_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}
