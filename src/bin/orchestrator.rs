//! # Lecture Orchestrator
//!
//! Runs one ordered, retrying loop per enabled pipeline stage until SIGINT.
//! With `--check-config` it only loads, validates and prints the sanitized
//! configuration.

use anyhow::Context;
use clap::Parser;
use lecture_orchestrator::config::ConfigManager;
use lecture_orchestrator::logging::init_structured_logging;
use lecture_orchestrator::orchestration::OrchestrationSystem;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "lecture-orchestrator")]
#[command(about = "Drain the lecture pipeline queues in order with bounded retries")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration directory (default: ./config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Environment override (default: ORCHESTRATOR_ENV, then APP_ENV, then development)
    #[arg(short, long)]
    environment: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let environment = cli
        .environment
        .unwrap_or_else(ConfigManager::detect_environment);
    let manager = ConfigManager::load_from_directory_with_env(cli.config_dir, &environment)
        .context("failed to load configuration")?;
    let config = manager.config().clone();

    if cli.check_config {
        println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
        return Ok(());
    }

    init_structured_logging(&config.logging, manager.environment());
    manager.log_loaded();

    let system = OrchestrationSystem::bootstrap(config)
        .await
        .context("failed to bootstrap orchestration system")?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("🛑 Shutdown signal received");
        shutdown.cancel();
    });

    let result = system.run(cancel).await;
    system.shutdown().await;

    for (stage, snapshot) in result.context("stage task failed")? {
        info!(stage = %stage, stats = ?snapshot, "Final stage statistics");
    }
    Ok(())
}
