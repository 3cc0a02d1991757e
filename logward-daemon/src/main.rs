//! logward-daemon -- log management and detection backend.
//!
//! Loads configuration, initializes logging, and runs the orchestrator
//! until a shutdown signal arrives.

use anyhow::Result;
use clap::Parser;

use logward_core::config::LogwardConfig;
use logward_daemon::cli::DaemonCli;
use logward_daemon::logging;
use logward_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = LogwardConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load {}: {}", cli.config.display(), e))?;

    // CLI overrides take precedence over file and environment values
    if let Some(ref log_level) = cli.log_level {
        config.general.log_level = log_level.clone();
    }
    if let Some(ref log_format) = cli.log_format {
        config.general.log_format = log_format.clone();
    }
    if let Some(ref pid_file) = cli.pid_file {
        config.general.pid_file = pid_file.clone();
    }

    if cli.validate {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = ?config.queue.backend,
        "logward-daemon starting"
    );

    let mut orchestrator = Orchestrator::build_from_config(config).await?;
    orchestrator.run().await
}
