//! Keel Daemon - Continuous delivery engine
//!
//! The Keel daemon provides:
//! - Promotion of artifact versions through gated environments
//! - Reconciliation of declared resources towards their desired state
//! - Event logging for observability

use clap::Parser;
use keel_daemon::{Daemon, DaemonConfig, DaemonError, DaemonResult};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Keel Daemon CLI
#[derive(Parser)]
#[command(name = "keeld")]
#[command(about = "Keel Daemon - Continuous delivery engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "KEEL_CONFIG")]
    config: Option<String>,

    /// Delivery config file or directory; repeatable
    #[arg(short, long = "delivery-config", env = "KEEL_DELIVERY_CONFIG")]
    delivery_config: Vec<PathBuf>,

    /// Artifact seed file or directory; repeatable
    #[arg(long = "artifact-seed", env = "KEEL_ARTIFACT_SEED")]
    artifact_seed: Vec<PathBuf>,

    /// Seconds between check cycles
    #[arg(long, env = "KEEL_CHECK_INTERVAL")]
    check_interval: Option<u64>,

    /// Log level
    #[arg(long, env = "KEEL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "KEEL_LOG_JSON")]
    json: bool,

    /// Run a single check cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())?;

    // Override with CLI args
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;
    if let Some(interval) = cli.check_interval {
        config.scheduler.check_interval_secs = interval;
    }
    config.delivery_configs.paths.extend(cli.delivery_config);
    config.artifact_seeds.paths.extend(cli.artifact_seed);

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        delivery_configs = config.delivery_configs.paths.len(),
        "Starting keeld"
    );

    let daemon = Daemon::new(config);
    if cli.once {
        let summary = daemon.run_once().await?;
        tracing::info!(
            delivery_configs = summary.delivery_configs,
            failures = summary.failures,
            "Check cycle finished"
        );
        if summary.failures > 0 {
            return Err(DaemonError::Scheduler(format!(
                "{} of {} delivery configs failed",
                summary.failures, summary.delivery_configs
            )));
        }
        return Ok(());
    }

    daemon.run().await
}
