//! Configuration for keel-daemon
//!
//! Layered: built-in defaults, then an optional file, then `KEEL__`
//! environment variables (`KEEL__SCHEDULER__CHECK_INTERVAL_SECS=60`).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub actuation: ActuationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Where delivery configs are read from at startup
    #[serde(default)]
    pub delivery_configs: DeliveryConfigSource,

    /// Published versions, pins and vetoes read at startup
    #[serde(default)]
    pub artifact_seeds: ArtifactSeedSource,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between check cycles
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Delivery configs checked at once within a cycle
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_reconciliations: usize,

    /// Run the promotion engine each cycle
    #[serde(default = "default_true")]
    pub promotion_enabled: bool,

    /// Run resource reconciliation each cycle
    #[serde(default = "default_true")]
    pub actuation_enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            max_concurrent_reconciliations: default_max_concurrent(),
            promotion_enabled: true,
            actuation_enabled: true,
        }
    }
}

impl SchedulerConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }
}

/// Actuation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuationConfig {
    /// Timeout attached to every convergence job
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    /// How long a dry-run job counts as running
    #[serde(default = "default_dry_run_execution")]
    pub dry_run_execution_secs: u64,

    /// Dry-run jobs kept in memory
    #[serde(default = "default_dry_run_history")]
    pub dry_run_history: usize,
}

impl Default for ActuationConfig {
    fn default() -> Self {
        Self {
            job_timeout_secs: default_job_timeout(),
            dry_run_execution_secs: default_dry_run_execution(),
            dry_run_history: default_dry_run_history(),
        }
    }
}

impl ActuationConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn dry_run_execution(&self) -> Duration {
        Duration::from_secs(self.dry_run_execution_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Delivery config files or directories of `*.json` files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryConfigSource {
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

/// Artifact seed files or directories of `*.json` files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactSeedSource {
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_check_interval() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    10
}

fn default_job_timeout() -> u64 {
    30 * 60
}

fn default_dry_run_execution() -> u64 {
    5 * 60
}

fn default_dry_run_history() -> usize {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Double underscore so snake_case field names survive
        builder = builder.add_source(
            config::Environment::with_prefix("KEEL")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
