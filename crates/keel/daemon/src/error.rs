//! Error types for keel-daemon

use keel_actuation::ActuationError;
use keel_registry::RegistryError;
use std::path::PathBuf;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Delivery config file that does not parse
    #[error("Invalid delivery config {path}: {source}")]
    DeliveryConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Seed file that does not parse
    #[error("Invalid artifact seed {path}: {source}")]
    Seed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Registry error
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Actuation error
    #[error("Actuation error: {0}")]
    Actuation(#[from] ActuationError),

    /// Scheduler error
    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl From<config::ConfigError> for DaemonError {
    fn from(e: config::ConfigError) -> Self {
        DaemonError::Config(e.to_string())
    }
}

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
