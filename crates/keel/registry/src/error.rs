//! Registry error types

use keel_types::ValidationError;
use thiserror::Error;

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Version conflict: current {current}, expected {expected}")]
    VersionConflict { current: u64, expected: u64 },

    #[error("Invalid delivery config: {0}")]
    InvalidConfig(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl RegistryError {
    /// Lost a compare-and-set race; re-read and retry
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
