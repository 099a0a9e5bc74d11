//! Actuation error types

use keel_constraints::ConstraintError;
use keel_registry::RegistryError;
use keel_types::{ResourceId, VersioningError};
use thiserror::Error;

/// Actuation errors
#[derive(Debug, Error)]
pub enum ActuationError {
    /// Desired state cannot be computed yet; not a failure
    #[error("Resource {resource} is currently unresolvable: {reason}")]
    CurrentlyUnresolvable { resource: ResourceId, reason: String },

    #[error("Invalid spec for {resource}: {reason}")]
    InvalidSpec { resource: ResourceId, reason: String },

    #[error("No handler for resource kind {0}")]
    UnsupportedKind(String),

    #[error("Current state error: {0}")]
    CurrentState(String),

    #[error("Task launcher error: {0}")]
    Launcher(String),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Constraint error: {0}")]
    Constraint(#[from] ConstraintError),

    #[error("Versioning error: {0}")]
    Versioning(#[from] VersioningError),

    #[error("Gave up writing {0} after repeated conflicts")]
    ConflictRetriesExhausted(String),
}

impl ActuationError {
    pub fn is_unresolvable(&self) -> bool {
        matches!(self, Self::CurrentlyUnresolvable { .. })
    }
}

/// Result type for actuation operations
pub type Result<T> = std::result::Result<T, ActuationError>;
