//! Validation and versioning errors
//!
//! Both are configuration errors: they surface when a delivery config or
//! constraint is constructed and never reach the control loop.

use thiserror::Error;

/// Errors raised while validating delivery configs and constraints
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Duplicate environment name: {0}")]
    DuplicateEnvironment(String),

    #[error("Duplicate artifact reference: {0}")]
    DuplicateArtifact(String),

    #[error("Resource {resource} references unknown artifact '{reference}'")]
    UnknownArtifact { resource: String, reference: String },

    #[error("Environment '{environment}' depends on unknown environment '{depends_on}'")]
    UnknownEnvironment {
        environment: String,
        depends_on: String,
    },

    #[error("Duplicate resource id: {0}")]
    DuplicateResource(String),

    #[error("Invalid time window: {0}")]
    InvalidTimeWindow(String),

    #[error("Invalid time zone: {0}")]
    InvalidTimeZone(String),

    #[error("Invalid canary constraint: {0}")]
    InvalidCanary(String),

    #[error("Invalid versioning strategy: {0}")]
    Versioning(#[from] VersioningError),
}

/// Errors raised while building a version comparator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersioningError {
    #[error("Invalid regex '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },
}
