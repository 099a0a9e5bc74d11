//! Constraint error types

use keel_registry::RegistryError;
use keel_types::{ConstraintStateKey, ConstraintStatus, ConstraintType};
use thiserror::Error;

/// Errors raised by the execution backend behind pipelines and canaries
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    /// Worth retrying on a later tick
    #[error("Transient execution error: {0}")]
    Transient(String),

    /// Retrying will not help
    #[error("Permanent execution error: {0}")]
    Permanent(String),
}

/// Constraint evaluation errors
#[derive(Debug, Error)]
pub enum ConstraintError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Execution error: {0}")]
    Trigger(#[from] TriggerError),

    #[error("Constraint {key} is already judged: {status}")]
    AlreadyJudged {
        key: ConstraintStateKey,
        status: ConstraintStatus,
    },

    #[error("Invalid judgement: {0}")]
    InvalidJudgement(ConstraintStatus),

    #[error("Unknown environment: {0}")]
    UnknownEnvironment(String),

    #[error("No evaluator registered for {0}")]
    NoEvaluator(ConstraintType),

    #[error("Evaluator for {expected} received a {actual} constraint")]
    Mismatch {
        expected: ConstraintType,
        actual: ConstraintType,
    },

    #[error("Gave up writing {0} after repeated conflicts")]
    ConflictRetriesExhausted(String),
}

impl ConstraintError {
    /// Transient errors leave the constraint PENDING; the rest fail it
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Registry(_) | Self::ConflictRetriesExhausted(_) => true,
            Self::Trigger(e) => matches!(e, TriggerError::Transient(_)),
            _ => false,
        }
    }
}

/// Result type for constraint operations
pub type Result<T> = std::result::Result<T, ConstraintError>;
