//! Keel Constraints - Gates between environments
//!
//! A version is promoted into an environment only once every constraint of
//! that environment passes:
//!
//! - **depends-on**: the version is or was current in another environment
//! - **allowed-times**: the clock is inside a deployment window
//! - **manual-judgement**: an operator approved the version
//! - **pipeline**: an external pipeline succeeded
//! - **canary**: regional canary analyses scored high enough
//!
//! Stateful constraints (judgement, pipeline, canary) persist one
//! `ConstraintState` row per version through a `ConstraintStateRepository`.
//! The [`ConstraintRunner`] owns that state machine; evaluators only decide.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod evaluator;
pub mod evaluators;
pub mod runner;
pub mod trigger;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use error::{ConstraintError, Result, TriggerError};
pub use evaluator::{ConstraintEvaluator, Evaluation, EvaluationContext, AUTOMATIC_JUDGE};
pub use runner::{ConstraintOutcome, ConstraintRunner, EnvironmentCheck, Judgement};
pub use trigger::{
    ExecutionKind, ExecutionSummary, ExecutionTrigger, InMemoryExecutionTrigger, TriggerRequest,
};
