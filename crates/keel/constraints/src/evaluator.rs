//! Evaluator trait and evaluation context

use crate::error::{ConstraintError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_types::{
    Constraint, ConstraintState, ConstraintStateAttributes, ConstraintStateKey, ConstraintStatus,
    ConstraintType, DeliveryArtifact, DeliveryConfig, Environment,
};
use std::sync::Arc;

/// Judge recorded for automatic decisions
pub const AUTOMATIC_JUDGE: &str = "keel";

/// The version being considered for an environment
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub delivery_config: Arc<DeliveryConfig>,
    pub environment_name: String,
    pub artifact: DeliveryArtifact,
    pub version: String,
    pub now: DateTime<Utc>,
}

impl EvaluationContext {
    pub fn new(
        delivery_config: Arc<DeliveryConfig>,
        environment_name: impl Into<String>,
        artifact: DeliveryArtifact,
        version: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            delivery_config,
            environment_name: environment_name.into(),
            artifact,
            version: version.into(),
            now,
        }
    }

    pub fn environment(&self) -> Result<&Environment> {
        self.delivery_config
            .environment(&self.environment_name)
            .ok_or_else(|| ConstraintError::UnknownEnvironment(self.environment_name.clone()))
    }

    pub fn state_key(&self, constraint_type: ConstraintType) -> ConstraintStateKey {
        ConstraintStateKey::new(
            self.delivery_config.name.clone(),
            self.environment_name.clone(),
            self.artifact.reference(),
            self.version.clone(),
            constraint_type,
        )
    }

    /// `{config}:{environment}`, used to correlate events
    pub fn correlation_id(&self) -> String {
        format!("{}:{}", self.delivery_config.name, self.environment_name)
    }
}

/// Result of one evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub status: ConstraintStatus,
    pub comment: Option<String>,
    pub attributes: Option<ConstraintStateAttributes>,
    /// Recorded on terminal outcomes; defaults to [`AUTOMATIC_JUDGE`]
    pub judged_by: Option<String>,
}

impl Evaluation {
    fn with_status(status: ConstraintStatus) -> Self {
        Self {
            status,
            comment: None,
            attributes: None,
            judged_by: None,
        }
    }

    pub fn pending() -> Self {
        Self::with_status(ConstraintStatus::Pending)
    }

    pub fn pass() -> Self {
        Self::with_status(ConstraintStatus::Pass)
    }

    pub fn fail() -> Self {
        Self::with_status(ConstraintStatus::Fail)
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_attributes(mut self, attributes: ConstraintStateAttributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    pub fn judged_by(mut self, judge: impl Into<String>) -> Self {
        self.judged_by = Some(judge.into());
        self
    }

    /// Fold this evaluation into a stored PENDING row
    pub fn apply_to(self, state: &ConstraintState, now: DateTime<Utc>) -> ConstraintState {
        let mut next = state.clone();
        if let Some(attributes) = self.attributes {
            next.attributes = Some(attributes);
        }
        match self.status {
            ConstraintStatus::Pending => {
                if self.comment.is_some() {
                    next.comment = self.comment;
                }
                next
            }
            status => next.judged(
                status,
                self.judged_by.unwrap_or_else(|| AUTOMATIC_JUDGE.to_string()),
                self.comment,
                now,
            ),
        }
    }
}

/// Decides one constraint type
///
/// Stateless evaluators receive no state. Stateful evaluators receive the
/// stored PENDING row and return the attributes to persist with it;
/// timeouts are handled by the runner before the evaluator is called.
#[async_trait]
pub trait ConstraintEvaluator: Send + Sync {
    /// Type of constraint this evaluator handles
    fn constraint_type(&self) -> ConstraintType;

    /// Evaluate the constraint for the context's version
    async fn evaluate(
        &self,
        constraint: &Constraint,
        ctx: &EvaluationContext,
        state: Option<&ConstraintState>,
    ) -> Result<Evaluation>;
}

/// Ensure an evaluator was handed its own constraint type
pub(crate) fn mismatch(expected: ConstraintType, constraint: &Constraint) -> ConstraintError {
    ConstraintError::Mismatch {
        expected,
        actual: constraint.constraint_type(),
    }
}
