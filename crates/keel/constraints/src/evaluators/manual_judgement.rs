//! Manual judgement evaluator

use crate::error::Result;
use crate::evaluator::{mismatch, ConstraintEvaluator, Evaluation, EvaluationContext};
use async_trait::async_trait;
use keel_types::{Constraint, ConstraintState, ConstraintType};

/// Stays PENDING until an operator judges the version
#[derive(Debug, Default)]
pub struct ManualJudgementEvaluator;

#[async_trait]
impl ConstraintEvaluator for ManualJudgementEvaluator {
    fn constraint_type(&self) -> ConstraintType {
        ConstraintType::ManualJudgement
    }

    async fn evaluate(
        &self,
        constraint: &Constraint,
        _ctx: &EvaluationContext,
        _state: Option<&ConstraintState>,
    ) -> Result<Evaluation> {
        if !matches!(constraint, Constraint::ManualJudgement(_)) {
            return Err(mismatch(self.constraint_type(), constraint));
        }
        Ok(Evaluation::pending())
    }
}
