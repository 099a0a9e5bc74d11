//! Allowed-times evaluator

use crate::error::Result;
use crate::evaluator::{mismatch, ConstraintEvaluator, Evaluation, EvaluationContext};
use async_trait::async_trait;
use keel_types::{Constraint, ConstraintState, ConstraintType};

/// Passes while `now` lies inside one of the constraint's windows
#[derive(Debug, Default)]
pub struct AllowedTimesEvaluator;

#[async_trait]
impl ConstraintEvaluator for AllowedTimesEvaluator {
    fn constraint_type(&self) -> ConstraintType {
        ConstraintType::AllowedTimes
    }

    async fn evaluate(
        &self,
        constraint: &Constraint,
        ctx: &EvaluationContext,
        _state: Option<&ConstraintState>,
    ) -> Result<Evaluation> {
        let Constraint::AllowedTimes(window) = constraint else {
            return Err(mismatch(self.constraint_type(), constraint));
        };

        if window.allows(ctx.now) {
            Ok(Evaluation::pass())
        } else {
            Ok(Evaluation::pending().with_comment(format!(
                "Outside of allowed deployment windows ({})",
                window.time_zone()
            )))
        }
    }
}
