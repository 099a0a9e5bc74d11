//! Depends-on evaluator

use crate::error::Result;
use crate::evaluator::{mismatch, ConstraintEvaluator, Evaluation, EvaluationContext};
use async_trait::async_trait;
use keel_registry::ArtifactRepository;
use keel_types::{Constraint, ConstraintState, ConstraintType};
use std::sync::Arc;
use tracing::debug;

/// Passes once the version is or was CURRENT in the upstream environment
pub struct DependsOnEvaluator {
    artifacts: Arc<dyn ArtifactRepository>,
}

impl DependsOnEvaluator {
    pub fn new(artifacts: Arc<dyn ArtifactRepository>) -> Self {
        Self { artifacts }
    }
}

#[async_trait]
impl ConstraintEvaluator for DependsOnEvaluator {
    fn constraint_type(&self) -> ConstraintType {
        ConstraintType::DependsOn
    }

    async fn evaluate(
        &self,
        constraint: &Constraint,
        ctx: &EvaluationContext,
        _state: Option<&ConstraintState>,
    ) -> Result<Evaluation> {
        let Constraint::DependsOn(depends_on) = constraint else {
            return Err(mismatch(self.constraint_type(), constraint));
        };

        let upstream = self
            .artifacts
            .artifact_versions(
                &ctx.delivery_config.name,
                &depends_on.environment,
                ctx.artifact.reference(),
            )
            .await?
            .into_inner();

        if upstream.has_been_current(&ctx.version) {
            Ok(Evaluation::pass())
        } else {
            debug!(
                version = %ctx.version,
                upstream = %depends_on.environment,
                "Version not yet deployed upstream"
            );
            Ok(Evaluation::pending().with_comment(format!(
                "Waiting for {} to be deployed to {}",
                ctx.version, depends_on.environment
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context;
    use keel_registry::InMemoryArtifactRepository;
    use keel_types::{ArtifactVersions, ConstraintStatus, DependsOnConstraint};

    #[tokio::test]
    async fn test_passes_when_current_upstream() {
        let artifacts = Arc::new(InMemoryArtifactRepository::new());
        let ctx = context("prod", "v5.0.0");
        let comparator = ctx.artifact.comparator().unwrap();

        let mut upstream = ArtifactVersions::new("fnord-manifest", "test", "fnord");
        upstream.add_pending(vec!["v5.0.0".to_string()], &comparator);
        upstream.mark_current("v5.0.0", &comparator);
        artifacts
            .compare_and_set_artifact_versions(upstream, 0)
            .await
            .unwrap();

        let evaluator = DependsOnEvaluator::new(artifacts);
        let constraint = Constraint::DependsOn(DependsOnConstraint {
            environment: "test".to_string(),
        });

        let evaluation = evaluator.evaluate(&constraint, &ctx, None).await.unwrap();
        assert_eq!(evaluation.status, ConstraintStatus::Pass);

        let other = context("prod", "v6.0.0");
        let evaluation = evaluator.evaluate(&constraint, &other, None).await.unwrap();
        assert_eq!(evaluation.status, ConstraintStatus::Pending);
    }
}
