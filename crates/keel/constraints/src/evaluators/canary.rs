//! Canary evaluator
//!
//! Launches one canary analysis per region, then polls every regional
//! execution on later checks. A region passes when its execution succeeds
//! with a score at or above the pass score.

use crate::error::{Result, TriggerError};
use crate::evaluator::{mismatch, ConstraintEvaluator, Evaluation, EvaluationContext};
use crate::trigger::{ExecutionKind, ExecutionSummary, ExecutionTrigger, TriggerRequest};
use async_trait::async_trait;
use futures::future::join_all;
use keel_types::{
    CanaryAttributes, CanaryConstraint, Constraint, ConstraintState, ConstraintStateAttributes,
    ConstraintType, RegionalCanary,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Launch attempts before a canary is failed
pub const MAX_START_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegionOutcome {
    Running,
    Passed,
    Failed,
}

pub struct CanaryEvaluator {
    trigger: Arc<dyn ExecutionTrigger>,
}

impl CanaryEvaluator {
    pub fn new(trigger: Arc<dyn ExecutionTrigger>) -> Self {
        Self { trigger }
    }

    fn judge(canary: &CanaryConstraint, ctx: &EvaluationContext) -> String {
        format!(
            "canary:{}:{}:{}",
            ctx.delivery_config.application,
            ctx.environment_name,
            canary.canary_config_id()
        )
    }

    fn request(canary: &CanaryConstraint, ctx: &EvaluationContext, region: &str) -> TriggerRequest {
        let spec = canary.spec();
        let parameters: BTreeMap<String, Value> = [
            ("region", json!(region)),
            ("artifact", json!(ctx.artifact.reference())),
            ("version", json!(ctx.version)),
            ("lifetime_seconds", json!(spec.lifetime.as_secs())),
            ("marginal_score", json!(spec.marginal_score)),
            ("pass_score", json!(spec.pass_score)),
            ("capacity", json!(spec.capacity)),
            ("source", json!(spec.source)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        TriggerRequest {
            kind: ExecutionKind::Canary,
            target_id: canary.canary_config_id().to_string(),
            application: ctx.delivery_config.application.clone(),
            service_account: ctx.delivery_config.service_account.clone(),
            correlation_id: format!("{}:canary:{}:{}", ctx.correlation_id(), ctx.version, region),
            parameters,
        }
    }

    async fn launch(
        &self,
        canary: &CanaryConstraint,
        ctx: &EvaluationContext,
        mut attributes: CanaryAttributes,
    ) -> Evaluation {
        if attributes.start_attempt >= MAX_START_ATTEMPTS {
            return Evaluation::fail()
                .with_comment(format!(
                    "Failed to launch canaries after {} attempts",
                    attributes.start_attempt
                ))
                .with_attributes(ConstraintStateAttributes::Canary(attributes));
        }
        attributes.start_attempt += 1;

        let launches = join_all(canary.regions().iter().map(|region| async move {
            let result = self.trigger.trigger(Self::request(canary, ctx, region)).await;
            (region.clone(), result)
        }))
        .await;

        let mut permanent = false;
        let mut failures = Vec::new();
        for (region, result) in launches {
            match result {
                Ok(execution_id) => {
                    attributes.executions.insert(
                        region,
                        RegionalCanary {
                            execution_id,
                            status: None,
                            score: None,
                        },
                    );
                }
                Err(error) => {
                    permanent |= matches!(error, TriggerError::Permanent(_));
                    failures.push(format!("{}: {}", region, error));
                }
            }
        }

        if failures.is_empty() {
            info!(
                canary_config_id = %canary.canary_config_id(),
                regions = attributes.executions.len(),
                version = %ctx.version,
                "Launched canaries"
            );
            return Evaluation::pending()
                .with_comment(format!(
                    "Running canaries in {}",
                    attributes.executions.keys().cloned().collect::<Vec<_>>().join(", ")
                ))
                .with_attributes(ConstraintStateAttributes::Canary(attributes));
        }

        // All regions start together, so partial launches are rolled back
        let launched: Vec<String> = attributes
            .executions
            .values()
            .map(|e| e.execution_id.clone())
            .collect();
        self.cancel_all(&launched).await;
        attributes.executions.clear();

        warn!(
            canary_config_id = %canary.canary_config_id(),
            attempt = attributes.start_attempt,
            failures = %failures.join("; "),
            "Canary launch failed"
        );
        let comment = format!("Canary launch failed: {}", failures.join("; "));
        let evaluation = if permanent {
            Evaluation::fail()
        } else {
            Evaluation::pending()
        };
        evaluation
            .with_comment(comment)
            .with_attributes(ConstraintStateAttributes::Canary(attributes))
    }

    async fn cancel_all(&self, execution_ids: &[String]) {
        let results = join_all(execution_ids.iter().map(|id| async move {
            (id, self.trigger.cancel(id).await)
        }))
        .await;
        for (id, result) in results {
            if let Err(error) = result {
                warn!(execution_id = %id, %error, "Failed to cancel canary");
            }
        }
    }

    fn outcome(canary: &CanaryConstraint, execution: &RegionalCanary) -> RegionOutcome {
        match execution.status {
            Some(status) if status.is_successful() => match execution.score {
                Some(score) if score < f64::from(canary.pass_score()) => RegionOutcome::Failed,
                _ => RegionOutcome::Passed,
            },
            Some(status) if status.is_complete() => RegionOutcome::Failed,
            _ => RegionOutcome::Running,
        }
    }

    async fn poll(
        &self,
        canary: &CanaryConstraint,
        ctx: &EvaluationContext,
        mut attributes: CanaryAttributes,
    ) -> Evaluation {
        let polls = join_all(attributes.executions.iter().map(|(region, execution)| async move {
            let result = self.trigger.status(&execution.execution_id).await;
            (region.clone(), result)
        }))
        .await;

        for (region, result) in polls {
            match result {
                Ok(ExecutionSummary { status, score }) => {
                    if let Some(execution) = attributes.executions.get_mut(&region) {
                        execution.status = Some(status);
                        execution.score = score;
                    }
                }
                Err(error) => {
                    warn!(%region, %error, "Unable to read canary status");
                }
            }
        }

        let outcomes: BTreeMap<&String, RegionOutcome> = attributes
            .executions
            .iter()
            .map(|(region, execution)| (region, Self::outcome(canary, execution)))
            .collect();
        let failed = outcomes.values().filter(|o| **o == RegionOutcome::Failed).count();
        let running: Vec<String> = attributes
            .executions
            .iter()
            .filter(|(region, _)| outcomes.get(region) == Some(&RegionOutcome::Running))
            .map(|(_, execution)| execution.execution_id.clone())
            .collect();
        let scores = attributes
            .executions
            .iter()
            .map(|(region, execution)| match execution.score {
                Some(score) => format!("{}={:.1}", region, score),
                None => format!("{}=n/a", region),
            })
            .collect::<Vec<_>>()
            .join(", ");

        let evaluation = if failed > canary.allowed_failures() {
            if canary.failure_cancels_running_regions() && !running.is_empty() {
                self.cancel_all(&running).await;
            }
            Evaluation::fail()
                .with_comment(format!(
                    "{} of {} regional canaries failed ({})",
                    failed,
                    outcomes.len(),
                    scores
                ))
                .judged_by(Self::judge(canary, ctx))
        } else if running.is_empty() {
            Evaluation::pass()
                .with_comment(format!("Canary passed ({})", scores))
                .judged_by(Self::judge(canary, ctx))
        } else {
            Evaluation::pending()
        };

        evaluation.with_attributes(ConstraintStateAttributes::Canary(attributes))
    }
}

#[async_trait]
impl ConstraintEvaluator for CanaryEvaluator {
    fn constraint_type(&self) -> ConstraintType {
        ConstraintType::Canary
    }

    async fn evaluate(
        &self,
        constraint: &Constraint,
        ctx: &EvaluationContext,
        state: Option<&ConstraintState>,
    ) -> Result<Evaluation> {
        let Constraint::Canary(canary) = constraint else {
            return Err(mismatch(self.constraint_type(), constraint));
        };

        let attributes = state
            .and_then(ConstraintState::canary_attributes)
            .cloned()
            .unwrap_or_default();

        if attributes.executions.is_empty() {
            Ok(self.launch(canary, ctx, attributes).await)
        } else {
            Ok(self.poll(canary, ctx, attributes).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context;
    use crate::trigger::InMemoryExecutionTrigger;
    use chrono::Utc;
    use keel_types::constraint::CanarySpec;
    use keel_types::{CanarySource, ConstraintStatus, ExecutionStatus};
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn canary(regions: &[&str], min_successful_regions: usize) -> Constraint {
        Constraint::Canary(
            CanaryConstraint::new(CanarySpec {
                timeout: Duration::from_secs(7200),
                canary_config_id: "fnord-canary".to_string(),
                lifetime: Duration::from_secs(1800),
                regions: regions.iter().map(|r| r.to_string()).collect::<BTreeSet<_>>(),
                marginal_score: 75,
                pass_score: 90,
                source: CanarySource {
                    account: "prod".to_string(),
                    cluster: "fnord-main".to_string(),
                    cloud_provider: "aws".to_string(),
                },
                capacity: 1,
                min_successful_regions,
                failure_cancels_running_regions: true,
            })
            .unwrap(),
        )
    }

    fn fold(state: Option<ConstraintState>, evaluation: Evaluation) -> ConstraintState {
        let state = state.unwrap_or_else(|| {
            ConstraintState::pending(
                context("prod", "v1.0.0").state_key(ConstraintType::Canary),
                Utc::now(),
            )
        });
        evaluation.apply_to(&state, Utc::now())
    }

    fn execution_id(state: &ConstraintState, region: &str) -> String {
        state.canary_attributes().unwrap().executions[region]
            .execution_id
            .clone()
    }

    #[tokio::test]
    async fn test_launches_every_region_then_passes() {
        let trigger = Arc::new(InMemoryExecutionTrigger::new());
        let evaluator = CanaryEvaluator::new(trigger.clone());
        let ctx = context("prod", "v1.0.0");
        let constraint = canary(&["us-east-1", "us-west-2"], 0);

        let first = evaluator.evaluate(&constraint, &ctx, None).await.unwrap();
        assert_eq!(first.status, ConstraintStatus::Pending);
        let state = fold(None, first);
        assert_eq!(trigger.launched(), 2);
        assert_eq!(state.canary_attributes().unwrap().start_attempt, 1);

        trigger.set_status(&execution_id(&state, "us-east-1"), ExecutionStatus::Succeeded, Some(95.0));
        let second = evaluator.evaluate(&constraint, &ctx, Some(&state)).await.unwrap();
        assert_eq!(second.status, ConstraintStatus::Pending);
        let state = fold(Some(state), second);

        trigger.set_status(&execution_id(&state, "us-west-2"), ExecutionStatus::Succeeded, Some(92.5));
        let third = evaluator.evaluate(&constraint, &ctx, Some(&state)).await.unwrap();
        assert_eq!(third.status, ConstraintStatus::Pass);
        assert_eq!(
            third.judged_by.as_deref(),
            Some("canary:fnord:prod:fnord-canary")
        );
        assert!(third.comment.unwrap().contains("us-west-2=92.5"));
        assert_eq!(trigger.launched(), 2);
    }

    #[tokio::test]
    async fn test_failure_beyond_allowance_cancels_running_regions() {
        let trigger = Arc::new(InMemoryExecutionTrigger::new());
        let evaluator = CanaryEvaluator::new(trigger.clone());
        let ctx = context("prod", "v1.0.0");
        let constraint = canary(&["eu-west-1", "us-east-1", "us-west-2"], 2);

        let state = fold(None, evaluator.evaluate(&constraint, &ctx, None).await.unwrap());

        // One failure is within the allowance
        trigger.set_status(&execution_id(&state, "eu-west-1"), ExecutionStatus::Terminal, None);
        let evaluation = evaluator.evaluate(&constraint, &ctx, Some(&state)).await.unwrap();
        assert_eq!(evaluation.status, ConstraintStatus::Pending);
        let state = fold(Some(state), evaluation);

        // A low score is a failure too
        trigger.set_status(&execution_id(&state, "us-east-1"), ExecutionStatus::Succeeded, Some(40.0));
        let evaluation = evaluator.evaluate(&constraint, &ctx, Some(&state)).await.unwrap();
        assert_eq!(evaluation.status, ConstraintStatus::Fail);
        assert!(trigger.is_cancelled(&execution_id(&state, "us-west-2")));
    }

    #[tokio::test]
    async fn test_launch_retries_exhaust_after_three_attempts() {
        let trigger = Arc::new(InMemoryExecutionTrigger::new());
        let evaluator = CanaryEvaluator::new(trigger.clone());
        let ctx = context("prod", "v1.0.0");
        let constraint = canary(&["us-east-1"], 0);

        let mut state = None;
        for _ in 0..3 {
            trigger
                .fail_next_trigger(TriggerError::Transient("orca unavailable".to_string()))
                .await;
            let evaluation = evaluator
                .evaluate(&constraint, &ctx, state.as_ref())
                .await
                .unwrap();
            assert_eq!(evaluation.status, ConstraintStatus::Pending);
            state = Some(fold(state, evaluation));
        }
        let attributes = state.as_ref().unwrap().canary_attributes().unwrap();
        assert_eq!(attributes.start_attempt, 3);
        assert!(attributes.executions.is_empty());

        let evaluation = evaluator
            .evaluate(&constraint, &ctx, state.as_ref())
            .await
            .unwrap();
        assert_eq!(evaluation.status, ConstraintStatus::Fail);
        assert_eq!(trigger.launched(), 0);
    }
}
