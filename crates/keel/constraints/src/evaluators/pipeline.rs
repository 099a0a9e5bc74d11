//! Pipeline evaluator
//!
//! Launches the pipeline once per version and follows the execution to a
//! terminal status. A stored execution id is never launched again.

use crate::error::{Result, TriggerError};
use crate::evaluator::{mismatch, ConstraintEvaluator, Evaluation, EvaluationContext};
use crate::trigger::{ExecutionKind, ExecutionTrigger, TriggerRequest};
use async_trait::async_trait;
use keel_types::{
    Constraint, ConstraintState, ConstraintStateAttributes, ConstraintType, PipelineAttributes,
    PipelineConstraint,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

pub struct PipelineEvaluator {
    trigger: Arc<dyn ExecutionTrigger>,
}

impl PipelineEvaluator {
    pub fn new(trigger: Arc<dyn ExecutionTrigger>) -> Self {
        Self { trigger }
    }

    fn request(&self, constraint: &PipelineConstraint, ctx: &EvaluationContext) -> TriggerRequest {
        let mut parameters = constraint.parameters.clone();
        parameters.insert("artifact".to_string(), Value::from(ctx.artifact.reference()));
        parameters.insert("version".to_string(), Value::from(ctx.version.as_str()));
        parameters.insert("environment".to_string(), Value::from(ctx.environment_name.as_str()));

        TriggerRequest {
            kind: ExecutionKind::Pipeline,
            target_id: constraint.pipeline_id.clone(),
            application: ctx.delivery_config.application.clone(),
            service_account: ctx.delivery_config.service_account.clone(),
            correlation_id: format!("{}:pipeline:{}", ctx.correlation_id(), ctx.version),
            parameters,
        }
    }

    async fn launch(
        &self,
        constraint: &PipelineConstraint,
        ctx: &EvaluationContext,
        mut attributes: PipelineAttributes,
    ) -> Evaluation {
        attributes.launch_attempts += 1;
        let max_attempts = constraint.retries + 1;

        match self.trigger.trigger(self.request(constraint, ctx)).await {
            Ok(execution_id) => {
                info!(
                    pipeline_id = %constraint.pipeline_id,
                    execution_id = %execution_id,
                    version = %ctx.version,
                    "Launched pipeline"
                );
                attributes.execution_id = Some(execution_id);
                Evaluation::pending()
                    .with_attributes(ConstraintStateAttributes::Pipeline(attributes))
            }
            Err(TriggerError::Permanent(reason)) => Evaluation::fail()
                .with_comment(format!("Pipeline {} could not be launched: {}", constraint.pipeline_id, reason))
                .with_attributes(ConstraintStateAttributes::Pipeline(attributes)),
            Err(TriggerError::Transient(reason)) if attributes.launch_attempts >= max_attempts => {
                Evaluation::fail()
                    .with_comment(format!(
                        "Pipeline {} failed to launch after {} attempts: {}",
                        constraint.pipeline_id, attributes.launch_attempts, reason
                    ))
                    .with_attributes(ConstraintStateAttributes::Pipeline(attributes))
            }
            Err(TriggerError::Transient(reason)) => {
                warn!(
                    pipeline_id = %constraint.pipeline_id,
                    attempt = attributes.launch_attempts,
                    max_attempts,
                    %reason,
                    "Pipeline launch failed, retrying on next check"
                );
                Evaluation::pending()
                    .with_attributes(ConstraintStateAttributes::Pipeline(attributes))
            }
        }
    }
}

#[async_trait]
impl ConstraintEvaluator for PipelineEvaluator {
    fn constraint_type(&self) -> ConstraintType {
        ConstraintType::Pipeline
    }

    async fn evaluate(
        &self,
        constraint: &Constraint,
        ctx: &EvaluationContext,
        state: Option<&ConstraintState>,
    ) -> Result<Evaluation> {
        let Constraint::Pipeline(pipeline) = constraint else {
            return Err(mismatch(self.constraint_type(), constraint));
        };

        let mut attributes = state
            .and_then(ConstraintState::pipeline_attributes)
            .cloned()
            .unwrap_or_default();

        let Some(execution_id) = attributes.execution_id.clone() else {
            return Ok(self.launch(pipeline, ctx, attributes).await);
        };

        let summary = self.trigger.status(&execution_id).await?;
        attributes.latest_status = Some(summary.status);
        let evaluation = if summary.status.is_successful() {
            Evaluation::pass()
        } else if summary.status.is_complete() {
            Evaluation::fail().with_comment(format!(
                "Pipeline execution {} finished with {:?}",
                execution_id, summary.status
            ))
        } else {
            Evaluation::pending()
        };
        Ok(evaluation.with_attributes(ConstraintStateAttributes::Pipeline(attributes)))
    }
}
