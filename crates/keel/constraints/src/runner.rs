//! Environment constraint runner
//!
//! Evaluates every constraint of an environment for one version and owns
//! the state machine of stateful constraints: rows are created PENDING,
//! timeouts are checked before any evaluator runs, and every write is a
//! compare-and-set against the row that was read.

use crate::error::{ConstraintError, Result};
use crate::evaluator::{ConstraintEvaluator, Evaluation, EvaluationContext, AUTOMATIC_JUDGE};
use crate::evaluators::{
    AllowedTimesEvaluator, CanaryEvaluator, DependsOnEvaluator, ManualJudgementEvaluator,
    PipelineEvaluator,
};
use crate::trigger::ExecutionTrigger;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use keel_registry::{ArtifactRepository, ConstraintStateRepository, RegistryError, Versioned};
use keel_types::{
    Constraint, ConstraintState, ConstraintStateKey, ConstraintStatus, ConstraintType,
    EventSource, KeelEvent, KeelEventEnvelope,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

/// Compare-and-set attempts for an operator judgement
const MAX_JUDGE_ATTEMPTS: usize = 3;

/// Outcome of one constraint
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintOutcome {
    pub constraint_type: ConstraintType,
    pub status: ConstraintStatus,
    pub comment: Option<String>,
}

/// Combined outcome of an environment's constraints
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentCheck {
    /// FAIL if any failed, PASS if all passed, PENDING otherwise
    pub status: ConstraintStatus,
    pub outcomes: Vec<ConstraintOutcome>,
}

impl EnvironmentCheck {
    fn from_outcomes(outcomes: Vec<ConstraintOutcome>) -> Self {
        let status = if outcomes.iter().any(|o| o.status.failed()) {
            ConstraintStatus::Fail
        } else if outcomes.iter().all(|o| o.status.passes()) {
            ConstraintStatus::Pass
        } else {
            ConstraintStatus::Pending
        };
        Self { status, outcomes }
    }

    pub fn passed(&self) -> bool {
        self.status.passes()
    }

    pub fn failed(&self) -> bool {
        self.status.failed()
    }

    /// Comments of failed constraints, joined
    pub fn failure_reason(&self) -> String {
        self.outcomes
            .iter()
            .filter(|o| o.status.failed())
            .map(|o| match &o.comment {
                Some(comment) => format!("{}: {}", o.constraint_type, comment),
                None => o.constraint_type.to_string(),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// An operator's decision on a stateful constraint
#[derive(Debug, Clone)]
pub struct Judgement {
    pub key: ConstraintStateKey,
    /// OVERRIDE_PASS or OVERRIDE_FAIL
    pub status: ConstraintStatus,
    pub judged_by: String,
    pub comment: Option<String>,
}

/// Evaluates environment constraints and records their state
pub struct ConstraintRunner {
    evaluators: HashMap<ConstraintType, Arc<dyn ConstraintEvaluator>>,
    states: Arc<dyn ConstraintStateRepository>,
    event_tx: broadcast::Sender<KeelEventEnvelope>,
}

impl ConstraintRunner {
    /// Create a runner with no evaluators registered
    pub fn new(states: Arc<dyn ConstraintStateRepository>) -> Self {
        let (event_tx, _) = broadcast::channel(4096);
        Self {
            evaluators: HashMap::new(),
            states,
            event_tx,
        }
    }

    /// Register an evaluator, replacing any for the same type
    pub fn with_evaluator(mut self, evaluator: Arc<dyn ConstraintEvaluator>) -> Self {
        self.evaluators.insert(evaluator.constraint_type(), evaluator);
        self
    }

    /// A runner with every built-in evaluator
    pub fn standard(
        states: Arc<dyn ConstraintStateRepository>,
        artifacts: Arc<dyn ArtifactRepository>,
        trigger: Arc<dyn ExecutionTrigger>,
    ) -> Self {
        Self::new(states)
            .with_evaluator(Arc::new(DependsOnEvaluator::new(artifacts)))
            .with_evaluator(Arc::new(AllowedTimesEvaluator))
            .with_evaluator(Arc::new(ManualJudgementEvaluator))
            .with_evaluator(Arc::new(PipelineEvaluator::new(trigger.clone())))
            .with_evaluator(Arc::new(CanaryEvaluator::new(trigger)))
    }

    /// Subscribe to constraint events
    pub fn subscribe(&self) -> broadcast::Receiver<KeelEventEnvelope> {
        self.event_tx.subscribe()
    }

    /// Evaluate every constraint of the context's environment
    #[instrument(skip(self, ctx), fields(
        delivery_config = %ctx.delivery_config.name,
        environment = %ctx.environment_name,
        version = %ctx.version
    ))]
    pub async fn check(&self, ctx: &EvaluationContext) -> Result<EnvironmentCheck> {
        let environment = ctx.environment()?;

        let outcomes = join_all(
            environment
                .constraints
                .iter()
                .map(|constraint| self.check_constraint(constraint, ctx)),
        )
        .await;

        let check = EnvironmentCheck::from_outcomes(outcomes);
        debug!(status = %check.status, constraints = check.outcomes.len(), "Checked constraints");
        Ok(check)
    }

    async fn check_constraint(
        &self,
        constraint: &Constraint,
        ctx: &EvaluationContext,
    ) -> ConstraintOutcome {
        let constraint_type = constraint.constraint_type();
        let result = if constraint.is_stateful() {
            self.check_stateful(constraint, ctx).await
        } else {
            self.check_stateless(constraint, ctx).await
        };

        result.unwrap_or_else(|error| {
            warn!(%constraint_type, %error, "Constraint check failed, leaving it pending");
            ConstraintOutcome {
                constraint_type,
                status: ConstraintStatus::Pending,
                comment: Some(error.to_string()),
            }
        })
    }

    fn evaluator(&self, constraint_type: ConstraintType) -> Result<&Arc<dyn ConstraintEvaluator>> {
        self.evaluators
            .get(&constraint_type)
            .ok_or(ConstraintError::NoEvaluator(constraint_type))
    }

    /// Stateless constraints report PASS or PENDING and are never persisted
    async fn check_stateless(
        &self,
        constraint: &Constraint,
        ctx: &EvaluationContext,
    ) -> Result<ConstraintOutcome> {
        let evaluation = self
            .evaluator(constraint.constraint_type())?
            .evaluate(constraint, ctx, None)
            .await?;
        let status = if evaluation.status.passes() {
            ConstraintStatus::Pass
        } else {
            ConstraintStatus::Pending
        };
        Ok(ConstraintOutcome {
            constraint_type: constraint.constraint_type(),
            status,
            comment: evaluation.comment,
        })
    }

    async fn check_stateful(
        &self,
        constraint: &Constraint,
        ctx: &EvaluationContext,
    ) -> Result<ConstraintOutcome> {
        let constraint_type = constraint.constraint_type();
        let evaluator = self.evaluator(constraint_type)?;
        let stored = self.load_or_create(ctx, constraint_type).await?;

        if stored.value.status.is_terminal() {
            return Ok(outcome(&stored.value));
        }

        let timed_out = constraint
            .timeout()
            .map_or(false, |timeout| stored.value.timed_out(timeout, ctx.now));

        let next = if timed_out {
            let timeout = constraint.timeout().unwrap_or_default();
            info!(%constraint_type, ?timeout, "Constraint timed out");
            Evaluation::fail()
                .with_comment(format!("Timed out after {:?}", timeout))
                .apply_to(&stored.value, ctx.now)
        } else {
            match evaluator.evaluate(constraint, ctx, Some(&stored.value)).await {
                Ok(evaluation) => evaluation.apply_to(&stored.value, ctx.now),
                Err(error) if error.is_transient() => {
                    warn!(%constraint_type, %error, "Transient evaluation error, staying pending");
                    return Ok(outcome(&stored.value));
                }
                Err(error) => Evaluation::fail()
                    .with_comment(error.to_string())
                    .apply_to(&stored.value, ctx.now),
            }
        };

        if next == stored.value {
            return Ok(outcome(&stored.value));
        }

        let previous = stored.value.status;
        match self.states.compare_and_set(next, stored.version).await {
            Ok(written) => {
                if written.value.status != previous {
                    self.emit_state_change(&written.value, Some(previous));
                }
                Ok(outcome(&written.value))
            }
            Err(error) if error.is_conflict() => {
                debug!(%constraint_type, "Lost constraint state race, reporting the winner");
                let winner = self.states.get(&stored.value.key()).await?.ok_or_else(|| {
                    RegistryError::NotFound(format!("constraint state {}", stored.value.key()))
                })?;
                Ok(outcome(&winner.value))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn load_or_create(
        &self,
        ctx: &EvaluationContext,
        constraint_type: ConstraintType,
    ) -> Result<Versioned<ConstraintState>> {
        let key = ctx.state_key(constraint_type);
        if let Some(stored) = self.states.get(&key).await? {
            return Ok(stored);
        }

        let created = self
            .states
            .insert_if_absent(ConstraintState::pending(key, ctx.now))
            .await?;
        if created.version == 1 && created.value.created_at == ctx.now {
            self.emit_state_change(&created.value, None);
        }
        Ok(created)
    }

    /// Record an operator override on a missing or PENDING row
    #[instrument(skip(self, judgement), fields(key = %judgement.key, status = %judgement.status))]
    pub async fn judge(&self, judgement: Judgement, now: DateTime<Utc>) -> Result<ConstraintState> {
        if !judgement.status.is_override() {
            return Err(ConstraintError::InvalidJudgement(judgement.status));
        }

        for _ in 0..MAX_JUDGE_ATTEMPTS {
            let stored = match self.states.get(&judgement.key).await? {
                Some(stored) => stored,
                None => {
                    self.states
                        .insert_if_absent(ConstraintState::pending(judgement.key.clone(), now))
                        .await?
                }
            };

            if stored.value.status.is_terminal() {
                return Err(ConstraintError::AlreadyJudged {
                    key: judgement.key.clone(),
                    status: stored.value.status,
                });
            }

            let next = stored.value.clone().judged(
                judgement.status,
                judgement.judged_by.clone(),
                judgement.comment.clone(),
                now,
            );
            match self.states.compare_and_set(next, stored.version).await {
                Ok(written) => {
                    info!(judged_by = %judgement.judged_by, "Constraint judged");
                    self.emit_state_change(&written.value, Some(stored.value.status));
                    return Ok(written.value);
                }
                Err(error) if error.is_conflict() => continue,
                Err(error) => return Err(error.into()),
            }
        }

        Err(ConstraintError::ConflictRetriesExhausted(judgement.key.to_string()))
    }

    fn emit_state_change(&self, state: &ConstraintState, previous: Option<ConstraintStatus>) {
        let envelope = KeelEventEnvelope::new(
            KeelEvent::ConstraintStateChanged {
                key: state.key(),
                previous,
                status: state.status,
                judged_by: state.judged_by.clone(),
            },
            EventSource::Constraint,
        )
        .with_correlation(format!(
            "{}:{}",
            state.delivery_config_name, state.environment_name
        ));
        let envelope = match &state.judged_by {
            Some(judge) if judge != AUTOMATIC_JUDGE => envelope.with_actor(judge.clone()),
            _ => envelope,
        };
        let _ = self.event_tx.send(envelope);
    }
}

fn outcome(state: &ConstraintState) -> ConstraintOutcome {
    ConstraintOutcome {
        constraint_type: state.constraint_type,
        status: state.status,
        comment: state.comment.clone(),
    }
}
