//! Promotion engine
//!
//! Moves artifact versions through an environment's buckets: new versions
//! join PENDING, the candidate is checked against the environment's
//! constraints, and the outcome is written back in one compare-and-set.
//!
//! ## Candidate Selection
//!
//! 1. A pinned version, unless it is vetoed
//! 2. The DEPLOYING version
//! 3. The newest PENDING version

use crate::error::{ActuationError, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use keel_constraints::{ConstraintRunner, EvaluationContext};
use keel_registry::ArtifactRepository;
use keel_types::{
    ArtifactVersions, DeliveryArtifact, DeliveryConfig, Environment, EnvironmentArtifactPin,
    EventSource, KeelEvent, KeelEventEnvelope, PromotionAction, PromotionStatus, VersionComparator,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

/// Compare-and-set attempts per environment before giving up for this cycle
const MAX_WRITE_ATTEMPTS: usize = 3;

pub struct PromotionEngine {
    artifacts: Arc<dyn ArtifactRepository>,
    runner: Arc<ConstraintRunner>,
    event_tx: broadcast::Sender<KeelEventEnvelope>,
}

impl PromotionEngine {
    pub fn new(artifacts: Arc<dyn ArtifactRepository>, runner: Arc<ConstraintRunner>) -> Self {
        let (event_tx, _) = broadcast::channel(4096);
        Self {
            artifacts,
            runner,
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KeelEventEnvelope> {
        self.event_tx.subscribe()
    }

    /// Promote every artifact of a delivery config
    #[instrument(skip(self, delivery_config), fields(delivery_config = %delivery_config.name))]
    pub async fn check_environments(
        &self,
        delivery_config: Arc<DeliveryConfig>,
        now: DateTime<Utc>,
    ) -> Result<Vec<PromotionAction>> {
        let mut actions = Vec::new();
        for artifact in &delivery_config.artifacts {
            actions.extend(self.promote(delivery_config.clone(), artifact, now).await?);
        }
        Ok(actions)
    }

    /// Promote one artifact in every environment that uses it
    ///
    /// Environments are processed concurrently; a failing environment is
    /// logged and does not affect the others.
    #[instrument(skip(self, delivery_config, artifact), fields(
        delivery_config = %delivery_config.name,
        artifact = %artifact.reference()
    ))]
    pub async fn promote(
        &self,
        delivery_config: Arc<DeliveryConfig>,
        artifact: &DeliveryArtifact,
        now: DateTime<Utc>,
    ) -> Result<Vec<PromotionAction>> {
        let comparator = artifact.comparator()?;
        let known = self.artifacts.versions(artifact).await?;

        let environments: Vec<&Environment> = delivery_config
            .environments
            .iter()
            .filter(|env| env.uses_artifact(artifact.reference()))
            .collect();

        let results = join_all(environments.iter().map(|env| {
            self.promote_environment(&delivery_config, artifact, &comparator, env, &known, now)
        }))
        .await;

        let mut actions = Vec::new();
        for (env, result) in environments.iter().zip(results) {
            match result {
                Ok(moved) => actions.extend(moved),
                Err(e) => warn!(environment = %env.name, error = %e, "Promotion check failed"),
            }
        }
        Ok(actions)
    }

    async fn promote_environment(
        &self,
        delivery_config: &Arc<DeliveryConfig>,
        artifact: &DeliveryArtifact,
        comparator: &VersionComparator,
        environment: &Environment,
        known: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<PromotionAction>> {
        let reference = artifact.reference();

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let stored = self
                .artifacts
                .artifact_versions(&delivery_config.name, &environment.name, reference)
                .await?;
            let mut versions = stored.value.clone();
            let mut actions = versions.add_pending(known.iter().cloned(), comparator);
            let mut veto_reasons: HashMap<String, String> = HashMap::new();

            for veto in self
                .artifacts
                .vetoes(&delivery_config.name, &environment.name, reference)
                .await?
            {
                if versions.status_of(&veto.version).is_none() {
                    continue;
                }
                let reason = match (&veto.vetoed_by, &veto.comment) {
                    (Some(by), Some(comment)) => format!("vetoed by {}: {}", by, comment),
                    (Some(by), None) => format!("vetoed by {}", by),
                    (None, Some(comment)) => format!("vetoed: {}", comment),
                    (None, None) => "vetoed by an operator".to_string(),
                };
                veto_reasons.insert(veto.version.clone(), reason);
                actions.extend(versions.mark_vetoed(&veto.version));
            }

            let pin = self
                .artifacts
                .pinned_version(&delivery_config.name, &environment.name, reference)
                .await?;

            if let Some(candidate) = candidate(&versions, pin.as_ref()) {
                if versions.current() != Some(candidate.as_str()) {
                    let ctx = EvaluationContext::new(
                        delivery_config.clone(),
                        environment.name.clone(),
                        artifact.clone(),
                        candidate.clone(),
                        now,
                    );
                    let check = self.runner.check(&ctx).await?;

                    let moved = if check.passed() {
                        versions.mark_current(&candidate, comparator)
                    } else if check.failed() {
                        veto_reasons.insert(candidate.clone(), check.failure_reason());
                        versions.mark_vetoed(&candidate)
                    } else {
                        versions.mark_deploying(&candidate, comparator)
                    };
                    actions.extend(moved);
                }
            }

            if versions == stored.value {
                return Ok(Vec::new());
            }

            match self
                .artifacts
                .compare_and_set_artifact_versions(versions, stored.version)
                .await
            {
                Ok(_) => {
                    for action in &actions {
                        self.emit_action(action, &veto_reasons);
                    }
                    return Ok(actions);
                }
                Err(e) if e.is_conflict() => {
                    debug!(environment = %environment.name, attempt, "Concurrent promotion write, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ActuationError::ConflictRetriesExhausted(format!(
            "{}/{}/{}",
            delivery_config.name, environment.name, reference
        )))
    }

    fn emit_action(&self, action: &PromotionAction, veto_reasons: &HashMap<String, String>) {
        let delivery_config = action.delivery_config_name.clone();
        let environment = action.environment.clone();
        let artifact_reference = action.artifact_reference.clone();
        let version = action.version.clone();

        let event = match action.to {
            PromotionStatus::Current => {
                info!(%environment, %version, "Version approved");
                KeelEvent::ArtifactVersionApproved {
                    delivery_config,
                    environment,
                    artifact_reference,
                    version,
                }
            }
            PromotionStatus::Deploying => KeelEvent::ArtifactVersionDeploying {
                delivery_config,
                environment,
                artifact_reference,
                version,
            },
            PromotionStatus::Skipped => KeelEvent::ArtifactVersionSkipped {
                delivery_config,
                environment,
                artifact_reference,
                version,
            },
            PromotionStatus::Vetoed => {
                let reason = veto_reasons
                    .get(&version)
                    .cloned()
                    .unwrap_or_else(|| "vetoed".to_string());
                info!(%environment, %version, %reason, "Version vetoed");
                KeelEvent::ArtifactVersionVetoed {
                    delivery_config,
                    environment,
                    artifact_reference,
                    version,
                    reason,
                }
            }
            PromotionStatus::Pending | PromotionStatus::Previous => return,
        };

        let correlation_id = format!("{}:{}", action.delivery_config_name, action.environment);
        let envelope =
            KeelEventEnvelope::new(event, EventSource::Promotion).with_correlation(correlation_id);
        let _ = self.event_tx.send(envelope);
    }
}

/// Version to check next, if any
///
/// A pin wins over everything except a veto; a pin to a version that is not
/// known yet holds the environment where it is.
fn candidate(versions: &ArtifactVersions, pin: Option<&EnvironmentArtifactPin>) -> Option<String> {
    if let Some(pin) = pin {
        return match versions.status_of(&pin.version) {
            Some(PromotionStatus::Vetoed) => {
                warn!(version = %pin.version, "Pinned version is vetoed, holding");
                None
            }
            Some(_) => Some(pin.version.clone()),
            None => {
                debug!(version = %pin.version, "Pinned version not known yet, holding");
                None
            }
        };
    }

    versions
        .deploying()
        .or_else(|| versions.pending().first().map(String::as_str))
        .map(str::to_string)
}
