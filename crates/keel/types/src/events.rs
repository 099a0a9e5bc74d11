//! Event types for Keel observability
//!
//! Events provide a unified stream of reconciliation, constraint and
//! promotion activity.

use crate::ids::{ResourceId, TaskId};
use crate::state::{ConstraintStateKey, ConstraintStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all Keel events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeelEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Event source
    pub source: EventSource,

    /// Event severity
    pub severity: EventSeverity,

    /// Correlation ID for tracing
    pub correlation_id: Option<String>,

    /// Actor who triggered the event
    pub actor: Option<String>,

    /// The actual event
    pub event: KeelEvent,
}

/// Event sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    /// Artifact promotion
    Promotion,
    /// Constraint evaluation
    Constraint,
    /// Resource reconciliation
    Reconciler,
    /// Periodic scheduler
    Scheduler,
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level event
    Debug,
    /// Informational event
    Info,
    /// Warning event
    Warning,
    /// Error event
    Error,
}

/// Keel events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KeelEvent {
    // ═══════════════════════════════════════════════════════════════════
    // RESOURCE EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// Resource does not exist yet
    ResourceMissing { resource_id: ResourceId },

    /// Current state differs from desired state
    ResourceDeltaDetected {
        resource_id: ResourceId,
        affected: Vec<String>,
    },

    /// Jobs were submitted to converge the resource
    ResourceActuationLaunched {
        resource_id: ResourceId,
        tasks: Vec<TaskId>,
    },

    /// Current state matches desired state
    ResourceValid { resource_id: ResourceId },

    /// Check skipped, e.g. while tasks are in flight or actuation is paused
    ResourceCheckSkipped {
        resource_id: ResourceId,
        reason: String,
    },

    /// Desired state cannot be computed yet
    ResourceCheckUnresolvable {
        resource_id: ResourceId,
        reason: String,
    },

    /// Check failed
    ResourceCheckError {
        resource_id: ResourceId,
        error: String,
    },

    /// Actuation paused by an operator
    ResourceActuationPaused { resource_id: ResourceId },

    /// Actuation resumed by an operator
    ResourceActuationResumed { resource_id: ResourceId },

    /// Teardown jobs were submitted
    ResourceDeleted {
        resource_id: ResourceId,
        tasks: Vec<TaskId>,
    },

    // ═══════════════════════════════════════════════════════════════════
    // CONSTRAINT EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// A constraint state row was created or changed status
    ConstraintStateChanged {
        key: ConstraintStateKey,
        previous: Option<ConstraintStatus>,
        status: ConstraintStatus,
        judged_by: Option<String>,
    },

    // ═══════════════════════════════════════════════════════════════════
    // PROMOTION EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// Version passed its constraints and is now current
    ArtifactVersionApproved {
        delivery_config: String,
        environment: String,
        artifact_reference: String,
        version: String,
    },

    /// Version selected as the environment's candidate
    ArtifactVersionDeploying {
        delivery_config: String,
        environment: String,
        artifact_reference: String,
        version: String,
    },

    /// Version skipped because a newer one was promoted
    ArtifactVersionSkipped {
        delivery_config: String,
        environment: String,
        artifact_reference: String,
        version: String,
    },

    /// Version failed its constraints or was vetoed by an operator
    ArtifactVersionVetoed {
        delivery_config: String,
        environment: String,
        artifact_reference: String,
        version: String,
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // SCHEDULER EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// One scheduler pass finished
    CheckCycleCompleted {
        delivery_configs: usize,
        failures: usize,
    },
}

impl KeelEventEnvelope {
    /// Create a new event envelope
    pub fn new(event: KeelEvent, source: EventSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            source,
            severity: Self::infer_severity(&event),
            correlation_id: None,
            actor: None,
            event,
        }
    }

    /// Create with correlation ID
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Create with actor
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Infer severity from event type
    fn infer_severity(event: &KeelEvent) -> EventSeverity {
        match event {
            KeelEvent::ResourceCheckError { .. } => EventSeverity::Error,

            KeelEvent::ResourceCheckUnresolvable { .. }
            | KeelEvent::ArtifactVersionVetoed { .. } => EventSeverity::Warning,

            KeelEvent::ConstraintStateChanged { status, .. } if status.failed() => {
                EventSeverity::Warning
            }

            KeelEvent::ResourceValid { .. }
            | KeelEvent::ResourceCheckSkipped { .. }
            | KeelEvent::CheckCycleCompleted { .. } => EventSeverity::Debug,

            _ => EventSeverity::Info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::ConstraintType;

    #[test]
    fn test_severity_inference() {
        let envelope = KeelEventEnvelope::new(
            KeelEvent::ResourceCheckError {
                resource_id: ResourceId::new("ec2:cluster:test:fnord"),
                error: "boom".to_string(),
            },
            EventSource::Reconciler,
        );
        assert_eq!(envelope.severity, EventSeverity::Error);

        let envelope = KeelEventEnvelope::new(
            KeelEvent::ConstraintStateChanged {
                key: ConstraintStateKey::new("fnord", "prod", "fnord", "v1", ConstraintType::Pipeline),
                previous: Some(ConstraintStatus::Pending),
                status: ConstraintStatus::Fail,
                judged_by: None,
            },
            EventSource::Constraint,
        )
        .with_correlation("fnord:prod");
        assert_eq!(envelope.severity, EventSeverity::Warning);
        assert_eq!(envelope.correlation_id.as_deref(), Some("fnord:prod"));
    }
}
