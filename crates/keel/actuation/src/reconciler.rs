//! Resource reconciler
//!
//! Dispatches each resource to the handler for its kind and turns the
//! outcome into events. Unresolvable resources are skipped quietly; other
//! errors are reported and returned.

use crate::error::{ActuationError, Result};
use crate::handler::{ReconcileContext, ReconcileReport, ResourceHandler};
use crate::launcher::Task;
use dashmap::DashSet;
use futures::future::join_all;
use keel_types::{
    DeliveryConfig, EventSource, KeelEvent, KeelEventEnvelope, Resource, ResourceId,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

/// Outcome of checking one resource
#[derive(Debug)]
pub struct ResourceCheck {
    pub resource_id: ResourceId,
    pub result: Result<ReconcileReport>,
}

pub struct ResourceReconciler {
    handlers: HashMap<String, Arc<dyn ResourceHandler>>,
    paused: DashSet<ResourceId>,
    event_tx: broadcast::Sender<KeelEventEnvelope>,
}

impl ResourceReconciler {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(4096);
        Self {
            handlers: HashMap::new(),
            paused: DashSet::new(),
            event_tx,
        }
    }

    /// Register a handler for its kind, replacing any earlier one
    pub fn with_handler(mut self, handler: Arc<dyn ResourceHandler>) -> Self {
        self.handlers
            .insert(handler.supported_kind().to_string(), handler);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KeelEventEnvelope> {
        self.event_tx.subscribe()
    }

    /// Stop actuating a resource until it is resumed
    pub fn pause(&self, resource_id: &ResourceId) {
        if self.paused.insert(resource_id.clone()) {
            info!(resource_id = %resource_id, "Actuation paused");
            self.emit(KeelEvent::ResourceActuationPaused {
                resource_id: resource_id.clone(),
            });
        }
    }

    pub fn resume(&self, resource_id: &ResourceId) {
        if self.paused.remove(resource_id).is_some() {
            info!(resource_id = %resource_id, "Actuation resumed");
            self.emit(KeelEvent::ResourceActuationResumed {
                resource_id: resource_id.clone(),
            });
        }
    }

    pub fn is_paused(&self, resource_id: &ResourceId) -> bool {
        self.paused.contains(resource_id)
    }

    fn handler(&self, resource: &Resource) -> Result<&Arc<dyn ResourceHandler>> {
        self.handlers
            .get(&resource.kind)
            .ok_or_else(|| ActuationError::UnsupportedKind(resource.kind.clone()))
    }

    /// Check one resource of an environment
    #[instrument(skip(self, delivery_config, resource), fields(delivery_config = %delivery_config.name, resource_id = %resource.id()))]
    pub async fn check(
        &self,
        delivery_config: Arc<DeliveryConfig>,
        environment: &str,
        resource: &Resource,
    ) -> Result<ReconcileReport> {
        let resource_id = resource.id().clone();

        if self.is_paused(&resource_id) {
            debug!("Actuation paused, skipping");
            self.emit(KeelEvent::ResourceCheckSkipped {
                resource_id,
                reason: "actuation paused".to_string(),
            });
            return Ok(ReconcileReport::default());
        }

        let handler = match self.handler(resource) {
            Ok(handler) => handler,
            Err(e) => {
                self.emit(KeelEvent::ResourceCheckError {
                    resource_id,
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        let ctx = ReconcileContext::new(delivery_config, environment);
        match handler.reconcile(resource, &ctx).await {
            Ok(report) => {
                self.emit_report(&resource_id, &report);
                Ok(report)
            }
            Err(ActuationError::CurrentlyUnresolvable { reason, .. }) => {
                debug!(%reason, "Resource currently unresolvable");
                self.emit(KeelEvent::ResourceCheckUnresolvable {
                    resource_id,
                    reason,
                });
                Ok(ReconcileReport::default())
            }
            Err(e) => {
                error!(error = %e, "Resource check failed");
                self.emit(KeelEvent::ResourceCheckError {
                    resource_id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Check every resource of an environment; one failing resource does
    /// not stop the others
    pub async fn check_environment(
        &self,
        delivery_config: Arc<DeliveryConfig>,
        environment: &str,
    ) -> Vec<ResourceCheck> {
        let Some(env) = delivery_config.environment(environment) else {
            warn!(
                delivery_config = %delivery_config.name,
                environment,
                "Unknown environment"
            );
            return Vec::new();
        };

        join_all(env.resources.iter().map(|resource| {
            let delivery_config = delivery_config.clone();
            async move {
                ResourceCheck {
                    resource_id: resource.id().clone(),
                    result: self.check(delivery_config, environment, resource).await,
                }
            }
        }))
        .await
    }

    /// Tear a resource down
    #[instrument(skip(self, resource), fields(resource_id = %resource.id()))]
    pub async fn delete(&self, resource: &Resource) -> Result<Vec<Task>> {
        let tasks = self.handler(resource)?.delete(resource).await?;
        self.emit(KeelEvent::ResourceDeleted {
            resource_id: resource.id().clone(),
            tasks: tasks.iter().map(|t| t.id.clone()).collect(),
        });
        Ok(tasks)
    }

    fn emit_report(&self, resource_id: &ResourceId, report: &ReconcileReport) {
        if report.is_missing() {
            self.emit(KeelEvent::ResourceMissing {
                resource_id: resource_id.clone(),
            });
        }

        let affected = report.affected();
        if !affected.is_empty() {
            self.emit(KeelEvent::ResourceDeltaDetected {
                resource_id: resource_id.clone(),
                affected: affected.into_iter().collect(),
            });
        }

        if !report.tasks.is_empty() {
            self.emit(KeelEvent::ResourceActuationLaunched {
                resource_id: resource_id.clone(),
                tasks: report.tasks.iter().map(|t| t.id.clone()).collect(),
            });
        } else if report.is_valid() {
            self.emit(KeelEvent::ResourceValid {
                resource_id: resource_id.clone(),
            });
        } else if !report.in_progress().is_empty() {
            self.emit(KeelEvent::ResourceCheckSkipped {
                resource_id: resource_id.clone(),
                reason: format!("actuation in progress in {}", report.in_progress().join(", ")),
            });
        }
    }

    fn emit(&self, event: KeelEvent) {
        let envelope = KeelEventEnvelope::new(event, EventSource::Reconciler);
        let _ = self.event_tx.send(envelope);
    }
}

impl Default for ResourceReconciler {
    fn default() -> Self {
        Self::new()
    }
}
