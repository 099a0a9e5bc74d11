//! Resource handler trait
//!
//! One handler per resource kind. A handler resolves the desired state,
//! reads the current state, and submits jobs for whatever differs. It never
//! waits for those jobs to finish.

use crate::error::Result;
use crate::launcher::Task;
use async_trait::async_trait;
use keel_types::{DeliveryConfig, Environment, Resource};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Where a resource is being checked
#[derive(Debug, Clone)]
pub struct ReconcileContext {
    pub delivery_config: Arc<DeliveryConfig>,
    pub environment_name: String,
}

impl ReconcileContext {
    pub fn new(delivery_config: Arc<DeliveryConfig>, environment_name: impl Into<String>) -> Self {
        Self {
            delivery_config,
            environment_name: environment_name.into(),
        }
    }

    pub fn environment(&self) -> Option<&Environment> {
        self.delivery_config.environment(&self.environment_name)
    }
}

/// What a check found in one region
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionOutcome {
    /// Earlier work is still running; left alone this cycle
    InProgress,
    Missing,
    /// Differs from desired state in these top-level fields
    Delta(BTreeSet<String>),
    Valid,
    /// Could not be read or converged this cycle
    Failed(String),
}

impl RegionOutcome {
    pub fn needs_actuation(&self) -> bool {
        matches!(self, Self::Missing | Self::Delta(_))
    }
}

/// Result of checking one resource
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub regions: BTreeMap<String, RegionOutcome>,
    pub tasks: Vec<Task>,
}

impl ReconcileReport {
    /// Every region matches its desired state
    pub fn is_valid(&self) -> bool {
        !self.regions.is_empty() && self.regions.values().all(|o| *o == RegionOutcome::Valid)
    }

    pub fn is_missing(&self) -> bool {
        self.regions.values().any(|o| *o == RegionOutcome::Missing)
    }

    /// Union of fields differing in any region
    pub fn affected(&self) -> BTreeSet<String> {
        self.regions
            .values()
            .filter_map(|outcome| match outcome {
                RegionOutcome::Delta(fields) => Some(fields.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn in_progress(&self) -> Vec<&str> {
        self.regions
            .iter()
            .filter(|(_, o)| **o == RegionOutcome::InProgress)
            .map(|(region, _)| region.as_str())
            .collect()
    }
}

/// Converges one kind of resource
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Resource kind this handler manages, e.g. `ec2/cluster@v1`
    fn supported_kind(&self) -> &str;

    /// Compare desired and current state and submit jobs for the difference
    async fn reconcile(&self, resource: &Resource, ctx: &ReconcileContext) -> Result<ReconcileReport>;

    /// Submit jobs tearing the resource down
    async fn delete(&self, resource: &Resource) -> Result<Vec<Task>>;
}
