//! Collaborators at the edge of the engine
//!
//! The orchestrator that runs convergence jobs and the cloud read API that
//! reports what is actually deployed.

use crate::error::Result;
use async_trait::async_trait;
use keel_types::{ActiveServerGroup, Moniker, ResourceId, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// One orchestrator stage, e.g. `{"type": "createServerGroup", ...}`
pub type Stage = Map<String, Value>;

/// A convergence job for the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub resource_id: ResourceId,
    pub application: String,
    pub service_account: String,
    pub description: String,
    /// Detects duplicate in-flight work, e.g. `{resource_id}:{region}`
    pub correlation_id: String,
    pub stages: Vec<Stage>,
    pub timeout: Duration,
}

/// Handle of a submitted job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
}

/// Submits convergence jobs to the orchestrator
#[async_trait]
pub trait TaskLauncher: Send + Sync {
    /// Submit a job; the orchestrator runs it asynchronously
    async fn submit_job(&self, request: JobRequest) -> Result<Task>;

    /// Running executions started with this correlation id
    async fn correlated_executions(&self, correlation_id: &str) -> Result<Vec<TaskId>>;
}

/// Reads deployed server groups
#[async_trait]
pub trait CurrentStateProvider: Send + Sync {
    /// Active server group per region; regions with nothing deployed are absent
    async fn current_state(
        &self,
        account: &str,
        moniker: &Moniker,
        regions: &BTreeSet<String>,
        service_account: &str,
    ) -> Result<BTreeMap<String, ActiveServerGroup>>;
}
