//! In-memory collaborators
//!
//! Used by tests and by the daemon's dry-run mode: jobs are logged and
//! recorded instead of being sent to an orchestrator.

use crate::error::{ActuationError, Result};
use crate::launcher::{CurrentStateProvider, JobRequest, Task, TaskLauncher};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use keel_types::{ActiveServerGroup, Moniker, TaskId};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

/// Submitted jobs kept for inspection unless configured otherwise
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Current state keyed by (account, cluster name, region)
pub struct InMemoryCurrentStateProvider {
    server_groups: DashMap<(String, String, String), ActiveServerGroup>,
    failing_regions: DashSet<String>,
}

impl InMemoryCurrentStateProvider {
    pub fn new() -> Self {
        Self {
            server_groups: DashMap::new(),
            failing_regions: DashSet::new(),
        }
    }

    /// Record a deployed server group at its own location
    pub fn put(&self, active: ActiveServerGroup) {
        let group = &active.server_group;
        let key = (
            group.location.account.clone(),
            group.moniker.cluster_name(),
            group.location.region.clone(),
        );
        self.server_groups.insert(key, active);
    }

    pub fn remove(&self, account: &str, moniker: &Moniker, region: &str) -> bool {
        self.server_groups
            .remove(&(account.to_string(), moniker.cluster_name(), region.to_string()))
            .is_some()
    }

    /// Make reads touching `region` fail
    pub fn fail_region(&self, region: impl Into<String>) {
        self.failing_regions.insert(region.into());
    }

    pub fn heal_region(&self, region: &str) {
        self.failing_regions.remove(region);
    }
}

impl Default for InMemoryCurrentStateProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CurrentStateProvider for InMemoryCurrentStateProvider {
    async fn current_state(
        &self,
        account: &str,
        moniker: &Moniker,
        regions: &BTreeSet<String>,
        _service_account: &str,
    ) -> Result<BTreeMap<String, ActiveServerGroup>> {
        if let Some(region) = regions.iter().find(|r| self.failing_regions.contains(*r)) {
            return Err(ActuationError::CurrentState(format!(
                "{} unavailable in {}",
                moniker, region
            )));
        }

        let cluster = moniker.cluster_name();
        Ok(regions
            .iter()
            .filter_map(|region| {
                self.server_groups
                    .get(&(account.to_string(), cluster.clone(), region.clone()))
                    .map(|active| (region.clone(), active.clone()))
            })
            .collect())
    }
}

/// Launcher that records and logs every job it receives
///
/// Submitted jobs stay in flight for their correlation id until
/// [`RecordingTaskLauncher::complete`] is called, or until the configured
/// execution time has passed. Only the latest `history_limit` jobs are kept.
pub struct RecordingTaskLauncher {
    submitted: RwLock<VecDeque<(Task, JobRequest)>>,
    in_flight: DashMap<String, Vec<(TaskId, Instant)>>,
    execution_time: Option<Duration>,
    history_limit: usize,
    sequence: AtomicU64,
}

impl RecordingTaskLauncher {
    pub fn new() -> Self {
        Self {
            submitted: RwLock::new(VecDeque::new()),
            in_flight: DashMap::new(),
            execution_time: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            sequence: AtomicU64::new(0),
        }
    }

    /// Executions finish on their own `execution_time` after submission
    pub fn with_execution_time(mut self, execution_time: Duration) -> Self {
        self.execution_time = Some(execution_time);
        self
    }

    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit.max(1);
        self
    }

    /// Recorded jobs, oldest first
    pub async fn submitted(&self) -> Vec<JobRequest> {
        self.submitted
            .read()
            .await
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    /// Task handed out for a correlation id, latest first
    pub async fn task_for(&self, correlation_id: &str) -> Option<Task> {
        self.submitted
            .read()
            .await
            .iter()
            .rev()
            .find(|(_, request)| request.correlation_id == correlation_id)
            .map(|(task, _)| task.clone())
    }

    /// Finish every execution started under `correlation_id`
    pub fn complete(&self, correlation_id: &str) {
        self.in_flight.remove(correlation_id);
    }

    pub fn complete_all(&self) {
        self.in_flight.clear();
    }
}

impl Default for RecordingTaskLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskLauncher for RecordingTaskLauncher {
    async fn submit_job(&self, request: JobRequest) -> Result<Task> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let task = Task {
            id: TaskId::new(format!("{:08}", sequence)),
            name: request.description.clone(),
        };

        info!(
            resource_id = %request.resource_id,
            correlation_id = %request.correlation_id,
            task_id = %task.id,
            stages = request.stages.len(),
            timeout_secs = request.timeout.as_secs(),
            "Job submitted"
        );

        self.in_flight
            .entry(request.correlation_id.clone())
            .or_default()
            .push((task.id.clone(), Instant::now()));

        let mut submitted = self.submitted.write().await;
        submitted.push_back((task.clone(), request));
        while submitted.len() > self.history_limit {
            submitted.pop_front();
        }
        Ok(task)
    }

    async fn correlated_executions(&self, correlation_id: &str) -> Result<Vec<TaskId>> {
        if let Some(execution_time) = self.execution_time {
            if let Some(mut tasks) = self.in_flight.get_mut(correlation_id) {
                tasks.retain(|(task_id, started)| {
                    let running = started.elapsed() < execution_time;
                    if !running {
                        debug!(%correlation_id, task_id = %task_id, "Dry-run execution finished");
                    }
                    running
                });
            }
            self.in_flight
                .remove_if(correlation_id, |_, tasks| tasks.is_empty());
        }

        Ok(self
            .in_flight
            .get(correlation_id)
            .map(|tasks| tasks.iter().map(|(task_id, _)| task_id.clone()).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_types::{Capacity, Dependencies, LaunchConfig, Location, ResourceId, ServerGroup};
    use std::time::Duration;

    fn active(region: &str) -> ActiveServerGroup {
        ActiveServerGroup {
            name: "fnord-main-v001".to_string(),
            server_group: ServerGroup {
                moniker: Moniker::new("fnord").with_stack("main"),
                location: Location {
                    account: "prod".to_string(),
                    region: region.to_string(),
                },
                capacity: Capacity::default(),
                launch: LaunchConfig {
                    instance_type: "m5.large".to_string(),
                    artifact_version: None,
                },
                dependencies: Dependencies::default(),
                tags: BTreeMap::new(),
            },
        }
    }

    fn request(correlation_id: &str) -> JobRequest {
        JobRequest {
            resource_id: ResourceId::new("ec2:cluster:prod:fnord-main"),
            application: "fnord".to_string(),
            service_account: "keel@example.com".to_string(),
            description: "Deploy fnord".to_string(),
            correlation_id: correlation_id.to_string(),
            stages: Vec::new(),
            timeout: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn test_current_state_omits_missing_regions() {
        let provider = InMemoryCurrentStateProvider::new();
        provider.put(active("us-east-1"));

        let regions = BTreeSet::from(["us-east-1".to_string(), "us-west-2".to_string()]);
        let moniker = Moniker::new("fnord").with_stack("main");
        let state = provider
            .current_state("prod", &moniker, &regions, "keel")
            .await
            .unwrap();

        assert_eq!(state.len(), 1);
        assert!(state.contains_key("us-east-1"));
    }

    #[tokio::test]
    async fn test_failing_region() {
        let provider = InMemoryCurrentStateProvider::new();
        provider.fail_region("us-west-2");

        let moniker = Moniker::new("fnord");
        let regions = BTreeSet::from(["us-west-2".to_string()]);
        assert!(provider
            .current_state("prod", &moniker, &regions, "keel")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_jobs_stay_in_flight_until_completed() {
        let launcher = RecordingTaskLauncher::new();
        let task = launcher.submit_job(request("fnord:us-east-1")).await.unwrap();

        assert_eq!(
            launcher.correlated_executions("fnord:us-east-1").await.unwrap(),
            vec![task.id.clone()]
        );
        assert_eq!(launcher.task_for("fnord:us-east-1").await, Some(task));

        launcher.complete("fnord:us-east-1");
        assert!(launcher
            .correlated_executions("fnord:us-east-1")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(launcher.submitted().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_executions_finish_after_execution_time() {
        let launcher = RecordingTaskLauncher::new().with_execution_time(Duration::from_secs(300));
        launcher.submit_job(request("fnord:us-east-1")).await.unwrap();

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(
            launcher.correlated_executions("fnord:us-east-1").await.unwrap().len(),
            1
        );

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(launcher
            .correlated_executions("fnord:us-east-1")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let launcher = RecordingTaskLauncher::new().with_history_limit(2);
        for region in ["us-east-1", "us-west-2", "eu-west-1"] {
            launcher
                .submit_job(request(&format!("fnord:{}", region)))
                .await
                .unwrap();
        }

        let submitted = launcher.submitted().await;
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0].correlation_id, "fnord:us-west-2");
        assert!(launcher.task_for("fnord:us-east-1").await.is_none());
    }
}
