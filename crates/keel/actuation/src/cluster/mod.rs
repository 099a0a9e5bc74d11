//! Cluster resource handler
//!
//! Converges an `ec2/cluster@v1` resource: one server group per region.
//!
//! ## Check Cycle
//!
//! 1. Resolve the desired server groups; the artifact version is the
//!    environment's CURRENT version, or the deployed one when the spec
//!    names no artifact
//! 2. Leave regions with in-flight work alone
//! 3. Read current state per region, concurrently
//! 4. Diff, then resize (capacity-only change) or deploy a new server group
//! 5. Submit one job per region; staggered regions are chained in order

pub mod export;
pub mod jobs;
pub mod resolve;

use crate::error::{ActuationError, Result};
use crate::handler::{ReconcileContext, ReconcileReport, RegionOutcome, ResourceHandler};
use crate::launcher::{CurrentStateProvider, JobRequest, Stage, Task, TaskLauncher};
use async_trait::async_trait;
use futures::future::join_all;
use keel_registry::ArtifactRepository;
use keel_types::{
    ActiveServerGroup, ClusterSpec, Moniker, Resource, ResourceDiff, ResourceId, TaskId,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Resource kind handled by [`ClusterHandler`]
pub const CLUSTER_KIND: &str = "ec2/cluster@v1";

/// Correlation id of convergence work in one region
pub fn correlation_id(resource_id: &ResourceId, region: &str) -> String {
    format!("{}:{}", resource_id, region)
}

/// Correlation id of teardown work
pub fn delete_correlation_id(resource_id: &ResourceId) -> String {
    format!("{}:delete", resource_id)
}

#[derive(Debug, Clone)]
pub struct ClusterHandlerConfig {
    /// Timeout attached to every submitted job
    pub job_timeout: Duration,
}

impl Default for ClusterHandlerConfig {
    fn default() -> Self {
        Self {
            job_timeout: Duration::from_secs(30 * 60),
        }
    }
}

pub struct ClusterHandler {
    current_state: Arc<dyn CurrentStateProvider>,
    launcher: Arc<dyn TaskLauncher>,
    artifacts: Arc<dyn ArtifactRepository>,
    config: ClusterHandlerConfig,
}

impl ClusterHandler {
    pub fn new(
        current_state: Arc<dyn CurrentStateProvider>,
        launcher: Arc<dyn TaskLauncher>,
        artifacts: Arc<dyn ArtifactRepository>,
    ) -> Self {
        Self {
            current_state,
            launcher,
            artifacts,
            config: ClusterHandlerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ClusterHandlerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build a spec from the server groups deployed in `regions`
    #[instrument(skip(self, regions), fields(cluster = %moniker))]
    pub async fn export(
        &self,
        account: &str,
        moniker: &Moniker,
        regions: &BTreeSet<String>,
        service_account: &str,
    ) -> Result<ClusterSpec> {
        let current = self
            .current_state
            .current_state(account, moniker, regions, service_account)
            .await?;

        export::export_spec(account, moniker, &current).ok_or_else(|| {
            ActuationError::CurrentState(format!(
                "No server groups for {} in account {}",
                moniker, account
            ))
        })
    }

    fn spec(&self, resource: &Resource) -> Result<ClusterSpec> {
        resource
            .spec_as::<ClusterSpec>()
            .map_err(|e| ActuationError::InvalidSpec {
                resource: resource.id().clone(),
                reason: e.to_string(),
            })
    }

    /// CURRENT version of the spec's artifact in the environment
    async fn desired_version(
        &self,
        resource: &Resource,
        spec: &ClusterSpec,
        ctx: &ReconcileContext,
    ) -> Result<Option<String>> {
        let Some(reference) = &spec.artifact_reference else {
            return Ok(None);
        };

        let versions = self
            .artifacts
            .artifact_versions(&ctx.delivery_config.name, &ctx.environment_name, reference)
            .await?;

        match versions.value.current() {
            Some(version) => Ok(Some(version.to_string())),
            None => Err(ActuationError::CurrentlyUnresolvable {
                resource: resource.id().clone(),
                reason: format!(
                    "no version of {} is current in {}",
                    reference, ctx.environment_name
                ),
            }),
        }
    }

    fn request(
        &self,
        resource: &Resource,
        correlation_id: String,
        description: String,
        stages: Vec<Stage>,
    ) -> JobRequest {
        JobRequest {
            resource_id: resource.id().clone(),
            application: resource.metadata.application.clone(),
            service_account: resource.metadata.service_account.clone(),
            description,
            correlation_id,
            stages,
            timeout: self.config.job_timeout,
        }
    }

    fn region_request(&self, resource: &Resource, region: &str, stages: Vec<Stage>) -> JobRequest {
        self.request(
            resource,
            correlation_id(resource.id(), region),
            format!("Converge {} in {}", resource.id(), region),
            stages,
        )
    }

    /// Submit the per-region jobs: staggered regions one after another, the
    /// rest in parallel after the last staggered one
    async fn submit(
        &self,
        resource: &Resource,
        spec: &ClusterSpec,
        mut pending: BTreeMap<String, Stage>,
        report: &mut ReconcileReport,
    ) {
        let mut previous: Option<TaskId> = None;

        for step in spec.deploy_with.stagger() {
            let Some(stage) = pending.remove(&step.region) else {
                continue;
            };

            let submitted = match jobs::staggered(stage, previous.as_ref(), step) {
                Ok(stages) => self
                    .launcher
                    .submit_job(self.region_request(resource, &step.region, stages))
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            match submitted {
                Ok(task) => {
                    previous = Some(task.id.clone());
                    report.tasks.push(task);
                }
                Err(reason) => {
                    // later steps depend on this one
                    warn!(
                        resource_id = %resource.id(),
                        region = %step.region,
                        error = %reason,
                        "Staggered deploy stopped"
                    );
                    report
                        .regions
                        .insert(step.region.clone(), RegionOutcome::Failed(reason));
                    return;
                }
            }
        }

        let previous = previous.as_ref();
        let submitted = join_all(pending.into_iter().map(|(region, stage)| async move {
            let stages = jobs::after(previous, stage);
            let result = self
                .launcher
                .submit_job(self.region_request(resource, &region, stages))
                .await;
            (region, result)
        }))
        .await;

        for (region, result) in submitted {
            match result {
                Ok(task) => report.tasks.push(task),
                Err(e) => {
                    warn!(resource_id = %resource.id(), region = %region, error = %e, "Job submission failed");
                    report
                        .regions
                        .insert(region, RegionOutcome::Failed(e.to_string()));
                }
            }
        }
    }
}

#[async_trait]
impl ResourceHandler for ClusterHandler {
    fn supported_kind(&self) -> &str {
        CLUSTER_KIND
    }

    #[instrument(skip(self, resource, ctx), fields(resource_id = %resource.id(), environment = %ctx.environment_name))]
    async fn reconcile(&self, resource: &Resource, ctx: &ReconcileContext) -> Result<ReconcileReport> {
        let spec = self.spec(resource)?;
        let version = self.desired_version(resource, &spec, ctx).await?;
        let desired = resolve::desired_server_groups(resource.id(), &spec, version.as_deref())?;
        let mut report = ReconcileReport::default();

        let in_flight = join_all(desired.keys().map(|region| async move {
            let executions = self
                .launcher
                .correlated_executions(&correlation_id(resource.id(), region))
                .await;
            (region.clone(), executions)
        }))
        .await;

        let mut candidates = Vec::new();
        for (region, executions) in in_flight {
            match executions {
                Ok(tasks) if !tasks.is_empty() => {
                    debug!(region = %region, tasks = tasks.len(), "Actuation in progress, skipping region");
                    report.regions.insert(region, RegionOutcome::InProgress);
                }
                Ok(_) => candidates.push(region),
                Err(e) => {
                    warn!(region = %region, error = %e, "Could not look up running executions");
                    report
                        .regions
                        .insert(region, RegionOutcome::Failed(e.to_string()));
                }
            }
        }

        let spec_ref = &spec;
        let current = join_all(candidates.into_iter().map(|region| async move {
            let regions = BTreeSet::from([region.clone()]);
            let result = self
                .current_state
                .current_state(
                    &spec_ref.locations.account,
                    &spec_ref.moniker,
                    &regions,
                    &resource.metadata.service_account,
                )
                .await
                .map(|mut state| state.remove(&region));
            (region, result)
        }))
        .await;

        let mut pending: BTreeMap<String, Stage> = BTreeMap::new();
        for (region, result) in current {
            let current: Option<ActiveServerGroup> = match result {
                Ok(current) => current,
                Err(e) => {
                    warn!(region = %region, error = %e, "Could not read current state");
                    report
                        .regions
                        .insert(region, RegionOutcome::Failed(e.to_string()));
                    continue;
                }
            };
            let Some(mut desired) = desired.get(&region).cloned() else {
                continue;
            };
            if version.is_none() {
                // artifact not managed here: keep whatever is deployed
                if let Some(active) = &current {
                    desired.launch.artifact_version =
                        active.server_group.launch.artifact_version.clone();
                }
            }

            let diff = ResourceDiff::new(
                desired.clone(),
                current.as_ref().map(|c| c.server_group.clone()),
            );
            if !diff.has_changes() {
                report.regions.insert(region, RegionOutcome::Valid);
                continue;
            }

            let stage = match &current {
                None => {
                    report.regions.insert(region.clone(), RegionOutcome::Missing);
                    jobs::create_server_group(resource.id(), &desired, None, &spec.deploy_with)
                }
                Some(active) => {
                    let affected = diff.affected_root_properties();
                    let capacity_only = affected.len() == 1 && affected.contains("capacity");
                    report
                        .regions
                        .insert(region.clone(), RegionOutcome::Delta(affected));
                    if capacity_only {
                        jobs::resize_server_group(&desired, active)
                    } else {
                        jobs::create_server_group(resource.id(), &desired, Some(active), &spec.deploy_with)
                    }
                }
            };
            pending.insert(region, stage);
        }

        if !pending.is_empty() {
            self.submit(resource, &spec, pending, &mut report).await;
            info!(tasks = report.tasks.len(), "Convergence jobs submitted");
        }

        Ok(report)
    }

    #[instrument(skip(self, resource), fields(resource_id = %resource.id()))]
    async fn delete(&self, resource: &Resource) -> Result<Vec<Task>> {
        let spec = self.spec(resource)?;
        let current = self
            .current_state
            .current_state(
                &spec.locations.account,
                &spec.moniker,
                &spec.locations.regions,
                &resource.metadata.service_account,
            )
            .await?;

        if current.is_empty() {
            debug!("Nothing deployed, nothing to delete");
            return Ok(Vec::new());
        }

        let stages = jobs::parallel(current.values().map(jobs::destroy_server_group).collect());
        let request = self.request(
            resource,
            delete_correlation_id(resource.id()),
            format!("Delete {}", resource.id()),
            stages,
        );
        let task = self.launcher.submit_job(request).await?;
        info!(task_id = %task.id, server_groups = current.len(), "Teardown submitted");
        Ok(vec![task])
    }
}
