//! Check loop and scheduler
//!
//! Every tick (or on demand) each stored delivery config is checked: the
//! promotion engine runs first so a version promoted this cycle is deployed
//! in the same cycle, then every environment's resources are reconciled.

use crate::config::SchedulerConfig;
use crate::error::DaemonResult;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use keel_actuation::{PromotionEngine, ResourceReconciler};
use keel_registry::DeliveryConfigRepository;
use keel_types::{DeliveryConfig, EventSource, KeelEvent, KeelEventEnvelope};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;

/// What one check cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub delivery_configs: usize,
    /// Delivery configs with at least one failed promotion or resource check
    pub failures: usize,
}

/// Scheduler state
pub struct Scheduler {
    config: SchedulerConfig,
    delivery_configs: Arc<dyn DeliveryConfigRepository>,
    promotion: Arc<PromotionEngine>,
    reconciler: Arc<ResourceReconciler>,
    event_tx: broadcast::Sender<KeelEventEnvelope>,
    check_tx: mpsc::Sender<()>,
    running: Arc<RwLock<bool>>,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(
        config: SchedulerConfig,
        delivery_configs: Arc<dyn DeliveryConfigRepository>,
        promotion: Arc<PromotionEngine>,
        reconciler: Arc<ResourceReconciler>,
    ) -> (Arc<Self>, mpsc::Receiver<()>) {
        let (check_tx, check_rx) = mpsc::channel(10);
        let (event_tx, _) = broadcast::channel(4096);

        let scheduler = Arc::new(Self {
            config,
            delivery_configs,
            promotion,
            reconciler,
            event_tx,
            check_tx,
            running: Arc::new(RwLock::new(false)),
        });

        (scheduler, check_rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KeelEventEnvelope> {
        self.event_tx.subscribe()
    }

    /// Trigger an immediate check cycle
    pub async fn trigger_check(&self) {
        let _ = self.check_tx.send(()).await;
    }

    /// Run check cycles until stopped
    pub async fn start(self: Arc<Self>, mut check_rx: mpsc::Receiver<()>) {
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        tracing::info!(
            interval_secs = self.config.check_interval().as_secs(),
            "Scheduler started"
        );

        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = interval(scheduler.config.check_interval());

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = scheduler.run_cycle().await {
                            tracing::error!(error = %e, "Check cycle failed");
                        }
                    }
                    Some(_) = check_rx.recv() => {
                        if let Err(e) = scheduler.run_cycle().await {
                            tracing::error!(error = %e, "Triggered check cycle failed");
                        }
                    }
                    else => break,
                }

                let running = scheduler.running.read().await;
                if !*running {
                    break;
                }
            }
        });

        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Check loop panicked");
        }

        tracing::info!("Scheduler stopped");
    }

    /// Stop after the current cycle
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Check every stored delivery config once
    pub async fn run_cycle(&self) -> DaemonResult<CycleSummary> {
        let configs = self.delivery_configs.list().await?;
        let total = configs.len();

        let results: Vec<bool> = stream::iter(configs)
            .map(|config| self.check_delivery_config(Arc::new(config)))
            .buffer_unordered(self.config.max_concurrent_reconciliations.max(1))
            .collect()
            .await;

        let summary = CycleSummary {
            delivery_configs: total,
            failures: results.iter().filter(|ok| !**ok).count(),
        };

        tracing::debug!(
            delivery_configs = summary.delivery_configs,
            failures = summary.failures,
            "Check cycle completed"
        );
        self.emit_event(KeelEvent::CheckCycleCompleted {
            delivery_configs: summary.delivery_configs,
            failures: summary.failures,
        });

        Ok(summary)
    }

    /// Promote, then reconcile; false if anything failed
    async fn check_delivery_config(&self, config: Arc<DeliveryConfig>) -> bool {
        let mut ok = true;

        if self.config.promotion_enabled {
            if let Err(e) = self.promotion.check_environments(config.clone(), Utc::now()).await {
                tracing::error!(
                    delivery_config = %config.name,
                    error = %e,
                    "Promotion check failed"
                );
                ok = false;
            }
        }

        if self.config.actuation_enabled {
            for environment in &config.environments {
                let checks = self
                    .reconciler
                    .check_environment(config.clone(), &environment.name)
                    .await;
                for check in checks.iter().filter(|c| c.result.is_err()) {
                    tracing::warn!(
                        delivery_config = %config.name,
                        environment = %environment.name,
                        resource_id = %check.resource_id,
                        "Resource check failed"
                    );
                    ok = false;
                }
            }
        }

        ok
    }

    fn emit_event(&self, event: KeelEvent) {
        let envelope = KeelEventEnvelope::new(event, EventSource::Scheduler).with_actor("scheduler");
        let _ = self.event_tx.send(envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_actuation::{
        ClusterHandler, InMemoryCurrentStateProvider, RecordingTaskLauncher, CLUSTER_KIND,
    };
    use keel_constraints::{ConstraintRunner, InMemoryExecutionTrigger};
    use keel_registry::{
        ArtifactRepository, InMemoryArtifactRepository, InMemoryConstraintStateRepository,
        InMemoryDeliveryConfigRepository,
    };
    use keel_types::{
        ArtifactType, DeliveryArtifact, Environment, Resource, ResourceId, ResourceMetadata,
        VersioningStrategy,
    };
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        scheduler: Arc<Scheduler>,
        check_rx: mpsc::Receiver<()>,
        configs: Arc<InMemoryDeliveryConfigRepository>,
        artifacts: Arc<InMemoryArtifactRepository>,
        launcher: Arc<RecordingTaskLauncher>,
    }

    fn fixture(config: SchedulerConfig) -> Fixture {
        let configs = Arc::new(InMemoryDeliveryConfigRepository::new());
        let artifacts = Arc::new(InMemoryArtifactRepository::new());
        let states = Arc::new(InMemoryConstraintStateRepository::new());
        let launcher = Arc::new(RecordingTaskLauncher::new());
        let runner = Arc::new(ConstraintRunner::standard(
            states,
            artifacts.clone(),
            Arc::new(InMemoryExecutionTrigger::new()),
        ));
        let handler = ClusterHandler::new(
            Arc::new(InMemoryCurrentStateProvider::new()),
            launcher.clone(),
            artifacts.clone(),
        );

        let (scheduler, check_rx) = Scheduler::new(
            config,
            configs.clone(),
            Arc::new(PromotionEngine::new(artifacts.clone(), runner)),
            Arc::new(ResourceReconciler::new().with_handler(Arc::new(handler))),
        );

        Fixture {
            scheduler,
            check_rx,
            configs,
            artifacts,
            launcher,
        }
    }

    fn artifact() -> DeliveryArtifact {
        DeliveryArtifact::new("fnord", ArtifactType::Docker, VersioningStrategy::SemverTag)
    }

    fn delivery_config(name: &str, kind: &str) -> DeliveryConfig {
        DeliveryConfig {
            name: name.to_string(),
            application: "fnord".to_string(),
            service_account: "keel@example.com".to_string(),
            artifacts: vec![artifact()],
            environments: vec![Environment::new("test").with_resource(Resource {
                api_version: "ec2.keel/v1".to_string(),
                kind: kind.to_string(),
                metadata: ResourceMetadata {
                    id: ResourceId::new(format!("ec2:cluster:test:{}", name)),
                    application: "fnord".to_string(),
                    service_account: "keel@example.com".to_string(),
                },
                spec: json!({
                    "moniker": {"app": "fnord", "stack": name},
                    "locations": {"account": "test", "regions": ["us-east-1"]},
                    "artifact_reference": "fnord",
                    "defaults": {"instance_type": "m5.large"}
                }),
            })],
        }
    }

    #[tokio::test]
    async fn test_cycle_promotes_then_deploys() {
        let f = fixture(SchedulerConfig::default());
        f.configs
            .put(delivery_config("fnord-manifest", CLUSTER_KIND))
            .await
            .unwrap();
        f.artifacts.store_version(&artifact(), "v1.0.0").await.unwrap();
        let mut events = f.scheduler.subscribe();

        let summary = f.scheduler.run_cycle().await.unwrap();

        assert_eq!(summary, CycleSummary { delivery_configs: 1, failures: 0 });
        let jobs = f.launcher.submitted().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].stages[0]["artifactVersion"], "v1.0.0");
        assert!(matches!(
            events.try_recv().unwrap().event,
            KeelEvent::CheckCycleCompleted { delivery_configs: 1, failures: 0 }
        ));
    }

    #[tokio::test]
    async fn test_failing_config_does_not_stop_others() {
        let f = fixture(SchedulerConfig::default());
        f.configs
            .put(delivery_config("fnord-manifest", CLUSTER_KIND))
            .await
            .unwrap();
        f.configs
            .put(delivery_config("other-manifest", "ec2/unknown@v1"))
            .await
            .unwrap();
        f.artifacts.store_version(&artifact(), "v1.0.0").await.unwrap();

        let summary = f.scheduler.run_cycle().await.unwrap();

        assert_eq!(summary, CycleSummary { delivery_configs: 2, failures: 1 });
        assert_eq!(f.launcher.submitted().await.len(), 1);
    }

    #[tokio::test]
    async fn test_actuation_can_be_disabled() {
        let f = fixture(SchedulerConfig {
            actuation_enabled: false,
            ..Default::default()
        });
        f.configs
            .put(delivery_config("fnord-manifest", CLUSTER_KIND))
            .await
            .unwrap();
        f.artifacts.store_version(&artifact(), "v1.0.0").await.unwrap();

        f.scheduler.run_cycle().await.unwrap();

        assert!(f.launcher.submitted().await.is_empty());
        let versions = f
            .artifacts
            .artifact_versions("fnord-manifest", "test", "fnord")
            .await
            .unwrap();
        assert_eq!(versions.value.current(), Some("v1.0.0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop() {
        let f = fixture(SchedulerConfig {
            check_interval_secs: 60,
            ..Default::default()
        });
        let scheduler = f.scheduler.clone();
        let handle = tokio::spawn(scheduler.clone().start(f.check_rx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(scheduler.is_running().await);

        scheduler.stop().await;
        scheduler.trigger_check().await;
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!scheduler.is_running().await);
    }
}
