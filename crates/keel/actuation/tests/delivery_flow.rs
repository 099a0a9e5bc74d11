//! End-to-end: promote a version, then converge the cluster that runs it

use chrono::{Duration as ChronoDuration, Utc};
use keel_actuation::{
    ClusterHandler, InMemoryCurrentStateProvider, PromotionEngine, RecordingTaskLauncher,
    RegionOutcome, ResourceReconciler, CLUSTER_KIND,
};
use keel_constraints::{ConstraintRunner, InMemoryExecutionTrigger};
use keel_registry::{
    ArtifactRepository, ConstraintStateRepository, InMemoryArtifactRepository,
    InMemoryConstraintStateRepository,
};
use keel_types::{
    ActiveServerGroup, ArtifactType, Capacity, ClusterLocations, ClusterSpec, Constraint,
    ConstraintStateKey, ConstraintStatus, ConstraintType, DeliveryArtifact, DeliveryConfig,
    DependsOnConstraint, Environment, ManualJudgementConstraint, Moniker, Resource, ResourceId,
    ResourceMetadata, ServerGroupSpec, VersioningStrategy,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

struct Keel {
    artifacts: Arc<InMemoryArtifactRepository>,
    states: Arc<InMemoryConstraintStateRepository>,
    provider: Arc<InMemoryCurrentStateProvider>,
    launcher: Arc<RecordingTaskLauncher>,
    promotion: PromotionEngine,
    reconciler: ResourceReconciler,
}

fn keel() -> Keel {
    let artifacts = Arc::new(InMemoryArtifactRepository::new());
    let states = Arc::new(InMemoryConstraintStateRepository::new());
    let provider = Arc::new(InMemoryCurrentStateProvider::new());
    let launcher = Arc::new(RecordingTaskLauncher::new());
    let trigger = Arc::new(InMemoryExecutionTrigger::new());

    let runner = Arc::new(ConstraintRunner::standard(
        states.clone(),
        artifacts.clone(),
        trigger,
    ));
    let handler = ClusterHandler::new(provider.clone(), launcher.clone(), artifacts.clone());

    Keel {
        promotion: PromotionEngine::new(artifacts.clone(), runner),
        reconciler: ResourceReconciler::new().with_handler(Arc::new(handler)),
        artifacts,
        states,
        provider,
        launcher,
    }
}

fn artifact() -> DeliveryArtifact {
    DeliveryArtifact::new("fnord", ArtifactType::Deb, VersioningStrategy::Debian)
}

fn cluster_spec(account: &str) -> ClusterSpec {
    ClusterSpec {
        moniker: Moniker::new("fnord").with_stack(account),
        locations: ClusterLocations {
            account: account.to_string(),
            regions: BTreeSet::from(["us-east-1".to_string(), "us-west-2".to_string()]),
        },
        artifact_reference: Some("fnord".to_string()),
        deploy_with: Default::default(),
        defaults: ServerGroupSpec {
            capacity: Some(Capacity::new(1, 5, 2)),
            instance_type: Some("m5.large".to_string()),
            ..Default::default()
        },
        overrides: BTreeMap::new(),
    }
}

fn cluster(env: &str) -> Resource {
    Resource {
        api_version: "ec2.keel/v1".to_string(),
        kind: CLUSTER_KIND.to_string(),
        metadata: ResourceMetadata {
            id: ResourceId::new(format!("ec2:cluster:{}:fnord-{}", env, env)),
            application: "fnord".to_string(),
            service_account: "keel@example.com".to_string(),
        },
        spec: serde_json::to_value(cluster_spec(env)).unwrap(),
    }
}

fn config() -> Arc<DeliveryConfig> {
    let config = DeliveryConfig {
        name: "fnord-manifest".to_string(),
        application: "fnord".to_string(),
        service_account: "keel@example.com".to_string(),
        artifacts: vec![artifact()],
        environments: vec![
            Environment::new("test").with_resource(cluster("test")),
            Environment::new("prod")
                .with_resource(cluster("prod"))
                .with_constraint(Constraint::DependsOn(DependsOnConstraint {
                    environment: "test".to_string(),
                }))
                .with_constraint(Constraint::ManualJudgement(ManualJudgementConstraint {
                    timeout: Duration::from_secs(7 * 24 * 60 * 60),
                })),
        ],
    };
    config.validate().unwrap();
    Arc::new(config)
}

#[tokio::test]
async fn test_version_flows_from_publish_to_jobs() {
    let keel = keel();
    let config = config();
    keel.artifacts
        .store_version(&artifact(), "fnord-1.0.0")
        .await
        .unwrap();

    // nothing is current yet, so prod's cluster cannot be resolved
    let prod_cluster = cluster("prod");
    let report = keel
        .reconciler
        .check(config.clone(), "prod", &prod_cluster)
        .await
        .unwrap();
    assert!(report.tasks.is_empty());

    keel.promotion
        .check_environments(config.clone(), Utc::now())
        .await
        .unwrap();
    keel.promotion
        .check_environments(config.clone(), Utc::now())
        .await
        .unwrap();

    let test = keel
        .artifacts
        .artifact_versions("fnord-manifest", "test", "fnord")
        .await
        .unwrap()
        .value;
    assert_eq!(test.current(), Some("fnord-1.0.0"));

    // prod waits for a human
    let prod = keel
        .artifacts
        .artifact_versions("fnord-manifest", "prod", "fnord")
        .await
        .unwrap()
        .value;
    assert_eq!(prod.deploying(), Some("fnord-1.0.0"));

    let checks = keel.reconciler.check_environment(config.clone(), "test").await;
    let report = checks[0].result.as_ref().unwrap();
    assert_eq!(report.regions["us-east-1"], RegionOutcome::Missing);
    assert_eq!(report.tasks.len(), 2);

    let jobs = keel.launcher.submitted().await;
    assert_eq!(jobs.len(), 2);
    for job in &jobs {
        assert_eq!(job.stages[0]["type"], "createServerGroup");
        assert_eq!(job.stages[0]["artifactVersion"], "fnord-1.0.0");
        assert!(!job.stages[0].contains_key("source"));
    }

    // a second check while the jobs run submits nothing
    let checks = keel.reconciler.check_environment(config.clone(), "test").await;
    assert!(checks[0].result.as_ref().unwrap().tasks.is_empty());
    assert_eq!(keel.launcher.submitted().await.len(), 2);
}

#[tokio::test]
async fn test_stale_judgement_times_out() {
    let keel = keel();
    let config = config();
    keel.artifacts
        .store_version(&artifact(), "fnord-1.0.0")
        .await
        .unwrap();

    let eight_days_ago = Utc::now() - ChronoDuration::days(8);
    keel.promotion
        .check_environments(config.clone(), eight_days_ago)
        .await
        .unwrap();
    keel.promotion
        .check_environments(config.clone(), eight_days_ago)
        .await
        .unwrap();

    keel.promotion
        .check_environments(config.clone(), Utc::now())
        .await
        .unwrap();

    let key = ConstraintStateKey::new(
        "fnord-manifest",
        "prod",
        "fnord",
        "fnord-1.0.0",
        ConstraintType::ManualJudgement,
    );
    let state = keel.states.get(&key).await.unwrap().unwrap().value;
    assert_eq!(state.status, ConstraintStatus::Fail);

    let prod = keel
        .artifacts
        .artifact_versions("fnord-manifest", "prod", "fnord")
        .await
        .unwrap()
        .value;
    assert!(prod.current().is_none());
    assert_eq!(
        prod.status_of("fnord-1.0.0"),
        Some(keel_types::PromotionStatus::Vetoed)
    );
}

#[tokio::test]
async fn test_converged_cluster_is_valid() {
    let keel = keel();
    let config = config();
    keel.artifacts
        .store_version(&artifact(), "fnord-1.0.0")
        .await
        .unwrap();
    keel.promotion
        .check_environments(config.clone(), Utc::now())
        .await
        .unwrap();

    let checks = keel.reconciler.check_environment(config.clone(), "test").await;
    assert_eq!(checks[0].result.as_ref().unwrap().tasks.len(), 2);

    // the orchestrator finishes and the cluster now exists as desired
    let spec = cluster_spec("test");
    for region in &spec.locations.regions {
        keel.provider.put(ActiveServerGroup {
            name: "fnord-test-v000".to_string(),
            server_group: keel_types::ServerGroup {
                moniker: spec.moniker.clone(),
                location: keel_types::Location {
                    account: "test".to_string(),
                    region: region.clone(),
                },
                capacity: Capacity::new(1, 5, 2),
                launch: keel_types::LaunchConfig {
                    instance_type: "m5.large".to_string(),
                    artifact_version: Some("fnord-1.0.0".to_string()),
                },
                dependencies: Default::default(),
                tags: BTreeMap::new(),
            },
        });
    }
    keel.launcher.complete_all();

    let checks = keel.reconciler.check_environment(config.clone(), "test").await;
    let report = checks[0].result.as_ref().unwrap();
    assert!(report.is_valid());
    assert!(report.tasks.is_empty());
}
