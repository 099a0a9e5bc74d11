//! Shared test fixtures

use crate::evaluator::EvaluationContext;
use chrono::{DateTime, Utc};
use keel_types::{ArtifactType, DeliveryArtifact, DeliveryConfig, Environment, VersioningStrategy};
use std::sync::Arc;

pub fn config() -> DeliveryConfig {
    DeliveryConfig {
        name: "fnord-manifest".to_string(),
        application: "fnord".to_string(),
        service_account: "keel@example.com".to_string(),
        artifacts: vec![DeliveryArtifact::new(
            "fnord",
            ArtifactType::Docker,
            VersioningStrategy::SemverTag,
        )],
        environments: vec![Environment::new("test"), Environment::new("prod")],
    }
}

pub fn context_at(environment: &str, version: &str, now: DateTime<Utc>) -> EvaluationContext {
    let config = config();
    let artifact = config.artifacts[0].clone();
    EvaluationContext::new(Arc::new(config), environment, artifact, version, now)
}

pub fn context(environment: &str, version: &str) -> EvaluationContext {
    context_at(environment, version, Utc::now())
}
