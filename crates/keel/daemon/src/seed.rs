//! Artifact seed files
//!
//! With no artifact registry feed, published versions, pins and vetoes are
//! read from JSON seed files at startup:
//!
//! ```json
//! {
//!   "delivery_config": "fnord-manifest",
//!   "versions": {"fnord": ["fnord-1.0.0", "fnord-1.1.0"]},
//!   "pins": [{"target_environment": "prod", "reference": "fnord", "version": "fnord-1.0.0"}],
//!   "vetoes": []
//! }
//! ```
//!
//! Seeds are applied after delivery configs are loaded; `versions` is keyed
//! by artifact reference.

use crate::error::{DaemonError, DaemonResult};
use crate::loader::json_files;
use keel_registry::{ArtifactRepository, DeliveryConfigRepository};
use keel_types::{EnvironmentArtifactPin, EnvironmentArtifactVeto};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Artifact state of one delivery config
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ArtifactSeed {
    pub delivery_config: String,
    #[serde(default)]
    pub versions: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub pins: Vec<EnvironmentArtifactPin>,
    #[serde(default)]
    pub vetoes: Vec<EnvironmentArtifactVeto>,
}

/// What seeding stored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    /// Versions not known before
    pub versions: usize,
    pub pins: usize,
    pub vetoes: usize,
}

/// Parse every seed file under `paths`
pub fn read_artifact_seeds(paths: &[PathBuf]) -> DaemonResult<Vec<ArtifactSeed>> {
    json_files(paths)?.iter().map(|file| read_file(file)).collect()
}

fn read_file(path: &Path) -> DaemonResult<ArtifactSeed> {
    debug!(path = %path.display(), "Reading artifact seed");
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|source| DaemonError::Seed {
        path: path.to_path_buf(),
        source,
    })
}

/// Store the versions, pins and vetoes of every seed under `paths`
pub async fn load_artifact_seeds(
    delivery_configs: &dyn DeliveryConfigRepository,
    artifacts: &dyn ArtifactRepository,
    paths: &[PathBuf],
) -> DaemonResult<SeedSummary> {
    let mut summary = SeedSummary::default();

    for seed in read_artifact_seeds(paths)? {
        let config = delivery_configs
            .get(&seed.delivery_config)
            .await?
            .ok_or_else(|| {
                DaemonError::Config(format!(
                    "Artifact seed for unknown delivery config {}",
                    seed.delivery_config
                ))
            })?;

        for (reference, versions) in &seed.versions {
            let artifact = config
                .artifacts
                .iter()
                .find(|a| a.reference() == reference.as_str())
                .ok_or_else(|| {
                    DaemonError::Config(format!(
                        "Delivery config {} has no artifact {}",
                        config.name, reference
                    ))
                })?;
            for version in versions {
                if artifacts.store_version(artifact, version).await? {
                    summary.versions += 1;
                }
            }
        }

        for pin in seed.pins {
            artifacts.pin(&config.name, pin).await?;
            summary.pins += 1;
        }
        for veto in seed.vetoes {
            artifacts.veto(&config.name, veto).await?;
            summary.vetoes += 1;
        }

        info!(delivery_config = %config.name, "Artifact seed applied");
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_delivery_configs;
    use keel_registry::{InMemoryArtifactRepository, InMemoryDeliveryConfigRepository};
    use keel_types::{ArtifactType, DeliveryArtifact, VersioningStrategy};

    const CONFIG: &str = r#"{
        "name": "fnord-manifest",
        "application": "fnord",
        "service_account": "keel@example.com",
        "artifacts": [{"name": "fnord", "type": "deb", "versioning": {"type": "debian"}}],
        "environments": [{"name": "test"}, {"name": "prod"}]
    }"#;

    const SEED: &str = r#"{
        "delivery_config": "fnord-manifest",
        "versions": {"fnord": ["fnord-1.0.0", "fnord-1.1.0"]},
        "pins": [{"target_environment": "prod", "reference": "fnord", "version": "fnord-1.0.0"}],
        "vetoes": [{"target_environment": "test", "reference": "fnord", "version": "fnord-1.1.0"}]
    }"#;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("keeld-seed-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_seed_stores_versions_pins_and_vetoes() {
        let dir = scratch_dir();
        std::fs::write(dir.join("config.json"), CONFIG).unwrap();
        let seeds = dir.join("seeds");
        std::fs::create_dir_all(&seeds).unwrap();
        std::fs::write(seeds.join("fnord.json"), SEED).unwrap();

        let configs = InMemoryDeliveryConfigRepository::new();
        let artifacts = InMemoryArtifactRepository::new();
        load_delivery_configs(&configs, &[dir.join("config.json")])
            .await
            .unwrap();
        let summary = load_artifact_seeds(&configs, &artifacts, &[seeds.clone()])
            .await
            .unwrap();
        // applying twice only repeats pins and vetoes
        let again = load_artifact_seeds(&configs, &artifacts, &[seeds])
            .await
            .unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(summary, SeedSummary { versions: 2, pins: 1, vetoes: 1 });
        assert_eq!(again.versions, 0);

        let artifact = DeliveryArtifact::new("fnord", ArtifactType::Deb, VersioningStrategy::Debian);
        assert_eq!(artifacts.versions(&artifact).await.unwrap().len(), 2);
        let pin = artifacts
            .pinned_version("fnord-manifest", "prod", "fnord")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pin.version, "fnord-1.0.0");
        assert_eq!(
            artifacts
                .vetoes("fnord-manifest", "test", "fnord")
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_seed_for_unknown_artifact_fails() {
        let dir = scratch_dir();
        std::fs::write(dir.join("config.json"), CONFIG).unwrap();
        std::fs::write(
            dir.join("seed.json"),
            r#"{"delivery_config": "fnord-manifest", "versions": {"fnord-sidecar": ["1.0.0"]}}"#,
        )
        .unwrap();

        let configs = InMemoryDeliveryConfigRepository::new();
        let artifacts = InMemoryArtifactRepository::new();
        load_delivery_configs(&configs, &[dir.join("config.json")])
            .await
            .unwrap();
        let result = load_artifact_seeds(&configs, &artifacts, &[dir.join("seed.json")]).await;
        std::fs::remove_dir_all(&dir).unwrap();

        assert!(matches!(result, Err(DaemonError::Config(_))));
    }

    #[test]
    fn test_malformed_seed_names_the_file() {
        let dir = scratch_dir();
        let path = dir.join("broken.json");
        std::fs::write(&path, "[").unwrap();

        let err = read_artifact_seeds(&[path.clone()]).unwrap_err();
        std::fs::remove_dir_all(&dir).unwrap();

        assert!(matches!(err, DaemonError::Seed { path: reported, .. } if reported == path));
    }
}
