//! In-memory implementations of repository traits
//!
//! These are suitable for development and testing. Compare-and-set goes
//! through the DashMap entry API, which holds the shard lock for the key.

use crate::artifact::ArtifactRepository;
use crate::constraint::ConstraintStateRepository;
use crate::delivery::DeliveryConfigRepository;
use crate::error::{RegistryError, Result};
use crate::Versioned;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use keel_types::{
    ArtifactType, ArtifactVersions, ConstraintState, ConstraintStateKey, DeliveryArtifact,
    DeliveryConfig, EnvironmentArtifactPin, EnvironmentArtifactVeto,
};

/// (delivery config, environment, artifact reference)
type EnvironmentArtifactKey = (String, String, String);

fn environment_key(config: &str, environment: &str, reference: &str) -> EnvironmentArtifactKey {
    (config.to_string(), environment.to_string(), reference.to_string())
}

/// In-memory delivery config repository
pub struct InMemoryDeliveryConfigRepository {
    configs: DashMap<String, DeliveryConfig>,
}

impl InMemoryDeliveryConfigRepository {
    pub fn new() -> Self {
        Self {
            configs: DashMap::new(),
        }
    }
}

impl Default for InMemoryDeliveryConfigRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryConfigRepository for InMemoryDeliveryConfigRepository {
    async fn put(&self, config: DeliveryConfig) -> Result<()> {
        config.validate()?;
        self.configs.insert(config.name.clone(), config);
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<DeliveryConfig>> {
        Ok(self.configs.get(name).map(|c| c.clone()))
    }

    async fn list(&self) -> Result<Vec<DeliveryConfig>> {
        let mut configs: Vec<DeliveryConfig> =
            self.configs.iter().map(|c| c.value().clone()).collect();
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(configs)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.configs.remove(name).is_some())
    }
}

/// In-memory constraint state repository
pub struct InMemoryConstraintStateRepository {
    states: DashMap<ConstraintStateKey, Versioned<ConstraintState>>,
}

impl InMemoryConstraintStateRepository {
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }
}

impl Default for InMemoryConstraintStateRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConstraintStateRepository for InMemoryConstraintStateRepository {
    async fn get(&self, key: &ConstraintStateKey) -> Result<Option<Versioned<ConstraintState>>> {
        Ok(self.states.get(key).map(|s| s.clone()))
    }

    async fn insert_if_absent(&self, state: ConstraintState) -> Result<Versioned<ConstraintState>> {
        let stored = self
            .states
            .entry(state.key())
            .or_insert_with(|| Versioned::new(state, 1));
        Ok(stored.clone())
    }

    async fn compare_and_set(
        &self,
        state: ConstraintState,
        expected_version: u64,
    ) -> Result<Versioned<ConstraintState>> {
        let key = state.key();
        match self.states.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get().version;
                if current != expected_version {
                    return Err(RegistryError::VersionConflict {
                        current,
                        expected: expected_version,
                    });
                }
                let next = Versioned::new(state, current + 1);
                entry.insert(next.clone());
                Ok(next)
            }
            Entry::Vacant(_) => Err(RegistryError::NotFound(format!("constraint state {}", key))),
        }
    }

    async fn list_for_version(
        &self,
        delivery_config_name: &str,
        environment_name: &str,
        artifact_reference: &str,
        artifact_version: &str,
    ) -> Result<Vec<ConstraintState>> {
        let mut states: Vec<ConstraintState> = self
            .states
            .iter()
            .filter(|s| {
                let key = s.key();
                key.delivery_config_name == delivery_config_name
                    && key.environment_name == environment_name
                    && key.artifact_reference == artifact_reference
                    && key.artifact_version == artifact_version
            })
            .map(|s| s.value().value.clone())
            .collect();
        states.sort_by_key(|s| s.constraint_type);
        Ok(states)
    }
}

/// In-memory artifact repository
pub struct InMemoryArtifactRepository {
    versions: DashMap<(ArtifactType, String), Vec<String>>,
    pins: DashMap<EnvironmentArtifactKey, EnvironmentArtifactPin>,
    vetoes: DashMap<EnvironmentArtifactKey, Vec<EnvironmentArtifactVeto>>,
    promotions: DashMap<EnvironmentArtifactKey, Versioned<ArtifactVersions>>,
}

impl InMemoryArtifactRepository {
    pub fn new() -> Self {
        Self {
            versions: DashMap::new(),
            pins: DashMap::new(),
            vetoes: DashMap::new(),
            promotions: DashMap::new(),
        }
    }
}

impl Default for InMemoryArtifactRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactRepository for InMemoryArtifactRepository {
    async fn store_version(&self, artifact: &DeliveryArtifact, version: &str) -> Result<bool> {
        let mut versions = self
            .versions
            .entry((artifact.artifact_type, artifact.name.clone()))
            .or_default();
        if versions.iter().any(|v| v == version) {
            return Ok(false);
        }
        versions.push(version.to_string());
        Ok(true)
    }

    async fn versions(&self, artifact: &DeliveryArtifact) -> Result<Vec<String>> {
        Ok(self
            .versions
            .get(&(artifact.artifact_type, artifact.name.clone()))
            .map(|v| v.clone())
            .unwrap_or_default())
    }

    async fn pin(&self, delivery_config_name: &str, mut pin: EnvironmentArtifactPin) -> Result<()> {
        if pin.pinned_at.is_none() {
            pin.pinned_at = Some(chrono::Utc::now());
        }
        let key = environment_key(delivery_config_name, &pin.target_environment, &pin.reference);
        self.pins.insert(key, pin);
        Ok(())
    }

    async fn unpin(
        &self,
        delivery_config_name: &str,
        environment_name: &str,
        reference: &str,
    ) -> Result<bool> {
        let key = environment_key(delivery_config_name, environment_name, reference);
        Ok(self.pins.remove(&key).is_some())
    }

    async fn pinned_version(
        &self,
        delivery_config_name: &str,
        environment_name: &str,
        reference: &str,
    ) -> Result<Option<EnvironmentArtifactPin>> {
        let key = environment_key(delivery_config_name, environment_name, reference);
        Ok(self.pins.get(&key).map(|p| p.clone()))
    }

    async fn veto(&self, delivery_config_name: &str, veto: EnvironmentArtifactVeto) -> Result<()> {
        let key = environment_key(delivery_config_name, &veto.target_environment, &veto.reference);
        let mut vetoes = self.vetoes.entry(key).or_default();
        vetoes.retain(|v| v.version != veto.version);
        vetoes.push(veto);
        Ok(())
    }

    async fn vetoes(
        &self,
        delivery_config_name: &str,
        environment_name: &str,
        reference: &str,
    ) -> Result<Vec<EnvironmentArtifactVeto>> {
        let key = environment_key(delivery_config_name, environment_name, reference);
        Ok(self.vetoes.get(&key).map(|v| v.clone()).unwrap_or_default())
    }

    async fn artifact_versions(
        &self,
        delivery_config_name: &str,
        environment_name: &str,
        reference: &str,
    ) -> Result<Versioned<ArtifactVersions>> {
        let key = environment_key(delivery_config_name, environment_name, reference);
        Ok(self.promotions.get(&key).map(|v| v.clone()).unwrap_or_else(|| {
            Versioned::new(
                ArtifactVersions::new(delivery_config_name, environment_name, reference),
                0,
            )
        }))
    }

    async fn compare_and_set_artifact_versions(
        &self,
        versions: ArtifactVersions,
        expected_version: u64,
    ) -> Result<u64> {
        let key = environment_key(
            &versions.delivery_config_name,
            &versions.environment_name,
            &versions.artifact_reference,
        );
        match self.promotions.entry(key) {
            Entry::Occupied(mut entry) => {
                let current = entry.get().version;
                if current != expected_version {
                    return Err(RegistryError::VersionConflict {
                        current,
                        expected: expected_version,
                    });
                }
                entry.insert(Versioned::new(versions, current + 1));
                Ok(current + 1)
            }
            Entry::Vacant(entry) => {
                if expected_version != 0 {
                    return Err(RegistryError::VersionConflict {
                        current: 0,
                        expected: expected_version,
                    });
                }
                entry.insert(Versioned::new(versions, 1));
                Ok(1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use keel_types::{ConstraintType, VersioningStrategy};

    fn artifact() -> DeliveryArtifact {
        DeliveryArtifact::new("fnord", ArtifactType::Docker, VersioningStrategy::SemverTag)
    }

    fn config(name: &str) -> DeliveryConfig {
        DeliveryConfig {
            name: name.to_string(),
            application: "fnord".to_string(),
            service_account: "keel@example.com".to_string(),
            artifacts: vec![artifact()],
            environments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_put_rejects_invalid_config() {
        let repo = InMemoryDeliveryConfigRepository::new();
        let result = repo.put(config("")).await;
        assert!(matches!(result, Err(RegistryError::InvalidConfig(_))));

        repo.put(config("fnord-manifest")).await.unwrap();
        assert!(repo.get("fnord-manifest").await.unwrap().is_some());
        assert_eq!(repo.list().await.unwrap().len(), 1);
        assert!(repo.delete("fnord-manifest").await.unwrap());
    }

    #[tokio::test]
    async fn test_constraint_state_compare_and_set() {
        let repo = InMemoryConstraintStateRepository::new();
        let key = ConstraintStateKey::new("fnord", "prod", "fnord", "v1.0.0", ConstraintType::ManualJudgement);
        let now = Utc::now();

        let first = repo
            .insert_if_absent(ConstraintState::pending(key.clone(), now))
            .await
            .unwrap();
        assert_eq!(first.version, 1);

        // A second insert keeps the stored row
        let mut other = ConstraintState::pending(key.clone(), now);
        other.comment = Some("late".to_string());
        let again = repo.insert_if_absent(other).await.unwrap();
        assert_eq!(again.version, 1);
        assert!(again.value.comment.is_none());

        let passed = first.value.clone().judged(
            keel_types::ConstraintStatus::OverridePass,
            "alice@example.com",
            None,
            now,
        );
        let stored = repo.compare_and_set(passed.clone(), 1).await.unwrap();
        assert_eq!(stored.version, 2);

        let stale = repo.compare_and_set(passed, 1).await;
        assert!(matches!(
            stale,
            Err(RegistryError::VersionConflict { current: 2, expected: 1 })
        ));

        let rows = repo.list_for_version("fnord", "prod", "fnord", "v1.0.0").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].can_promote());
    }

    #[tokio::test]
    async fn test_artifact_versions_compare_and_set() {
        let repo = InMemoryArtifactRepository::new();
        let initial = repo.artifact_versions("fnord", "test", "fnord").await.unwrap();
        assert_eq!(initial.version, 0);
        assert!(initial.value.is_empty());

        let version = repo
            .compare_and_set_artifact_versions(initial.value.clone(), 0)
            .await
            .unwrap();
        assert_eq!(version, 1);

        let conflict = repo
            .compare_and_set_artifact_versions(initial.value, 0)
            .await;
        assert!(conflict.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_versions_pins_and_vetoes() {
        let repo = InMemoryArtifactRepository::new();
        assert!(repo.store_version(&artifact(), "v1.0.0").await.unwrap());
        assert!(!repo.store_version(&artifact(), "v1.0.0").await.unwrap());
        assert_eq!(repo.versions(&artifact()).await.unwrap(), vec!["v1.0.0"]);

        repo.pin(
            "fnord",
            EnvironmentArtifactPin {
                target_environment: "prod".to_string(),
                reference: "fnord".to_string(),
                version: "v1.0.0".to_string(),
                pinned_by: Some("alice@example.com".to_string()),
                comment: None,
                pinned_at: None,
            },
        )
        .await
        .unwrap();
        let pin = repo.pinned_version("fnord", "prod", "fnord").await.unwrap().unwrap();
        assert!(pin.pinned_at.is_some());
        assert!(repo.unpin("fnord", "prod", "fnord").await.unwrap());
        assert!(repo.pinned_version("fnord", "prod", "fnord").await.unwrap().is_none());

        let veto = EnvironmentArtifactVeto {
            target_environment: "prod".to_string(),
            reference: "fnord".to_string(),
            version: "v1.0.0".to_string(),
            vetoed_by: None,
            comment: None,
        };
        repo.veto("fnord", veto.clone()).await.unwrap();
        repo.veto("fnord", veto).await.unwrap();
        assert_eq!(repo.vetoes("fnord", "prod", "fnord").await.unwrap().len(), 1);
    }
}
