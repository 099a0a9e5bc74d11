//! Artifact repository trait
//!
//! Holds what the artifact registries reported, operator pins and vetoes,
//! and the promotion buckets of every (config, environment, artifact).

use crate::error::Result;
use crate::Versioned;
use async_trait::async_trait;
use keel_types::{ArtifactVersions, DeliveryArtifact, EnvironmentArtifactPin, EnvironmentArtifactVeto};

/// Repository of artifact versions and their promotion state
#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    /// Record a version published for an artifact; false if already known
    async fn store_version(&self, artifact: &DeliveryArtifact, version: &str) -> Result<bool>;

    /// Every known version of an artifact, in no particular order
    async fn versions(&self, artifact: &DeliveryArtifact) -> Result<Vec<String>>;

    /// Pin a version for an environment, replacing an existing pin
    async fn pin(&self, delivery_config_name: &str, pin: EnvironmentArtifactPin) -> Result<()>;

    /// Remove a pin; false if there was none
    async fn unpin(
        &self,
        delivery_config_name: &str,
        environment_name: &str,
        reference: &str,
    ) -> Result<bool>;

    /// The pin for an artifact in an environment
    async fn pinned_version(
        &self,
        delivery_config_name: &str,
        environment_name: &str,
        reference: &str,
    ) -> Result<Option<EnvironmentArtifactPin>>;

    /// Mark a version as bad for an environment
    async fn veto(&self, delivery_config_name: &str, veto: EnvironmentArtifactVeto) -> Result<()>;

    /// Operator vetoes for an artifact in an environment
    async fn vetoes(
        &self,
        delivery_config_name: &str,
        environment_name: &str,
        reference: &str,
    ) -> Result<Vec<EnvironmentArtifactVeto>>;

    /// Promotion buckets; an empty value at version 0 when never written
    async fn artifact_versions(
        &self,
        delivery_config_name: &str,
        environment_name: &str,
        reference: &str,
    ) -> Result<Versioned<ArtifactVersions>>;

    /// Replace the buckets if they are still at `expected_version`;
    /// returns the new version
    async fn compare_and_set_artifact_versions(
        &self,
        versions: ArtifactVersions,
        expected_version: u64,
    ) -> Result<u64>;
}
