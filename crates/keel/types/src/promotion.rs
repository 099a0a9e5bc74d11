//! Promotion status of artifact versions per environment
//!
//! [`ArtifactVersions`] holds the buckets of one artifact in one environment.
//! Every mutation keeps the bucket invariants (one CURRENT at most, one
//! DEPLOYING at most, PENDING sorted newest first, a version in at most one
//! bucket) and reports the moves it made as [`PromotionAction`]s.

use crate::versioning::VersionComparator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Bucket a version sits in for an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromotionStatus {
    Previous,
    Current,
    Deploying,
    Pending,
    /// Older than a version that was promoted; never promoted automatically
    Skipped,
    /// Failed its constraints or was marked bad by an operator
    Vetoed,
}

impl fmt::Display for PromotionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Previous => "PREVIOUS",
            Self::Current => "CURRENT",
            Self::Deploying => "DEPLOYING",
            Self::Pending => "PENDING",
            Self::Skipped => "SKIPPED",
            Self::Vetoed => "VETOED",
        };
        f.write_str(s)
    }
}

/// A version moving between buckets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionAction {
    pub delivery_config_name: String,
    pub environment: String,
    pub artifact_reference: String,
    pub version: String,
    pub from: Option<PromotionStatus>,
    pub to: PromotionStatus,
}

/// Buckets of one artifact in one environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactVersions {
    pub delivery_config_name: String,
    pub environment_name: String,
    pub artifact_reference: String,
    #[serde(default)]
    versions: BTreeMap<PromotionStatus, Vec<String>>,
}

impl ArtifactVersions {
    pub fn new(
        delivery_config_name: impl Into<String>,
        environment_name: impl Into<String>,
        artifact_reference: impl Into<String>,
    ) -> Self {
        Self {
            delivery_config_name: delivery_config_name.into(),
            environment_name: environment_name.into(),
            artifact_reference: artifact_reference.into(),
            versions: BTreeMap::new(),
        }
    }

    pub fn versions(&self, status: PromotionStatus) -> &[String] {
        self.versions.get(&status).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn status_of(&self, version: &str) -> Option<PromotionStatus> {
        self.versions
            .iter()
            .find(|(_, versions)| versions.iter().any(|v| v == version))
            .map(|(status, _)| *status)
    }

    pub fn current(&self) -> Option<&str> {
        self.versions(PromotionStatus::Current)
            .first()
            .map(String::as_str)
    }

    pub fn deploying(&self) -> Option<&str> {
        self.versions(PromotionStatus::Deploying)
            .first()
            .map(String::as_str)
    }

    /// Pending versions, newest first
    pub fn pending(&self) -> &[String] {
        self.versions(PromotionStatus::Pending)
    }

    /// Whether the version is or was current here
    pub fn has_been_current(&self, version: &str) -> bool {
        matches!(
            self.status_of(version),
            Some(PromotionStatus::Current | PromotionStatus::Previous)
        )
    }

    pub fn is_empty(&self) -> bool {
        self.versions.values().all(Vec::is_empty)
    }

    /// Add versions not yet known to PENDING
    pub fn add_pending<I>(&mut self, versions: I, comparator: &VersionComparator) -> Vec<PromotionAction>
    where
        I: IntoIterator<Item = String>,
    {
        let mut actions = Vec::new();
        for version in versions {
            if self.status_of(&version).is_none() {
                actions.push(self.action(&version, None, PromotionStatus::Pending));
                self.insert_pending(version, comparator);
            }
        }
        actions
    }

    /// Make `version` the single DEPLOYING version; a different deploying
    /// version goes back to PENDING
    pub fn mark_deploying(
        &mut self,
        version: &str,
        comparator: &VersionComparator,
    ) -> Vec<PromotionAction> {
        if self.deploying() == Some(version) {
            return Vec::new();
        }

        let mut actions = Vec::new();
        let from = self.take(version);

        if let Some(displaced) = self.deploying().map(str::to_string) {
            self.take(&displaced);
            actions.push(self.action(
                &displaced,
                Some(PromotionStatus::Deploying),
                PromotionStatus::Pending,
            ));
            self.insert_pending(displaced, comparator);
        }

        actions.push(self.action(version, from, PromotionStatus::Deploying));
        self.bucket(PromotionStatus::Deploying)
            .push(version.to_string());
        actions
    }

    /// Promote `version` to CURRENT in one step: the old CURRENT becomes
    /// PREVIOUS and older pending versions are skipped
    pub fn mark_current(
        &mut self,
        version: &str,
        comparator: &VersionComparator,
    ) -> Vec<PromotionAction> {
        if self.current() == Some(version) {
            return Vec::new();
        }

        let mut actions = Vec::new();
        let from = self.take(version);

        if let Some(old) = self.current().map(str::to_string) {
            self.take(&old);
            actions.push(self.action(
                &old,
                Some(PromotionStatus::Current),
                PromotionStatus::Previous,
            ));
            self.bucket(PromotionStatus::Previous).insert(0, old);
        }

        if let Some(displaced) = self.deploying().map(str::to_string) {
            self.take(&displaced);
            let to = if comparator.is_older(&displaced, version) {
                PromotionStatus::Skipped
            } else {
                PromotionStatus::Pending
            };
            actions.push(self.action(&displaced, Some(PromotionStatus::Deploying), to));
            if to == PromotionStatus::Pending {
                self.insert_pending(displaced, comparator);
            } else {
                self.bucket(PromotionStatus::Skipped).push(displaced);
            }
        }

        let pending = std::mem::take(self.bucket(PromotionStatus::Pending));
        let (older, newer): (Vec<String>, Vec<String>) = pending
            .into_iter()
            .partition(|pending| comparator.is_older(pending, version));
        *self.bucket(PromotionStatus::Pending) = newer;
        for skipped in older {
            actions.push(self.action(
                &skipped,
                Some(PromotionStatus::Pending),
                PromotionStatus::Skipped,
            ));
            self.bucket(PromotionStatus::Skipped).push(skipped);
        }

        actions.push(self.action(version, from, PromotionStatus::Current));
        self.bucket(PromotionStatus::Current)
            .push(version.to_string());
        actions
    }

    /// Veto `version`; vetoing the CURRENT version restores the latest
    /// PREVIOUS one
    pub fn mark_vetoed(&mut self, version: &str) -> Vec<PromotionAction> {
        let from = self.status_of(version);
        if from == Some(PromotionStatus::Vetoed) {
            return Vec::new();
        }

        let mut actions = Vec::new();
        self.take(version);
        actions.push(self.action(version, from, PromotionStatus::Vetoed));
        self.bucket(PromotionStatus::Vetoed)
            .push(version.to_string());

        if from == Some(PromotionStatus::Current) {
            if let Some(restored) = self.versions(PromotionStatus::Previous).first().cloned() {
                self.take(&restored);
                actions.push(self.action(
                    &restored,
                    Some(PromotionStatus::Previous),
                    PromotionStatus::Current,
                ));
                self.bucket(PromotionStatus::Current).push(restored);
            }
        }

        actions
    }

    fn bucket(&mut self, status: PromotionStatus) -> &mut Vec<String> {
        self.versions.entry(status).or_default()
    }

    fn take(&mut self, version: &str) -> Option<PromotionStatus> {
        let status = self.status_of(version)?;
        if let Some(bucket) = self.versions.get_mut(&status) {
            bucket.retain(|v| v != version);
        }
        Some(status)
    }

    fn insert_pending(&mut self, version: String, comparator: &VersionComparator) {
        let pending = self.bucket(PromotionStatus::Pending);
        let idx = pending
            .iter()
            .position(|existing| comparator.is_older(existing, &version))
            .unwrap_or(pending.len());
        pending.insert(idx, version);
    }

    fn action(
        &self,
        version: &str,
        from: Option<PromotionStatus>,
        to: PromotionStatus,
    ) -> PromotionAction {
        PromotionAction {
            delivery_config_name: self.delivery_config_name.clone(),
            environment: self.environment_name.clone(),
            artifact_reference: self.artifact_reference.clone(),
            version: version.to_string(),
            from,
            to,
        }
    }
}

/// Forces the candidate version of an artifact in an environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentArtifactPin {
    pub target_environment: String,
    pub reference: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_at: Option<DateTime<Utc>>,
}

/// Marks a version as bad for an environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentArtifactVeto {
    pub target_environment: String,
    pub reference: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vetoed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::versioning::VersioningStrategy;

    fn comparator() -> VersionComparator {
        VersionComparator::new(&VersioningStrategy::SemverTag, "fnord").unwrap()
    }

    fn versions_with(pending: &[&str]) -> ArtifactVersions {
        let mut versions = ArtifactVersions::new("fnord", "test", "fnord");
        versions.add_pending(pending.iter().map(|v| v.to_string()), &comparator());
        versions
    }

    #[test]
    fn test_add_pending_sorts_and_ignores_known() {
        let mut versions = versions_with(&["v1.2.0", "v1.10.0", "v1.9.0"]);
        assert_eq!(versions.pending(), ["v1.10.0", "v1.9.0", "v1.2.0"]);

        let actions = versions.add_pending(
            vec!["v1.9.0".to_string(), "v2.0.0".to_string()],
            &comparator(),
        );
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].version, "v2.0.0");
        assert_eq!(versions.pending()[0], "v2.0.0");
    }

    #[test]
    fn test_mark_deploying_displaces_previous_candidate() {
        let mut versions = versions_with(&["v1.0.0", "v2.0.0"]);
        versions.mark_deploying("v2.0.0", &comparator());
        assert_eq!(versions.deploying(), Some("v2.0.0"));

        let actions = versions.mark_deploying("v1.0.0", &comparator());
        assert_eq!(actions.len(), 2);
        assert_eq!(versions.deploying(), Some("v1.0.0"));
        assert_eq!(versions.pending(), ["v2.0.0"]);

        assert!(versions.mark_deploying("v1.0.0", &comparator()).is_empty());
    }

    #[test]
    fn test_mark_current_demotes_and_skips_older() {
        let mut versions = versions_with(&["v1.0.0", "v2.0.0", "v3.0.0", "v4.0.0"]);
        versions.mark_current("v1.0.0", &comparator());
        versions.mark_deploying("v3.0.0", &comparator());

        versions.mark_current("v3.0.0", &comparator());

        assert_eq!(versions.current(), Some("v3.0.0"));
        assert_eq!(versions.versions(PromotionStatus::Previous), ["v1.0.0"]);
        assert_eq!(versions.versions(PromotionStatus::Skipped), ["v2.0.0"]);
        assert_eq!(versions.pending(), ["v4.0.0"]);
        assert!(versions.deploying().is_none());
        assert!(versions.has_been_current("v1.0.0"));
        assert!(!versions.has_been_current("v2.0.0"));
    }

    #[test]
    fn test_veto_current_restores_previous() {
        let mut versions = versions_with(&["v1.0.0", "v2.0.0"]);
        versions.mark_current("v1.0.0", &comparator());
        versions.mark_current("v2.0.0", &comparator());

        let actions = versions.mark_vetoed("v2.0.0");

        assert_eq!(actions.len(), 2);
        assert_eq!(versions.current(), Some("v1.0.0"));
        assert_eq!(versions.status_of("v2.0.0"), Some(PromotionStatus::Vetoed));
        assert!(versions.mark_vetoed("v2.0.0").is_empty());
    }

    #[test]
    fn test_serde_keys() {
        let mut versions = versions_with(&["v1.0.0"]);
        versions.mark_current("v1.0.0", &comparator());
        let json = serde_json::to_value(&versions).unwrap();
        assert_eq!(json["versions"]["CURRENT"][0], "v1.0.0");

        let back: ArtifactVersions = serde_json::from_value(json).unwrap();
        assert_eq!(back, versions);
    }
}
