//! Cluster resource model
//!
//! A [`ClusterSpec`] declares one server group per region: shared defaults
//! plus per-region overrides. It resolves into concrete [`ServerGroup`]s,
//! the same shape the current-state provider reports.

use crate::duration_serde;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

/// Naming components of a cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Moniker {
    pub app: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Moniker {
    pub fn new(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            stack: None,
            detail: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// `app`, `app-stack`, `app--detail` or `app-stack-detail`
    pub fn cluster_name(&self) -> String {
        match (&self.stack, &self.detail) {
            (None, None) => self.app.clone(),
            (Some(stack), None) => format!("{}-{}", self.app, stack),
            (None, Some(detail)) => format!("{}--{}", self.app, detail),
            (Some(stack), Some(detail)) => format!("{}-{}-{}", self.app, stack, detail),
        }
    }
}

impl fmt::Display for Moniker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cluster_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterLocations {
    pub account: String,
    pub regions: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub account: String,
    pub region: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capacity {
    pub min: u32,
    pub max: u32,
    pub desired: u32,
}

impl Capacity {
    pub fn new(min: u32, max: u32, desired: u32) -> Self {
        Self { min, max, desired }
    }
}

impl Default for Capacity {
    fn default() -> Self {
        Self::new(1, 1, 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub instance_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependencies {
    #[serde(default)]
    pub load_balancers: BTreeSet<String>,
    #[serde(default)]
    pub security_groups: BTreeSet<String>,
    #[serde(default)]
    pub target_groups: BTreeSet<String>,
}

/// Overridable server group fields; `None` falls back to the defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerGroupSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<Capacity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Dependencies>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
}

impl ServerGroupSpec {
    /// Field-by-field merge where `overrides` wins
    pub fn merged_with(&self, overrides: &ServerGroupSpec) -> ServerGroupSpec {
        ServerGroupSpec {
            capacity: overrides.capacity.or(self.capacity),
            instance_type: overrides
                .instance_type
                .clone()
                .or_else(|| self.instance_type.clone()),
            dependencies: overrides
                .dependencies
                .clone()
                .or_else(|| self.dependencies.clone()),
            tags: overrides.tags.clone().or_else(|| self.tags.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &ServerGroupSpec::default()
    }
}

/// Declarative spec of a multi-region cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub moniker: Moniker,
    pub locations: ClusterLocations,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_reference: Option<String>,
    #[serde(default)]
    pub deploy_with: ClusterDeployStrategy,
    #[serde(default)]
    pub defaults: ServerGroupSpec,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, ServerGroupSpec>,
}

impl ClusterSpec {
    /// Defaults merged with the region's overrides
    pub fn region_spec(&self, region: &str) -> ServerGroupSpec {
        match self.overrides.get(region) {
            Some(overrides) => self.defaults.merged_with(overrides),
            None => self.defaults.clone(),
        }
    }
}

/// Concrete server group in one region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerGroup {
    pub moniker: Moniker,
    pub location: Location,
    pub capacity: Capacity,
    pub launch: LaunchConfig,
    #[serde(default)]
    pub dependencies: Dependencies,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// A running server group as reported by the current-state provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveServerGroup {
    /// e.g. `fnord-main-v003`
    pub name: String,
    pub server_group: ServerGroup,
}

// ═══════════════════════════════════════════════════════════════════
// DEPLOYMENT STRATEGIES
// ═══════════════════════════════════════════════════════════════════

/// How a new server group replaces the old one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum ClusterDeployStrategy {
    RedBlack(RedBlackStrategy),
    Highlander(HighlanderStrategy),
}

impl Default for ClusterDeployStrategy {
    fn default() -> Self {
        Self::RedBlack(RedBlackStrategy::default())
    }
}

impl ClusterDeployStrategy {
    /// Regions deployed one after another, in order
    pub fn stagger(&self) -> &[StaggeredRegion] {
        match self {
            Self::RedBlack(s) => &s.stagger,
            Self::Highlander(s) => &s.stagger,
        }
    }

    pub fn is_staggered(&self) -> bool {
        !self.stagger().is_empty()
    }

    /// Properties merged into a `createServerGroup` job
    pub fn to_job_properties(&self) -> Map<String, Value> {
        let properties = match self {
            Self::RedBlack(s) => json!({
                "strategy": "redblack",
                "maxRemainingAsgs": s.max_server_groups,
                "delayBeforeDisableSec": s.delay_before_disable.as_secs(),
                "delayBeforeScaleDownSec": s.delay_before_scale_down.as_secs(),
                "rollback": { "onFailure": s.rollback_on_failure },
                "scaleDown": s.resize_previous_to_zero,
            }),
            Self::Highlander(_) => json!({ "strategy": "highlander" }),
        };

        match properties {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

fn default_max_server_groups() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedBlackStrategy {
    #[serde(default = "default_max_server_groups")]
    pub max_server_groups: u32,
    #[serde(default, with = "duration_serde")]
    pub delay_before_disable: Duration,
    #[serde(default, with = "duration_serde")]
    pub delay_before_scale_down: Duration,
    #[serde(default)]
    pub resize_previous_to_zero: bool,
    #[serde(default = "default_true")]
    pub rollback_on_failure: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stagger: Vec<StaggeredRegion>,
}

impl Default for RedBlackStrategy {
    fn default() -> Self {
        Self {
            max_server_groups: default_max_server_groups(),
            delay_before_disable: Duration::ZERO,
            delay_before_scale_down: Duration::ZERO,
            resize_previous_to_zero: false,
            rollback_on_failure: true,
            stagger: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlanderStrategy {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stagger: Vec<StaggeredRegion>,
}

/// One step of a staggered deploy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaggeredRegion {
    pub region: String,
    /// Hours the deploy may run in, e.g. `9-17`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<String>,
    /// Wait after this region before the next one starts
    #[serde(default, with = "duration_serde::option", skip_serializing_if = "Option::is_none")]
    pub pause_time: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_names() {
        assert_eq!(Moniker::new("fnord").cluster_name(), "fnord");
        assert_eq!(Moniker::new("fnord").with_stack("main").cluster_name(), "fnord-main");
        assert_eq!(Moniker::new("fnord").with_detail("canary").cluster_name(), "fnord--canary");
        assert_eq!(
            Moniker::new("fnord")
                .with_stack("main")
                .with_detail("canary")
                .to_string(),
            "fnord-main-canary"
        );
    }

    #[test]
    fn test_override_wins_field_by_field() {
        let defaults = ServerGroupSpec {
            capacity: Some(Capacity::new(1, 5, 3)),
            instance_type: Some("m5.large".to_string()),
            ..Default::default()
        };
        let overrides = ServerGroupSpec {
            capacity: Some(Capacity::new(2, 10, 6)),
            ..Default::default()
        };

        let merged = defaults.merged_with(&overrides);
        assert_eq!(merged.capacity, Some(Capacity::new(2, 10, 6)));
        assert_eq!(merged.instance_type.as_deref(), Some("m5.large"));
        assert!(merged.tags.is_none());
    }

    #[test]
    fn test_red_black_job_properties() {
        let properties = ClusterDeployStrategy::default().to_job_properties();
        assert_eq!(properties["strategy"], "redblack");
        assert_eq!(properties["maxRemainingAsgs"], 2);
        assert_eq!(properties["delayBeforeDisableSec"], 0);
        assert_eq!(properties["rollback"]["onFailure"], true);
        assert_eq!(properties["scaleDown"], false);
    }

    #[test]
    fn test_highlander_job_properties() {
        let properties =
            ClusterDeployStrategy::Highlander(HighlanderStrategy::default()).to_job_properties();
        assert_eq!(properties.len(), 1);
        assert_eq!(properties["strategy"], "highlander");
    }

    #[test]
    fn test_strategy_deserialization() {
        let strategy: ClusterDeployStrategy = serde_json::from_str(
            r#"{"strategy":"highlander","stagger":[{"region":"us-east-1","pause_time":60000}]}"#,
        )
        .unwrap();
        assert!(strategy.is_staggered());
        assert_eq!(
            strategy.stagger()[0].pause_time,
            Some(Duration::from_secs(60))
        );
    }
}
