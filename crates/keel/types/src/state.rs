//! Persisted state of stateful constraints
//!
//! One row exists per (delivery config, environment, artifact version,
//! constraint type). Rows are created PENDING on first evaluation, move to a
//! terminal status exactly once and are never deleted.

use crate::constraint::ConstraintType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Status of a constraint for one artifact version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintStatus {
    Pending,
    Pass,
    Fail,
    OverridePass,
    OverrideFail,
}

impl ConstraintStatus {
    pub fn passes(&self) -> bool {
        matches!(self, Self::Pass | Self::OverridePass)
    }

    pub fn failed(&self) -> bool {
        matches!(self, Self::Fail | Self::OverrideFail)
    }

    pub fn is_override(&self) -> bool {
        matches!(self, Self::OverridePass | Self::OverrideFail)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ConstraintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::OverridePass => "OVERRIDE_PASS",
            Self::OverrideFail => "OVERRIDE_FAIL",
        };
        f.write_str(s)
    }
}

/// Identity of a constraint state row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConstraintStateKey {
    pub delivery_config_name: String,
    pub environment_name: String,
    pub artifact_reference: String,
    pub artifact_version: String,
    pub constraint_type: ConstraintType,
}

impl ConstraintStateKey {
    pub fn new(
        delivery_config_name: impl Into<String>,
        environment_name: impl Into<String>,
        artifact_reference: impl Into<String>,
        artifact_version: impl Into<String>,
        constraint_type: ConstraintType,
    ) -> Self {
        Self {
            delivery_config_name: delivery_config_name.into(),
            environment_name: environment_name.into(),
            artifact_reference: artifact_reference.into(),
            artifact_version: artifact_version.into(),
            constraint_type,
        }
    }
}

impl fmt::Display for ConstraintStateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.delivery_config_name,
            self.environment_name,
            self.artifact_reference,
            self.artifact_version,
            self.constraint_type
        )
    }
}

/// Outcome of a stateful constraint for one artifact version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintState {
    pub delivery_config_name: String,
    pub environment_name: String,
    pub artifact_reference: String,
    pub artifact_version: String,
    pub constraint_type: ConstraintType,
    pub status: ConstraintStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judged_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<ConstraintStateAttributes>,
}

impl ConstraintState {
    /// A fresh pending row
    pub fn pending(key: ConstraintStateKey, now: DateTime<Utc>) -> Self {
        Self {
            delivery_config_name: key.delivery_config_name,
            environment_name: key.environment_name,
            artifact_reference: key.artifact_reference,
            artifact_version: key.artifact_version,
            constraint_type: key.constraint_type,
            status: ConstraintStatus::Pending,
            created_at: now,
            judged_by: None,
            judged_at: None,
            comment: None,
            attributes: None,
        }
    }

    pub fn key(&self) -> ConstraintStateKey {
        ConstraintStateKey::new(
            self.delivery_config_name.clone(),
            self.environment_name.clone(),
            self.artifact_reference.clone(),
            self.artifact_version.clone(),
            self.constraint_type,
        )
    }

    pub fn can_promote(&self) -> bool {
        self.status.passes()
    }

    pub fn failed(&self) -> bool {
        self.status.failed()
    }

    /// True once `created_at + timeout` lies in the past
    pub fn timed_out(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(timeout) {
            Ok(timeout) => self.created_at + timeout < now,
            // Unrepresentable timeouts never elapse
            Err(_) => false,
        }
    }

    /// Record a judgement, automatic or human
    pub fn judged(
        mut self,
        status: ConstraintStatus,
        judged_by: impl Into<String>,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        self.status = status;
        self.judged_by = Some(judged_by.into());
        self.judged_at = Some(now);
        if comment.is_some() {
            self.comment = comment;
        }
        self
    }

    pub fn pipeline_attributes(&self) -> Option<&PipelineAttributes> {
        match &self.attributes {
            Some(ConstraintStateAttributes::Pipeline(attrs)) => Some(attrs),
            _ => None,
        }
    }

    pub fn canary_attributes(&self) -> Option<&CanaryAttributes> {
        match &self.attributes {
            Some(ConstraintStateAttributes::Canary(attrs)) => Some(attrs),
            _ => None,
        }
    }
}

/// Evaluator-specific progress stored with a constraint state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ConstraintStateAttributes {
    Pipeline(PipelineAttributes),
    Canary(CanaryAttributes),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub launch_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_status: Option<ExecutionStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanaryAttributes {
    /// Regional executions keyed by region
    #[serde(default)]
    pub executions: BTreeMap<String, RegionalCanary>,
    #[serde(default)]
    pub start_attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionalCanary {
    pub execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ExecutionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Status of an orchestrated execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    NotStarted,
    Buffered,
    Running,
    Paused,
    Suspended,
    Succeeded,
    FailedContinue,
    Terminal,
    Canceled,
    Stopped,
    Skipped,
}

impl ExecutionStatus {
    pub fn is_complete(&self) -> bool {
        !matches!(
            self,
            Self::NotStarted | Self::Buffered | Self::Running | Self::Paused | Self::Suspended
        )
    }

    pub fn is_successful(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }

    pub fn is_failure(&self) -> bool {
        self.is_complete() && !self.is_successful()
    }
}
