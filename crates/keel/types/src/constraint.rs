//! Environment constraints
//!
//! Constraints are a tagged union discriminated by `type`. Invalid
//! parameters (bad time zones, malformed day or hour expressions, impossible
//! canary region counts) are rejected when a constraint is constructed or
//! deserialized, never when it is evaluated.

use crate::duration_serde;
use crate::error::ValidationError;
use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

/// A gate a version must pass before it is promoted into an environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Constraint {
    DependsOn(DependsOnConstraint),
    AllowedTimes(TimeWindowConstraint),
    ManualJudgement(ManualJudgementConstraint),
    Pipeline(PipelineConstraint),
    Canary(CanaryConstraint),
}

impl Constraint {
    pub fn constraint_type(&self) -> ConstraintType {
        match self {
            Self::DependsOn(_) => ConstraintType::DependsOn,
            Self::AllowedTimes(_) => ConstraintType::AllowedTimes,
            Self::ManualJudgement(_) => ConstraintType::ManualJudgement,
            Self::Pipeline(_) => ConstraintType::Pipeline,
            Self::Canary(_) => ConstraintType::Canary,
        }
    }

    /// Stateful constraints persist a `ConstraintState` row per version
    pub fn is_stateful(&self) -> bool {
        self.constraint_type().is_stateful()
    }

    /// How long a stateful constraint may stay pending
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            Self::DependsOn(_) | Self::AllowedTimes(_) => None,
            Self::ManualJudgement(c) => Some(c.timeout),
            Self::Pipeline(c) => Some(c.timeout),
            Self::Canary(c) => Some(c.timeout()),
        }
    }
}

/// Discriminator of a [`Constraint`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConstraintType {
    DependsOn,
    AllowedTimes,
    ManualJudgement,
    Pipeline,
    Canary,
}

impl ConstraintType {
    pub fn is_stateful(&self) -> bool {
        matches!(self, Self::ManualJudgement | Self::Pipeline | Self::Canary)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DependsOn => "depends-on",
            Self::AllowedTimes => "allowed-times",
            Self::ManualJudgement => "manual-judgement",
            Self::Pipeline => "pipeline",
            Self::Canary => "canary",
        }
    }
}

impl fmt::Display for ConstraintType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Passes once the version is, or has been, current in another environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependsOnConstraint {
    pub environment: String,
}

// ═══════════════════════════════════════════════════════════════════
// TIME WINDOWS
// ═══════════════════════════════════════════════════════════════════

/// One allowed window; a missing field means "any"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// e.g. `monday-friday`, `weekdays`, `sat,sun`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<String>,

    /// e.g. `9-17`, `22-2`, `10,14-16`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedWindow {
    days: BTreeSet<u32>,
    hours: BTreeSet<u32>,
}

/// Allows promotion only inside one of its windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TimeWindowSpec", into = "TimeWindowSpec")]
pub struct TimeWindowConstraint {
    windows: Vec<TimeWindow>,
    tz: Option<String>,
    zone: Tz,
    parsed: Vec<ParsedWindow>,
}

/// Raw time window parameters as authored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindowSpec {
    pub windows: Vec<TimeWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tz: Option<String>,
}

impl TimeWindowConstraint {
    pub fn new(windows: Vec<TimeWindow>, tz: Option<String>) -> Result<Self, ValidationError> {
        if windows.is_empty() {
            return Err(ValidationError::InvalidTimeWindow(
                "at least one window is required".to_string(),
            ));
        }

        let zone = match &tz {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| ValidationError::InvalidTimeZone(name.clone()))?,
            None => Tz::UTC,
        };

        let parsed = windows
            .iter()
            .map(|window| {
                Ok(ParsedWindow {
                    days: match &window.days {
                        Some(days) => parse_days(days)?,
                        None => (0..7).collect(),
                    },
                    hours: match &window.hours {
                        Some(hours) => parse_hours(hours)?,
                        None => (0..24).collect(),
                    },
                })
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;

        Ok(Self {
            windows,
            tz,
            zone,
            parsed,
        })
    }

    pub fn windows(&self) -> &[TimeWindow] {
        &self.windows
    }

    pub fn time_zone(&self) -> Tz {
        self.zone
    }

    /// Whether `now`, converted to the constraint's zone, is inside a window
    pub fn allows(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.zone);
        let day = local.weekday().num_days_from_monday();
        let hour = local.hour();
        self.parsed
            .iter()
            .any(|w| w.days.contains(&day) && w.hours.contains(&hour))
    }
}

impl TryFrom<TimeWindowSpec> for TimeWindowConstraint {
    type Error = ValidationError;

    fn try_from(spec: TimeWindowSpec) -> Result<Self, Self::Error> {
        Self::new(spec.windows, spec.tz)
    }
}

impl From<TimeWindowConstraint> for TimeWindowSpec {
    fn from(constraint: TimeWindowConstraint) -> Self {
        Self {
            windows: constraint.windows,
            tz: constraint.tz,
        }
    }
}

const DAY_NAMES: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// Parse a day expression into days counted from Monday (0)
pub fn parse_days(input: &str) -> Result<BTreeSet<u32>, ValidationError> {
    let mut days = BTreeSet::new();
    for token in input.split(',').map(str::trim) {
        match token.to_ascii_lowercase().as_str() {
            "" => {
                return Err(ValidationError::InvalidTimeWindow(format!(
                    "empty day in '{}'",
                    input
                )))
            }
            "weekdays" => days.extend(0..5),
            "weekends" => days.extend(5..7),
            other => match other.split_once('-') {
                Some((start, end)) => {
                    days.extend(wrapping_range(day_index(start)?, day_index(end)?, 7))
                }
                None => {
                    days.insert(day_index(other)?);
                }
            },
        }
    }
    Ok(days)
}

fn day_index(name: &str) -> Result<u32, ValidationError> {
    let name = name.trim().to_ascii_lowercase();
    DAY_NAMES
        .iter()
        .position(|day| *day == name || (name.len() == 3 && day.starts_with(&name)))
        .map(|idx| idx as u32)
        .ok_or_else(|| ValidationError::InvalidTimeWindow(format!("unknown day '{}'", name)))
}

/// Parse an hour expression (0-23, lists and wrapping ranges)
pub fn parse_hours(input: &str) -> Result<BTreeSet<u32>, ValidationError> {
    let mut hours = BTreeSet::new();
    for token in input.split(',').map(str::trim) {
        match token.split_once('-') {
            Some((start, end)) => {
                hours.extend(wrapping_range(hour(start)?, hour(end)?, 24));
            }
            None => {
                hours.insert(hour(token)?);
            }
        }
    }
    Ok(hours)
}

fn hour(token: &str) -> Result<u32, ValidationError> {
    token
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|h| *h < 24)
        .ok_or_else(|| ValidationError::InvalidTimeWindow(format!("invalid hour '{}'", token)))
}

fn wrapping_range(start: u32, end: u32, modulus: u32) -> Vec<u32> {
    if start <= end {
        (start..=end).collect()
    } else {
        (start..modulus).chain(0..=end).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════
// STATEFUL CONSTRAINTS
// ═══════════════════════════════════════════════════════════════════

fn default_judgement_timeout() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_execution_timeout() -> Duration {
    Duration::from_secs(2 * 60 * 60)
}

/// Waits for a human to approve or reject the version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualJudgementConstraint {
    #[serde(default = "default_judgement_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for ManualJudgementConstraint {
    fn default() -> Self {
        Self {
            timeout: default_judgement_timeout(),
        }
    }
}

/// Runs an external pipeline and follows its outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConstraint {
    #[serde(default = "default_execution_timeout", with = "duration_serde")]
    pub timeout: Duration,

    pub pipeline_id: String,

    /// Additional launch attempts after a failed launch
    #[serde(default)]
    pub retries: u32,

    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

/// Cluster the canary baseline is taken from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanarySource {
    pub account: String,
    pub cluster: String,
    #[serde(default = "default_cloud_provider")]
    pub cloud_provider: String,
}

fn default_cloud_provider() -> String {
    "aws".to_string()
}

/// Raw canary parameters as authored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanarySpec {
    #[serde(default = "default_execution_timeout", with = "duration_serde")]
    pub timeout: Duration,
    pub canary_config_id: String,
    #[serde(with = "duration_serde")]
    pub lifetime: Duration,
    pub regions: BTreeSet<String>,
    pub marginal_score: u32,
    pub pass_score: u32,
    pub source: CanarySource,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(default)]
    pub min_successful_regions: usize,
    #[serde(default = "default_true")]
    pub failure_cancels_running_regions: bool,
}

fn default_capacity() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// Runs one canary analysis per region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CanarySpec", into = "CanarySpec")]
pub struct CanaryConstraint {
    spec: CanarySpec,
}

impl CanaryConstraint {
    pub fn new(spec: CanarySpec) -> Result<Self, ValidationError> {
        let regions = spec.regions.len();
        if spec.canary_config_id.trim().is_empty() {
            return Err(ValidationError::InvalidCanary(
                "canary_config_id must not be empty".to_string(),
            ));
        }
        if regions == 0 {
            return Err(ValidationError::InvalidCanary(
                "at least one region is required".to_string(),
            ));
        }
        if spec.min_successful_regions > regions {
            return Err(ValidationError::InvalidCanary(format!(
                "min_successful_regions ({}) exceeds the number of regions ({})",
                spec.min_successful_regions, regions
            )));
        }
        if spec.min_successful_regions > 0 && regions < 2 {
            return Err(ValidationError::InvalidCanary(
                "min_successful_regions requires at least two regions".to_string(),
            ));
        }
        if spec.marginal_score > spec.pass_score || spec.pass_score > 100 {
            return Err(ValidationError::InvalidCanary(format!(
                "scores must satisfy marginal ({}) <= pass ({}) <= 100",
                spec.marginal_score, spec.pass_score
            )));
        }
        Ok(Self { spec })
    }

    /// Number of regions allowed to fail before the canary fails
    pub fn allowed_failures(&self) -> usize {
        if self.spec.min_successful_regions > 0 {
            self.spec.regions.len() - self.spec.min_successful_regions
        } else {
            0
        }
    }

    pub fn spec(&self) -> &CanarySpec {
        &self.spec
    }

    pub fn timeout(&self) -> Duration {
        self.spec.timeout
    }

    pub fn canary_config_id(&self) -> &str {
        &self.spec.canary_config_id
    }

    pub fn regions(&self) -> &BTreeSet<String> {
        &self.spec.regions
    }

    pub fn pass_score(&self) -> u32 {
        self.spec.pass_score
    }

    pub fn failure_cancels_running_regions(&self) -> bool {
        self.spec.failure_cancels_running_regions
    }
}

impl TryFrom<CanarySpec> for CanaryConstraint {
    type Error = ValidationError;

    fn try_from(spec: CanarySpec) -> Result<Self, Self::Error> {
        Self::new(spec)
    }
}

impl From<CanaryConstraint> for CanarySpec {
    fn from(constraint: CanaryConstraint) -> Self {
        constraint.spec
    }
}
