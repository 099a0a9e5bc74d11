//! Delivery configs and environments

use crate::artifact::DeliveryArtifact;
use crate::constraint::Constraint;
use crate::error::ValidationError;
use crate::ids::ResourceId;
use crate::resource::Resource;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const MAX_NAME_LENGTH: usize = 255;

/// Versioned specification of an application's delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub name: String,
    pub application: String,
    pub service_account: String,
    #[serde(default)]
    pub artifacts: Vec<DeliveryArtifact>,
    #[serde(default)]
    pub environments: Vec<Environment>,
}

impl DeliveryConfig {
    /// Check the structural rules a config must satisfy before it is stored
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name)?;

        let mut references = HashSet::new();
        for artifact in &self.artifacts {
            if !references.insert(artifact.reference()) {
                return Err(ValidationError::DuplicateArtifact(
                    artifact.reference().to_string(),
                ));
            }
            artifact.comparator()?;
        }

        let mut environments = HashSet::new();
        for environment in &self.environments {
            validate_name(&environment.name)?;
            if !environments.insert(environment.name.as_str()) {
                return Err(ValidationError::DuplicateEnvironment(
                    environment.name.clone(),
                ));
            }
        }

        let mut resource_ids = HashSet::new();
        for environment in &self.environments {
            for resource in &environment.resources {
                if !resource_ids.insert(resource.id()) {
                    return Err(ValidationError::DuplicateResource(resource.id().to_string()));
                }
                if let Some(reference) = resource.artifact_reference() {
                    if !references.contains(reference) {
                        return Err(ValidationError::UnknownArtifact {
                            resource: resource.id().to_string(),
                            reference: reference.to_string(),
                        });
                    }
                }
            }

            for constraint in &environment.constraints {
                if let Constraint::DependsOn(depends_on) = constraint {
                    if !environments.contains(depends_on.environment.as_str()) {
                        return Err(ValidationError::UnknownEnvironment {
                            environment: environment.name.clone(),
                            depends_on: depends_on.environment.clone(),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    pub fn environment(&self, name: &str) -> Option<&Environment> {
        self.environments.iter().find(|env| env.name == name)
    }

    pub fn artifact(&self, reference: &str) -> Option<&DeliveryArtifact> {
        self.artifacts
            .iter()
            .find(|artifact| artifact.reference() == reference)
    }

    /// Environment a resource is declared in
    pub fn environment_of(&self, id: &ResourceId) -> Option<&Environment> {
        self.environments
            .iter()
            .find(|env| env.resources.iter().any(|r| r.id() == id))
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.environments.iter().flat_map(|env| env.resources.iter())
    }
}

fn validate_name(name: &str) -> Result<(), ValidationError> {
    let reason = if name.trim().is_empty() {
        "must not be blank"
    } else if name.chars().count() > MAX_NAME_LENGTH {
        "must be at most 255 characters"
    } else {
        return Ok(());
    };
    Err(ValidationError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

/// Named deployment stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub notifications: Vec<NotificationConfig>,
}

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: Vec::new(),
            constraints: Vec::new(),
            notifications: Vec::new(),
        }
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Whether any resource here deploys the artifact
    pub fn uses_artifact(&self, reference: &str) -> bool {
        self.resources
            .iter()
            .any(|r| r.artifact_reference() == Some(reference))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Slack,
    Email,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationFrequency {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

/// Where environment notifications go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub address: String,
    #[serde(default)]
    pub frequency: NotificationFrequency,
}
