//! Delivery artifacts

use crate::error::VersioningError;
use crate::versioning::{VersionComparator, VersioningStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of deployable unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Deb,
    Docker,
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deb => write!(f, "deb"),
            Self::Docker => write!(f, "docker"),
        }
    }
}

/// A stream of versions of one deployable unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryArtifact {
    pub name: String,

    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,

    /// Name resources and pins use to refer to this artifact, defaults to `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    #[serde(default)]
    pub versioning: VersioningStrategy,
}

impl DeliveryArtifact {
    pub fn new(
        name: impl Into<String>,
        artifact_type: ArtifactType,
        versioning: VersioningStrategy,
    ) -> Self {
        Self {
            name: name.into(),
            artifact_type,
            reference: None,
            versioning,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn reference(&self) -> &str {
        self.reference.as_deref().unwrap_or(&self.name)
    }

    /// Comparator ordering this artifact's versions newest first
    pub fn comparator(&self) -> Result<VersionComparator, VersioningError> {
        VersionComparator::new(&self.versioning, &self.name)
    }
}

impl fmt::Display for DeliveryArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.artifact_type, self.name)
    }
}
