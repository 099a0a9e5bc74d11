//! Declaratively managed resources

use crate::ids::ResourceId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Ownership metadata of a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    pub id: ResourceId,
    pub application: String,
    pub service_account: String,
}

/// One infrastructure object with a kind-specific spec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub api_version: String,
    /// e.g. `ec2/cluster@v1`
    pub kind: String,
    pub metadata: ResourceMetadata,
    pub spec: serde_json::Value,
}

impl Resource {
    pub fn id(&self) -> &ResourceId {
        &self.metadata.id
    }

    /// Decode the spec into the handler's typed spec
    pub fn spec_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.spec)
    }

    /// Artifact this resource deploys, if any
    pub fn artifact_reference(&self) -> Option<&str> {
        self.spec
            .get("artifact_reference")
            .and_then(serde_json::Value::as_str)
    }
}
