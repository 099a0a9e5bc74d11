//! Delivery config repository trait

use crate::error::Result;
use async_trait::async_trait;
use keel_types::DeliveryConfig;

/// Repository of delivery configs, keyed by name
#[async_trait]
pub trait DeliveryConfigRepository: Send + Sync {
    /// Validate and store a config, replacing any config of the same name
    async fn put(&self, config: DeliveryConfig) -> Result<()>;

    /// Get a config by name
    async fn get(&self, name: &str) -> Result<Option<DeliveryConfig>>;

    /// List all configs
    async fn list(&self) -> Result<Vec<DeliveryConfig>>;

    /// Delete a config by name
    async fn delete(&self, name: &str) -> Result<bool>;
}
