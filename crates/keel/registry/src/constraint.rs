//! Constraint state repository trait

use crate::error::Result;
use crate::Versioned;
use async_trait::async_trait;
use keel_types::{ConstraintState, ConstraintStateKey};

/// Repository of constraint state rows
///
/// Rows are never deleted; their status only ever leaves PENDING once.
#[async_trait]
pub trait ConstraintStateRepository: Send + Sync {
    /// Get a row by key
    async fn get(&self, key: &ConstraintStateKey) -> Result<Option<Versioned<ConstraintState>>>;

    /// Insert the row unless one exists; returns whichever row is stored
    async fn insert_if_absent(&self, state: ConstraintState) -> Result<Versioned<ConstraintState>>;

    /// Replace the row if it is still at `expected_version`
    async fn compare_and_set(
        &self,
        state: ConstraintState,
        expected_version: u64,
    ) -> Result<Versioned<ConstraintState>>;

    /// Every row of one artifact version in one environment
    async fn list_for_version(
        &self,
        delivery_config_name: &str,
        environment_name: &str,
        artifact_reference: &str,
        artifact_version: &str,
    ) -> Result<Vec<ConstraintState>>;
}
