//! Keel Types - Core types for managed delivery
//!
//! Keel continuously converges infrastructure towards a declarative
//! specification and gates artifact promotion between environments.
//!
//! ## Key Concepts
//!
//! - **DeliveryConfig**: Versioned specification of an application's
//!   artifacts, environments and resources
//! - **Environment**: Named deployment stage with its own constraints
//! - **Constraint**: A gate a version must pass before it is promoted
//! - **ConstraintState**: Persisted outcome of a stateful constraint
//! - **ArtifactVersions**: Promotion buckets of an artifact in one environment
//! - **ResourceDiff**: Structural comparison of desired and current state
//! - **Events**: Unified observability stream

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod artifact;
pub mod cluster;
pub mod constraint;
pub mod delivery;
pub mod diff;
pub mod error;
pub mod events;
pub mod ids;
pub mod promotion;
pub mod resource;
pub mod state;
pub mod versioning;

mod duration_serde;

// Re-export main types
pub use artifact::{ArtifactType, DeliveryArtifact};
pub use cluster::{
    ActiveServerGroup, Capacity, ClusterDeployStrategy, ClusterLocations, ClusterSpec,
    Dependencies, HighlanderStrategy, LaunchConfig, Location, Moniker, RedBlackStrategy,
    ServerGroup, ServerGroupSpec, StaggeredRegion,
};
pub use constraint::{
    CanaryConstraint, CanarySource, Constraint, ConstraintType, DependsOnConstraint,
    ManualJudgementConstraint, PipelineConstraint, TimeWindow, TimeWindowConstraint,
};
pub use delivery::{
    DeliveryConfig, Environment, NotificationConfig, NotificationFrequency, NotificationType,
};
pub use diff::{FieldChange, ResourceDiff};
pub use error::{ValidationError, VersioningError};
pub use events::{EventSeverity, EventSource, KeelEvent, KeelEventEnvelope};
pub use ids::{ResourceId, TaskId};
pub use promotion::{
    ArtifactVersions, EnvironmentArtifactPin, EnvironmentArtifactVeto, PromotionAction,
    PromotionStatus,
};
pub use resource::{Resource, ResourceMetadata};
pub use state::{
    CanaryAttributes, ConstraintState, ConstraintStateAttributes, ConstraintStateKey,
    ConstraintStatus, ExecutionStatus, PipelineAttributes, RegionalCanary,
};
pub use versioning::{sort_versions, TagVersionStrategy, VersionComparator, VersioningStrategy};
