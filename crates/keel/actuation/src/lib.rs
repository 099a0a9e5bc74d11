//! Keel Actuation - Promotion and resource reconciliation
//!
//! This crate moves Keel's desired state into the world:
//!
//! - **PromotionEngine**: Decides which artifact version each environment runs
//! - **ResourceReconciler**: Dispatches resources to their handlers
//! - **ClusterHandler**: Converges multi-region server group clusters
//!
//! ## Collaborators
//!
//! Jobs go to a [`TaskLauncher`]; deployed state comes from a
//! [`CurrentStateProvider`]. Both are traits so the engine can run against
//! real backends or the in-memory ones in [`memory`].
//!
//! ## Fire and Forget
//!
//! Handlers submit jobs and return. Work still running is detected on the
//! next check through the job's correlation id.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod cluster;
pub mod error;
pub mod handler;
pub mod launcher;
pub mod memory;
pub mod promotion;
pub mod reconciler;

// Re-exports
pub use cluster::{ClusterHandler, ClusterHandlerConfig, CLUSTER_KIND};
pub use error::{ActuationError, Result};
pub use handler::{ReconcileContext, ReconcileReport, RegionOutcome, ResourceHandler};
pub use launcher::{CurrentStateProvider, JobRequest, Stage, Task, TaskLauncher};
pub use memory::{InMemoryCurrentStateProvider, RecordingTaskLauncher};
pub use promotion::PromotionEngine;
pub use reconciler::{ResourceCheck, ResourceReconciler};
