//! Keel Daemon library
//!
//! This module provides the core components for the Keel daemon:
//! - Layered configuration
//! - Delivery config and artifact seed loading
//! - Scheduler running promotion and reconciliation cycles
//! - Daemon lifecycle management

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
pub mod daemon;
pub mod error;
pub mod loader;
pub mod scheduler;
pub mod seed;

pub use config::DaemonConfig;
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
pub use scheduler::{CycleSummary, Scheduler};
pub use seed::{ArtifactSeed, SeedSummary};
