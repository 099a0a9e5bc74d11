//! Keel Registry - Repository traits and implementations
//!
//! This crate provides the persistence seams of Keel:
//!
//! - **DeliveryConfigRepository**: Stores validated delivery configs
//! - **ConstraintStateRepository**: Stores one state row per constraint and version
//! - **ArtifactRepository**: Known versions, pins, vetoes and promotion buckets
//!
//! ## Optimistic Concurrency
//!
//! Mutable rows are returned as [`Versioned`] values. Writers pass back the
//! version they read; a stale version yields [`RegistryError::VersionConflict`]
//! and the caller re-reads. There is no global lock.
//!
//! ## In-Memory vs Persistent
//!
//! The crate provides in-memory implementations suitable for development and testing.
//! Persistent backends implement the same traits.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod artifact;
pub mod constraint;
pub mod delivery;
pub mod error;
pub mod memory;

// Re-exports
pub use artifact::ArtifactRepository;
pub use constraint::ConstraintStateRepository;
pub use delivery::DeliveryConfigRepository;
pub use error::{RegistryError, Result};
pub use memory::{
    InMemoryArtifactRepository, InMemoryConstraintStateRepository,
    InMemoryDeliveryConfigRepository,
};

/// A stored value with its optimistic-concurrency version
///
/// Version `0` means "never written".
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

impl<T> Versioned<T> {
    pub fn new(value: T, version: u64) -> Self {
        Self { value, version }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}
