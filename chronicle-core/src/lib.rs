//! Core traits and engine for the chronicle event-sourcing library.
//!
//! This crate provides the machinery behind event-sourced aggregates:
//!
//! - [`aggregate`] - The aggregate contract and its [`Root`](aggregate::Root)
//! - [`repository`] - Save, load and listener fan-out (`Repository`)
//! - [`store`] - Persistence port with optimistic concurrency (`Store`)
//! - [`registry`] - Closed-world payload registry (`Registry`)
//! - [`snapshot`] - Background snapshot compaction (`Snapshotter`)
//! - [`codec`] - Serialization seam and event naming (`Codec`, `DomainEvent`,
//!   `EventSet`)
//! - [`concurrency`] - Version conflict error (`VersionConflict`)
//!
//! # Example
//!
//! ```
//! use chronicle_core::{registry::Registry, store::inmemory};
//!
//! // Create an in-memory store and an (empty) event registry
//! let store = inmemory::Store::new();
//! let registry: Registry<()> = Registry::default();
//! assert!(registry.is_empty());
//! # let _ = store;
//! ```
//!
//! Most users should depend on the `chronicle` crate, which re-exports these
//! types together with the derive macros.

pub mod aggregate;
pub mod codec;
pub mod concurrency;
pub mod registry;
pub mod repository;
pub mod snapshot;
pub mod store;

// Test utilities module: public when feature enabled, internal for crate tests
#[cfg(feature = "test-util")]
pub mod test;

#[cfg(all(test, not(feature = "test-util")))]
pub(crate) mod test;
