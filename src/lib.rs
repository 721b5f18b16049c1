#![doc = include_str!("../README.md")]

#[cfg(feature = "test-util")]
pub use chronicle_core::test;
pub use chronicle_core::{
    aggregate,
    aggregate::{Aggregate, Factory, Root, UnhandledEvent},
    codec,
    codec::{Codec, DomainEvent, EventSet, JsonCodec},
    concurrency,
    concurrency::VersionConflict,
    registry,
    registry::{Registry, RegistryError, TypeDescriptor},
    repository,
    repository::{Listener, LoadError, Repository, SaveError},
};
// Re-export proc macro derives so consumers only depend on `chronicle`.
pub use chronicle_macros::{DomainEvent, EventSet};

pub mod store {

    pub use chronicle_core::store::{Header, Snapshot, Store, StoredEvent};

    // Re-export low-level commit types for Store implementors only.
    // Most users should interact with the Repository API instead.
    #[doc(hidden)]
    pub use chronicle_core::store::{CommitError, check_version, needs_snapshot};

    pub use chronicle_core::store::inmemory;
}

pub mod snapshot {

    pub use chronicle_core::snapshot::{
        CompactionError, CompactionReport, Snapshotter, SnapshotterError, SnapshotterHandle,
    };
}
