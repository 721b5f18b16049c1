//! In-memory store implementation for testing.
//!
//! This module provides [`Store`], a thread-safe in-memory implementation of
//! [`Store`](super::Store) suitable for unit tests, demos and single-process
//! deployments that do not need durability.
//!
//! # Example
//!
//! ```
//! use chronicle_core::store::inmemory;
//!
//! let store = inmemory::Store::new();
//! assert_eq!(store.aggregate_count(), 0);
//! ```

use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::store::{CommitError, Header, Snapshot, StoredEvent, check_version, needs_snapshot};

/// In-memory store keeping headers, event streams and snapshots in hash maps.
///
/// Cloning the store yields another handle to the same data.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    headers: HashMap<String, Header>,
    streams: HashMap<String, Vec<StoredEvent>>,
    snapshots: HashMap<String, Snapshot>,
    last_events_query: Option<(String, u64)>,
}

/// Error type for in-memory store.
#[derive(Debug, thiserror::Error)]
pub enum InMemoryError {
    #[error("in-memory store lock poisoned")]
    Poisoned,
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, InMemoryError> {
        self.inner.read().map_err(|_| InMemoryError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, InMemoryError> {
        self.inner.write().map_err(|_| InMemoryError::Poisoned)
    }

    /// Number of aggregates with a header.
    #[must_use]
    pub fn aggregate_count(&self) -> usize {
        self.read().map_or(0, |inner| inner.headers.len())
    }

    /// Number of events stored for `id`.
    #[must_use]
    pub fn event_count(&self, id: &str) -> usize {
        self.read()
            .map_or(0, |inner| inner.streams.get(id).map_or(0, Vec::len))
    }

    /// Id and `after` version of the most recent [`load_events`] call.
    ///
    /// [`load_events`]: super::Store::load_events
    #[must_use]
    pub fn last_events_query(&self) -> Option<(String, u64)> {
        self.read()
            .ok()
            .and_then(|inner| inner.last_events_query.clone())
    }

    fn apply_commit(
        &self,
        header: &Header,
        events: &[StoredEvent],
    ) -> Result<(), CommitError<InMemoryError>> {
        let mut inner = self.write().map_err(CommitError::Store)?;

        if let Err(conflict) = check_version(inner.headers.get(&header.id), header, events.len()) {
            tracing::debug!(
                expected = ?conflict.expected,
                current = conflict.actual,
                "version mismatch, rejecting commit"
            );
            return Err(conflict.into());
        }

        inner.headers.insert(header.id.clone(), header.clone());
        inner
            .streams
            .entry(header.id.clone())
            .or_default()
            .extend_from_slice(events);
        drop(inner);
        tracing::debug!(events_appended = events.len(), "events committed");
        Ok(())
    }
}

impl super::Store for Store {
    type Error = InMemoryError;

    #[tracing::instrument(skip(self))]
    fn header(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<Header>, Self::Error>> + Send {
        let header = self.read().map(|inner| inner.headers.get(id).cloned());
        tracing::trace!(found = matches!(header, Ok(Some(_))), "retrieved header");
        std::future::ready(header)
    }

    #[tracing::instrument(
        skip(self, header, events),
        fields(id = %header.id, version = header.version, event_count = events.len())
    )]
    fn commit(
        &self,
        header: &Header,
        events: &[StoredEvent],
    ) -> impl Future<Output = Result<(), CommitError<Self::Error>>> + Send {
        std::future::ready(self.apply_commit(header, events))
    }

    #[tracing::instrument(skip(self))]
    fn load_events(
        &self,
        after: u64,
        id: &str,
    ) -> impl Future<Output = Result<Vec<StoredEvent>, Self::Error>> + Send {
        let result = self.write().map(|mut inner| {
            inner.last_events_query = Some((id.to_string(), after));
            let events: Vec<StoredEvent> = inner
                .streams
                .get(id)
                .map(|stream| {
                    stream
                        .iter()
                        .filter(|event| event.version > after)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            tracing::debug!(events_loaded = events.len(), "loaded events from store");
            events
        });
        std::future::ready(result)
    }

    #[tracing::instrument(skip(self))]
    fn load_snapshot(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<Snapshot>, Self::Error>> + Send {
        let snapshot = self.read().map(|inner| inner.snapshots.get(id).cloned());
        std::future::ready(snapshot)
    }

    #[tracing::instrument(
        skip(self, snapshot),
        fields(id = %snapshot.aggregate_id, version = snapshot.version)
    )]
    fn store_snapshot(
        &self,
        snapshot: Snapshot,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        let result = self.write().map(|mut inner| {
            inner
                .snapshots
                .insert(snapshot.aggregate_id.clone(), snapshot);
            tracing::debug!("snapshot stored");
        });
        std::future::ready(result)
    }

    #[tracing::instrument(skip(self))]
    fn snapshot_candidates(
        &self,
        kind: &str,
        threshold: u64,
    ) -> impl Future<Output = Result<Vec<Header>, Self::Error>> + Send {
        let result = self.read().map(|inner| {
            let mut candidates: Vec<Header> = inner
                .headers
                .values()
                .filter(|header| header.kind == kind)
                .filter(|header| {
                    let snapshot = inner.snapshots.get(&header.id).map(|s| s.version);
                    needs_snapshot(header, snapshot, threshold)
                })
                .cloned()
                .collect();
            candidates.sort_by(|a, b| a.id.cmp(&b.id));
            tracing::trace!(candidates = candidates.len(), "scanned for snapshot candidates");
            candidates
        });
        std::future::ready(result)
    }
}
