//! Persistence layer abstractions.
//!
//! This module describes the storage contract ([`Store`]), the persisted
//! record layouts ([`Header`], [`StoredEvent`], [`Snapshot`]) and a reference
//! in-memory implementation.
//!
//! A store owns three kinds of record per aggregate id: one [`Header`]
//! carrying the committed version, the ordered [`StoredEvent`]s, and at most
//! one [`Snapshot`]. Only [`Store::commit`] writes headers and events, and it
//! does so under the optimistic version check.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::concurrency::VersionConflict;

pub mod inmemory;

/// Durable pointer to an aggregate: one per id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub id: String,
    pub kind: String,
    /// Number of committed events.
    pub version: u64,
}

/// Event as persisted by a store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Unique event id.
    pub id: String,
    /// Registered payload name.
    pub kind: String,
    /// Encoded payload.
    pub data: Vec<u8>,
    /// 1-based position in the aggregate's stream.
    pub version: u64,
    pub created: DateTime<Utc>,
}

/// Encoded full-state checkpoint of one aggregate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub aggregate_id: String,
    /// Version of the last event folded into `data`.
    pub version: u64,
    pub data: Vec<u8>,
}

/// Error from [`Store::commit`].
#[derive(Debug, Error)]
pub enum CommitError<StoreError>
where
    StoreError: std::error::Error + 'static,
{
    /// Another writer moved the aggregate on since it was loaded.
    #[error(transparent)]
    Conflict(#[from] VersionConflict),
    /// Underlying store error.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

/// Check a commit against the currently stored header.
///
/// A commit of `events` events ending at `header.version` is valid when it
/// starts exactly at the stored version. Without a stored header every
/// starting version is accepted.
///
/// # Errors
///
/// Returns [`VersionConflict`] when the versions do not line up.
pub fn check_version(
    current: Option<&Header>,
    header: &Header,
    events: usize,
) -> Result<(), VersionConflict> {
    let Some(current) = current else {
        return Ok(());
    };
    let expected = u64::try_from(events)
        .ok()
        .and_then(|count| header.version.checked_sub(count));
    if expected == Some(current.version) {
        Ok(())
    } else {
        Err(VersionConflict::new(
            &header.kind,
            &header.id,
            expected,
            current.version,
        ))
    }
}

/// Qualifying test for snapshot candidates.
#[must_use]
pub fn needs_snapshot(header: &Header, snapshot_version: Option<u64>, threshold: u64) -> bool {
    header.version.saturating_sub(snapshot_version.unwrap_or(0)) >= threshold
}

/// Abstraction over the persistence layer for aggregates.
// ANCHOR: store_trait
pub trait Store: Send + Sync + 'static {
    /// Store-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Current header for `id`, or `None` if the aggregate was never saved.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when the operation fails.
    fn header(&self, id: &str) -> impl Future<Output = Result<Option<Header>, Self::Error>> + Send;

    /// Atomically replace the header and append `events`.
    ///
    /// When a header already exists for `header.id`, the commit must satisfy
    /// `header.version - events.len() == stored.version` (see
    /// [`check_version`]). Either the header and every event are persisted,
    /// or nothing is.
    ///
    /// # Errors
    ///
    /// Returns [`CommitError::Conflict`] if the version check fails, or
    /// [`CommitError::Store`] if persistence fails.
    fn commit(
        &self,
        header: &Header,
        events: &[StoredEvent],
    ) -> impl Future<Output = Result<(), CommitError<Self::Error>>> + Send;

    /// Events of `id` with a version strictly greater than `after`, in
    /// ascending version order. Unknown ids yield an empty list.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when loading fails.
    fn load_events(
        &self,
        after: u64,
        id: &str,
    ) -> impl Future<Output = Result<Vec<StoredEvent>, Self::Error>> + Send;

    /// Latest snapshot for `id`.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when loading fails.
    fn load_snapshot(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<Snapshot>, Self::Error>> + Send;

    /// Insert or replace the snapshot for `snapshot.aggregate_id`.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when persistence fails.
    fn store_snapshot(
        &self,
        snapshot: Snapshot,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Headers of `kind` that are at least `threshold` events ahead of their
    /// latest snapshot (see [`needs_snapshot`]).
    ///
    /// This is an advisory scan used by the compactor; it carries no
    /// consistency guarantee against concurrent commits.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when the scan fails.
    fn snapshot_candidates(
        &self,
        kind: &str,
        threshold: u64,
    ) -> impl Future<Output = Result<Vec<Header>, Self::Error>> + Send;
}
// ANCHOR_END: store_trait
