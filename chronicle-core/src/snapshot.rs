//! Background snapshot compaction.
//!
//! A [`Snapshotter`] periodically asks the store for aggregates that have
//! drifted at least `threshold` events past their latest snapshot, rebuilds
//! each one and stores a fresh snapshot of its full state. Loading then starts
//! from that snapshot and replays only the events after it.
//!
//! Cadence is gated twice: the wall-clock interval bounds how often a pass
//! runs, and the version delta bounds which aggregates a pass touches.
//!
//! The compactor reads headers and events but only ever writes snapshot
//! records, so it never conflicts with foreground saves.

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use crate::{
    aggregate::Aggregate,
    codec::{Codec, DomainEvent},
    registry::{Registry, RegistryError},
    repository::{Engine, LoadError},
    store::{Snapshot, Store},
};

/// Shortest pass interval; Tokio rejects a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Longest pass interval. Larger periods overflow `Instant` arithmetic.
const MAX_INTERVAL: Duration = Duration::from_secs(60 * 60 * 24 * 365);

fn pass_interval(requested: Duration) -> Duration {
    requested.clamp(MIN_INTERVAL, MAX_INTERVAL)
}

/// Error compacting a single aggregate.
#[derive(Debug, Error)]
pub enum CompactionError<StoreError, CodecError>
where
    StoreError: std::error::Error + 'static,
    CodecError: std::error::Error + 'static,
{
    #[error("failed to materialize aggregate: {0}")]
    Load(#[source] LoadError<StoreError, CodecError>),
    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] RegistryError<CodecError>),
    #[error("failed to store snapshot: {0}")]
    Store(#[source] StoreError),
}

/// Errors from the background task lifecycle.
#[derive(Debug, Error)]
pub enum SnapshotterError {
    /// The snapshotter task panicked.
    #[error("snapshotter task panicked")]
    TaskPanicked,
}

/// Outcome of one compaction pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Aggregates that received a new snapshot.
    pub compacted: usize,
    /// Aggregates whose compaction failed and was skipped.
    pub failed: usize,
}

/// Snapshot compactor for aggregates of type `A`.
///
/// Installed with [`Repository::snapshotter`](crate::repository::Repository::snapshotter).
pub struct Snapshotter<A, S, C>
where
    A: Aggregate,
    C: Codec,
{
    engine: Arc<Engine<A, S, C>>,
    threshold: u64,
    registry: Registry<A::Snapshot, C>,
}

impl<A, S, C> Snapshotter<A, S, C>
where
    A: Aggregate,
    S: Store,
    C: Codec,
{
    pub(crate) fn new(engine: Arc<Engine<A, S, C>>, threshold: u64) -> Self {
        let registry = Registry::new(engine.events.codec().clone()).with::<A::Snapshot>();
        Self {
            engine,
            threshold,
            registry,
        }
    }

    #[must_use]
    pub const fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Restore an aggregate from its latest snapshot, without replaying
    /// events.
    ///
    /// The aggregate is pinned at the snapshot's version, or at version 0
    /// with blank state when no snapshot exists.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Store`] if the store fails or
    /// [`LoadError::Snapshot`] if the snapshot cannot be decoded.
    pub async fn load(&self, id: &str) -> Result<A, LoadError<S::Error, C::Error>> {
        let snapshot = self
            .engine
            .store
            .load_snapshot(id)
            .await
            .map_err(LoadError::Store)?;

        let Some(snapshot) = snapshot else {
            return Ok(self.engine.instantiate(id, 0));
        };
        let mut aggregate = self.engine.instantiate(id, snapshot.version);
        if snapshot.data.is_empty() {
            return Ok(aggregate);
        }

        let state = self
            .registry
            .decode(A::Snapshot::KIND, &snapshot.data)
            .map_err(LoadError::Snapshot)?;
        aggregate.restore_snapshot(state);
        tracing::trace!(id, version = snapshot.version, "snapshot restored");
        Ok(aggregate)
    }

    /// Snapshot restore followed by replay of the events after it.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] if restoring or replaying fails.
    pub async fn materialize(&self, id: &str) -> Result<A, LoadError<S::Error, C::Error>> {
        let mut aggregate = self.load(id).await?;
        let after = aggregate.root().version();
        self.engine.replay(&mut aggregate, after).await?;
        Ok(aggregate)
    }

    /// Rebuild one aggregate and store a snapshot of it.
    ///
    /// Returns the version the snapshot was taken at.
    ///
    /// # Errors
    ///
    /// Returns a [`CompactionError`] describing the failing step.
    #[tracing::instrument(skip(self), fields(kind = A::KIND))]
    pub async fn compact(&self, id: &str) -> Result<u64, CompactionError<S::Error, C::Error>> {
        let aggregate = self.materialize(id).await.map_err(CompactionError::Load)?;
        let version = aggregate.root().version();
        let data = self
            .registry
            .encode(A::Snapshot::KIND, &aggregate.take_snapshot())
            .map_err(CompactionError::Encode)?;

        self.engine
            .store
            .store_snapshot(Snapshot {
                aggregate_id: id.to_string(),
                version,
                data,
            })
            .await
            .map_err(CompactionError::Store)?;
        tracing::info!(version, "snapshot taken");
        Ok(version)
    }

    /// Run one compaction pass over every current candidate.
    ///
    /// A failing candidate is logged and skipped. A failing candidate scan is
    /// logged and yields an empty report.
    #[tracing::instrument(skip(self), fields(kind = A::KIND, threshold = self.threshold))]
    pub async fn run_once(&self) -> CompactionReport {
        let candidates = match self
            .engine
            .store
            .snapshot_candidates(A::KIND, self.threshold)
            .await
        {
            Ok(candidates) => candidates,
            Err(error) => {
                tracing::error!(%error, "failed to scan for snapshot candidates");
                return CompactionReport::default();
            }
        };

        let mut report = CompactionReport::default();
        for header in &candidates {
            match self.compact(&header.id).await {
                Ok(_) => report.compacted += 1,
                Err(error) => {
                    tracing::error!(id = %header.id, %error, "snapshot compaction failed");
                    report.failed += 1;
                }
            }
        }

        if !candidates.is_empty() {
            tracing::debug!(
                compacted = report.compacted,
                failed = report.failed,
                "compaction pass finished"
            );
        }
        report
    }

    /// Spawn the periodic task. The first pass runs one `interval` after
    /// start. The interval is clamped to between one millisecond and one year.
    pub(crate) fn spawn(self: Arc<Self>, interval: Duration) -> SnapshotterHandle {
        let interval = pass_interval(interval);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut detached = false;
            tracing::info!(
                kind = A::KIND,
                threshold = self.threshold,
                ?interval,
                "snapshotter started"
            );

            loop {
                tokio::select! {
                    biased;
                    stop = &mut stop_rx, if !detached => {
                        if stop.is_ok() {
                            tracing::info!(kind = A::KIND, "snapshotter stopped");
                            break;
                        }
                        tracing::debug!(
                            kind = A::KIND,
                            "snapshotter handle dropped, running detached"
                        );
                        detached = true;
                    }
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
        });

        SnapshotterHandle {
            stop_tx: Some(stop_tx),
            task,
        }
    }
}

/// Handle to a running snapshotter task.
///
/// Dropping the handle does **not** stop the task. Call [`stop()`] for
/// graceful shutdown.
///
/// [`stop()`]: SnapshotterHandle::stop
pub struct SnapshotterHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SnapshotterHandle {
    /// Stop the snapshotter and wait for it to finish.
    ///
    /// A compaction pass already in progress completes first.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotterError::TaskPanicked`] if the task panicked.
    pub async fn stop(mut self) -> Result<(), SnapshotterError> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        self.task
            .await
            .map_err(|_| SnapshotterError::TaskPanicked)
    }

    /// Check if the snapshotter task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}
