//! Application service orchestration.
//!
//! `Repository` creates blank aggregates, persists the events they record and
//! rebuilds them by replay. Saves are guarded by the store's optimistic
//! version check. Committed batches are fanned out to listeners before the
//! aggregate's root is reset.
//!
//! Snapshot support is opt-in via [`Repository::snapshotter`], which installs a
//! background compactor and switches [`Repository::load`] to snapshot restore
//! plus tail replay.

use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    aggregate::{self, Aggregate, Factory, UnhandledEvent},
    codec::{Codec, JsonCodec},
    concurrency::VersionConflict,
    registry::{Registry, RegistryError},
    snapshot::{Snapshotter, SnapshotterHandle},
    store::{CommitError, Header, Store, StoredEvent},
};

/// Error type for [`Repository::save`].
#[derive(Debug, Error)]
pub enum SaveError<StoreError, CodecError>
where
    StoreError: std::error::Error + 'static,
    CodecError: std::error::Error + 'static,
{
    #[error("failed to encode events: {0}")]
    Encode(#[source] RegistryError<CodecError>),
    #[error(transparent)]
    Conflict(VersionConflict),
    #[error("failed to persist events: {0}")]
    Store(#[source] StoreError),
}

impl<StoreError, CodecError> From<CommitError<StoreError>> for SaveError<StoreError, CodecError>
where
    StoreError: std::error::Error + 'static,
    CodecError: std::error::Error + 'static,
{
    fn from(err: CommitError<StoreError>) -> Self {
        match err {
            CommitError::Conflict(conflict) => Self::Conflict(conflict),
            CommitError::Store(err) => Self::Store(err),
        }
    }
}

/// Error type for [`Repository::load`] and snapshot restores.
#[derive(Debug, Error)]
pub enum LoadError<StoreError, CodecError>
where
    StoreError: std::error::Error + 'static,
    CodecError: std::error::Error + 'static,
{
    #[error("aggregate `{id}` not found")]
    NotFound { id: String },
    #[error("failed to load from store: {0}")]
    Store(#[source] StoreError),
    #[error("failed to decode event: {0}")]
    Decode(#[source] RegistryError<CodecError>),
    #[error("failed to restore snapshot: {0}")]
    Snapshot(#[source] RegistryError<CodecError>),
    #[error("failed to replay event: {0}")]
    Replay(#[source] UnhandledEvent),
}

/// Result type alias for [`Repository::save`].
pub type SaveResult<S, C> = Result<(), SaveError<<S as Store>::Error, <C as Codec>::Error>>;

/// Result type alias for [`Repository::load`].
pub type LoadResult<A, S, C> = Result<A, LoadError<<S as Store>::Error, <C as Codec>::Error>>;

/// Callback invoked with every committed batch.
///
/// Receives the new header, the persisted events and the typed events that
/// produced them, in the same order.
pub type Listener<E> = Arc<dyn Fn(&Header, &[StoredEvent], &[E]) + Send + Sync>;

/// Store, factory and event registry shared by a repository and its
/// snapshotter.
pub(crate) struct Engine<A: Aggregate, S, C: Codec> {
    pub(crate) store: S,
    pub(crate) factory: Factory<A>,
    pub(crate) events: Registry<A::Event, C>,
}

impl<A, S, C> Engine<A, S, C>
where
    A: Aggregate,
    S: Store,
    C: Codec,
{
    pub(crate) fn instantiate(&self, id: &str, version: u64) -> A {
        aggregate::instantiate(&self.factory, id, version)
    }

    /// Encode `events` as the versions following `base`.
    pub(crate) fn encode(
        &self,
        base: u64,
        events: &[A::Event],
    ) -> Result<Vec<StoredEvent>, RegistryError<C::Error>> {
        let created = Utc::now();
        (base + 1..)
            .zip(events)
            .map(|(version, event)| -> Result<StoredEvent, RegistryError<C::Error>> {
                let (kind, data) = self.events.encode_event(event)?;
                tracing::trace!(kind, version, "event encoded");
                Ok(StoredEvent {
                    id: Uuid::new_v4().to_string(),
                    kind: kind.to_string(),
                    data,
                    version,
                    created,
                })
            })
            .collect()
    }

    /// Replay every stored event after `after` into `aggregate`.
    ///
    /// Replayed events go through [`Aggregate::mutate`] only and are never
    /// queued. The root version follows the last replayed event.
    pub(crate) async fn replay(
        &self,
        aggregate: &mut A,
        after: u64,
    ) -> Result<usize, LoadError<S::Error, C::Error>> {
        let id = aggregate.root().id().to_string();
        let events = self
            .store
            .load_events(after, &id)
            .await
            .map_err(LoadError::Store)?;

        for stored in &events {
            let event = self
                .events
                .decode(&stored.kind, &stored.data)
                .map_err(LoadError::Decode)?;
            aggregate.mutate(&event).map_err(LoadError::Replay)?;
            aggregate.root_mut().advance_to(stored.version);
        }

        tracing::debug!(
            id = %id,
            after,
            replayed = events.len(),
            version = aggregate.root().version(),
            "aggregate replayed"
        );
        Ok(events.len())
    }
}

/// Repository.
///
/// ```ignore
/// let registry = Registry::default()
///     .with::<AccountOpened>()
///     .with::<FundsDeposited>();
/// let repository: Repository<Account, inmemory::Store> =
///     Repository::new(inmemory::Store::new(), registry);
///
/// let mut account = repository.aggregate();
/// account.open("ada")?;
/// repository.save(&mut account).await?;
///
/// let loaded = repository.load(account.root().id()).await?;
/// ```
pub struct Repository<A, S, C = JsonCodec>
where
    A: Aggregate,
    C: Codec,
{
    engine: Arc<Engine<A, S, C>>,
    listeners: Vec<Listener<A::Event>>,
    snapshotter: OnceLock<Arc<Snapshotter<A, S, C>>>,
}

impl<A, S, C> Repository<A, S, C>
where
    A: Aggregate + Default,
    S: Store,
    C: Codec,
{
    /// Create a repository whose blank aggregates come from `A::default`.
    #[must_use]
    pub fn new(store: S, events: Registry<A::Event, C>) -> Self {
        Self::with_factory(store, events, A::default)
    }
}

impl<A, S, C> Repository<A, S, C>
where
    A: Aggregate,
    S: Store,
    C: Codec,
{
    /// Create a repository whose blank aggregates come from `factory`.
    #[must_use]
    pub fn with_factory<F>(store: S, events: Registry<A::Event, C>, factory: F) -> Self
    where
        F: Fn() -> A + Send + Sync + 'static,
    {
        Self {
            engine: Arc::new(Engine {
                store,
                factory: Arc::new(factory),
                events,
            }),
            listeners: Vec::new(),
            snapshotter: OnceLock::new(),
        }
    }

    /// Register a listener for committed batches.
    ///
    /// Listeners run synchronously inside [`Self::save`], in registration
    /// order, and only after the store accepted the commit. They must complete
    /// quickly.
    #[must_use]
    pub fn with_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Header, &[StoredEvent], &[A::Event]) + Send + Sync + 'static,
    {
        self.listeners.push(Arc::new(listener));
        self
    }

    #[cfg(any(test, feature = "test-util"))]
    pub(crate) fn engine(&self) -> &Engine<A, S, C> {
        &self.engine
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.engine.store
    }

    #[must_use]
    pub fn registry(&self) -> &Registry<A::Event, C> {
        &self.engine.events
    }

    /// The installed snapshotter, if [`Self::snapshotter`] was called.
    #[must_use]
    pub fn snapshots(&self) -> Option<&Snapshotter<A, S, C>> {
        self.snapshotter.get().map(|snapshotter| &**snapshotter)
    }

    /// A blank aggregate with no identity, version 0 and nothing pending.
    #[must_use]
    pub fn aggregate(&self) -> A {
        self.engine.instantiate("", 0)
    }

    /// Persist the aggregate's pending events.
    ///
    /// New aggregates are assigned a fresh id. Events receive consecutive
    /// versions after the aggregate's current version and are committed as a
    /// single unit together with the new header. After the store accepts the
    /// batch every listener is invoked, then the root is reset to the new
    /// id and version.
    ///
    /// A save with nothing pending still commits the header, so a new
    /// aggregate becomes loadable at version 0.
    ///
    /// # Errors
    ///
    /// Returns [`SaveError::Encode`] if an event type is not registered,
    /// [`SaveError::Conflict`] if another writer saved first, or
    /// [`SaveError::Store`] if persistence fails. In every error case the
    /// aggregate is left untouched and no listener runs.
    #[tracing::instrument(
        skip(self, aggregate),
        fields(
            kind = A::KIND,
            id = aggregate.root().id(),
            pending = aggregate.root().pending().len()
        )
    )]
    pub async fn save(&self, aggregate: &mut A) -> SaveResult<S, C> {
        let root = aggregate.root();
        let base = root.version();
        let id = if root.is_new() {
            Uuid::new_v4().to_string()
        } else {
            root.id().to_string()
        };

        let events = self
            .engine
            .encode(base, root.pending())
            .map_err(SaveError::Encode)?;
        let header = Header {
            id,
            kind: A::KIND.to_string(),
            version: events.last().map_or(base, |event| event.version),
        };

        if let Err(err) = self.engine.store.commit(&header, &events).await {
            if let CommitError::Conflict(conflict) = &err {
                tracing::warn!(%conflict, "save rejected");
            }
            return Err(err.into());
        }
        tracing::debug!(
            id = %header.id,
            version = header.version,
            events = events.len(),
            "aggregate saved"
        );

        for listener in &self.listeners {
            listener(&header, &events, aggregate.root().pending());
        }

        aggregate.root_mut().reset(header.id, header.version);
        Ok(())
    }

    /// Rebuild an aggregate from the store.
    ///
    /// Without a snapshotter every event is replayed from the start. With one
    /// installed, state is restored from the latest snapshot and only the
    /// events after it are replayed.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::NotFound`] if the aggregate was never saved,
    /// [`LoadError::Store`] if the store fails, and
    /// [`LoadError::Decode`], [`LoadError::Snapshot`] or
    /// [`LoadError::Replay`] when stored data cannot be applied. No aggregate
    /// is returned on error.
    #[tracing::instrument(skip(self), fields(kind = A::KIND))]
    pub async fn load(&self, id: &str) -> LoadResult<A, S, C> {
        let header = self
            .engine
            .store
            .header(id)
            .await
            .map_err(LoadError::Store)?
            .ok_or_else(|| LoadError::NotFound { id: id.to_string() })?;

        if let Some(snapshotter) = self.snapshotter.get() {
            return snapshotter.materialize(id).await;
        }

        let mut aggregate = self.engine.instantiate(id, header.version);
        self.engine.replay(&mut aggregate, 0).await?;
        Ok(aggregate)
    }
}

impl<A, S, C> Repository<A, S, C>
where
    A: Aggregate,
    S: Store,
    C: Codec,
{
    /// Install the background compactor and start its periodic task.
    ///
    /// Every `interval` the compactor snapshots each aggregate of kind
    /// [`Aggregate::KIND`] that is at least `threshold` events ahead of its
    /// latest snapshot. From then on [`Self::load`] starts from snapshots.
    ///
    /// Only the first call installs anything; later calls return `None`. The
    /// `interval` is clamped to between one millisecond and one year, so
    /// `Duration::MAX` means "once a year".
    ///
    /// Dropping the returned handle leaves the task running; call
    /// [`SnapshotterHandle::stop`] to shut it down.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn snapshotter(&self, threshold: u64, interval: Duration) -> Option<SnapshotterHandle> {
        let snapshotter = Arc::new(Snapshotter::new(Arc::clone(&self.engine), threshold));
        if self.snapshotter.set(Arc::clone(&snapshotter)).is_err() {
            tracing::debug!(kind = A::KIND, "snapshotter already installed");
            return None;
        }
        Some(snapshotter.spawn(interval))
    }
}
