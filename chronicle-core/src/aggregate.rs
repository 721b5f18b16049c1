//! Command-side domain primitives.
//!
//! An aggregate is a domain type that owns a [`Root`]: the identity, the
//! committed version and the queue of events recorded since the last save.
//! Command methods validate input against the current state and then call
//! [`Aggregate::apply`], which runs the aggregate's mutation function and
//! queues the event for the next [`Repository::save`].
//!
//! [`Repository::save`]: crate::repository::Repository::save

use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::codec::{DomainEvent, EventSet};

/// The mutation function was handed an event variant it does not handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("aggregate `{aggregate}` has no handler for event `{event}`")]
pub struct UnhandledEvent {
    pub aggregate: &'static str,
    pub event: &'static str,
}

impl UnhandledEvent {
    /// Build the error for `event` arriving at aggregate `A`.
    #[must_use]
    pub fn new<A: Aggregate>(event: &A::Event) -> Self {
        Self {
            aggregate: A::KIND,
            event: event.kind(),
        }
    }
}

/// Identity, committed version and pending events of one aggregate instance.
///
/// `version` counts committed events only. Events queued by
/// [`Aggregate::apply`] are counted once a save succeeds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Root<E> {
    id: String,
    version: u64,
    kind: &'static str,
    pending: Vec<E>,
}

impl<E> Default for Root<E> {
    fn default() -> Self {
        Self {
            id: String::new(),
            version: 0,
            kind: "",
            pending: Vec::new(),
        }
    }
}

impl<E> Root<E> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn pinned(kind: &'static str, id: impl Into<String>, version: u64) -> Self {
        Self {
            id: id.into(),
            version,
            kind,
            pending: Vec::new(),
        }
    }

    /// Aggregate id; empty until the first successful save.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.kind
    }

    /// Events applied since the last load or save, oldest first.
    #[must_use]
    pub fn pending(&self) -> &[E] {
        &self.pending
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Whether the aggregate has never been saved.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.id.is_empty()
    }

    pub(crate) fn push(&mut self, event: E) {
        self.pending.push(event);
    }

    pub(crate) fn reset(&mut self, id: String, version: u64) {
        self.id = id;
        self.version = version;
        self.pending.clear();
    }

    pub(crate) fn advance_to(&mut self, version: u64) {
        self.version = self.version.max(version);
    }
}

/// Domain objects persisted as a stream of events.
///
/// Implementors expose their [`Root`], define the mutation function over
/// their own [`Self::Event`] set and convert their full state to and from a
/// [`Self::Snapshot`] value.
///
/// ```ignore
/// impl Aggregate for Account {
///     const KIND: &'static str = "account";
///     type Event = AccountEvent;
///     type Snapshot = AccountSnapshot;
///
///     fn root(&self) -> &Root<AccountEvent> { &self.root }
///     fn root_mut(&mut self) -> &mut Root<AccountEvent> { &mut self.root }
///
///     fn mutate(&mut self, event: &AccountEvent) -> Result<(), UnhandledEvent> {
///         match event {
///             AccountEvent::Opened(e) => self.owner = e.owner.clone(),
///             AccountEvent::Deposited(e) => self.balance += e.amount,
///         }
///         Ok(())
///     }
///     // ...
/// }
/// ```
// ANCHOR: aggregate_trait
pub trait Aggregate: Send + Sized + 'static {
    /// Aggregate type identifier, persisted in every header.
    const KIND: &'static str;

    type Event: EventSet + Clone;
    type Snapshot: DomainEvent + Serialize + DeserializeOwned + Send;

    fn root(&self) -> &Root<Self::Event>;

    fn root_mut(&mut self) -> &mut Root<Self::Event>;

    /// Update in-memory state with one event.
    ///
    /// Must be a pure function of the current state and the event. It runs
    /// both for fresh events and during replay, so it must not validate
    /// business rules; those belong in command methods.
    ///
    /// # Errors
    ///
    /// Returns [`UnhandledEvent`] for variants this aggregate does not handle.
    /// State must be left unchanged in that case.
    fn mutate(&mut self, event: &Self::Event) -> Result<(), UnhandledEvent>;

    /// Export the full state.
    fn take_snapshot(&self) -> Self::Snapshot;

    /// Replace the full state with a previously exported snapshot.
    fn restore_snapshot(&mut self, snapshot: Self::Snapshot);

    /// Record an event: mutate state, then queue the event for the next save.
    ///
    /// # Errors
    ///
    /// Returns [`UnhandledEvent`] when [`Self::mutate`] rejects the event.
    /// Nothing is queued in that case.
    fn apply(&mut self, event: impl Into<Self::Event>) -> Result<(), UnhandledEvent> {
        let event = event.into();
        self.mutate(&event)?;
        tracing::trace!(aggregate = Self::KIND, event = event.kind(), "event applied");
        self.root_mut().push(event);
        Ok(())
    }
}
// ANCHOR_END: aggregate_trait

/// Produces blank aggregate instances.
pub type Factory<A> = Arc<dyn Fn() -> A + Send + Sync>;

/// Build an instance from `factory` and pin its root to `(id, version)`.
pub(crate) fn instantiate<A: Aggregate>(factory: &Factory<A>, id: &str, version: u64) -> A {
    let mut aggregate = factory();
    *aggregate.root_mut() = Root::pinned(A::KIND, id, version);
    aggregate
}
