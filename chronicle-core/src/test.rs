//! Helpers for testing aggregates and repositories.
//!
//! Enabled by the `test-util` feature:
//!
//! - [`TestFramework`]: given/when/then unit testing for aggregates in
//!   isolation
//! - [`RepositoryTestExt`]: extension trait for integration testing with real
//!   repositories
//!
//! # Unit Testing with [`TestFramework`]
//!
//! Commands are plain methods on the aggregate, so `when` takes a closure that
//! calls one. The events it applied become the result under test.
//!
//! ```ignore
//! use chronicle::test::TestFramework;
//!
//! #[test]
//! fn depositing_produces_event() {
//!     TestFramework::<Account>::given(&[AccountOpened { owner: "ada".into() }.into()])
//!         .when(|account| account.deposit(10))
//!         .then_expect_events(&[FundsDeposited { amount: 10 }.into()]);
//! }
//!
//! #[test]
//! fn cannot_withdraw_more_than_balance() {
//!     TestFramework::<Account>::given(&[])
//!         .when(|account| account.withdraw(20))
//!         .then_expect_error_message("insufficient funds");
//! }
//! ```
//!
//! # Integration Testing with [`RepositoryTestExt`]
//!
//! ```ignore
//! use chronicle::test::RepositoryTestExt;
//!
//! // Simulate another writer committing after we loaded
//! repository
//!     .inject_concurrent_event(&id, FundsDeposited { amount: 5 }.into())
//!     .await?;
//! ```

use std::{fmt, future::Future};

use crate::{
    aggregate::Aggregate,
    codec::Codec,
    repository::{Repository, SaveError},
    store::{Header, Store},
};

// =============================================================================
// Repository helpers
// =============================================================================

/// Test-only writes through a [`Repository`].
///
/// Events are encoded through the repository's registry and committed
/// directly on top of the stored header, bypassing any aggregate. This is how
/// another process's save looks from the outside.
pub trait RepositoryTestExt<A: Aggregate> {
    type Error: std::error::Error;

    /// Commit `events` for `id` after whatever is already stored.
    ///
    /// Returns the new header version.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or persistence fails.
    fn seed_events(
        &self,
        id: &str,
        events: Vec<A::Event>,
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send;

    /// Commit a single event as if from a concurrent writer.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or persistence fails.
    fn inject_concurrent_event(
        &self,
        id: &str,
        event: A::Event,
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send {
        self.seed_events(id, vec![event])
    }
}

impl<A, S, C> RepositoryTestExt<A> for Repository<A, S, C>
where
    A: Aggregate,
    S: Store,
    C: Codec,
{
    type Error = SaveError<S::Error, C::Error>;

    async fn seed_events(&self, id: &str, events: Vec<A::Event>) -> Result<u64, Self::Error> {
        let base = self
            .store()
            .header(id)
            .await
            .map_err(SaveError::Store)?
            .map_or(0, |header| header.version);
        let stored = self
            .engine()
            .encode(base, &events)
            .map_err(SaveError::Encode)?;
        let header = Header {
            id: id.to_string(),
            kind: A::KIND.to_string(),
            version: stored.last().map_or(base, |event| event.version),
        };

        self.store().commit(&header, &stored).await?;
        tracing::trace!(id, version = header.version, "seeded events");
        Ok(header.version)
    }
}

// =============================================================================
// Given / when / then
// =============================================================================

/// Given-when-then harness for one aggregate.
///
/// This allows testing aggregate behaviour without persistence, focusing on
/// the command methods and the events they apply.
pub struct TestFramework<A: Aggregate> {
    aggregate: A,
}

impl<A: Aggregate + Default> TestFramework<A> {
    /// Start from a blank aggregate with `events` already folded in.
    ///
    /// The events are replayed through [`Aggregate::mutate`] and are not
    /// part of the result. Pass an empty slice `&[]` to start blank.
    ///
    /// # Panics
    ///
    /// Panics if the aggregate does not handle one of the events.
    #[must_use]
    #[track_caller]
    pub fn given(events: &[A::Event]) -> Self {
        Self {
            aggregate: A::default(),
        }
        .and(events.to_vec())
    }
}

impl<A: Aggregate> TestFramework<A> {
    /// Start from an aggregate built elsewhere, e.g. by a custom factory.
    #[must_use]
    pub const fn with_aggregate(aggregate: A) -> Self {
        Self { aggregate }
    }

    /// Replay more events into the aggregate before running the command.
    ///
    /// # Panics
    ///
    /// Panics if the aggregate does not handle one of the events.
    #[must_use]
    #[track_caller]
    pub fn and(mut self, events: Vec<A::Event>) -> Self {
        for event in &events {
            if let Err(error) = self.aggregate.mutate(event) {
                panic!("given event could not be applied: {error}");
            }
        }
        self
    }

    /// Run a command method against the aggregate.
    ///
    /// Returns a `TestResult` holding the events the command applied, or its
    /// error.
    #[must_use]
    pub fn when<T, E, F>(mut self, command: F) -> TestResult<A, E>
    where
        F: FnOnce(&mut A) -> Result<T, E>,
    {
        let result = command(&mut self.aggregate).map(|_| self.aggregate.root().pending().to_vec());
        TestResult {
            aggregate: self.aggregate,
            result,
        }
    }
}

/// Outcome of [`TestFramework::when`]: the events the command applied, or its
/// error, plus the aggregate it ran against.
pub struct TestResult<A: Aggregate, E> {
    aggregate: A,
    result: Result<Vec<A::Event>, E>,
}

impl<A: Aggregate, E> TestResult<A, E> {
    #[track_caller]
    fn applied(self) -> Vec<A::Event>
    where
        E: fmt::Debug,
    {
        self.result
            .unwrap_or_else(|error| panic!("command failed with {error:?}, events were expected"))
    }

    #[track_caller]
    fn failed(self) -> E
    where
        A::Event: fmt::Debug,
    {
        match self.result {
            Ok(events) => panic!("command succeeded with {events:?}, an error was expected"),
            Err(error) => error,
        }
    }

    /// Assert the command applied exactly `expected`, in order.
    ///
    /// # Panics
    ///
    /// Panics if the command failed or applied different events.
    #[track_caller]
    pub fn then_expect_events(self, expected: &[A::Event])
    where
        A::Event: PartialEq + fmt::Debug,
        E: fmt::Debug,
    {
        let events = self.applied();
        assert_eq!(events, expected, "applied events differ");
    }

    /// Assert the command succeeded and applied nothing.
    ///
    /// # Panics
    ///
    /// Panics if the command failed or applied any event.
    #[track_caller]
    pub fn then_expect_no_events(self)
    where
        A::Event: fmt::Debug,
        E: fmt::Debug,
    {
        let events = self.applied();
        assert!(events.is_empty(), "command applied {events:?}");
    }

    /// # Panics
    ///
    /// Panics if the command succeeded.
    #[track_caller]
    pub fn then_expect_error(self)
    where
        A::Event: fmt::Debug,
    {
        self.failed();
    }

    /// # Panics
    ///
    /// Panics if the command succeeded or failed with a different error.
    #[track_caller]
    pub fn then_expect_error_eq(self, expected: &E)
    where
        A::Event: fmt::Debug,
        E: PartialEq + fmt::Debug,
    {
        let error = self.failed();
        assert_eq!(&error, expected, "command failed with a different error");
    }

    /// Assert the command failed and its message contains `needle`.
    ///
    /// # Panics
    ///
    /// Panics if the command succeeded or the message lacks `needle`.
    #[track_caller]
    pub fn then_expect_error_message(self, needle: &str)
    where
        A::Event: fmt::Debug,
        E: fmt::Display,
    {
        let message = self.failed().to_string();
        assert!(
            message.contains(needle),
            "error message `{message}` does not contain `{needle}`"
        );
    }

    /// The aggregate after the command ran, for state assertions.
    #[must_use]
    pub const fn aggregate(&self) -> &A {
        &self.aggregate
    }

    /// Take the raw outcome for assertions not covered above.
    ///
    /// # Errors
    ///
    /// Returns the command's error.
    pub fn inspect_result(self) -> Result<Vec<A::Event>, E> {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use thiserror::Error;

    use super::*;
    use crate::{
        aggregate::{Root, UnhandledEvent},
        codec::{DomainEvent, EventSet},
        registry::Registry,
        repository::LoadError,
        store::inmemory,
    };

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct PointsAdded {
        points: i32,
    }

    impl DomainEvent for PointsAdded {
        const KIND: &'static str = "points-added";
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct PointsRevoked {
        points: i32,
    }

    impl DomainEvent for PointsRevoked {
        const KIND: &'static str = "points-revoked";
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum ScoreEvent {
        Added(PointsAdded),
        Revoked(PointsRevoked),
    }

    impl From<PointsAdded> for ScoreEvent {
        fn from(e: PointsAdded) -> Self {
            Self::Added(e)
        }
    }

    impl From<PointsRevoked> for ScoreEvent {
        fn from(e: PointsRevoked) -> Self {
            Self::Revoked(e)
        }
    }

    impl EventSet for ScoreEvent {
        fn kind(&self) -> &'static str {
            match self {
                Self::Added(_) => PointsAdded::KIND,
                Self::Revoked(_) => PointsRevoked::KIND,
            }
        }

        fn encode<C: Codec>(&self, codec: &C) -> Result<Vec<u8>, C::Error> {
            match self {
                Self::Added(inner) => codec.serialize(inner),
                Self::Revoked(inner) => codec.serialize(inner),
            }
        }
    }

    #[derive(Serialize, Deserialize)]
    struct ScoreSnapshot {
        total: i32,
    }

    impl DomainEvent for ScoreSnapshot {
        const KIND: &'static str = "score-snapshot";
    }

    #[derive(Debug, PartialEq, Eq, Error)]
    enum ScoreError {
        #[error("points must be positive")]
        NonPositive,
        #[error("insufficient points")]
        Insufficient,
        #[error(transparent)]
        Unhandled(#[from] UnhandledEvent),
    }

    #[derive(Debug, Default)]
    struct Score {
        root: Root<ScoreEvent>,
        total: i32,
    }

    impl Score {
        fn add(&mut self, points: i32) -> Result<(), ScoreError> {
            if points <= 0 {
                return Err(ScoreError::NonPositive);
            }
            Ok(self.apply(PointsAdded { points })?)
        }

        fn revoke(&mut self, points: i32) -> Result<(), ScoreError> {
            if points > self.total {
                return Err(ScoreError::Insufficient);
            }
            Ok(self.apply(PointsRevoked { points })?)
        }
    }

    impl Aggregate for Score {
        type Event = ScoreEvent;
        type Snapshot = ScoreSnapshot;

        const KIND: &'static str = "score";

        fn root(&self) -> &Root<ScoreEvent> {
            &self.root
        }

        fn root_mut(&mut self) -> &mut Root<ScoreEvent> {
            &mut self.root
        }

        fn mutate(&mut self, event: &ScoreEvent) -> Result<(), UnhandledEvent> {
            match event {
                ScoreEvent::Added(e) => self.total += e.points,
                ScoreEvent::Revoked(e) => self.total -= e.points,
            }
            Ok(())
        }

        fn take_snapshot(&self) -> ScoreSnapshot {
            ScoreSnapshot { total: self.total }
        }

        fn restore_snapshot(&mut self, snapshot: ScoreSnapshot) {
            self.total = snapshot.total;
        }
    }

    type ScoreTest = TestFramework<Score>;

    fn repository() -> Repository<Score, inmemory::Store> {
        let registry = Registry::default()
            .with::<PointsAdded>()
            .with::<PointsRevoked>();
        Repository::new(inmemory::Store::new(), registry)
    }

    #[test]
    fn given_no_events_when_add_then_produces_event() {
        ScoreTest::given(&[])
            .when(|score| score.add(10))
            .then_expect_events(&[PointsAdded { points: 10 }.into()]);
    }

    #[test]
    fn given_events_when_revoke_then_produces_event() {
        ScoreTest::given(&[PointsAdded { points: 20 }.into()])
            .when(|score| score.revoke(5))
            .then_expect_events(&[PointsRevoked { points: 5 }.into()]);
    }

    #[test]
    fn given_insufficient_points_when_revoke_then_error() {
        ScoreTest::given(&[PointsAdded { points: 10 }.into()])
            .when(|score| score.revoke(20))
            .then_expect_error_eq(&ScoreError::Insufficient);
    }

    #[test]
    fn given_events_and_more_events_when_command() {
        ScoreTest::given(&[PointsAdded { points: 10 }.into()])
            .and(vec![PointsAdded { points: 5 }.into()])
            .when(|score| score.revoke(12))
            .then_expect_events(&[PointsRevoked { points: 12 }.into()]);
    }

    #[test]
    fn invalid_command_returns_error_message() {
        ScoreTest::given(&[])
            .when(|score| score.add(-5))
            .then_expect_error_message("must be positive");
    }

    #[test]
    fn query_command_produces_no_events() {
        ScoreTest::given(&[PointsAdded { points: 3 }.into()])
            .when(|score| Ok::<_, ScoreError>(score.total))
            .then_expect_no_events();
    }

    #[test]
    fn result_exposes_aggregate_state() {
        let result =
            ScoreTest::given(&[PointsAdded { points: 3 }.into()]).when(|score| score.add(4));
        assert_eq!(result.aggregate().total, 7);
        assert_eq!(result.inspect_result().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn seed_events_appends_after_existing_history() {
        let repo = repository();

        let version = repo
            .seed_events("s1", vec![PointsAdded { points: 10 }.into()])
            .await
            .unwrap();
        assert_eq!(version, 1);

        let version = repo
            .seed_events(
                "s1",
                vec![
                    PointsAdded { points: 20 }.into(),
                    PointsRevoked { points: 5 }.into(),
                ],
            )
            .await
            .unwrap();
        assert_eq!(version, 3);

        let loaded = repo.load("s1").await.unwrap();
        assert_eq!(loaded.total, 25);
        assert_eq!(loaded.root().version(), 3);
    }

    #[tokio::test]
    async fn inject_concurrent_event_makes_stale_save_conflict() {
        let repo = repository();
        let mut score = repo.aggregate();
        score.add(100).unwrap();
        repo.save(&mut score).await.unwrap();
        let id = score.root().id().to_string();

        let mut stale = repo.load(&id).await.unwrap();
        repo.inject_concurrent_event(&id, PointsAdded { points: 50 }.into())
            .await
            .unwrap();

        stale.revoke(10).unwrap();
        let err = repo.save(&mut stale).await.unwrap_err();
        assert!(matches!(err, SaveError::Conflict(_)));
        assert_eq!(stale.root().version(), 1);
        assert_eq!(stale.root().pending().len(), 1);

        let fresh = repo.load(&id).await.unwrap();
        assert_eq!(fresh.total, 150);
    }

    #[tokio::test]
    async fn load_unknown_id_is_not_found() {
        let repo = repository();
        let err = repo.load("missing").await.err().unwrap();
        assert!(matches!(err, LoadError::NotFound { ref id } if id == "missing"));
    }
}
