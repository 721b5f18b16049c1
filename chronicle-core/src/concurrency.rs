//! Optimistic concurrency failure.
//!
//! Every commit carries the version the writer started from. A store rejects
//! the commit with [`VersionConflict`] when another writer has moved the
//! aggregate on in the meantime. Nothing retries automatically: the caller
//! reloads the aggregate and decides whether to re-run the command.

use thiserror::Error;

/// Another writer committed to this aggregate since it was loaded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", format_conflict(self))]
pub struct VersionConflict {
    /// Aggregate kind of the rejected commit.
    pub kind: String,
    /// Aggregate id of the rejected commit.
    pub id: String,
    /// Version the writer expected to find, or `None` when the writer's batch
    /// was larger than its claimed final version.
    pub expected: Option<u64>,
    /// Version currently held by the store.
    pub actual: u64,
}

impl VersionConflict {
    /// Build a conflict for a commit that expected `expected` but found
    /// `actual`.
    #[must_use]
    pub fn new(
        kind: impl Into<String>,
        id: impl Into<String>,
        expected: Option<u64>,
        actual: u64,
    ) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            expected,
            actual,
        }
    }
}

fn format_conflict(conflict: &VersionConflict) -> String {
    let VersionConflict {
        kind,
        id,
        expected,
        actual,
    } = conflict;
    match expected {
        Some(expected) => format!(
            "version conflict on {kind} `{id}`: expected version {expected}, found {actual} \
             (hint: aggregate was modified by another writer; reload and retry)"
        ),
        None => format!(
            "version conflict on {kind} `{id}`: commit claims fewer versions than events, store \
             is at {actual} (hint: reload and retry)"
        ),
    }
}
