//! Command envelope, context, result, and the command error taxonomy.

use chrono::{DateTime, Utc};
use stela_aggregate::{AggregateState, PersistenceError};
use stela_core::event::Actor;
use stela_core::event_log::EventLogError;
use stela_core::stream::{AggregateId, StreamId, Version};
use thiserror::Error;

/// A request to mutate one aggregate instance.
///
/// `expected_version` is the caller's optimistic precondition, usually the
/// version returned by its previous read or command. `None` means "apply
/// against whatever the current version is"; the append itself still runs
/// under the actor's own optimistic check.
#[derive(Debug)]
pub struct Command<S: AggregateState> {
    /// Target aggregate instance.
    pub aggregate_id: AggregateId,

    /// Precondition on the aggregate's persisted version, if the caller
    /// has one.
    pub expected_version: Option<Version>,

    /// The domain command.
    pub payload: S::Command,
}

impl<S: AggregateState> Command<S> {
    /// Command without a version precondition.
    pub fn new(aggregate_id: AggregateId, payload: S::Command) -> Self {
        Self {
            aggregate_id,
            expected_version: None,
            payload,
        }
    }

    /// Attach a version precondition.
    #[must_use]
    pub const fn at_version(mut self, version: Version) -> Self {
        self.expected_version = Some(version);
        self
    }
}

/// Cross-cutting request metadata travelling with a command.
#[derive(Clone, Debug, Default)]
pub struct CommandContext {
    /// Who issued the command; stamped onto every resulting envelope.
    pub actor: Actor,

    /// When the command entered the bus. Filled by the enrichment stage;
    /// `None` until then.
    pub issued_at: Option<DateTime<Utc>>,
}

impl CommandContext {
    /// Context for the given actor.
    #[must_use]
    pub const fn for_actor(actor: Actor) -> Self {
        Self {
            actor,
            issued_at: None,
        }
    }
}

/// Outcome of a successfully committed command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandResult {
    /// The aggregate that was mutated.
    pub aggregate_id: AggregateId,

    /// The aggregate's new persisted version. Callers use it as the
    /// `expected_version` of their next command, ETag style.
    pub version: Version,

    /// How many events this command committed. Zero for a no-op.
    pub events_committed: usize,
}

/// Why a command did not commit.
///
/// Commands are all-or-nothing: whichever variant is returned, zero
/// events from this command reached the log.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The command was malformed before it reached the aggregate. Never
    /// retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A business rule rejected the command. Never retried.
    #[error("Domain rule violated: {0}")]
    Domain(String),

    /// The caller's or the append's version expectation was stale. The
    /// caller reloads and re-decides.
    #[error("Version conflict on {stream}: expected {expected}, found {actual}")]
    VersionConflict {
        /// The stream where the conflict occurred.
        stream: StreamId,
        /// The expected version.
        expected: Version,
        /// The actual persisted version.
        actual: Version,
    },

    /// A store or the actor runtime failed. Surfaced immediately; the
    /// caller decides whether to retry.
    #[error("Infrastructure failure: {0}")]
    Infrastructure(String),

    /// The bus stopped waiting for the reply. Processing may still
    /// complete; the command's fate is unknown to the caller.
    #[error("Timed out waiting for command result")]
    Timeout,
}

impl From<PersistenceError> for CommandError {
    fn from(error: PersistenceError) -> Self {
        match error {
            PersistenceError::Log(EventLogError::VersionConflict {
                stream,
                expected,
                actual,
            }) => Self::VersionConflict {
                stream,
                expected,
                actual,
            },
            other => Self::Infrastructure(other.to_string()),
        }
    }
}
