//! Abstract durable event log.
//!
//! The log is an external collaborator: a per-stream ordered append log
//! with optimistic-version append, stream reads, a global commit-order
//! read for rebuilds, and position-based filtered subscriptions. Concrete
//! drivers live outside this workspace; `stela-testing` provides an
//! in-memory implementation.

use crate::event::{Envelope, EventFilter, StoredEvent};
use crate::stream::{Position, StreamId, Version};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from event log operations.
#[derive(Error, Debug)]
pub enum EventLogError {
    /// Optimistic concurrency conflict: the expected version does not
    /// match the stream's persisted version. Nothing was committed.
    #[error("Version conflict on {stream}: expected {expected}, found {actual}")]
    VersionConflict {
        /// The stream where the conflict occurred.
        stream: StreamId,
        /// The version the append expected.
        expected: Version,
        /// The stream's actual persisted version.
        actual: Version,
    },

    /// The log backend is unreachable or failed.
    #[error("Event log unavailable: {0}")]
    Unavailable(String),

    /// The subscription was interrupted and must be re-established.
    #[error("Subscription lost: {0}")]
    SubscriptionLost(String),

    /// Payload serialization failed inside the driver.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl EventLogError {
    /// Whether this error is transient and worth retrying.
    ///
    /// Version conflicts are never retried here; the caller must reload
    /// and re-decide.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::SubscriptionLost(_))
    }
}

/// A stream of delivered event batches from a subscription.
///
/// Delivery is at-least-once: on reconnect the subscription may redeliver
/// events already seen since the subscriber's last durable checkpoint.
/// Batch boundaries are driver-defined; consumers treat them as the
/// granularity for checkpointing and stop requests.
pub type EventBatchStream =
    Pin<Box<dyn Stream<Item = Result<Vec<StoredEvent>, EventLogError>> + Send>>;

/// Durable, per-stream ordered append log.
///
/// # Optimistic Concurrency
///
/// `append` asserts the stream's current version. A mismatch fails with
/// [`EventLogError::VersionConflict`] and commits nothing; this is the
/// only concurrency-control mechanism in the system. No external locks.
///
/// # Dyn Compatibility
///
/// The trait returns `Pin<Box<dyn Future>>` instead of `async fn` so it
/// can be used as `Arc<dyn EventLog>` throughout the runtime.
pub trait EventLog: Send + Sync {
    /// Append envelopes to a stream with optimistic concurrency control.
    ///
    /// `expected_version` of `None` skips the version check (used only by
    /// migration tooling). The append is atomic: either every envelope
    /// commits, or none does.
    ///
    /// Returns the stream's new version.
    ///
    /// # Errors
    ///
    /// - [`EventLogError::VersionConflict`]: concurrent modification detected.
    /// - [`EventLogError::Unavailable`]: backend failure.
    fn append(
        &self,
        stream: StreamId,
        expected_version: Option<Version>,
        envelopes: Vec<Envelope>,
    ) -> Pin<Box<dyn Future<Output = Result<Version, EventLogError>> + Send + '_>>;

    /// Read a stream's events in order, optionally from a version onwards
    /// (inclusive). A missing stream reads as empty.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Unavailable`] on backend failure.
    fn read_stream(
        &self,
        stream: StreamId,
        from: Option<Version>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StoredEvent>, EventLogError>> + Send + '_>>;

    /// Read the full log in commit order, starting after `from`, keeping
    /// only events matching `filter`, up to `limit` events.
    ///
    /// Used by the rebuilder's resumable cursor; an empty result means the
    /// cursor has reached the end of the log.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Unavailable`] on backend failure.
    fn read_all(
        &self,
        from: Position,
        filter: EventFilter,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StoredEvent>, EventLogError>> + Send + '_>>;

    /// Subscribe to a filtered view of the log from a position onwards
    /// (exclusive), receiving both historical and live events as batches.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::SubscriptionLost`] or
    /// [`EventLogError::Unavailable`] if the subscription cannot be
    /// established.
    fn subscribe(
        &self,
        filter: EventFilter,
        from: Position,
    ) -> Pin<Box<dyn Future<Output = Result<EventBatchStream, EventLogError>> + Send + '_>>;
}
