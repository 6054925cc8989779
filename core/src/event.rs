//! Event trait, envelope, and filtering types.
//!
//! Events are immutable facts. A domain event payload is serialized with
//! `bincode` and wrapped in an [`Envelope`] carrying the cross-cutting
//! metadata every subsystem needs: event kind, aggregate identity, stream
//! position, commit id, timestamp, and the actor who caused it. Once the
//! log has assigned a global commit-order position the envelope travels as
//! a [`StoredEvent`].

use crate::stream::{AggregateId, Position, StreamId, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Errors from event serialization and kind dispatch.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize an event payload to bytes.
    #[error("Failed to serialize event: {0}")]
    Serialization(String),

    /// Failed to deserialize an event payload from bytes.
    #[error("Failed to deserialize event: {0}")]
    Deserialization(String),

    /// Event kind has no registered decoder.
    #[error("Unknown event kind: {0}")]
    UnknownKind(String),
}

/// A domain event that can be stored in the event log.
///
/// # Kind Naming Convention
///
/// `event_kind()` returns a stable string tag with a version suffix so
/// schemas can evolve:
///
/// - `"InvoiceCreated.v1"`
/// - `"AmountUpdated.v1"`
///
/// # Serialization
///
/// Payloads are serialized to binary with `bincode`. The default
/// implementations cover any `Serialize`/`DeserializeOwned` type.
pub trait Event: Send + Sync + 'static {
    /// Stable kind tag for this event, used for storage, filtering, and
    /// registry dispatch.
    fn event_kind(&self) -> &'static str;

    /// Serialize this event to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the payload cannot be
    /// serialized.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>
    where
        Self: Serialize,
    {
        bincode::serialize(self).map_err(|e| EventError::Serialization(e.to_string()))
    }

    /// Deserialize an event from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Deserialization`] if the bytes do not decode
    /// into this event type.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        bincode::deserialize(bytes).map_err(|e| EventError::Deserialization(e.to_string()))
    }
}

/// The identity that caused an event: a user, a client, or the system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    /// A human user, identified by subject.
    User(String),
    /// An API client, identified by client id.
    Client(String),
    /// The runtime itself (migrations, rebuilds).
    System,
}

impl Default for Actor {
    fn default() -> Self {
        Self::System
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(subject) => write!(f, "user:{subject}"),
            Self::Client(id) => write!(f, "client:{id}"),
            Self::System => write!(f, "system"),
        }
    }
}

/// An event payload wrapped with its cross-cutting metadata.
///
/// Envelopes are produced by the persistence binder at commit time and are
/// what the event log stores and delivers. All events committed by one
/// command share a `commit_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique id of this event, the deduplication key for consumers.
    pub event_id: uuid::Uuid,

    /// Stable kind tag (e.g. `"InvoiceCreated.v1"`).
    pub event_kind: String,

    /// The aggregate instance this event belongs to.
    pub aggregate_id: AggregateId,

    /// The aggregate kind (e.g. `"invoice"`), used for filtered replays.
    pub aggregate_kind: String,

    /// Position of this event within its stream.
    pub stream_position: Version,

    /// Id shared by every event committed in the same command.
    pub commit_id: uuid::Uuid,

    /// When the event was committed.
    pub timestamp: DateTime<Utc>,

    /// Who caused the event.
    pub actor: Actor,

    /// The bincode-serialized domain event payload.
    pub payload: Vec<u8>,
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {}:{} ({} bytes)",
            self.event_kind,
            self.aggregate_id,
            self.stream_position,
            self.payload.len()
        )
    }
}

/// An envelope after the log has assigned its global position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Global commit-order position assigned by the log.
    pub position: Position,

    /// The stream the event was appended to.
    pub stream: StreamId,

    /// The envelope as it was appended.
    pub envelope: Envelope,
}

/// Predicate selecting a subset of the log for subscriptions and replays.
///
/// An empty filter matches everything. Kind lists are OR-ed within a field
/// and AND-ed across fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Restrict to these aggregate kinds, if set.
    pub aggregate_kinds: Option<Vec<String>>,

    /// Restrict to these event kinds, if set.
    pub event_kinds: Option<Vec<String>>,
}

impl EventFilter {
    /// A filter matching every event in the log.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            aggregate_kinds: None,
            event_kinds: None,
        }
    }

    /// A filter matching one aggregate kind.
    #[must_use]
    pub fn for_aggregate_kind(kind: impl Into<String>) -> Self {
        Self {
            aggregate_kinds: Some(vec![kind.into()]),
            event_kinds: None,
        }
    }

    /// Whether the envelope passes this filter.
    #[must_use]
    pub fn matches(&self, envelope: &Envelope) -> bool {
        let kind_ok = self
            .aggregate_kinds
            .as_ref()
            .is_none_or(|kinds| kinds.iter().any(|k| k == &envelope.aggregate_kind));
        let event_ok = self
            .event_kinds
            .as_ref()
            .is_none_or(|kinds| kinds.iter().any(|k| k == &envelope.event_kind));
        kind_ok && event_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    enum TestEvent {
        Created { id: String, amount: i64 },
        AmountUpdated { amount: i64 },
    }

    impl Event for TestEvent {
        fn event_kind(&self) -> &'static str {
            match self {
                TestEvent::Created { .. } => "TestEvent.Created.v1",
                TestEvent::AmountUpdated { .. } => "TestEvent.AmountUpdated.v1",
            }
        }
    }

    fn envelope(aggregate_kind: &str, event_kind: &str) -> Envelope {
        Envelope {
            event_id: uuid::Uuid::new_v4(),
            event_kind: event_kind.to_string(),
            aggregate_id: AggregateId::new("1"),
            aggregate_kind: aggregate_kind.to_string(),
            stream_position: Version::INITIAL,
            commit_id: uuid::Uuid::new_v4(),
            timestamp: Utc::now(),
            actor: Actor::System,
            payload: Vec::new(),
        }
    }

    #[test]
    fn event_kind_returns_stable_tag() {
        let event = TestEvent::Created {
            id: "1".to_string(),
            amount: 100,
        };
        assert_eq!(event.event_kind(), "TestEvent.Created.v1");
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn payload_serialization_roundtrip() {
        let event = TestEvent::AmountUpdated { amount: 250 };
        let bytes = event.to_bytes().expect("serialization should succeed");
        let back = TestEvent::from_bytes(&bytes).expect("deserialization should succeed");
        assert_eq!(event, back);
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = EventFilter::all();
        assert!(filter.matches(&envelope("invoice", "Created.v1")));
        assert!(filter.matches(&envelope("content", "Published.v1")));
    }

    #[test]
    fn aggregate_kind_filter() {
        let filter = EventFilter::for_aggregate_kind("invoice");
        assert!(filter.matches(&envelope("invoice", "Created.v1")));
        assert!(!filter.matches(&envelope("content", "Created.v1")));
    }

    #[test]
    fn combined_filter_requires_both_fields() {
        let filter = EventFilter {
            aggregate_kinds: Some(vec!["invoice".to_string()]),
            event_kinds: Some(vec!["Created.v1".to_string()]),
        };
        assert!(filter.matches(&envelope("invoice", "Created.v1")));
        assert!(!filter.matches(&envelope("invoice", "Deleted.v1")));
        assert!(!filter.matches(&envelope("content", "Created.v1")));
    }

    #[test]
    fn actor_display() {
        assert_eq!(Actor::User("sub".to_string()).to_string(), "user:sub");
        assert_eq!(Actor::System.to_string(), "system");
    }
}
