//! In-memory aggregate state machine with uncommitted-event buffering.
//!
//! A `DomainObject` couples an [`AggregateState`] to its version
//! bookkeeping. Applying an event produces the next version and buffers
//! the event until [`commit`](crate::persistence::Persistence::commit)
//! appends the buffer with the persisted version as the optimistic
//! expectation. On a conflict the buffer is discarded; the caller reloads
//! and retries. There is no implicit retry here.

use crate::state::AggregateState;
use stela_core::event::{Envelope, EventError};
use stela_core::registry::EventRegistry;
use stela_core::stream::{AggregateId, StreamId, Version};

/// One aggregate instance: identity, state, versions, and the buffer of
/// events applied but not yet committed.
#[derive(Clone, Debug)]
pub struct DomainObject<S: AggregateState> {
    id: AggregateId,
    state: S,
    version: Version,
    persisted_version: Version,
    uncommitted: Vec<S::Event>,
}

impl<S: AggregateState> DomainObject<S> {
    /// Fresh instance at version 0 with no event history.
    #[must_use]
    pub fn create(id: AggregateId) -> Self {
        let state = S::new(&id);
        Self {
            id,
            state,
            version: Version::INITIAL,
            persisted_version: Version::INITIAL,
            uncommitted: Vec::new(),
        }
    }

    /// Rehydrate from a snapshot taken at `version`.
    ///
    /// The caller (the persistence binder) replays post-snapshot events on
    /// top via [`replay`](Self::replay).
    #[must_use]
    pub const fn from_snapshot(id: AggregateId, state: S, version: Version) -> Self {
        Self {
            id,
            state,
            version,
            persisted_version: version,
            uncommitted: Vec::new(),
        }
    }

    /// The instance id.
    #[must_use]
    pub const fn id(&self) -> &AggregateId {
        &self.id
    }

    /// The stream this instance is bound to.
    #[must_use]
    pub fn stream(&self) -> StreamId {
        StreamId::for_aggregate(S::KIND, &self.id)
    }

    /// Current state, including uncommitted mutations.
    #[must_use]
    pub const fn state(&self) -> &S {
        &self.state
    }

    /// Current version, including uncommitted events.
    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Version the log has durably confirmed.
    #[must_use]
    pub const fn persisted_version(&self) -> Version {
        self.persisted_version
    }

    /// Whether there are events applied but not yet committed.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    /// Events applied since the last commit, in application order.
    #[must_use]
    pub fn uncommitted(&self) -> &[S::Event] {
        &self.uncommitted
    }

    /// Fold an event into the state, advance the version by exactly one,
    /// and buffer the event for the next commit.
    pub fn apply(&mut self, event: S::Event) {
        self.state.apply(&event);
        self.version = self.version.next();
        self.uncommitted.push(event);
    }

    /// Run a command against the current state and apply every produced
    /// event.
    ///
    /// Returns how many events were produced. A rejected command leaves
    /// the state, version, and buffer untouched.
    ///
    /// # Errors
    ///
    /// Propagates the aggregate's domain error from
    /// [`AggregateState::handle`].
    pub fn execute(&mut self, command: &S::Command) -> Result<usize, S::Error> {
        let events = self.state.handle(command)?;
        let count = events.len();
        for event in events {
            self.apply(event);
        }
        Ok(count)
    }

    /// Fold an already-committed stored envelope into the state during
    /// load, without touching the uncommitted buffer.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::UnknownKind`] or
    /// [`EventError::Deserialization`] from registry dispatch.
    pub fn replay(
        &mut self,
        registry: &EventRegistry<S>,
        envelope: &Envelope,
    ) -> Result<(), EventError> {
        registry.apply(&mut self.state, &envelope.event_kind, &envelope.payload)?;
        self.version = envelope.stream_position;
        self.persisted_version = envelope.stream_position;
        Ok(())
    }

    /// Record that the uncommitted buffer was durably appended and the
    /// stream now sits at `new_version`.
    pub fn mark_committed(&mut self, new_version: Version) {
        self.persisted_version = new_version;
        self.version = new_version;
        self.uncommitted.clear();
    }

    /// Throw away uncommitted events after a version conflict.
    ///
    /// The in-memory state is stale after this call; the caller must
    /// reload before handling further commands.
    pub fn discard_uncommitted(&mut self) {
        self.uncommitted.clear();
        self.version = self.persisted_version;
    }
}
