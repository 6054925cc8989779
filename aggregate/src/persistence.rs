//! Binds a [`DomainObject`] to the event log and the snapshot cache.
//!
//! Loading prefers a snapshot and replays only the events committed after
//! it; a missing, mismatched, or unreadable snapshot degrades to a full
//! replay. Committing appends the uncommitted buffer with the persisted
//! version as the optimistic expectation, then writes a fresh snapshot on
//! a best-effort basis. Snapshot failures never fail a command.

use crate::domain_object::DomainObject;
use crate::state::{AggregateState, registry_for};
use std::sync::Arc;
use stela_core::clock::Clock;
use stela_core::event::{Actor, Envelope, Event, EventError};
use stela_core::event_log::{EventLog, EventLogError};
use stela_core::registry::EventRegistry;
use stela_core::snapshot::{Snapshot, SnapshotStore};
use stela_core::stream::{AggregateId, StreamId, Version};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from aggregate load and commit.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// The event log rejected or failed the operation.
    #[error(transparent)]
    Log(#[from] EventLogError),

    /// A stored event could not be decoded or applied during replay, or
    /// an uncommitted event could not be serialized.
    #[error(transparent)]
    Event(#[from] EventError),
}

impl PersistenceError {
    /// Whether this error is an optimistic concurrency conflict.
    ///
    /// After a conflict the caller must reload the aggregate and
    /// re-handle the command against fresh state.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Log(EventLogError::VersionConflict { .. }))
    }
}

/// Loads and commits aggregates of one kind.
///
/// Holds the shared collaborators and the kind's event registry, built
/// once from [`AggregateState::event_kinds`]. Cheap to clone is not a
/// goal; share it behind an `Arc` per aggregate kind.
pub struct Persistence<S: AggregateState> {
    log: Arc<dyn EventLog>,
    snapshots: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    registry: EventRegistry<S>,
    snapshot_every: u64,
}

impl<S: AggregateState> Persistence<S> {
    /// Create a binder writing a snapshot after every commit.
    #[must_use]
    pub fn new(
        log: Arc<dyn EventLog>,
        snapshots: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            log,
            snapshots,
            clock,
            registry: registry_for::<S>(),
            snapshot_every: 1,
        }
    }

    /// Write a snapshot only when the new version is a multiple of
    /// `every`. `0` disables snapshotting entirely.
    #[must_use]
    pub const fn with_snapshot_every(mut self, every: u64) -> Self {
        self.snapshot_every = every;
        self
    }

    /// Load an aggregate: snapshot first, then replay the events
    /// committed after it. A missing stream loads as a fresh version-0
    /// instance.
    ///
    /// # Errors
    ///
    /// - [`PersistenceError::Log`]: the event log is unavailable.
    /// - [`PersistenceError::Event`]: a stored event has an unregistered
    ///   kind or an undecodable payload.
    pub async fn load(&self, id: AggregateId) -> Result<DomainObject<S>, PersistenceError> {
        let stream = StreamId::for_aggregate(S::KIND, &id);

        let mut object = match self.read_snapshot(&stream).await {
            Some((state, version)) => {
                debug!(stream = %stream, version = %version, "loaded from snapshot");
                DomainObject::from_snapshot(id, state, version)
            }
            None => DomainObject::create(id),
        };

        let from = if object.version().is_initial() {
            None
        } else {
            Some(object.version().next())
        };
        let stored = self.log.read_stream(stream.clone(), from).await?;
        let replayed = stored.len();
        for event in &stored {
            object.replay(&self.registry, &event.envelope)?;
        }

        debug!(
            stream = %stream,
            version = %object.version(),
            replayed,
            "aggregate loaded"
        );
        Ok(object)
    }

    /// Commit the aggregate's uncommitted events atomically.
    ///
    /// All events in the buffer share one commit id and timestamp, and are
    /// appended with `expected_version = persisted_version`. On success
    /// the buffer is cleared and a snapshot is written best-effort. On a
    /// version conflict the buffer is discarded and the error returned;
    /// the caller reloads and re-decides. A no-op commit (empty buffer)
    /// returns the current version without touching the log.
    ///
    /// # Errors
    ///
    /// - [`PersistenceError::Log`]: version conflict or log failure.
    /// - [`PersistenceError::Event`]: an event payload failed to
    ///   serialize; nothing was appended.
    pub async fn commit(
        &self,
        object: &mut DomainObject<S>,
        actor: Actor,
    ) -> Result<Version, PersistenceError> {
        if !object.is_dirty() {
            return Ok(object.persisted_version());
        }

        let stream = object.stream();
        let expected = object.persisted_version();
        let envelopes = self.stamp(object, &actor)?;
        let count = envelopes.len();

        match self
            .log
            .append(stream.clone(), Some(expected), envelopes)
            .await
        {
            Ok(new_version) => {
                object.mark_committed(new_version);
                debug!(
                    stream = %stream,
                    version = %new_version,
                    events = count,
                    actor = %actor,
                    "commit succeeded"
                );
                self.maybe_snapshot(&stream, object).await;
                Ok(new_version)
            }
            Err(error) => {
                if matches!(error, EventLogError::VersionConflict { .. }) {
                    warn!(
                        stream = %stream,
                        expected = %expected,
                        "version conflict, discarding uncommitted events"
                    );
                    object.discard_uncommitted();
                }
                Err(error.into())
            }
        }
    }

    /// Commit several aggregates of this kind in one pass.
    ///
    /// Each aggregate's append is independently atomic; a failure for one
    /// never commits partial events for another, and later aggregates are
    /// still attempted. Outcomes are returned per aggregate, in input
    /// order.
    pub async fn commit_all(
        &self,
        objects: &mut [DomainObject<S>],
        actor: Actor,
    ) -> Vec<Result<Version, PersistenceError>> {
        let mut outcomes = Vec::with_capacity(objects.len());
        for object in objects.iter_mut() {
            outcomes.push(self.commit(object, actor.clone()).await);
        }
        outcomes
    }

    /// Stamp the uncommitted buffer into envelopes.
    ///
    /// Event `i` of the buffer gets stream position
    /// `persisted_version + i + 1`; the whole batch shares one commit id
    /// and timestamp.
    fn stamp(
        &self,
        object: &DomainObject<S>,
        actor: &Actor,
    ) -> Result<Vec<Envelope>, EventError> {
        let commit_id = uuid::Uuid::new_v4();
        let timestamp = self.clock.now();

        let mut position = object.persisted_version();
        let mut envelopes = Vec::with_capacity(object.uncommitted().len());
        for event in object.uncommitted() {
            position = position.next();
            envelopes.push(Envelope {
                event_id: uuid::Uuid::new_v4(),
                event_kind: event.event_kind().to_string(),
                aggregate_id: object.id().clone(),
                aggregate_kind: S::KIND.to_string(),
                stream_position: position,
                commit_id,
                timestamp,
                actor: actor.clone(),
                payload: event.to_bytes()?,
            });
        }
        Ok(envelopes)
    }

    /// Read and validate the snapshot for a stream.
    ///
    /// Degrades to `None` (full replay) on store failure, a type-tag
    /// mismatch, or an undecodable state blob. Snapshots are a cache, not
    /// a source of truth.
    async fn read_snapshot(&self, stream: &StreamId) -> Option<(S, Version)> {
        let snapshot = match self.snapshots.read(stream.clone()).await {
            Ok(found) => found?,
            Err(error) => {
                warn!(stream = %stream, %error, "snapshot read failed, replaying from scratch");
                return None;
            }
        };

        if snapshot.type_tag != S::KIND {
            warn!(
                stream = %stream,
                found = %snapshot.type_tag,
                expected = S::KIND,
                "snapshot type tag mismatch, replaying from scratch"
            );
            return None;
        }

        match bincode::deserialize::<S>(&snapshot.state) {
            Ok(state) => Some((state, snapshot.version)),
            Err(error) => {
                warn!(stream = %stream, %error, "snapshot state undecodable, replaying from scratch");
                None
            }
        }
    }

    /// Write a snapshot after a successful commit, best-effort.
    async fn maybe_snapshot(&self, stream: &StreamId, object: &DomainObject<S>) {
        if self.snapshot_every == 0 || object.version().value() % self.snapshot_every != 0 {
            return;
        }

        let state = match bincode::serialize(object.state()) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(stream = %stream, %error, "snapshot serialization failed, skipping");
                return;
            }
        };

        let snapshot = Snapshot {
            key: stream.clone(),
            version: object.version(),
            type_tag: S::KIND.to_string(),
            state,
        };
        if let Err(error) = self.snapshots.write(snapshot).await {
            warn!(stream = %stream, %error, "snapshot write failed, command still succeeded");
        }
    }
}

impl<S: AggregateState> std::fmt::Debug for Persistence<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("kind", &S::KIND)
            .field("snapshot_every", &self.snapshot_every)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use stela_testing::clock::FixedClock;
    use stela_testing::event_log::InMemoryEventLog;
    use stela_testing::snapshots::InMemorySnapshotStore;

    #[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Ledger {
        balance: i64,
    }

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    enum LedgerEvent {
        Deposited(i64),
        Withdrawn(i64),
    }

    impl Event for LedgerEvent {
        fn event_kind(&self) -> &'static str {
            match self {
                Self::Deposited(_) => "Ledger.Deposited.v1",
                Self::Withdrawn(_) => "Ledger.Withdrawn.v1",
            }
        }
    }

    #[derive(Debug, thiserror::Error)]
    enum LedgerError {
        #[error("insufficient funds")]
        InsufficientFunds,
    }

    enum LedgerCommand {
        Deposit(i64),
        Withdraw(i64),
    }

    impl AggregateState for Ledger {
        const KIND: &'static str = "ledger";
        type Command = LedgerCommand;
        type Event = LedgerEvent;
        type Error = LedgerError;

        fn new(_id: &AggregateId) -> Self {
            Self::default()
        }

        fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
            match command {
                LedgerCommand::Deposit(amount) => Ok(vec![LedgerEvent::Deposited(*amount)]),
                LedgerCommand::Withdraw(amount) => {
                    if *amount > self.balance {
                        return Err(LedgerError::InsufficientFunds);
                    }
                    Ok(vec![LedgerEvent::Withdrawn(*amount)])
                }
            }
        }

        fn apply(&mut self, event: &Self::Event) {
            match event {
                LedgerEvent::Deposited(amount) => self.balance += amount,
                LedgerEvent::Withdrawn(amount) => self.balance -= amount,
            }
        }

        fn event_kinds() -> &'static [&'static str] {
            &["Ledger.Deposited.v1", "Ledger.Withdrawn.v1"]
        }
    }

    struct Harness {
        log: Arc<InMemoryEventLog>,
        snapshots: Arc<InMemorySnapshotStore>,
        persistence: Persistence<Ledger>,
    }

    fn harness() -> Harness {
        let log = Arc::new(InMemoryEventLog::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let persistence = Persistence::new(
            Arc::clone(&log) as Arc<dyn EventLog>,
            Arc::clone(&snapshots) as Arc<dyn SnapshotStore>,
            Arc::new(FixedClock::default()),
        );
        Harness {
            log,
            snapshots,
            persistence,
        }
    }

    #[tokio::test]
    async fn load_missing_stream_yields_fresh_instance() {
        let h = harness();
        let object = h
            .persistence
            .load(AggregateId::new("a-1"))
            .await
            .expect("load should succeed");
        assert_eq!(object.version(), Version::INITIAL);
        assert!(!object.is_dirty());
    }

    #[tokio::test]
    async fn commit_then_load_reproduces_state() {
        let h = harness();
        let mut object = h
            .persistence
            .load(AggregateId::new("a-1"))
            .await
            .expect("load should succeed");
        object
            .execute(&LedgerCommand::Deposit(100))
            .expect("deposit should succeed");
        object
            .execute(&LedgerCommand::Withdraw(30))
            .expect("withdraw should succeed");

        let version = h
            .persistence
            .commit(&mut object, Actor::System)
            .await
            .expect("commit should succeed");
        assert_eq!(version, Version::new(2));
        assert!(!object.is_dirty());

        let reloaded = h
            .persistence
            .load(AggregateId::new("a-1"))
            .await
            .expect("reload should succeed");
        assert_eq!(reloaded.version(), Version::new(2));
        assert_eq!(reloaded.state().balance, 70);
    }

    #[tokio::test]
    async fn all_events_of_one_commit_share_a_commit_id() {
        let h = harness();
        let mut object = h
            .persistence
            .load(AggregateId::new("a-1"))
            .await
            .expect("load should succeed");
        object
            .execute(&LedgerCommand::Deposit(1))
            .expect("deposit should succeed");
        object
            .execute(&LedgerCommand::Deposit(2))
            .expect("deposit should succeed");
        h.persistence
            .commit(&mut object, Actor::User("u-1".to_string()))
            .await
            .expect("commit should succeed");

        let stored = h
            .log
            .read_stream(StreamId::new("ledger-a-1"), None)
            .await
            .expect("read should succeed");
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].envelope.commit_id, stored[1].envelope.commit_id);
        assert_eq!(stored[0].envelope.stream_position, Version::new(1));
        assert_eq!(stored[1].envelope.stream_position, Version::new(2));
        assert_eq!(
            stored[0].envelope.actor,
            Actor::User("u-1".to_string())
        );
    }

    #[tokio::test]
    async fn stale_commit_conflicts_and_discards_buffer() {
        let h = harness();
        let mut first = h
            .persistence
            .load(AggregateId::new("a-1"))
            .await
            .expect("load should succeed");
        let mut second = first.clone();

        first
            .execute(&LedgerCommand::Deposit(10))
            .expect("deposit should succeed");
        h.persistence
            .commit(&mut first, Actor::System)
            .await
            .expect("first commit should succeed");

        second
            .execute(&LedgerCommand::Deposit(20))
            .expect("deposit should succeed");
        let error = h
            .persistence
            .commit(&mut second, Actor::System)
            .await
            .expect_err("stale commit must conflict");
        assert!(error.is_conflict());
        assert!(!second.is_dirty());

        // Nothing from the losing commit reached the log.
        let stored = h
            .log
            .read_stream(StreamId::new("ledger-a-1"), None)
            .await
            .expect("read should succeed");
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn load_uses_snapshot_and_replays_tail() {
        let h = harness();
        let mut object = h
            .persistence
            .load(AggregateId::new("a-1"))
            .await
            .expect("load should succeed");
        object
            .execute(&LedgerCommand::Deposit(50))
            .expect("deposit should succeed");
        h.persistence
            .commit(&mut object, Actor::System)
            .await
            .expect("commit should succeed");

        // Commit one more event through a binder that never snapshots, so
        // the stored snapshot stays at version 1 and the load has a tail.
        let no_snapshots = Persistence::<Ledger>::new(
            Arc::clone(&h.log) as Arc<dyn EventLog>,
            Arc::clone(&h.snapshots) as Arc<dyn SnapshotStore>,
            Arc::new(FixedClock::default()),
        )
        .with_snapshot_every(0);
        object
            .execute(&LedgerCommand::Deposit(25))
            .expect("deposit should succeed");
        no_snapshots
            .commit(&mut object, Actor::System)
            .await
            .expect("commit should succeed");

        let stored_snapshot = h
            .snapshots
            .read(StreamId::new("ledger-a-1"))
            .await
            .expect("read should succeed")
            .expect("snapshot from the first commit should remain");
        assert_eq!(stored_snapshot.version, Version::new(1));

        let reloaded = h
            .persistence
            .load(AggregateId::new("a-1"))
            .await
            .expect("reload should succeed");
        assert_eq!(reloaded.state().balance, 75);
        assert_eq!(reloaded.version(), Version::new(2));
    }

    #[tokio::test]
    async fn mismatched_snapshot_type_tag_forces_full_replay() {
        let h = harness();
        let mut object = h
            .persistence
            .load(AggregateId::new("a-1"))
            .await
            .expect("load should succeed");
        object
            .execute(&LedgerCommand::Deposit(5))
            .expect("deposit should succeed");
        h.persistence
            .commit(&mut object, Actor::System)
            .await
            .expect("commit should succeed");

        // Overwrite with a snapshot claiming to be another aggregate kind.
        h.snapshots
            .write(Snapshot {
                key: StreamId::new("ledger-a-1"),
                version: Version::new(9),
                type_tag: "invoice".to_string(),
                state: vec![0xDE, 0xAD],
            })
            .await
            .expect("write should succeed");

        let reloaded = h
            .persistence
            .load(AggregateId::new("a-1"))
            .await
            .expect("reload should succeed");
        assert_eq!(reloaded.version(), Version::new(1));
        assert_eq!(reloaded.state().balance, 5);
    }

    #[tokio::test]
    async fn snapshot_failure_does_not_fail_commit() {
        let h = harness();
        h.snapshots.fail_writes(true);

        let mut object = h
            .persistence
            .load(AggregateId::new("a-1"))
            .await
            .expect("load should succeed");
        object
            .execute(&LedgerCommand::Deposit(1))
            .expect("deposit should succeed");
        let version = h
            .persistence
            .commit(&mut object, Actor::System)
            .await
            .expect("commit must succeed despite snapshot failure");
        assert_eq!(version, Version::new(1));
    }

    #[tokio::test]
    async fn snapshot_every_skips_off_interval_versions() {
        let h = harness();
        let persistence = Persistence::<Ledger>::new(
            Arc::clone(&h.log) as Arc<dyn EventLog>,
            Arc::clone(&h.snapshots) as Arc<dyn SnapshotStore>,
            Arc::new(FixedClock::default()),
        )
        .with_snapshot_every(2);

        let mut object = persistence
            .load(AggregateId::new("a-1"))
            .await
            .expect("load should succeed");
        object
            .execute(&LedgerCommand::Deposit(1))
            .expect("deposit should succeed");
        persistence
            .commit(&mut object, Actor::System)
            .await
            .expect("commit should succeed");
        assert!(
            h.snapshots
                .read(StreamId::new("ledger-a-1"))
                .await
                .expect("read should succeed")
                .is_none()
        );

        object
            .execute(&LedgerCommand::Deposit(1))
            .expect("deposit should succeed");
        persistence
            .commit(&mut object, Actor::System)
            .await
            .expect("commit should succeed");
        let snapshot = h
            .snapshots
            .read(StreamId::new("ledger-a-1"))
            .await
            .expect("read should succeed")
            .expect("snapshot should exist at version 2");
        assert_eq!(snapshot.version, Version::new(2));
    }

    #[tokio::test]
    async fn commit_all_isolates_failures_per_aggregate() {
        let h = harness();
        let mut healthy = h
            .persistence
            .load(AggregateId::new("a-1"))
            .await
            .expect("load should succeed");
        healthy
            .execute(&LedgerCommand::Deposit(10))
            .expect("deposit should succeed");

        // A second writer bumps a-2 so the stale copy below conflicts.
        let mut winner = h
            .persistence
            .load(AggregateId::new("a-2"))
            .await
            .expect("load should succeed");
        let mut stale = winner.clone();
        winner
            .execute(&LedgerCommand::Deposit(1))
            .expect("deposit should succeed");
        h.persistence
            .commit(&mut winner, Actor::System)
            .await
            .expect("commit should succeed");
        stale
            .execute(&LedgerCommand::Deposit(2))
            .expect("deposit should succeed");

        let mut batch = [healthy, stale];
        let outcomes = h.persistence.commit_all(&mut batch, Actor::System).await;
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0], Ok(version) if version == Version::new(1)));
        assert!(outcomes[1].as_ref().is_err_and(PersistenceError::is_conflict));

        // The healthy aggregate's events fully committed.
        let stored = h
            .log
            .read_stream(StreamId::new("ledger-a-1"), None)
            .await
            .expect("read should succeed");
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn empty_buffer_commit_is_a_no_op() {
        let h = harness();
        let mut object = h
            .persistence
            .load(AggregateId::new("a-1"))
            .await
            .expect("load should succeed");
        let version = h
            .persistence
            .commit(&mut object, Actor::System)
            .await
            .expect("no-op commit should succeed");
        assert_eq!(version, Version::INITIAL);
        assert!(
            h.log
                .read_stream(StreamId::new("ledger-a-1"), None)
                .await
                .expect("read should succeed")
                .is_empty()
        );
    }
}
