//! Snapshot rebuilder: regenerate aggregate snapshots by full replay.
//!
//! Walks the log in commit order through the event registry, folds each
//! stream's events into fresh state, and rewrites snapshots in place.
//! Snapshots are a cache, so an interrupted run leaves the system no
//! worse than "needs another rebuild"; the log and consumer checkpoints
//! are never touched.

use std::collections::HashMap;
use std::sync::Arc;
use stela_aggregate::{AggregateState, registry_for};
use stela_core::event::{EventError, EventFilter};
use stela_core::event_log::{EventLog, EventLogError};
use stela_core::registry::EventRegistry;
use stela_core::snapshot::{Snapshot, SnapshotError, SnapshotStore};
use stela_core::stream::{Position, StreamId, Version};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

/// Errors from a rebuild run.
#[derive(Error, Debug)]
pub enum RebuildError {
    /// Reading the log failed.
    #[error(transparent)]
    Log(#[from] EventLogError),

    /// Writing a snapshot failed.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// A stored event had an unregistered kind or an undecodable
    /// payload.
    #[error(transparent)]
    Event(#[from] EventError),
}

/// What a rebuild run accomplished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RebuildReport {
    /// Events folded during the run.
    pub events_processed: u64,

    /// Distinct streams whose snapshots were rewritten.
    pub streams_rebuilt: usize,

    /// `false` when the run was interrupted before reaching the end of
    /// the log.
    pub completed: bool,

    /// Log position the replay cursor reached.
    pub position: Position,
}

struct StreamState<S> {
    state: S,
    version: Version,
    dirty: bool,
}

/// Rebuilds the snapshots of one aggregate kind.
pub struct Rebuilder<S: AggregateState> {
    log: Arc<dyn EventLog>,
    snapshots: Arc<dyn SnapshotStore>,
    registry: EventRegistry<S>,
    page_size: usize,
    flush_every: u64,
}

impl<S: AggregateState> Rebuilder<S> {
    /// Rebuilder reading 256-event pages and flushing snapshots every
    /// 100 events.
    #[must_use]
    pub fn new(log: Arc<dyn EventLog>, snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self {
            log,
            snapshots,
            registry: registry_for::<S>(),
            page_size: 256,
            flush_every: 100,
        }
    }

    /// How many events are read per `read_all` page.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Flush dirty snapshots every `flush_every` processed events, in
    /// addition to the flush at completion. `0` flushes only at the end.
    #[must_use]
    pub const fn with_flush_every(mut self, flush_every: u64) -> Self {
        self.flush_every = flush_every;
        self
    }

    /// Run the rebuild to the end of the log.
    ///
    /// # Errors
    ///
    /// See [`RebuildError`]; the replay stops at the first failure and
    /// whatever was flushed so far stays written.
    pub async fn run_to_completion(&self) -> Result<RebuildReport, RebuildError> {
        let (_keep_alive, never_stopped) = watch::channel(false);
        self.run(never_stopped).await
    }

    /// Run the rebuild until the end of the log or until `stop` turns
    /// `true`, whichever comes first.
    ///
    /// Interruption is honored between pages. The report says whether
    /// the run completed.
    ///
    /// # Errors
    ///
    /// See [`RebuildError`].
    pub async fn run(&self, stop: watch::Receiver<bool>) -> Result<RebuildReport, RebuildError> {
        let filter = EventFilter::for_aggregate_kind(S::KIND);
        let mut states: HashMap<StreamId, StreamState<S>> = HashMap::new();
        let mut cursor = Position::START;
        let mut events_processed: u64 = 0;
        let mut since_flush: u64 = 0;

        info!(kind = S::KIND, "snapshot rebuild starting");
        let completed = loop {
            if *stop.borrow() {
                warn!(kind = S::KIND, position = %cursor, "rebuild interrupted");
                break false;
            }

            let page = self
                .log
                .read_all(cursor, filter.clone(), self.page_size)
                .await?;
            if page.is_empty() {
                break true;
            }

            for event in &page {
                let entry = states.entry(event.stream.clone()).or_insert_with(|| {
                    StreamState {
                        state: S::new(&event.envelope.aggregate_id),
                        version: Version::INITIAL,
                        dirty: false,
                    }
                });
                self.registry.apply(
                    &mut entry.state,
                    &event.envelope.event_kind,
                    &event.envelope.payload,
                )?;
                entry.version = event.envelope.stream_position;
                entry.dirty = true;
                cursor = event.position;
                events_processed += 1;
                since_flush += 1;
            }

            if self.flush_every > 0 && since_flush >= self.flush_every {
                self.flush(&mut states).await?;
                since_flush = 0;
            }
        };

        self.flush(&mut states).await?;
        // Every tracked stream was flushed at least once by now.
        let streams_rebuilt = states.len();
        info!(
            kind = S::KIND,
            events = events_processed,
            streams = streams_rebuilt,
            completed,
            "snapshot rebuild finished"
        );
        Ok(RebuildReport {
            events_processed,
            streams_rebuilt,
            completed,
            position: cursor,
        })
    }

    /// Write every dirty stream's snapshot.
    async fn flush(
        &self,
        states: &mut HashMap<StreamId, StreamState<S>>,
    ) -> Result<(), RebuildError> {
        for (stream, entry) in states.iter_mut() {
            if !entry.dirty {
                continue;
            }
            let state = bincode::serialize(&entry.state)
                .map_err(|e| EventError::Serialization(e.to_string()))?;
            self.snapshots
                .write(Snapshot {
                    key: stream.clone(),
                    version: entry.version,
                    type_tag: S::KIND.to_string(),
                    state,
                })
                .await?;
            entry.dirty = false;
        }
        Ok(())
    }
}
