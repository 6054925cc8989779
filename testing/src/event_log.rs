//! In-memory event log with fault injection.
//!
//! Backs the whole test suite: optimistic-version appends, global commit
//! order, and live batch subscriptions over a `Notify`. Fault hooks cover
//! the failure modes the runtime must tolerate: append outages, refused
//! subscriptions, and forced redelivery (the at-least-once reconnect
//! case).

use async_stream::stream;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use stela_core::event::{Envelope, EventFilter, StoredEvent};
use stela_core::event_log::{EventBatchStream, EventLog, EventLogError};
use stela_core::stream::{Position, StreamId, Version};
use tokio::sync::Notify;

const DEFAULT_BATCH_SIZE: usize = 64;

struct LogInner {
    all: Vec<StoredEvent>,
    stream_versions: HashMap<StreamId, Version>,
    last_position: Position,
    fail_appends: bool,
    fail_next_subscribes: u32,
    rewind_epoch: u64,
    rewind_to: Position,
}

impl Default for LogInner {
    fn default() -> Self {
        Self {
            all: Vec::new(),
            stream_versions: HashMap::new(),
            last_position: Position::START,
            fail_appends: false,
            fail_next_subscribes: 0,
            rewind_epoch: 0,
            rewind_to: Position::START,
        }
    }
}

struct Shared {
    inner: Mutex<LogInner>,
    notify: Notify,
}

/// In-memory [`EventLog`] for tests.
///
/// Subscriptions deliver batches of up to `batch_size` events, historical
/// first, then live as appends arrive.
pub struct InMemoryEventLog {
    shared: Arc<Shared>,
    batch_size: usize,
}

impl InMemoryEventLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(LogInner::default()),
                notify: Notify::new(),
            }),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Cap delivered batches at `batch_size` events.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Make every append fail with [`EventLogError::Unavailable`] until
    /// turned off again.
    pub fn fail_appends(&self, fail: bool) {
        self.lock().fail_appends = fail;
    }

    /// Refuse the next `count` subscribe calls with
    /// [`EventLogError::SubscriptionLost`].
    pub fn fail_next_subscribes(&self, count: u32) {
        self.lock().fail_next_subscribes = count;
    }

    /// Force every live subscription to rewind its cursor to `position`
    /// and redeliver everything after it.
    ///
    /// Models a reconnect that re-sends events the subscriber already
    /// processed since its last checkpoint.
    pub fn redeliver_after(&self, position: Position) {
        {
            let mut inner = self.lock();
            inner.rewind_epoch += 1;
            inner.rewind_to = position;
        }
        self.shared.notify.notify_waiters();
    }

    /// Number of committed events across all streams.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().all.len()
    }

    /// Whether the log holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().all.is_empty()
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, LogInner> {
        self.shared.inner.lock().expect("event log lock poisoned")
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog for InMemoryEventLog {
    fn append(
        &self,
        stream: StreamId,
        expected_version: Option<Version>,
        envelopes: Vec<Envelope>,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Version, EventLogError>> + Send + '_>,
    > {
        Box::pin(async move {
            let new_version = {
                let mut inner = self.lock();
                if inner.fail_appends {
                    return Err(EventLogError::Unavailable(
                        "append fault injected".to_string(),
                    ));
                }

                let current = inner
                    .stream_versions
                    .get(&stream)
                    .copied()
                    .unwrap_or(Version::INITIAL);
                if let Some(expected) = expected_version {
                    if expected != current {
                        return Err(EventLogError::VersionConflict {
                            stream,
                            expected,
                            actual: current,
                        });
                    }
                }

                let mut version = current;
                for envelope in envelopes {
                    version = version.next();
                    inner.last_position = inner.last_position.next();
                    let position = inner.last_position;
                    inner.all.push(StoredEvent {
                        position,
                        stream: stream.clone(),
                        envelope,
                    });
                }
                inner.stream_versions.insert(stream, version);
                version
            };
            self.shared.notify.notify_waiters();
            Ok(new_version)
        })
    }

    fn read_stream(
        &self,
        stream: StreamId,
        from: Option<Version>,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Vec<StoredEvent>, EventLogError>> + Send + '_>,
    > {
        Box::pin(async move {
            let inner = self.lock();
            let from = from.unwrap_or(Version::INITIAL.next());
            Ok(inner
                .all
                .iter()
                .filter(|e| e.stream == stream && e.envelope.stream_position >= from)
                .cloned()
                .collect())
        })
    }

    fn read_all(
        &self,
        from: Position,
        filter: EventFilter,
        limit: usize,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Vec<StoredEvent>, EventLogError>> + Send + '_>,
    > {
        Box::pin(async move {
            let inner = self.lock();
            Ok(inner
                .all
                .iter()
                .filter(|e| e.position > from && filter.matches(&e.envelope))
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn subscribe(
        &self,
        filter: EventFilter,
        from: Position,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<EventBatchStream, EventLogError>> + Send + '_>,
    > {
        let shared = Arc::clone(&self.shared);
        let batch_size = self.batch_size;
        Box::pin(async move {
            {
                let mut inner = shared
                    .inner
                    .lock()
                    .map_err(|_| EventLogError::Unavailable("lock poisoned".to_string()))?;
                if inner.fail_next_subscribes > 0 {
                    inner.fail_next_subscribes -= 1;
                    return Err(EventLogError::SubscriptionLost(
                        "subscribe fault injected".to_string(),
                    ));
                }
            }

            let stream = stream! {
                let mut cursor = from;
                let mut seen_epoch = {
                    // Finish the lock before matching so the guard is not
                    // held across the yield's await point (Send bound).
                    let epoch = shared.inner.lock().map(|inner| inner.rewind_epoch).map_err(|_| ());
                    match epoch {
                        Ok(epoch) => epoch,
                        Err(()) => {
                            yield Err(EventLogError::Unavailable("lock poisoned".to_string()));
                            return;
                        }
                    }
                };
                loop {
                    // Register for wakeups before scanning, so an append
                    // landing right after the scan still wakes us.
                    let notified = shared.notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();
                    let batch: Result<Vec<StoredEvent>, ()> = shared
                        .inner
                        .lock()
                        .map(|inner| {
                            if inner.rewind_epoch != seen_epoch {
                                seen_epoch = inner.rewind_epoch;
                                cursor = cursor.min(inner.rewind_to);
                            }
                            inner
                                .all
                                .iter()
                                .filter(|e| e.position > cursor && filter.matches(&e.envelope))
                                .take(batch_size)
                                .cloned()
                                .collect()
                        })
                        .map_err(|_| ());
                    let batch: Vec<StoredEvent> = match batch {
                        Ok(batch) => batch,
                        Err(()) => {
                            yield Err(EventLogError::Unavailable("lock poisoned".to_string()));
                            return;
                        }
                    };
                    if let Some(last) = batch.last() {
                        cursor = last.position;
                        yield Ok(batch);
                    } else {
                        notified.await;
                    }
                }
            };
            Ok(Box::pin(stream) as EventBatchStream)
        })
    }
}
