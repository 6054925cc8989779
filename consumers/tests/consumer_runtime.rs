//! Consumer lifecycle, checkpointing, and at-least-once behaviour.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic, missing_docs)]

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stela_aggregate::Persistence;
use stela_consumers::runtime::{ConsumerRuntime, ControlError};
use stela_consumers::{ConsumerError, EventConsumer};
use stela_core::checkpoint::ConsumerStatus;
use stela_core::clock::Clock;
use stela_core::event::{Actor, EventFilter, StoredEvent};
use stela_core::event_log::EventLog;
use stela_core::snapshot::SnapshotStore;
use stela_core::stream::{AggregateId, Position};
use stela_runtime::retry::RetryPolicy;
use stela_testing::fixtures::{Invoice, InvoiceCommand};
use stela_testing::{FixedClock, InMemoryCheckpointStore, InMemoryEventLog, InMemorySnapshotStore};

/// Records every handled position; can be told to fail once at a given
/// position.
struct Recorder {
    name: String,
    handled: Mutex<Vec<u64>>,
    cleared: AtomicBool,
    fail_once_at: Mutex<Option<u64>>,
}

impl Recorder {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            handled: Mutex::new(Vec::new()),
            cleared: AtomicBool::new(false),
            fail_once_at: Mutex::new(None),
        })
    }

    fn fail_once_at(&self, position: u64) {
        *self.fail_once_at.lock().expect("lock poisoned") = Some(position);
    }

    fn handled(&self) -> Vec<u64> {
        self.handled.lock().expect("lock poisoned").clone()
    }
}

impl EventConsumer for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn filter(&self) -> EventFilter {
        EventFilter::all()
    }

    fn handle<'a>(
        &'a self,
        event: &'a StoredEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), ConsumerError>> + Send + 'a>> {
        Box::pin(async move {
            let position = event.position.value();
            {
                let mut fail_at = self.fail_once_at.lock().expect("lock poisoned");
                if *fail_at == Some(position) {
                    *fail_at = None;
                    return Err(ConsumerError::Handler(format!(
                        "injected failure at {position}"
                    )));
                }
            }
            self.handled.lock().expect("lock poisoned").push(position);
            Ok(())
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<(), ConsumerError>> + Send + '_>> {
        Box::pin(async move {
            self.handled.lock().expect("lock poisoned").clear();
            self.cleared.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

struct Fixture {
    log: Arc<InMemoryEventLog>,
    checkpoints: Arc<InMemoryCheckpointStore>,
    persistence: Persistence<Invoice>,
    runtime: ConsumerRuntime,
}

fn fixture(batch_size: usize) -> Fixture {
    let log = Arc::new(InMemoryEventLog::new().with_batch_size(batch_size));
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let persistence = Persistence::new(
        Arc::clone(&log) as Arc<dyn EventLog>,
        Arc::new(InMemorySnapshotStore::new()) as Arc<dyn SnapshotStore>,
        Arc::new(FixedClock::default()) as Arc<dyn Clock>,
    );
    let runtime = ConsumerRuntime::new(
        Arc::clone(&log) as Arc<dyn EventLog>,
        Arc::clone(&checkpoints) as Arc<dyn stela_core::checkpoint::CheckpointStore>,
    )
    .with_resubscribe_policy(
        RetryPolicy::builder()
            .max_retries(3)
            .initial_delay(Duration::from_millis(1))
            .build(),
    );
    Fixture {
        log,
        checkpoints,
        persistence,
        runtime,
    }
}

/// Commit `count` single-event commands, each to its own invoice.
async fn append_events(fixture: &Fixture, start: u64, count: u64) {
    for n in start..start + count {
        let mut invoice = fixture
            .persistence
            .load(AggregateId::new(format!("inv-{n}")))
            .await
            .expect("load should succeed");
        invoice
            .execute(&InvoiceCommand::Create { amount: 100 })
            .expect("create should succeed");
        fixture
            .persistence
            .commit(&mut invoice, Actor::System)
            .await
            .expect("commit should succeed");
    }
}

async fn wait_for_position(fixture: &Fixture, name: &str, position: u64) {
    for _ in 0..400 {
        if fixture
            .checkpoints
            .get(name)
            .is_some_and(|c| c.position >= Position::new(position))
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("consumer {name} never reached position {position}");
}

async fn wait_for_status(fixture: &Fixture, name: &str, status: ConsumerStatus) {
    for _ in 0..400 {
        if fixture.checkpoints.get(name).is_some_and(|c| c.status == status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("consumer {name} never reached status {status}");
}

#[tokio::test]
async fn processes_history_then_live_events_in_order() {
    stela_testing::init_tracing();
    let fixture = fixture(7);
    append_events(&fixture, 1, 10).await;

    let recorder = Recorder::new("search-index");
    fixture.runtime.register(recorder.clone()).await;
    fixture.runtime.start("search-index").await.expect("start");
    wait_for_position(&fixture, "search-index", 10).await;

    append_events(&fixture, 11, 5).await;
    wait_for_position(&fixture, "search-index", 15).await;

    assert_eq!(recorder.handled(), (1..=15).collect::<Vec<u64>>());
    fixture.runtime.stop("search-index").await.expect("stop");
}

#[tokio::test]
async fn redelivery_within_the_seen_window_is_absorbed() {
    let fixture = fixture(10);
    append_events(&fixture, 1, 85).await;

    let recorder = Recorder::new("dedup");
    fixture.runtime.register(recorder.clone()).await;
    fixture.runtime.start("dedup").await.expect("start");
    wait_for_position(&fixture, "dedup", 85).await;

    // The log re-sends everything after position 80, as a reconnect
    // would; then fresh events arrive.
    fixture.log.redeliver_after(Position::new(80));
    append_events(&fixture, 86, 15).await;
    wait_for_position(&fixture, "dedup", 100).await;

    // End state matches an uninterrupted run: each event exactly once.
    assert_eq!(recorder.handled(), (1..=100).collect::<Vec<u64>>());
    fixture.runtime.stop("dedup").await.expect("stop");
}

#[tokio::test]
async fn stop_then_start_resumes_exactly_at_the_checkpoint() {
    let fixture = fixture(5);
    append_events(&fixture, 1, 10).await;

    let recorder = Recorder::new("resume");
    fixture.runtime.register(recorder.clone()).await;
    fixture.runtime.start("resume").await.expect("start");
    wait_for_position(&fixture, "resume", 10).await;
    fixture.runtime.stop("resume").await.expect("stop");

    let stopped = fixture
        .runtime
        .status("resume")
        .await
        .expect("status should load");
    assert_eq!(stopped.status, ConsumerStatus::Stopped);
    assert_eq!(stopped.position, Position::new(10));

    append_events(&fixture, 11, 5).await;
    fixture.runtime.start("resume").await.expect("restart");
    wait_for_position(&fixture, "resume", 15).await;

    // No event skipped, none handled twice.
    assert_eq!(recorder.handled(), (1..=15).collect::<Vec<u64>>());
    fixture.runtime.stop("resume").await.expect("stop");
}

#[tokio::test]
async fn handler_failure_halts_without_advancing_the_checkpoint() {
    let fixture = fixture(1);
    append_events(&fixture, 1, 6).await;

    let recorder = Recorder::new("fragile");
    recorder.fail_once_at(5);
    fixture.runtime.register(recorder.clone()).await;
    fixture.runtime.start("fragile").await.expect("start");
    wait_for_status(&fixture, "fragile", ConsumerStatus::Failed).await;

    let failed = fixture
        .runtime
        .status("fragile")
        .await
        .expect("status should load");
    assert_eq!(failed.position, Position::new(4));
    assert!(
        failed
            .last_error
            .as_deref()
            .is_some_and(|error| error.contains("injected failure at 5"))
    );
    // Dispatch halted: nothing past the failure was handled.
    assert_eq!(recorder.handled(), vec![1, 2, 3, 4]);

    // Explicit restart redelivers the failed event and continues.
    fixture.runtime.start("fragile").await.expect("restart");
    wait_for_position(&fixture, "fragile", 6).await;
    assert_eq!(recorder.handled(), (1..=6).collect::<Vec<u64>>());
    fixture.runtime.stop("fragile").await.expect("stop");
}

#[tokio::test]
async fn transient_subscription_loss_is_retried() {
    let fixture = fixture(10);
    append_events(&fixture, 1, 3).await;
    fixture.log.fail_next_subscribes(2);

    let recorder = Recorder::new("persistent");
    fixture.runtime.register(recorder.clone()).await;
    fixture.runtime.start("persistent").await.expect("start");
    wait_for_position(&fixture, "persistent", 3).await;

    assert_eq!(recorder.handled(), vec![1, 2, 3]);
    fixture.runtime.stop("persistent").await.expect("stop");
}

#[tokio::test]
async fn reset_zeroes_the_checkpoint_and_clears_derived_state() {
    let fixture = fixture(10);
    append_events(&fixture, 1, 4).await;

    let recorder = Recorder::new("rebuildable");
    fixture.runtime.register(recorder.clone()).await;
    fixture.runtime.start("rebuildable").await.expect("start");
    wait_for_position(&fixture, "rebuildable", 4).await;

    // Reset is refused while the worker runs.
    assert!(matches!(
        fixture.runtime.reset("rebuildable").await,
        Err(ControlError::StillRunning(_))
    ));

    fixture.runtime.stop("rebuildable").await.expect("stop");
    fixture.runtime.reset("rebuildable").await.expect("reset");
    assert!(recorder.cleared.load(Ordering::SeqCst));

    let zeroed = fixture
        .runtime
        .status("rebuildable")
        .await
        .expect("status should load");
    assert_eq!(zeroed.position, Position::START);

    // Restart replays from the beginning.
    fixture.runtime.start("rebuildable").await.expect("restart");
    wait_for_position(&fixture, "rebuildable", 4).await;
    assert_eq!(recorder.handled(), vec![1, 2, 3, 4]);
    fixture.runtime.stop("rebuildable").await.expect("stop");
}

#[tokio::test]
async fn lifecycle_misuse_is_rejected() {
    let fixture = fixture(10);
    let recorder = Recorder::new("strict");
    fixture.runtime.register(recorder).await;

    assert!(matches!(
        fixture.runtime.start("missing").await,
        Err(ControlError::UnknownConsumer(_))
    ));

    fixture.runtime.start("strict").await.expect("start");
    assert!(matches!(
        fixture.runtime.start("strict").await,
        Err(ControlError::AlreadyRunning(_))
    ));
    fixture.runtime.stop("strict").await.expect("stop");

    // Stopping again is a no-op.
    fixture.runtime.stop("strict").await.expect("second stop");
}
