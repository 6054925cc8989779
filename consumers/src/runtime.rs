//! Lifecycle management and dispatch for named event consumers.
//!
//! Each started consumer gets one single-threaded worker task that
//! subscribes from the consumer's durable checkpoint, dedups each batch
//! through a [`SeenWindow`], and persists the checkpoint after every
//! fully handled batch. Delivery is at-least-once; the checkpoint only
//! advances past events that were handled in order.

use crate::consumer::{ConsumerError, EventConsumer};
use crate::seen::SeenWindow;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use stela_core::checkpoint::{Checkpoint, CheckpointError, CheckpointStore, ConsumerStatus};
use stela_core::event_log::{EventLog, EventLogError};
use stela_runtime::retry::{RetryPolicy, retry_with_predicate};
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Errors from consumer lifecycle operations.
#[derive(Error, Debug)]
pub enum ControlError {
    /// No consumer registered under that name.
    #[error("Unknown consumer: {0}")]
    UnknownConsumer(String),

    /// `start` on a consumer whose worker is already running.
    #[error("Consumer already running: {0}")]
    AlreadyRunning(String),

    /// `reset` on a consumer whose worker is still running.
    #[error("Consumer still running, stop it first: {0}")]
    StillRunning(String),

    /// The checkpoint store failed.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// The consumer failed to clear its derived state during a reset.
    #[error(transparent)]
    Consumer(#[from] ConsumerError),
}

struct Registration {
    consumer: Arc<dyn EventConsumer>,
    stop: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl Registration {
    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

/// Owns consumer registrations and their worker tasks.
pub struct ConsumerRuntime {
    log: Arc<dyn EventLog>,
    checkpoints: Arc<dyn CheckpointStore>,
    resubscribe: RetryPolicy,
    seen_capacity: usize,
    registrations: Mutex<HashMap<String, Registration>>,
}

impl ConsumerRuntime {
    /// Runtime with the default resubscribe policy and seen-window size.
    #[must_use]
    pub fn new(log: Arc<dyn EventLog>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            log,
            checkpoints,
            resubscribe: RetryPolicy::default(),
            seen_capacity: SeenWindow::DEFAULT_CAPACITY,
            registrations: Mutex::new(HashMap::new()),
        }
    }

    /// Backoff policy for re-establishing lost subscriptions.
    #[must_use]
    pub fn with_resubscribe_policy(mut self, policy: RetryPolicy) -> Self {
        self.resubscribe = policy;
        self
    }

    /// Size of the per-consumer dedup window.
    #[must_use]
    pub const fn with_seen_capacity(mut self, capacity: usize) -> Self {
        self.seen_capacity = capacity;
        self
    }

    /// Register a consumer under its name. Registration alone starts
    /// nothing.
    pub async fn register(&self, consumer: Arc<dyn EventConsumer>) {
        let name = consumer.name().to_string();
        self.registrations.lock().await.insert(
            name,
            Registration {
                consumer,
                stop: None,
                task: None,
            },
        );
    }

    /// Start a consumer's worker from its durable checkpoint.
    ///
    /// A consumer that has never run starts from position zero; one that
    /// stopped or failed resumes exactly where its checkpoint left off.
    ///
    /// # Errors
    ///
    /// [`ControlError::UnknownConsumer`], [`ControlError::AlreadyRunning`],
    /// or a checkpoint store failure.
    pub async fn start(&self, name: &str) -> Result<(), ControlError> {
        let mut registrations = self.registrations.lock().await;
        let registration = registrations
            .get_mut(name)
            .ok_or_else(|| ControlError::UnknownConsumer(name.to_string()))?;
        if registration.is_running() {
            return Err(ControlError::AlreadyRunning(name.to_string()));
        }

        let mut checkpoint = self
            .checkpoints
            .load(name)
            .await?
            .unwrap_or_else(|| Checkpoint::initial(name));
        checkpoint.status = ConsumerStatus::Started;
        checkpoint.last_error = None;
        self.checkpoints.save(checkpoint.clone()).await?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = Worker {
            log: Arc::clone(&self.log),
            checkpoints: Arc::clone(&self.checkpoints),
            consumer: Arc::clone(&registration.consumer),
            resubscribe: self.resubscribe.clone(),
            seen_capacity: self.seen_capacity,
        };
        info!(consumer = name, position = %checkpoint.position, "starting consumer");
        registration.task = Some(tokio::spawn(worker.run(checkpoint, stop_rx)));
        registration.stop = Some(stop_tx);
        Ok(())
    }

    /// Stop a consumer at its next batch boundary and wait for the
    /// worker to exit. The in-flight batch finishes first.
    ///
    /// # Errors
    ///
    /// [`ControlError::UnknownConsumer`] for unregistered names. Stopping
    /// an already stopped consumer is a no-op.
    pub async fn stop(&self, name: &str) -> Result<(), ControlError> {
        let (stop, task) = {
            let mut registrations = self.registrations.lock().await;
            let registration = registrations
                .get_mut(name)
                .ok_or_else(|| ControlError::UnknownConsumer(name.to_string()))?;
            (registration.stop.take(), registration.task.take())
        };
        if let Some(stop) = stop {
            let _ = stop.send(true);
        }
        if let Some(task) = task {
            if let Err(join_error) = task.await {
                warn!(consumer = name, %join_error, "consumer worker panicked");
            }
        }
        Ok(())
    }

    /// Zero a consumer's checkpoint and clear its derived state so the
    /// next start replays from the beginning of the log.
    ///
    /// Only valid while the worker is not running.
    ///
    /// # Errors
    ///
    /// [`ControlError::StillRunning`] if the worker is active;
    /// [`ControlError::Consumer`] if `clear` fails (the checkpoint is
    /// then left untouched).
    pub async fn reset(&self, name: &str) -> Result<(), ControlError> {
        let consumer = {
            let registrations = self.registrations.lock().await;
            let registration = registrations
                .get(name)
                .ok_or_else(|| ControlError::UnknownConsumer(name.to_string()))?;
            if registration.is_running() {
                return Err(ControlError::StillRunning(name.to_string()));
            }
            Arc::clone(&registration.consumer)
        };

        consumer.clear().await?;
        self.checkpoints.save(Checkpoint::initial(name)).await?;
        info!(consumer = name, "consumer reset to position zero");
        Ok(())
    }

    /// The consumer's durable checkpoint: position, status, last error.
    ///
    /// # Errors
    ///
    /// [`ControlError::UnknownConsumer`] or a checkpoint store failure.
    pub async fn status(&self, name: &str) -> Result<Checkpoint, ControlError> {
        {
            let registrations = self.registrations.lock().await;
            if !registrations.contains_key(name) {
                return Err(ControlError::UnknownConsumer(name.to_string()));
            }
        }
        Ok(self
            .checkpoints
            .load(name)
            .await?
            .unwrap_or_else(|| Checkpoint::initial(name)))
    }
}

struct Worker {
    log: Arc<dyn EventLog>,
    checkpoints: Arc<dyn CheckpointStore>,
    consumer: Arc<dyn EventConsumer>,
    resubscribe: RetryPolicy,
    seen_capacity: usize,
}

impl Worker {
    async fn run(self, mut checkpoint: Checkpoint, mut stop: watch::Receiver<bool>) {
        let mut seen = SeenWindow::new(self.seen_capacity);

        loop {
            let from = checkpoint.position;
            let filter = self.consumer.filter();
            let subscription = retry_with_predicate(
                self.resubscribe.clone(),
                || self.log.subscribe(filter.clone(), from),
                EventLogError::is_transient,
            )
            .await;
            let mut subscription = match subscription {
                Ok(subscription) => subscription,
                Err(err) => {
                    self.fail(&mut checkpoint, &err.to_string()).await;
                    return;
                }
            };
            info!(consumer = self.consumer.name(), position = %from, "consumer subscribed");

            // Inner loop: one batch per iteration; stop lands between
            // batches, never inside one.
            loop {
                tokio::select! {
                    _ = stop.changed() => {
                        checkpoint.status = ConsumerStatus::Stopped;
                        self.save(&checkpoint).await;
                        info!(
                            consumer = self.consumer.name(),
                            position = %checkpoint.position,
                            "consumer stopped"
                        );
                        return;
                    }
                    batch = subscription.next() => match batch {
                        Some(Ok(events)) => {
                            if !self.handle_batch(&events, &mut checkpoint, &mut seen).await {
                                return;
                            }
                        }
                        Some(Err(err)) if err.is_transient() => {
                            warn!(
                                consumer = self.consumer.name(),
                                error = %err,
                                "subscription interrupted, resubscribing"
                            );
                            break;
                        }
                        Some(Err(err)) => {
                            self.fail(&mut checkpoint, &err.to_string()).await;
                            return;
                        }
                        None => {
                            warn!(
                                consumer = self.consumer.name(),
                                "subscription ended, resubscribing"
                            );
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Handle one delivered batch. Returns `false` when the worker must
    /// exit (handler failure).
    async fn handle_batch(
        &self,
        events: &[stela_core::event::StoredEvent],
        checkpoint: &mut Checkpoint,
        seen: &mut SeenWindow,
    ) -> bool {
        for event in events {
            if !seen.insert(event.envelope.event_id) {
                // Redelivery of an already handled event; skip but still
                // cover it with the checkpoint.
                metrics::counter!("stela_consumer_duplicates").increment(1);
                checkpoint.position = checkpoint.position.max(event.position);
                continue;
            }
            if let Err(err) = self.consumer.handle(event).await {
                self.fail(checkpoint, &err.to_string()).await;
                return false;
            }
            metrics::counter!("stela_consumer_events").increment(1);
            checkpoint.position = event.position;
        }
        checkpoint.status = ConsumerStatus::Started;
        self.save(checkpoint).await;
        true
    }

    async fn fail(&self, checkpoint: &mut Checkpoint, message: &str) {
        error!(
            consumer = self.consumer.name(),
            position = %checkpoint.position,
            error = message,
            "consumer failed, halting dispatch"
        );
        metrics::counter!("stela_consumer_failures").increment(1);
        checkpoint.status = ConsumerStatus::Failed;
        checkpoint.last_error = Some(message.to_string());
        self.save(checkpoint).await;
    }

    /// Persist the checkpoint, best-effort. A failed save costs nothing
    /// but redelivery: the position simply stays where it was.
    async fn save(&self, checkpoint: &Checkpoint) {
        if let Err(err) = self.checkpoints.save(checkpoint.clone()).await {
            warn!(
                consumer = self.consumer.name(),
                error = %err,
                "checkpoint save failed, progress will be redelivered"
            );
        }
    }
}
