//! The `EventConsumer` trait.

use std::future::Future;
use std::pin::Pin;
use stela_core::event::{EventFilter, StoredEvent};
use thiserror::Error;

/// Errors raised by a consumer's handler.
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// The handler could not process an event. Fatal for the consumer:
    /// its checkpoint stops advancing and dispatch halts until an
    /// explicit restart or reset.
    #[error("Handler failed: {0}")]
    Handler(String),
}

/// A named, checkpointed subscriber to a filtered view of the log.
///
/// Handlers run strictly in commit order within one consumer; ordering
/// across consumers is not coordinated. Handlers should stay idempotent:
/// redeliveries older than the runtime's seen window are handled again.
///
/// # Dyn Compatibility
///
/// Returns `Pin<Box<dyn Future>>` so consumers can be registered as
/// `Arc<dyn EventConsumer>`.
pub trait EventConsumer: Send + Sync {
    /// Unique name; checkpoints are stored under it.
    fn name(&self) -> &str;

    /// Which slice of the log this consumer wants.
    fn filter(&self) -> EventFilter;

    /// Process one event.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Handler`] to halt the consumer; the
    /// event will be redelivered after a restart.
    fn handle<'a>(
        &'a self,
        event: &'a StoredEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), ConsumerError>> + Send + 'a>>;

    /// Drop all derived state, ahead of a full replay from position
    /// zero. Called by `reset`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Handler`] if the derived state cannot be
    /// cleared; the reset is then abandoned.
    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<(), ConsumerError>> + Send + '_>>;
}
