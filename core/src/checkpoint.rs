//! Consumer checkpoints and the abstract checkpoint store.
//!
//! A checkpoint is the durable record of a named consumer's progress
//! through the log: its last successfully processed position, its
//! lifecycle status, and the last error that stopped it. Checkpoints are
//! created on first start, advanced after every fully processed batch,
//! and zeroed only by an explicit reset.

use crate::stream::Position;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from checkpoint store operations.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// The checkpoint backend is unreachable or failed.
    #[error("Checkpoint store unavailable: {0}")]
    Unavailable(String),
}

/// Lifecycle status of a consumer.
///
/// Transitions: `Stopped → Started` via `start()`; `Started → Stopped` via
/// `stop()`; `Started → Failed` on a handler error; `Failed/Stopped →
/// Stopped` via `reset()` (which also zeroes the position).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumerStatus {
    /// Not processing; position is retained.
    Stopped,
    /// Actively processing batches.
    Started,
    /// Halted by a handler error; requires an explicit reset or restart.
    Failed,
}

impl fmt::Display for ConsumerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Started => write!(f, "started"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Durable progress record of one named consumer.
///
/// Persisted layout: `{consumerName, position, status, lastError}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique name of the consumer.
    pub consumer_name: String,

    /// Last position every event up to which was successfully processed,
    /// in order.
    pub position: Position,

    /// Current lifecycle status.
    pub status: ConsumerStatus,

    /// Error message recorded when the consumer failed, if any.
    pub last_error: Option<String>,
}

impl Checkpoint {
    /// A fresh checkpoint for a consumer that has never run.
    #[must_use]
    pub fn initial(consumer_name: impl Into<String>) -> Self {
        Self {
            consumer_name: consumer_name.into(),
            position: Position::START,
            status: ConsumerStatus::Stopped,
            last_error: None,
        }
    }
}

/// Keyed store of consumer checkpoints.
///
/// # Dyn Compatibility
///
/// Returns `Pin<Box<dyn Future>>` so the store can be held as
/// `Arc<dyn CheckpointStore>`.
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint for a consumer, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Unavailable`] on backend failure.
    fn load(
        &self,
        consumer_name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Checkpoint>, CheckpointError>> + Send + '_>>;

    /// Save (upsert) a checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Unavailable`] on backend failure.
    fn save(
        &self,
        checkpoint: Checkpoint,
    ) -> Pin<Box<dyn Future<Output = Result<(), CheckpointError>> + Send + '_>>;
}
