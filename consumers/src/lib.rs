//! # Stela Consumers
//!
//! The read-side runtime: named, checkpointed event consumers with
//! at-least-once delivery, plus the snapshot rebuilder.
//!
//! - [`consumer::EventConsumer`]: the handler trait a read model or
//!   side-effect processor implements.
//! - [`seen::SeenWindow`]: bounded dedup window absorbing redeliveries.
//! - [`runtime::ConsumerRuntime`]: start/stop/reset/status lifecycle,
//!   one worker task per started consumer, checkpoint persisted after
//!   every fully handled batch.
//! - [`rebuild::Rebuilder`]: full-replay snapshot regeneration, safely
//!   interruptible.

pub mod consumer;
pub mod rebuild;
pub mod runtime;
pub mod seen;

pub use consumer::{ConsumerError, EventConsumer};
pub use rebuild::{RebuildError, RebuildReport, Rebuilder};
pub use runtime::{ConsumerRuntime, ControlError};
pub use seen::SeenWindow;
