//! # Stela Testing
//!
//! Test doubles and fixtures shared across the workspace:
//!
//! - [`event_log::InMemoryEventLog`]: optimistic-version appends, global
//!   commit order, live batch subscriptions, and fault injection (append
//!   outages, refused subscribes, forced redelivery).
//! - [`snapshots::InMemorySnapshotStore`] and
//!   [`checkpoints::InMemoryCheckpointStore`]: in-memory stores with
//!   write/save fault hooks.
//! - [`clock::FixedClock`]: deterministic timestamps.
//! - [`fixtures::Invoice`]: a small aggregate exercising creation,
//!   guarded updates, and soft delete.

pub mod checkpoints;
pub mod clock;
pub mod event_log;
pub mod fixtures;
pub mod snapshots;

pub use checkpoints::InMemoryCheckpointStore;
pub use clock::FixedClock;
pub use event_log::InMemoryEventLog;
pub use fixtures::{Invoice, InvoiceCommand, InvoiceError, InvoiceEvent};
pub use snapshots::InMemorySnapshotStore;

/// Install a compact `tracing` subscriber for a test, once per process.
///
/// Honors `RUST_LOG`; safe to call from every test.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}
