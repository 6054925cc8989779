//! # Stela Core
//!
//! Core traits and types for the Stela event-sourcing runtime.
//!
//! This crate defines the contracts every other member builds on:
//!
//! - **Identity**: [`stream::AggregateId`], [`stream::StreamId`],
//!   [`stream::Version`] (per-stream, optimistic concurrency) and
//!   [`stream::Position`] (global commit order).
//! - **Events**: the [`event::Event`] trait, the [`event::Envelope`] wire
//!   shape, and [`event::EventFilter`] for filtered views of the log.
//! - **Dispatch**: [`registry::EventRegistry`], the explicit kind-tag to
//!   decode+apply mapping built once at startup.
//! - **Collaborators**: the abstract [`event_log::EventLog`],
//!   [`snapshot::SnapshotStore`], and [`checkpoint::CheckpointStore`]
//!   interfaces. Concrete drivers live outside this workspace;
//!   `stela-testing` ships in-memory implementations.
//!
//! The event log is the sole source of truth. Snapshots and read models
//! are caches that can always be regenerated by replay.

pub mod checkpoint;
pub mod clock;
pub mod event;
pub mod event_log;
pub mod registry;
pub mod snapshot;
pub mod stream;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
