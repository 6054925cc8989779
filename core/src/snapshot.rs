//! Snapshot documents and the abstract snapshot store.
//!
//! A snapshot is a cache of materialized aggregate state at a known
//! version. It is never authoritative: the event log remains the sole
//! source of truth, and any snapshot can be discarded and rebuilt by
//! replay.

use crate::stream::{StreamId, Version};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from snapshot store operations.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// The snapshot backend is unreachable or failed.
    #[error("Snapshot store unavailable: {0}")]
    Unavailable(String),

    /// Snapshot state serialization failed.
    #[error("Snapshot serialization error: {0}")]
    Serialization(String),
}

/// Cached materialized state of one aggregate at a known version.
///
/// Persisted layout: `{id, version, typeTag, state}`. The `type_tag` lets
/// a loader reject snapshots written by a different aggregate type sharing
/// a key (for instance after a stream-naming migration); a mismatch is
/// treated as snapshot-absent, never as an error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The stream this snapshot belongs to.
    pub key: StreamId,

    /// Stream version the state was materialized at.
    pub version: Version,

    /// Discriminator of the aggregate type that wrote the snapshot.
    pub type_tag: String,

    /// Bincode-serialized aggregate state.
    pub state: Vec<u8>,
}

/// Keyed cache of latest aggregate snapshots.
///
/// # Dyn Compatibility
///
/// Returns `Pin<Box<dyn Future>>` so the store can be held as
/// `Arc<dyn SnapshotStore>`.
pub trait SnapshotStore: Send + Sync {
    /// Read the latest snapshot for a key, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Unavailable`] on backend failure.
    fn read(
        &self,
        key: StreamId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Snapshot>, SnapshotError>> + Send + '_>>;

    /// Write (upsert) a snapshot, replacing any previous one for the key.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Unavailable`] on backend failure.
    fn write(
        &self,
        snapshot: Snapshot,
    ) -> Pin<Box<dyn Future<Output = Result<(), SnapshotError>> + Send + '_>>;

    /// Remove the snapshot for a key, if present.
    ///
    /// Used by rebuild tooling to invalidate stale state.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Unavailable`] on backend failure.
    fn remove(
        &self,
        key: StreamId,
    ) -> Pin<Box<dyn Future<Output = Result<(), SnapshotError>> + Send + '_>>;
}
