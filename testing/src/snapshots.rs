//! In-memory snapshot store with write fault injection.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use stela_core::snapshot::{Snapshot, SnapshotError, SnapshotStore};
use stela_core::stream::StreamId;

#[derive(Default)]
struct StoreInner {
    snapshots: HashMap<StreamId, Snapshot>,
    fail_writes: bool,
    fail_reads: bool,
}

/// In-memory [`SnapshotStore`] for tests.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    inner: Mutex<StoreInner>,
}

impl InMemorySnapshotStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail with [`SnapshotError::Unavailable`] until
    /// turned off again.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Make every read fail with [`SnapshotError::Unavailable`] until
    /// turned off again.
    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Number of stored snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().snapshots.len()
    }

    /// Whether the store holds no snapshots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().snapshots.is_empty()
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().expect("snapshot store lock poisoned")
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn read(
        &self,
        key: StreamId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Snapshot>, SnapshotError>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.lock();
            if inner.fail_reads {
                return Err(SnapshotError::Unavailable(
                    "read fault injected".to_string(),
                ));
            }
            Ok(inner.snapshots.get(&key).cloned())
        })
    }

    fn write(
        &self,
        snapshot: Snapshot,
    ) -> Pin<Box<dyn Future<Output = Result<(), SnapshotError>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.lock();
            if inner.fail_writes {
                return Err(SnapshotError::Unavailable(
                    "write fault injected".to_string(),
                ));
            }
            inner.snapshots.insert(snapshot.key.clone(), snapshot);
            Ok(())
        })
    }

    fn remove(
        &self,
        key: StreamId,
    ) -> Pin<Box<dyn Future<Output = Result<(), SnapshotError>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.lock();
            if inner.fail_writes {
                return Err(SnapshotError::Unavailable(
                    "write fault injected".to_string(),
                ));
            }
            inner.snapshots.remove(&key);
            Ok(())
        })
    }
}
