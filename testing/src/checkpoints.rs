//! In-memory checkpoint store with save fault injection.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use stela_core::checkpoint::{Checkpoint, CheckpointError, CheckpointStore};

#[derive(Default)]
struct StoreInner {
    checkpoints: HashMap<String, Checkpoint>,
    fail_saves: bool,
}

/// In-memory [`CheckpointStore`] for tests.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryCheckpointStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every save fail with [`CheckpointError::Unavailable`] until
    /// turned off again.
    pub fn fail_saves(&self, fail: bool) {
        self.lock().fail_saves = fail;
    }

    /// Synchronous read of a consumer's checkpoint, for assertions.
    #[must_use]
    pub fn get(&self, consumer_name: &str) -> Option<Checkpoint> {
        self.lock().checkpoints.get(consumer_name).cloned()
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().expect("checkpoint store lock poisoned")
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(
        &self,
        consumer_name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Checkpoint>, CheckpointError>> + Send + '_>>
    {
        let name = consumer_name.to_string();
        Box::pin(async move { Ok(self.lock().checkpoints.get(&name).cloned()) })
    }

    fn save(
        &self,
        checkpoint: Checkpoint,
    ) -> Pin<Box<dyn Future<Output = Result<(), CheckpointError>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.lock();
            if inner.fail_saves {
                return Err(CheckpointError::Unavailable(
                    "save fault injected".to_string(),
                ));
            }
            inner
                .checkpoints
                .insert(checkpoint.consumer_name.clone(), checkpoint);
            Ok(())
        })
    }
}
