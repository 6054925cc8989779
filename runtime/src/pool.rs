//! Bounded actor activation cache.
//!
//! The pool owns the mapping from aggregate id to live actor handle.
//! Activation is explicit and bounded: a capacity and an idle timeout
//! come in through [`ActivationPolicy`], and when the pool is full the
//! least recently used handle is dropped. Dropping a handle only closes
//! the mailbox; the evicted actor drains every queued command before it
//! exits, so eviction never loses work.
//!
//! The pool assumes at most one owner per aggregate id within the
//! process group; placement across processes is the deployment's
//! concern, not the pool's.

use crate::actor::{self, ActorHandle};
use crate::command::{CommandContext, CommandError, CommandResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use stela_aggregate::{AggregateState, Persistence};
use stela_core::stream::{AggregateId, Version};
use tracing::debug;

/// Sizing knobs for the activation cache.
#[derive(Clone, Debug)]
pub struct ActivationPolicy {
    /// Maximum number of simultaneously cached actors.
    pub capacity: usize,

    /// How long an actor may sit without traffic before it exits.
    pub idle_timeout: Duration,

    /// Mailbox depth per actor; senders queue beyond it.
    pub mailbox_size: usize,
}

impl Default for ActivationPolicy {
    fn default() -> Self {
        Self {
            capacity: 1024,
            idle_timeout: Duration::from_secs(300),
            mailbox_size: 64,
        }
    }
}

struct Activation<S: AggregateState> {
    handle: ActorHandle<S>,
    last_used: u64,
}

struct PoolInner<S: AggregateState> {
    activations: HashMap<AggregateId, Activation<S>>,
    tick: u64,
}

/// Keyed cache of single-writer actors for one aggregate kind.
pub struct ActorPool<S: AggregateState> {
    persistence: Arc<Persistence<S>>,
    policy: ActivationPolicy,
    inner: Mutex<PoolInner<S>>,
}

impl<S: AggregateState> ActorPool<S> {
    /// Create a pool over the given persistence binder.
    #[must_use]
    pub fn new(persistence: Arc<Persistence<S>>, policy: ActivationPolicy) -> Self {
        Self {
            persistence,
            policy,
            inner: Mutex::new(PoolInner {
                activations: HashMap::new(),
                tick: 0,
            }),
        }
    }

    /// Number of currently cached actors, exited ones included until the
    /// next sweep.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().activations.len()
    }

    /// Whether no actors are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().activations.is_empty()
    }

    /// Route a command to the id's single writer, activating it if
    /// needed.
    ///
    /// # Errors
    ///
    /// Whatever the command produced; see [`CommandError`].
    pub async fn execute(
        &self,
        id: AggregateId,
        mut payload: S::Command,
        expected_version: Option<Version>,
        mut context: CommandContext,
    ) -> Result<CommandResult, CommandError> {
        // Two attempts cover the activate/idle-out race: the second
        // attempt runs against a freshly spawned mailbox.
        for _ in 0..2 {
            let handle = self.activate(&id);
            match handle
                .execute_or_return(payload, expected_version, context)
                .await
            {
                Ok(outcome) => return outcome,
                Err((returned_payload, returned_context)) => {
                    payload = returned_payload;
                    context = returned_context;
                }
            }
        }
        Err(CommandError::Infrastructure(
            "actor mailbox closed".to_string(),
        ))
    }

    /// Fetch or spawn the actor handle for an id.
    pub fn activate(&self, id: &AggregateId) -> ActorHandle<S> {
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;

        if let Some(activation) = inner.activations.get_mut(id) {
            if !activation.handle.is_closed() {
                activation.last_used = tick;
                return activation.handle.clone();
            }
            inner.activations.remove(id);
        }

        let handle = actor::spawn(
            id.clone(),
            Arc::clone(&self.persistence),
            self.policy.mailbox_size,
            self.policy.idle_timeout,
        );
        inner.activations.insert(
            id.clone(),
            Activation {
                handle: handle.clone(),
                last_used: tick,
            },
        );
        Self::evict_cold(&mut inner, self.policy.capacity);
        handle
    }

    /// Drop exited actors, then the least recently used live ones until
    /// the cache fits its capacity.
    fn evict_cold(inner: &mut PoolInner<S>, capacity: usize) {
        inner
            .activations
            .retain(|_, activation| !activation.handle.is_closed());
        while inner.activations.len() > capacity {
            let coldest = inner
                .activations
                .iter()
                .min_by_key(|(_, activation)| activation.last_used)
                .map(|(id, _)| id.clone());
            let Some(id) = coldest else { break };
            debug!(aggregate_id = %id, "evicting least recently used actor");
            inner.activations.remove(&id);
        }
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, PoolInner<S>> {
        self.inner.lock().expect("actor pool lock poisoned")
    }
}
