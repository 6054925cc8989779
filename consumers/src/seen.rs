//! Bounded window of recently processed event ids.
//!
//! Delivery is at-least-once: after a reconnect the subscription may
//! re-send events the consumer already handled since its last durable
//! checkpoint. The window absorbs those duplicates. It is bounded, so a
//! redelivery reaching further back than `capacity` events is handled
//! again; consumers stay idempotent for that case.

use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

/// Insertion-ordered dedup set with a fixed capacity.
#[derive(Debug)]
pub struct SeenWindow {
    capacity: usize,
    order: VecDeque<Uuid>,
    ids: HashSet<Uuid>,
}

impl SeenWindow {
    /// Default window size; a tunable on the consumer runtime.
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// Create a window remembering up to `capacity` event ids.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
        }
    }

    /// Record an event id. Returns `false` if it was already in the
    /// window (a duplicate delivery).
    pub fn insert(&mut self, id: Uuid) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
        true
    }

    /// Whether the id is currently remembered.
    #[must_use]
    pub fn contains(&self, id: &Uuid) -> bool {
        self.ids.contains(id)
    }

    /// Number of remembered ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the window is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SeenWindow {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
