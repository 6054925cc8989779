//! Explicit event-kind dispatch registry.
//!
//! Stored envelopes carry a string kind tag; replaying them onto typed
//! state requires mapping that tag back to a decoder and an apply
//! function. The registry is that mapping, built once at startup. There is
//! no reflection: a kind without a registered entry is an explicit
//! [`EventError::UnknownKind`].

use crate::event::EventError;
use std::collections::HashMap;

/// Decode-and-apply function for one event kind.
type ApplyFn<S> = Box<dyn Fn(&mut S, &[u8]) -> Result<(), EventError> + Send + Sync>;

/// Maps event-kind tags to decode+apply functions for state type `S`.
///
/// Built once at startup and shared immutably afterwards. Replay paths
/// (aggregate load, snapshot rebuild) route every stored payload through
/// the registry rather than assuming a payload shape from context.
///
/// # Examples
///
/// ```
/// use stela_core::registry::EventRegistry;
///
/// #[derive(Default)]
/// struct Counter {
///     value: i64,
/// }
///
/// let mut registry = EventRegistry::<Counter>::new();
/// registry.register("Incremented.v1", |state: &mut Counter, delta: i64| {
///     state.value += delta;
/// });
///
/// let mut state = Counter::default();
/// let payload = bincode::serialize(&3_i64).unwrap();
/// registry.apply(&mut state, "Incremented.v1", &payload).unwrap();
/// assert_eq!(state.value, 3);
/// ```
pub struct EventRegistry<S> {
    entries: HashMap<&'static str, ApplyFn<S>>,
}

impl<S> EventRegistry<S> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a decode+apply function for one event kind.
    ///
    /// Later registrations for the same kind replace earlier ones; kinds
    /// are expected to be registered exactly once at startup.
    pub fn register<E>(&mut self, kind: &'static str, apply: impl Fn(&mut S, E) + Send + Sync + 'static)
    where
        E: serde::de::DeserializeOwned,
    {
        self.entries.insert(
            kind,
            Box::new(move |state, bytes| {
                let event: E = bincode::deserialize(bytes)
                    .map_err(|e| EventError::Deserialization(e.to_string()))?;
                apply(state, event);
                Ok(())
            }),
        );
    }

    /// Decode the payload for `kind` and apply it to `state`.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::UnknownKind`] if no entry exists for `kind`,
    /// or [`EventError::Deserialization`] if the payload does not decode.
    pub fn apply(&self, state: &mut S, kind: &str, payload: &[u8]) -> Result<(), EventError> {
        let entry = self
            .entries
            .get(kind)
            .ok_or_else(|| EventError::UnknownKind(kind.to_string()))?;
        entry(state, payload)
    }

    /// Whether a decoder is registered for `kind`.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    /// Number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S> Default for EventRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> std::fmt::Debug for EventRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("kinds", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
