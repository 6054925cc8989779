//! The `AggregateState` trait: domain behaviour for one aggregate kind.
//!
//! An aggregate's state derives solely from its ordered event history.
//! Implementors provide three pure pieces: construction for a fresh
//! instance, command handling that decides which events to emit, and
//! event application that folds an event into the state. Everything else
//! (buffering, versions, persistence, serialization) lives in
//! [`DomainObject`](crate::domain_object::DomainObject) and the binder.

use serde::{Serialize, de::DeserializeOwned};
use stela_core::event::Event;
use stela_core::registry::EventRegistry;
use stela_core::stream::AggregateId;

/// Domain behaviour of one aggregate kind.
///
/// # Determinism
///
/// `handle` and `apply` must be deterministic: replaying the same event
/// sequence from scratch must reproduce identical state. Side effects
/// belong in consumers, never here.
///
/// # Example
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use stela_aggregate::state::AggregateState;
/// use stela_core::event::Event;
/// use stela_core::stream::AggregateId;
///
/// #[derive(Clone, Debug, Default, Serialize, Deserialize)]
/// struct Counter {
///     value: i64,
/// }
///
/// #[derive(Clone, Debug, Serialize, Deserialize)]
/// enum CounterEvent {
///     Incremented,
/// }
///
/// impl Event for CounterEvent {
///     fn event_kind(&self) -> &'static str {
///         "Counter.Incremented.v1"
///     }
/// }
///
/// #[derive(Debug, thiserror::Error)]
/// enum CounterError {}
///
/// enum CounterCommand {
///     Increment,
/// }
///
/// impl AggregateState for Counter {
///     const KIND: &'static str = "counter";
///     type Command = CounterCommand;
///     type Event = CounterEvent;
///     type Error = CounterError;
///
///     fn new(_id: &AggregateId) -> Self {
///         Self::default()
///     }
///
///     fn handle(&self, _command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
///         Ok(vec![CounterEvent::Incremented])
///     }
///
///     fn apply(&mut self, _event: &Self::Event) {
///         self.value += 1;
///     }
///
///     fn event_kinds() -> &'static [&'static str] {
///         &["Counter.Incremented.v1"]
///     }
/// }
/// ```
pub trait AggregateState:
    Clone + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Stable aggregate kind tag, used for stream naming and snapshot
    /// type discrimination. Lowercase, e.g. `"invoice"`, `"content"`.
    const KIND: &'static str;

    /// Commands this aggregate accepts.
    type Command: Send + 'static;

    /// Events this aggregate emits and folds.
    type Event: Event + Serialize + DeserializeOwned + Clone + Send + Sync;

    /// Business-rule violations raised by `handle`.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fresh version-0 state for an instance that has no events yet.
    fn new(id: &AggregateId) -> Self;

    /// Decide which events a command produces, given the current state.
    ///
    /// Returning an empty vector is a valid no-op. This function must not
    /// mutate anything; state only changes through `apply`.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` when a business rule rejects the command.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// Fold one event into the state.
    fn apply(&mut self, event: &Self::Event);

    /// Every event kind this aggregate can emit, for registry
    /// construction at startup.
    fn event_kinds() -> &'static [&'static str];
}

/// Build the decode+apply registry for an aggregate kind.
///
/// Every kind in [`AggregateState::event_kinds`] decodes to
/// `S::Event` and folds through [`AggregateState::apply`]. Built once at
/// startup; a stored envelope whose kind is missing here fails replay
/// explicitly instead of being silently skipped.
#[must_use]
pub fn registry_for<S: AggregateState>() -> EventRegistry<S> {
    let mut registry = EventRegistry::new();
    for &kind in S::event_kinds() {
        registry.register::<S::Event>(kind, |state: &mut S, event| state.apply(&event));
    }
    registry
}
