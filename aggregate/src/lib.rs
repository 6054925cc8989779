//! # Stela Aggregate
//!
//! The aggregate layer: pure domain behaviour plus version-aware
//! persistence.
//!
//! - [`state::AggregateState`]: the trait a domain implements. A command
//!   either produces events or a business-rule error; events fold into
//!   state deterministically.
//! - [`domain_object::DomainObject`]: one instance's state, version, and
//!   uncommitted-event buffer.
//! - [`persistence::Persistence`]: loads instances (snapshot plus tail
//!   replay) and commits buffers with optimistic concurrency.
//!
//! Nothing here talks to the network. Event log, snapshot store, and
//! clock are the `stela-core` abstractions, injected at construction.

pub mod domain_object;
pub mod persistence;
pub mod state;

pub use domain_object::DomainObject;
pub use persistence::{Persistence, PersistenceError};
pub use state::{AggregateState, registry_for};
