//! # Stela Runtime
//!
//! The write-side runtime: one single-writer actor per aggregate id, a
//! bounded activation pool, and the command bus in front of them.
//!
//! - [`actor`]: a tokio task owning one [`stela_aggregate::DomainObject`],
//!   processing its mailbox strictly in order.
//! - [`pool::ActorPool`]: bounded activation cache with LRU eviction;
//!   eviction drains, it never discards queued commands.
//! - [`bus::CommandBus`]: ordered middleware pipeline (enrich, validate,
//!   dispatch, log) over the pool.
//! - [`retry`]: jittered exponential backoff for transient failures.

pub mod actor;
pub mod bus;
pub mod command;
pub mod pool;
pub mod retry;

pub use actor::ActorHandle;
pub use bus::{CommandBus, EnrichTimestamp, Middleware, Outcome, Validate};
pub use command::{Command, CommandContext, CommandError, CommandResult};
pub use pool::{ActivationPolicy, ActorPool};
pub use retry::{RetryPolicy, retry_with_backoff, retry_with_predicate};
