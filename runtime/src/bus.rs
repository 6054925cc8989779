//! Command bus with an ordered middleware pipeline.
//!
//! Every command flows through the configured middleware stages in
//! order, then dispatches to the aggregate's single-writer actor via the
//! pool, and the outcome is logged and counted. A stage may enrich the
//! command and context in place and let the pipeline continue, or
//! complete the command itself (validation failures do this), in which
//! case nothing downstream runs.

use crate::command::{Command, CommandContext, CommandError, CommandResult};
use crate::pool::ActorPool;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use stela_aggregate::AggregateState;
use stela_core::clock::Clock;
use tracing::{debug, warn};

/// What a middleware stage decided.
pub enum Outcome {
    /// Run the remaining stages and dispatch.
    Continue,
    /// Stop the pipeline and answer the caller with this result.
    Complete(Result<CommandResult, CommandError>),
}

/// One stage of the command pipeline.
///
/// Stages run in registration order and may mutate the command and its
/// context before dispatch.
pub trait Middleware<S: AggregateState>: Send + Sync {
    /// Stage name for logs.
    fn name(&self) -> &str;

    /// Inspect or enrich the command before dispatch.
    fn call<'a>(
        &'a self,
        command: &'a mut Command<S>,
        context: &'a mut CommandContext,
    ) -> Pin<Box<dyn Future<Output = Outcome> + Send + 'a>>;
}

/// Stamps `issued_at` from the injected clock.
pub struct EnrichTimestamp {
    clock: Arc<dyn Clock>,
}

impl EnrichTimestamp {
    /// Create the enrichment stage.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl<S: AggregateState> Middleware<S> for EnrichTimestamp {
    fn name(&self) -> &str {
        "enrich-timestamp"
    }

    fn call<'a>(
        &'a self,
        _command: &'a mut Command<S>,
        context: &'a mut CommandContext,
    ) -> Pin<Box<dyn Future<Output = Outcome> + Send + 'a>> {
        Box::pin(async move {
            context.issued_at = Some(self.clock.now());
            Outcome::Continue
        })
    }
}

/// Rejects malformed commands before they reach the aggregate.
///
/// The check is a plain function so callers can validate whatever their
/// domain command carries; a returned message becomes
/// [`CommandError::Validation`].
pub struct Validate<S: AggregateState> {
    check: Box<dyn Fn(&Command<S>) -> Result<(), String> + Send + Sync>,
}

impl<S: AggregateState> Validate<S> {
    /// Create a validation stage from a check function.
    #[must_use]
    pub fn new(check: impl Fn(&Command<S>) -> Result<(), String> + Send + Sync + 'static) -> Self {
        Self {
            check: Box::new(check),
        }
    }
}

impl<S: AggregateState> Middleware<S> for Validate<S> {
    fn name(&self) -> &str {
        "validate"
    }

    fn call<'a>(
        &'a self,
        command: &'a mut Command<S>,
        _context: &'a mut CommandContext,
    ) -> Pin<Box<dyn Future<Output = Outcome> + Send + 'a>> {
        Box::pin(async move {
            match (self.check)(command) {
                Ok(()) => Outcome::Continue,
                Err(message) => Outcome::Complete(Err(CommandError::Validation(message))),
            }
        })
    }
}

/// Entry point for command publication.
pub struct CommandBus<S: AggregateState> {
    pool: Arc<ActorPool<S>>,
    middleware: Vec<Arc<dyn Middleware<S>>>,
    publish_timeout: Duration,
}

impl<S: AggregateState> CommandBus<S> {
    /// Bus over a pool with no middleware and a 30 second publish
    /// timeout.
    #[must_use]
    pub fn new(pool: Arc<ActorPool<S>>) -> Self {
        Self {
            pool,
            middleware: Vec::new(),
            publish_timeout: Duration::from_secs(30),
        }
    }

    /// Append a middleware stage; stages run in registration order.
    #[must_use]
    pub fn with_middleware(mut self, stage: Arc<dyn Middleware<S>>) -> Self {
        self.middleware.push(stage);
        self
    }

    /// How long `publish` waits for a result before answering
    /// [`CommandError::Timeout`]. The timeout abandons the wait only;
    /// in-flight processing is not cancelled.
    #[must_use]
    pub const fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Run a command through the pipeline and the aggregate's single
    /// writer.
    ///
    /// # Errors
    ///
    /// See [`CommandError`]; zero events are committed on any error
    /// except [`CommandError::Timeout`], whose command may still complete
    /// after the caller stops waiting.
    pub async fn publish(
        &self,
        mut command: Command<S>,
        mut context: CommandContext,
    ) -> Result<CommandResult, CommandError> {
        for stage in &self.middleware {
            if let Outcome::Complete(result) = stage.call(&mut command, &mut context).await {
                debug!(
                    aggregate_id = %command.aggregate_id,
                    stage = stage.name(),
                    completed = result.is_ok(),
                    "pipeline completed before dispatch"
                );
                return result;
            }
        }

        let Command {
            aggregate_id,
            expected_version,
            payload,
        } = command;
        let dispatch = self
            .pool
            .execute(aggregate_id.clone(), payload, expected_version, context);
        let result = match tokio::time::timeout(self.publish_timeout, dispatch).await {
            Ok(result) => result,
            Err(_) => {
                warn!(aggregate_id = %aggregate_id, "publish timed out waiting for result");
                metrics::counter!("stela_command_timeouts").increment(1);
                return Err(CommandError::Timeout);
            }
        };

        match &result {
            Ok(outcome) => {
                metrics::counter!("stela_commands_committed").increment(1);
                debug!(
                    aggregate_id = %aggregate_id,
                    version = %outcome.version,
                    events = outcome.events_committed,
                    "command committed"
                );
            }
            Err(error) => {
                metrics::counter!("stela_commands_failed").increment(1);
                debug!(aggregate_id = %aggregate_id, %error, "command failed");
            }
        }
        result
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::pool::ActivationPolicy;
    use stela_aggregate::Persistence;
    use stela_core::event::Actor;
    use stela_core::event_log::EventLog;
    use stela_core::snapshot::SnapshotStore;
    use stela_core::stream::{AggregateId, Version};
    use stela_testing::fixtures::{Invoice, InvoiceCommand};
    use stela_testing::{FixedClock, InMemoryEventLog, InMemorySnapshotStore};

    fn bus(log: &Arc<InMemoryEventLog>) -> CommandBus<Invoice> {
        let persistence = Arc::new(Persistence::new(
            Arc::clone(log) as Arc<dyn EventLog>,
            Arc::new(InMemorySnapshotStore::new()) as Arc<dyn SnapshotStore>,
            Arc::new(FixedClock::default()) as Arc<dyn Clock>,
        ));
        let pool = Arc::new(ActorPool::new(persistence, ActivationPolicy::default()));
        CommandBus::new(pool)
            .with_middleware(Arc::new(EnrichTimestamp::new(Arc::new(
                FixedClock::default(),
            ))))
            .with_middleware(Arc::new(Validate::new(|command: &Command<Invoice>| {
                match &command.payload {
                    InvoiceCommand::Create { amount } | InvoiceCommand::UpdateAmount { amount }
                        if *amount > 1_000_000_00 =>
                    {
                        Err(format!("amount {amount} exceeds the limit"))
                    }
                    _ => Ok(()),
                }
            })))
    }

    #[tokio::test]
    async fn publishes_through_the_pipeline() {
        let log = Arc::new(InMemoryEventLog::new());
        let bus = bus(&log);
        let result = bus
            .publish(
                Command::new(
                    AggregateId::new("inv-1"),
                    InvoiceCommand::Create { amount: 100 },
                ),
                CommandContext::for_actor(Actor::User("u-1".to_string())),
            )
            .await
            .expect("publish should succeed");
        assert_eq!(result.version, Version::new(1));
        assert_eq!(result.events_committed, 1);
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn validation_failure_short_circuits() {
        let log = Arc::new(InMemoryEventLog::new());
        let bus = bus(&log);
        let error = bus
            .publish(
                Command::new(
                    AggregateId::new("inv-1"),
                    InvoiceCommand::Create {
                        amount: 9_000_000_00,
                    },
                ),
                CommandContext::default(),
            )
            .await
            .expect_err("oversized amount must fail validation");
        assert!(matches!(error, CommandError::Validation(_)));
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn result_version_works_as_next_precondition() {
        let log = Arc::new(InMemoryEventLog::new());
        let bus = bus(&log);
        let created = bus
            .publish(
                Command::new(
                    AggregateId::new("inv-1"),
                    InvoiceCommand::Create { amount: 100 },
                ),
                CommandContext::default(),
            )
            .await
            .expect("create should succeed");

        let updated = bus
            .publish(
                Command::new(
                    AggregateId::new("inv-1"),
                    InvoiceCommand::UpdateAmount { amount: 150 },
                )
                .at_version(created.version),
                CommandContext::default(),
            )
            .await
            .expect("update at fresh version should succeed");
        assert_eq!(updated.version, Version::new(2));
    }

    #[tokio::test]
    async fn concurrent_updates_one_wins_one_conflicts_then_resubmit() {
        let log = Arc::new(InMemoryEventLog::new());
        let bus = bus(&log);
        bus.publish(
            Command::new(
                AggregateId::new("inv-1"),
                InvoiceCommand::Create { amount: 100 },
            ),
            CommandContext::default(),
        )
        .await
        .expect("create should succeed");

        // Two writers race with the same precondition; the actor
        // serializes them, so exactly one sees version 1.
        let first = bus.publish(
            Command::new(
                AggregateId::new("inv-1"),
                InvoiceCommand::UpdateAmount { amount: 200 },
            )
            .at_version(Version::new(1)),
            CommandContext::default(),
        );
        let second = bus.publish(
            Command::new(
                AggregateId::new("inv-1"),
                InvoiceCommand::UpdateAmount { amount: 300 },
            )
            .at_version(Version::new(1)),
            CommandContext::default(),
        );
        let (a, b) = tokio::join!(first, second);
        let (winner, loser) = if a.is_ok() { (a, b) } else { (b, a) };
        assert_eq!(
            winner.expect("one update must win").version,
            Version::new(2)
        );
        assert!(matches!(
            loser.expect_err("the other must conflict"),
            CommandError::VersionConflict { .. }
        ));

        // The loser resubmits against the fresh version and succeeds.
        let resubmitted = bus
            .publish(
                Command::new(
                    AggregateId::new("inv-1"),
                    InvoiceCommand::UpdateAmount { amount: 300 },
                )
                .at_version(Version::new(2)),
                CommandContext::default(),
            )
            .await
            .expect("resubmission should succeed");
        assert_eq!(resubmitted.version, Version::new(3));
        assert_eq!(log.len(), 3);
    }
}
