//! Per-aggregate single-writer actor.
//!
//! One tokio task owns the [`DomainObject`] for one aggregate id and
//! processes commands strictly in mailbox order, which is what makes the
//! optimistic append effectively conflict-free within a process: all
//! local writers for an id are serialized through the same mailbox.
//! Conflicts still happen when another process writes the same stream;
//! the actor then drops its cached state and reloads on the next command.

use crate::command::{CommandContext, CommandError, CommandResult};
use std::sync::Arc;
use std::time::Duration;
use stela_aggregate::{AggregateState, DomainObject, Persistence};
use stela_core::stream::{AggregateId, Version};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// A command queued in an actor mailbox.
struct Execute<S: AggregateState> {
    payload: S::Command,
    expected_version: Option<Version>,
    context: CommandContext,
    reply: oneshot::Sender<Result<CommandResult, CommandError>>,
}

/// Cheap cloneable handle to a running actor.
///
/// Dropping every handle closes the mailbox; the actor drains what was
/// already queued, then exits. Queued commands are never lost to
/// eviction.
pub struct ActorHandle<S: AggregateState> {
    id: AggregateId,
    sender: mpsc::Sender<Execute<S>>,
}

impl<S: AggregateState> Clone for ActorHandle<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            sender: self.sender.clone(),
        }
    }
}

impl<S: AggregateState> ActorHandle<S> {
    /// The aggregate id this actor owns.
    #[must_use]
    pub const fn id(&self) -> &AggregateId {
        &self.id
    }

    /// Whether the actor has exited (idle timeout or eviction drain).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Queue a command and wait for its outcome.
    ///
    /// # Errors
    ///
    /// [`CommandError::Infrastructure`] if the actor exited before
    /// accepting or answering; otherwise whatever the command produced.
    pub async fn execute(
        &self,
        payload: S::Command,
        expected_version: Option<Version>,
        context: CommandContext,
    ) -> Result<CommandResult, CommandError> {
        match self
            .execute_or_return(payload, expected_version, context)
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(CommandError::Infrastructure(
                "actor mailbox closed".to_string(),
            )),
        }
    }

    /// Like [`execute`](Self::execute), but hands the command back when
    /// the mailbox is already closed so the caller can re-activate and
    /// retry. Used by the pool to survive the activate/idle-out race.
    ///
    /// # Errors
    ///
    /// `Err` returns the undelivered payload and context.
    pub async fn execute_or_return(
        &self,
        payload: S::Command,
        expected_version: Option<Version>,
        context: CommandContext,
    ) -> Result<Result<CommandResult, CommandError>, (S::Command, CommandContext)> {
        let (reply, response) = oneshot::channel();
        if let Err(rejected) = self
            .sender
            .send(Execute {
                payload,
                expected_version,
                context,
                reply,
            })
            .await
        {
            let Execute {
                payload, context, ..
            } = rejected.0;
            return Err((payload, context));
        }
        Ok(response.await.unwrap_or_else(|_| {
            Err(CommandError::Infrastructure(
                "actor dropped the reply".to_string(),
            ))
        }))
    }
}

/// Spawn the single-writer actor for one aggregate id.
///
/// The aggregate is loaded lazily on the first command and cached
/// between commands. After `idle_timeout` without traffic the actor
/// exits; the next command through a pool re-activates it.
pub fn spawn<S: AggregateState>(
    id: AggregateId,
    persistence: Arc<Persistence<S>>,
    mailbox_size: usize,
    idle_timeout: Duration,
) -> ActorHandle<S> {
    let (sender, receiver) = mpsc::channel(mailbox_size.max(1));
    let handle = ActorHandle {
        id: id.clone(),
        sender,
    };
    tokio::spawn(run(id, persistence, receiver, idle_timeout));
    handle
}

async fn run<S: AggregateState>(
    id: AggregateId,
    persistence: Arc<Persistence<S>>,
    mut receiver: mpsc::Receiver<Execute<S>>,
    idle_timeout: Duration,
) {
    let mut cached: Option<DomainObject<S>> = None;

    loop {
        let message = match tokio::time::timeout(idle_timeout, receiver.recv()).await {
            Ok(Some(message)) => message,
            // Mailbox closed and drained: every handle was dropped.
            Ok(None) => break,
            Err(_) => {
                debug!(aggregate_id = %id, kind = S::KIND, "actor idle, shutting down");
                receiver.close();
                // Drain anything that raced the close.
                while let Some(message) = receiver.recv().await {
                    handle_command(&id, &persistence, &mut cached, message).await;
                }
                break;
            }
        };
        handle_command(&id, &persistence, &mut cached, message).await;
    }
    debug!(aggregate_id = %id, kind = S::KIND, "actor stopped");
}

/// Run one command to completion and send the reply.
async fn handle_command<S: AggregateState>(
    id: &AggregateId,
    persistence: &Persistence<S>,
    cached: &mut Option<DomainObject<S>>,
    message: Execute<S>,
) {
    let Execute {
        payload,
        expected_version,
        context,
        reply,
    } = message;

    let outcome = execute_on(id, persistence, cached, payload, expected_version, context).await;
    if matches!(outcome, Err(CommandError::VersionConflict { .. })) {
        // Another writer advanced the stream; the cache is stale.
        metrics::counter!("stela_command_conflicts").increment(1);
        *cached = None;
    }
    if reply.send(outcome).is_err() {
        debug!(aggregate_id = %id, "caller stopped waiting for reply");
    }
}

async fn execute_on<S: AggregateState>(
    id: &AggregateId,
    persistence: &Persistence<S>,
    cached: &mut Option<DomainObject<S>>,
    payload: S::Command,
    expected_version: Option<Version>,
    context: CommandContext,
) -> Result<CommandResult, CommandError> {
    if cached.is_none() {
        *cached = Some(persistence.load(id.clone()).await.map_err(|error| {
            warn!(aggregate_id = %id, %error, "aggregate load failed");
            CommandError::from(error)
        })?);
    }
    let Some(object) = cached.as_mut() else {
        return Err(CommandError::Infrastructure(
            "aggregate unavailable after load".to_string(),
        ));
    };

    // The caller's ETag precondition, checked before touching the domain.
    if let Some(expected) = expected_version {
        if expected != object.persisted_version() {
            return Err(CommandError::VersionConflict {
                stream: object.stream(),
                expected,
                actual: object.persisted_version(),
            });
        }
    }

    let produced = object
        .execute(&payload)
        .map_err(|error| CommandError::Domain(error.to_string()))?;

    let version = persistence.commit(object, context.actor).await?;
    Ok(CommandResult {
        aggregate_id: id.clone(),
        version,
        events_committed: produced,
    })
}
