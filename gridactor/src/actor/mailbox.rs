//! Actor mailbox and message loop.
//!
//! Every actor incarnation is one tokio task draining a bounded mpsc
//! channel. Calls, casts, timer fires, async-call completions and stop
//! requests all arrive through the same channel, so handlers of one actor
//! never interleave and messages from one sender keep their order.

use crate::actor::context::{ActorEnv, TimerId};
use crate::actor::message::ReplyResult;
use crate::actor::{
    ActorContext, ActorId, ActorMeta, ActorState, Behavior, Payload, ReplyHandle, RouteTable,
};
use crate::error::ActorError;
use std::any::Any;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

/// Deferred reply handler of an async call, run inside the caller's mailbox.
pub(crate) type Continuation =
    Box<dyn FnOnce(&mut (dyn Any + 'static), &mut ActorContext, ReplyResult) + Send>;

pub(crate) enum Envelope {
    Call {
        payload: Payload,
        reply: ReplyHandle,
    },
    Cast {
        payload: Payload,
    },
    Timer {
        id: TimerId,
        name: String,
    },
    Completion {
        continuation: Continuation,
        result: ReplyResult,
    },
    Stop {
        reason: String,
        done: oneshot::Sender<Result<(), ActorError>>,
    },
}

/// Counters shared between an actor task and its handles.
#[derive(Debug, Default)]
pub(crate) struct ActorStats {
    processed: AtomicU64,
    state: AtomicU8,
    start_error: OnceLock<String>,
}

impl ActorStats {
    pub(crate) fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_state(&self, state: ActorState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn state(&self) -> ActorState {
        ActorState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Error for a send to the closed mailbox.
    fn closed_error(&self) -> ActorError {
        match self.start_error.get() {
            Some(reason) => ActorError::StartFailed(reason.clone()),
            None => ActorError::MailboxClosed,
        }
    }
}

/// Cloneable address of one actor incarnation on this node.
#[derive(Clone)]
pub struct ActorHandle {
    id: ActorId,
    category: String,
    daemon: bool,
    incarnation: u64,
    mailbox: mpsc::Sender<Envelope>,
    stats: Arc<ActorStats>,
}

impl ActorHandle {
    pub fn id(&self) -> &ActorId {
        &self.id
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn is_daemon(&self) -> bool {
        self.daemon
    }

    /// Distinguishes successive activations of the same id on this node.
    pub fn incarnation(&self) -> u64 {
        self.incarnation
    }

    /// Messages handled by this incarnation.
    pub fn processed(&self) -> u64 {
        self.stats.processed()
    }

    pub fn state(&self) -> ActorState {
        self.stats.state()
    }

    /// Whether the actor task has exited.
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    /// Enqueue a call and wait for its reply.
    pub async fn call(&self, payload: Payload, timeout: Duration) -> ReplyResult {
        let rx = self.enqueue_call(payload).await?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ActorError::MailboxClosed),
            Err(_) => Err(ActorError::RpcTimeout),
        }
    }

    /// Enqueue a call; the receiver resolves once the actor replied.
    ///
    /// The enqueue itself waits for mailbox capacity, which keeps the order
    /// of calls issued sequentially by one caller.
    pub(crate) async fn enqueue_call(
        &self,
        payload: Payload,
    ) -> Result<oneshot::Receiver<ReplyResult>, ActorError> {
        let (reply, rx) = ReplyHandle::channel();
        self.mailbox
            .send(Envelope::Call { payload, reply })
            .await
            .map_err(|_| self.stats.closed_error())?;
        Ok(rx)
    }

    /// Enqueue a one-way message.
    pub async fn cast(&self, payload: Payload) -> Result<(), ActorError> {
        self.mailbox
            .send(Envelope::Cast { payload })
            .await
            .map_err(|_| self.stats.closed_error())
    }

    /// Stop the actor: runs `on_stop`, then the task exits.
    ///
    /// An actor that already exited counts as stopped.
    pub async fn stop(&self, reason: &str) -> Result<(), ActorError> {
        let (done, rx) = oneshot::channel();
        let stop = Envelope::Stop {
            reason: reason.to_string(),
            done,
        };
        if self.mailbox.send(stop).await.is_err() {
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }
}

impl std::fmt::Debug for ActorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorHandle")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("incarnation", &self.incarnation)
            .field("state", &self.state())
            .finish()
    }
}

/// A handle with no actor task behind it; the test holds the inbox.
#[cfg(test)]
pub(crate) fn detached_handle(
    id: &str,
    category: &str,
    incarnation: u64,
) -> (ActorHandle, mpsc::Receiver<Envelope>) {
    let (tx, rx) = mpsc::channel(8);
    let handle = ActorHandle {
        id: ActorId::new(id),
        category: category.to_string(),
        daemon: false,
        incarnation,
        mailbox: tx,
        stats: Arc::new(ActorStats::default()),
    };
    (handle, rx)
}

/// Deliver an async-call completion to the mailbox of the caller.
pub(crate) async fn deliver_completion(
    mailbox: &mpsc::Sender<Envelope>,
    continuation: Continuation,
    result: ReplyResult,
) -> bool {
    mailbox
        .send(Envelope::Completion {
            continuation,
            result,
        })
        .await
        .is_ok()
}

/// Spawn the task of a new actor incarnation and return its handle.
///
/// The handle is usable immediately; messages sent before `on_start`
/// finishes wait in the mailbox, and fail with `StartFailed` if it fails.
pub(crate) fn spawn_actor<B: Behavior>(
    behavior: B,
    routes: Arc<RouteTable<B>>,
    meta: ActorMeta,
    env: ActorEnv,
    incarnation: u64,
) -> ActorHandle {
    let (tx, rx) = mpsc::channel(env.config.mailbox_capacity.max(1));
    let stats = Arc::new(ActorStats::default());

    let handle = ActorHandle {
        id: meta.id.clone(),
        category: meta.category.clone(),
        daemon: meta.is_daemon(),
        incarnation,
        mailbox: tx.clone(),
        stats: stats.clone(),
    };

    let ctx = ActorContext::new(meta, env, tx, stats);
    tokio::spawn(run_actor(behavior, routes, ctx, rx, incarnation));
    handle
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

async fn run_actor<B: Behavior>(
    mut behavior: B,
    routes: Arc<RouteTable<B>>,
    mut ctx: ActorContext,
    mut inbox: mpsc::Receiver<Envelope>,
    incarnation: u64,
) {
    let actor = ctx.id().clone();
    let _ = ctx.set_state(ActorState::Initializing);

    if let Err(e) = behavior.on_start(&mut ctx).await {
        tracing::error!(actor = %actor, category = %ctx.meta().category, error = %e, "actor failed to start");
        let _ = ctx.set_state(ActorState::Stopped);
        ctx.cancel_timers();
        let reason = e.to_string();
        let _ = ctx.stats().start_error.set(reason.clone());
        drain(&mut inbox, || ActorError::StartFailed(reason.clone()));
        ctx.env().supervisor.notify_exited(actor, incarnation);
        return;
    }

    let _ = ctx.set_state(ActorState::Running);
    tracing::info!(actor = %actor, category = %ctx.meta().category, incarnation, "actor started");

    let tick = ctx.config().tick_interval;
    let mut idle_check = tokio::time::interval_at(Instant::now() + tick, tick);
    idle_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            envelope = inbox.recv() => {
                let Some(envelope) = envelope else { break };
                if handle_envelope(&mut behavior, &routes, &mut ctx, envelope).await == Flow::Exit {
                    break;
                }
            }
            _ = idle_check.tick() => check_idle(&ctx),
        }
    }

    drain(&mut inbox, || ActorError::MailboxClosed);
    ctx.env().supervisor.notify_exited(actor.clone(), incarnation);
    tracing::info!(actor = %actor, processed = ctx.processed(), "actor stopped");
}

async fn handle_envelope<B: Behavior>(
    behavior: &mut B,
    routes: &RouteTable<B>,
    ctx: &mut ActorContext,
    envelope: Envelope,
) -> Flow {
    match envelope {
        Envelope::Call { payload, mut reply } => {
            ctx.touch();
            let result = routes.dispatch(behavior, &payload, ctx).await;
            ctx.stats().record_processed();
            if let Err(e) = &result {
                tracing::warn!(actor = %ctx.id(), category = %payload.category, error = %e, "call failed");
            }
            let _ = reply.respond(result);
            Flow::Continue
        }
        Envelope::Cast { payload } => {
            ctx.touch();
            if let Err(e) = routes.dispatch(behavior, &payload, ctx).await {
                tracing::warn!(actor = %ctx.id(), category = %payload.category, error = %e, "cast failed");
            }
            ctx.stats().record_processed();
            Flow::Continue
        }
        Envelope::Timer { id, name } => {
            if ctx.take_timer_fire(id) {
                if let Err(e) = behavior.on_timer(ctx, &name).await {
                    tracing::warn!(actor = %ctx.id(), timer = %name, error = %e, "timer hook failed");
                }
            }
            Flow::Continue
        }
        Envelope::Completion {
            continuation,
            result,
        } => {
            let target: &mut (dyn Any + 'static) = behavior;
            continuation(target, ctx, result);
            ctx.stats().record_processed();
            Flow::Continue
        }
        Envelope::Stop { reason, done } => {
            let _ = ctx.set_state(ActorState::Terminating);
            match behavior.on_stop(ctx, &reason).await {
                Ok(()) => {
                    ctx.cancel_timers();
                    if !ctx.meta().is_daemon() {
                        let registry = ctx.env().registry.clone();
                        if let Err(e) = registry.expire(ctx.id()).await {
                            tracing::warn!(actor = %ctx.id(), error = %e, "failed to expire location record");
                        }
                    }
                    let _ = ctx.set_state(ActorState::Stopped);
                    tracing::debug!(actor = %ctx.id(), reason = %reason, "actor terminated");
                    let _ = done.send(Ok(()));
                    Flow::Exit
                }
                Err(e) => {
                    tracing::error!(actor = %ctx.id(), reason = %reason, error = %e, "on_stop failed, actor keeps running");
                    let _ = ctx.set_state(ActorState::Running);
                    let _ = done.send(Err(e));
                    Flow::Continue
                }
            }
        }
    }
}

fn check_idle(ctx: &ActorContext) {
    if ctx.meta().is_daemon() {
        return;
    }
    let idle = ctx.idle_for();
    if idle >= ctx.config().idle_expiry {
        tracing::debug!(actor = %ctx.id(), idle_ms = idle.as_millis() as u64, "actor idle, requesting hibernation");
        ctx.request_hibernation();
    }
}

/// Close the inbox and fail whatever is still queued.
fn drain(inbox: &mut mpsc::Receiver<Envelope>, error: impl Fn() -> ActorError) {
    inbox.close();
    while let Ok(envelope) = inbox.try_recv() {
        match envelope {
            Envelope::Call { mut reply, .. } => {
                let _ = reply.respond(Err(error()));
            }
            Envelope::Completion { .. } => {
                tracing::debug!("async reply dropped, actor gone");
            }
            Envelope::Stop { done, .. } => {
                let _ = done.send(Ok(()));
            }
            Envelope::Cast { .. } | Envelope::Timer { .. } => {}
        }
    }
}
