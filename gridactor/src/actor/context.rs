//! Actor execution context.
//!
//! `ActorContext` is owned by the actor's mailbox task and lent to hooks and
//! handlers. It carries the actor's meta, its lifecycle state, the timers it
//! owns and the runtime services it may use to talk to other actors.

use crate::actor::mailbox::{ActorStats, Continuation, Envelope};
use crate::actor::{decode_reply, ActorId, ActorMeta, ActorState, Behavior, Message, NodeId, Payload, RequestId};
use crate::config::RuntimeConfig;
use crate::error::ActorError;
use crate::registry::LocationRegistry;
use crate::rpc::Router;
use crate::supervisor::SupervisorRef;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Runtime services shared by every actor of a node.
///
/// Built once by the runtime and cloned into each actor context; replaces
/// process-wide registries with explicit references.
#[derive(Clone)]
pub struct ActorEnv {
    pub(crate) node_id: NodeId,
    pub(crate) config: Arc<RuntimeConfig>,
    pub(crate) registry: Arc<LocationRegistry>,
    pub(crate) router: Router,
    pub(crate) supervisor: SupervisorRef,
}

impl ActorEnv {
    pub(crate) fn new(
        node_id: NodeId,
        config: Arc<RuntimeConfig>,
        registry: Arc<LocationRegistry>,
        router: Router,
        supervisor: SupervisorRef,
    ) -> Self {
        Self {
            node_id,
            config,
            registry,
            router,
            supervisor,
        }
    }
}

/// Identifier of a timer owned by an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct TimerEntry {
    token: CancellationToken,
    repeating: bool,
}

/// Timers owned by one actor.
///
/// Every timer task is bound to a child of `root`; cancelling `root` on
/// termination guarantees no timer task outlives the actor.
struct TimerSet {
    root: CancellationToken,
    entries: HashMap<TimerId, TimerEntry>,
    next_id: u64,
}

impl TimerSet {
    fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            entries: HashMap::new(),
            next_id: 1,
        }
    }
}

/// Per-actor context handed to hooks and handlers.
pub struct ActorContext {
    meta: ActorMeta,
    env: ActorEnv,
    mailbox: mpsc::Sender<Envelope>,
    stats: Arc<ActorStats>,
    state: ActorState,
    active_at: Instant,
    timers: TimerSet,
}

impl ActorContext {
    pub(crate) fn new(
        meta: ActorMeta,
        env: ActorEnv,
        mailbox: mpsc::Sender<Envelope>,
        stats: Arc<ActorStats>,
    ) -> Self {
        Self {
            meta,
            env,
            mailbox,
            stats,
            state: ActorState::Created,
            active_at: Instant::now(),
            timers: TimerSet::new(),
        }
    }

    /// This actor's id.
    pub fn id(&self) -> &ActorId {
        &self.meta.id
    }

    /// This actor's location record as of its start.
    pub fn meta(&self) -> &ActorMeta {
        &self.meta
    }

    /// The node hosting this actor.
    pub fn node_id(&self) -> &NodeId {
        &self.env.node_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ActorState {
        self.state
    }

    /// Time of the last call or cast handled.
    pub fn active_at(&self) -> Instant {
        self.active_at
    }

    /// Number of messages handled by this incarnation.
    pub fn processed(&self) -> u64 {
        self.stats.processed()
    }

    /// Runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.env.config
    }

    /// The node's router, for raw payload calls.
    pub fn router(&self) -> &Router {
        &self.env.router
    }

    /// The node's location registry.
    pub fn registry(&self) -> &Arc<LocationRegistry> {
        &self.env.registry
    }

    /// Transition to a new state with validation.
    pub(crate) fn set_state(&mut self, next: ActorState) -> Result<(), ActorError> {
        if !self.state.can_transition_to(next) {
            return Err(ActorError::InvalidStateTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.stats.set_state(next);
        Ok(())
    }

    pub(crate) fn touch(&mut self) {
        self.active_at = Instant::now();
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.active_at.elapsed()
    }

    pub(crate) fn stats(&self) -> &ActorStats {
        &self.stats
    }

    pub(crate) fn env(&self) -> &ActorEnv {
        &self.env
    }

    /// Call another actor and wait for its reply (default timeout).
    pub async fn call<M: Message>(&self, to: &ActorId, msg: &M) -> Result<M::Reply, ActorError> {
        self.env.router.call_from(Some(self.id()), to, msg, None).await
    }

    /// Call another actor with an explicit timeout.
    pub async fn call_with_timeout<M: Message>(
        &self,
        to: &ActorId,
        msg: &M,
        timeout: Duration,
    ) -> Result<M::Reply, ActorError> {
        self.env
            .router
            .call_from(Some(self.id()), to, msg, Some(timeout))
            .await
    }

    /// Send a message to another actor without waiting.
    pub async fn cast<M: Message>(&self, to: &ActorId, msg: &M) -> Result<(), ActorError> {
        self.env.router.cast(to, msg).await
    }

    /// Call another actor without blocking this one.
    ///
    /// `on_reply` runs later inside this actor's mailbox, with exclusive
    /// access to the behavior, once the reply or the timeout arrives. `B`
    /// must be this actor's behavior type.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// ctx.call_async(&bank, &Withdraw { amount: 10 }, |this: &mut Player, ctx, result| {
    ///     match result {
    ///         Ok(balance) => this.balance = balance,
    ///         Err(e) => tracing::warn!(actor = %ctx.id(), error = %e, "withdraw failed"),
    ///     }
    /// })
    /// .await?;
    /// ```
    pub async fn call_async<B, M, F>(
        &self,
        to: &ActorId,
        msg: &M,
        on_reply: F,
    ) -> Result<RequestId, ActorError>
    where
        B: Behavior,
        M: Message,
        F: FnOnce(&mut B, &mut ActorContext, Result<M::Reply, ActorError>) + Send + 'static,
    {
        let payload = Payload::encode(msg)?;
        let continuation: Continuation = Box::new(move |behavior, ctx, result| {
            match behavior.downcast_mut::<B>() {
                Some(behavior) => {
                    let reply = result.and_then(|body| decode_reply::<M>(&body));
                    on_reply(behavior, ctx, reply);
                }
                None => tracing::error!(
                    actor = %ctx.id(),
                    expected = std::any::type_name::<B>(),
                    "async reply bound to another behavior type, dropped"
                ),
            }
        });
        self.env
            .router
            .call_async_payload(self.id(), self.mailbox.clone(), to, payload, continuation)
            .await
    }

    /// Ask the supervisor to hibernate this actor.
    pub fn request_hibernation(&self) {
        self.env.supervisor.hibernate(self.id().clone());
    }

    /// Deliver `on_timer(name)` once after `delay`.
    pub fn schedule_once(&mut self, name: impl Into<String>, delay: Duration) -> TimerId {
        self.spawn_timer(name.into(), delay, None)
    }

    /// Deliver `on_timer(name)` every `period`, first after one period.
    pub fn schedule_interval(&mut self, name: impl Into<String>, period: Duration) -> TimerId {
        self.spawn_timer(name.into(), period, Some(period))
    }

    /// Cancel a timer. Returns false if it already fired or was cancelled.
    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        match self.timers.entries.remove(&id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of live timers.
    pub fn timer_count(&self) -> usize {
        self.timers.entries.len()
    }

    /// Consume a timer fire. Returns false for fires of cancelled timers
    /// that were already queued.
    pub(crate) fn take_timer_fire(&mut self, id: TimerId) -> bool {
        match self.timers.entries.get(&id) {
            Some(entry) if entry.repeating => true,
            Some(_) => {
                self.timers.entries.remove(&id);
                true
            }
            None => false,
        }
    }

    pub(crate) fn cancel_timers(&mut self) {
        self.timers.root.cancel();
        self.timers.entries.clear();
    }

    fn spawn_timer(&mut self, name: String, delay: Duration, period: Option<Duration>) -> TimerId {
        let id = TimerId(self.timers.next_id);
        self.timers.next_id += 1;

        let token = self.timers.root.child_token();
        let task_token = token.clone();
        let mailbox = self.mailbox.clone();
        let actor = self.id().clone();

        tokio::spawn(async move {
            let mut wait = delay;
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => return,
                    _ = tokio::time::sleep(wait) => {}
                }
                let fire = Envelope::Timer {
                    id,
                    name: name.clone(),
                };
                match mailbox.try_send(fire) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(actor = %actor, timer = %name, "mailbox full, timer tick skipped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return,
                }
                match period {
                    Some(period) => wait = period,
                    None => return,
                }
            }
        });

        self.timers.entries.insert(
            id,
            TimerEntry {
                token,
                repeating: period.is_some(),
            },
        );
        id
    }
}

impl std::fmt::Debug for ActorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorContext")
            .field("actor_id", &self.meta.id)
            .field("node_id", &self.env.node_id)
            .field("state", &self.state)
            .field("timers", &self.timers.entries.len())
            .finish()
    }
}
