//! Local actor supervisor.
//!
//! One task per node owns the [`ActorCatalog`] and serializes every
//! lifecycle decision: starting actors on demand, hibernating idle ones,
//! sweeping long sleepers and draining everything on shutdown. Other
//! components talk to it through a cloneable [`SupervisorRef`].
//!
//! The supervisor never awaits an actor. `on_start` runs inside the new
//! actor's own task and terminations run on the worker pool; actor tasks
//! report back with an `Exited` command carrying their incarnation.

pub mod catalog;

pub use catalog::{ActorCatalog, Hibernation, Residency};

use crate::actor::{
    ActorEnv, ActorHandle, ActorId, FactoryTable, REASON_INACTIVE, REASON_SHUTDOWN,
};
use crate::cluster::LoadReporter;
use crate::config::RuntimeConfig;
use crate::error::ActorError;
use crate::pool::{PoolTask, WorkerPool};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Supervisor operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Working,
    Stopping,
}

pub(crate) enum SupervisorCommand {
    GetOrStart {
        id: ActorId,
        reply: oneshot::Sender<Result<ActorHandle, ActorError>>,
    },
    Hibernate {
        id: ActorId,
    },
    Exited {
        id: ActorId,
        incarnation: u64,
    },
    Sweep,
    Shutdown,
    Remaining {
        reply: oneshot::Sender<usize>,
    },
    CountsByCategory {
        reply: oneshot::Sender<HashMap<String, usize>>,
    },
    Residency {
        id: ActorId,
        reply: oneshot::Sender<Option<Residency>>,
    },
}

/// Cloneable handle to the supervisor task.
#[derive(Clone)]
pub struct SupervisorRef {
    tx: mpsc::UnboundedSender<SupervisorCommand>,
}

/// Receiving end, consumed by [`Supervisor::new`].
pub struct SupervisorInbox {
    rx: mpsc::UnboundedReceiver<SupervisorCommand>,
}

impl SupervisorRef {
    /// Create the command channel. The ref can be handed out before the
    /// supervisor itself is built.
    pub fn channel() -> (SupervisorRef, SupervisorInbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SupervisorRef { tx }, SupervisorInbox { rx })
    }

    /// Return the running actor, waking or starting it if needed.
    pub async fn get_or_start(&self, id: &ActorId) -> Result<ActorHandle, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SupervisorCommand::GetOrStart {
                id: id.clone(),
                reply,
            })
            .map_err(|_| ActorError::ShuttingDown)?;
        rx.await.map_err(|_| ActorError::ShuttingDown)?
    }

    /// Ask for `id` to be hibernated.
    pub fn hibernate(&self, id: ActorId) {
        let _ = self.tx.send(SupervisorCommand::Hibernate { id });
    }

    pub(crate) fn notify_exited(&self, id: ActorId, incarnation: u64) {
        let _ = self.tx.send(SupervisorCommand::Exited { id, incarnation });
    }

    fn sweep(&self) -> bool {
        self.tx.send(SupervisorCommand::Sweep).is_ok()
    }

    fn shutdown(&self) -> bool {
        self.tx.send(SupervisorCommand::Shutdown).is_ok()
    }

    /// Actors tracked on this node, running or sleeping. `0` once the
    /// supervisor is gone.
    pub async fn remaining_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(SupervisorCommand::Remaining { reply }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub async fn counts_by_category(&self) -> HashMap<String, usize> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(SupervisorCommand::CountsByCategory { reply })
            .is_err()
        {
            return HashMap::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Which local table `id` is in, if any.
    pub async fn residency(&self, id: &ActorId) -> Option<Residency> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SupervisorCommand::Residency {
                id: id.clone(),
                reply,
            })
            .ok()?;
        rx.await.ok().flatten()
    }

    /// Drain every local actor, polling until none is left.
    pub async fn stop(&self, poll: Duration) {
        if !self.shutdown() {
            return;
        }
        loop {
            let remaining = self.remaining_count().await;
            if remaining == 0 {
                break;
            }
            tracing::info!(remaining, "waiting for actors to stop");
            tokio::time::sleep(poll).await;
        }
        tracing::info!("all local actors stopped");
    }
}

#[async_trait]
impl LoadReporter for SupervisorRef {
    async fn load(&self) -> u64 {
        self.remaining_count().await as u64
    }
}

/// Terminates one actor on the worker pool.
struct StopActorTask {
    handle: ActorHandle,
    reason: &'static str,
}

#[async_trait]
impl PoolTask for StopActorTask {
    fn describe(&self) -> String {
        format!("stop {} ({})", self.handle.id(), self.reason)
    }

    async fn run(&mut self) -> Result<(), ActorError> {
        self.handle.stop(self.reason).await
    }
}

/// The supervisor task state.
pub struct Supervisor {
    state: SupervisorState,
    catalog: ActorCatalog,
    factories: Arc<FactoryTable>,
    env: ActorEnv,
    pool: WorkerPool,
    config: Arc<RuntimeConfig>,
    inbox: mpsc::UnboundedReceiver<SupervisorCommand>,
    next_incarnation: u64,
}

impl Supervisor {
    pub fn new(
        inbox: SupervisorInbox,
        env: ActorEnv,
        factories: Arc<FactoryTable>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            state: SupervisorState::Working,
            catalog: ActorCatalog::new(),
            factories,
            config: env.config.clone(),
            env,
            pool,
            inbox: inbox.rx,
            next_incarnation: 0,
        }
    }

    /// Process commands until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        tokio::spawn(run_sweeper(
            self.env.supervisor.clone(),
            self.config.sleep_sweep_interval,
            cancel.clone(),
        ));
        tracing::debug!(node = %self.env.node_id, "supervisor started");

        loop {
            let command = tokio::select! {
                _ = cancel.cancelled() => break,
                command = self.inbox.recv() => command,
            };
            let Some(command) = command else { break };
            self.handle(command).await;
        }
        tracing::debug!(node = %self.env.node_id, remaining = self.catalog.remaining(), "supervisor stopped");
    }

    async fn handle(&mut self, command: SupervisorCommand) {
        match command {
            SupervisorCommand::GetOrStart { id, reply } => {
                let result = self.get_or_start(id).await;
                let _ = reply.send(result);
            }
            SupervisorCommand::Hibernate { id } => match self.catalog.hibernate(&id) {
                Hibernation::Slept => tracing::debug!(actor = %id, "actor hibernated"),
                Hibernation::Forgotten => tracing::debug!(actor = %id, "exited actor forgotten"),
                Hibernation::NotRunning => {}
            },
            SupervisorCommand::Exited { id, incarnation } => {
                if self.catalog.remove(&id, incarnation) {
                    tracing::debug!(actor = %id, incarnation, "actor exit recorded");
                }
            }
            SupervisorCommand::Sweep => self.sweep(),
            SupervisorCommand::Shutdown => self.shutdown_pass(),
            SupervisorCommand::Remaining { reply } => {
                let _ = reply.send(self.catalog.remaining());
            }
            SupervisorCommand::CountsByCategory { reply } => {
                let _ = reply.send(self.catalog.counts_by_category());
            }
            SupervisorCommand::Residency { id, reply } => {
                let _ = reply.send(self.catalog.residency(&id));
            }
        }
    }

    async fn get_or_start(&mut self, id: ActorId) -> Result<ActorHandle, ActorError> {
        if self.state == SupervisorState::Stopping {
            return Err(ActorError::ShuttingDown);
        }

        if let Some(handle) = self.catalog.get_running(&id) {
            if !handle.is_closed() {
                return Ok(handle.clone());
            }
            // Exited but the exit report is still queued behind us.
            let incarnation = handle.incarnation();
            self.catalog.remove(&id, incarnation);
        }

        if self.catalog.is_stopping(&id) {
            return Err(ActorError::Terminating(id));
        }

        if let Some(handle) = self.catalog.wake(&id) {
            tracing::debug!(actor = %id, processed = handle.processed(), "actor woken");
            return Ok(handle);
        }

        let meta = self.env.registry.resolve(&id).await?;
        if !meta.is_owned_by(&self.env.node_id) {
            return Err(ActorError::ActorLocationMismatch {
                actor: id,
                owner: meta.owner,
                local: self.env.node_id.clone(),
            });
        }
        let factory = self
            .factories
            .get(&meta.category)
            .cloned()
            .ok_or_else(|| ActorError::UnknownCategory(meta.category.clone()))?;

        self.next_incarnation += 1;
        let handle = factory.spawn(meta, self.env.clone(), self.next_incarnation);
        tracing::debug!(actor = %id, category = %handle.category(), incarnation = self.next_incarnation, "actor spawned");
        self.catalog.insert(handle.clone());
        Ok(handle)
    }

    fn sweep(&mut self) {
        for handle in self.catalog.take_expired_sleepers(self.config.max_sleep) {
            tracing::info!(actor = %handle.id(), "terminating long-sleeping actor");
            self.submit_stop(handle, REASON_INACTIVE);
        }
    }

    /// One drain pass: terminate sleepers, hibernate the running. Repeats
    /// while it still finds running actors.
    fn shutdown_pass(&mut self) {
        if self.state != SupervisorState::Stopping {
            tracing::info!(node = %self.env.node_id, actors = self.catalog.remaining(), "supervisor shutting down");
            self.state = SupervisorState::Stopping;
        }

        for handle in self.catalog.take_sleepers() {
            self.submit_stop(handle, REASON_SHUTDOWN);
        }

        let mut slept = 0;
        for id in self.catalog.running_ids() {
            if self.catalog.hibernate(&id) == Hibernation::Slept {
                slept += 1;
            }
        }
        if slept > 0 {
            self.env.supervisor.shutdown();
        }
    }

    fn submit_stop(&self, handle: ActorHandle, reason: &'static str) {
        if let Err(e) = self.pool.process_async(Box::new(StopActorTask { handle, reason })) {
            tracing::error!(error = %e, "worker pool unavailable, actor termination dropped");
        }
    }
}

async fn run_sweeper(supervisor: SupervisorRef, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if !supervisor.sweep() {
                    return;
                }
            }
        }
    }
}
