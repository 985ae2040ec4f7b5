//! Caller-side message routing.
//!
//! The [`Router`] resolves the owner of the target actor through the
//! location registry, then either hands the message to the local
//! supervisor or ships it to the owner node over a cached frame stream.
//!
//! # Flow
//!
//! 1. `registry.resolve(to)` yields the record with a live owner
//! 2. Local owner: `supervisor.get_or_start(to)`, then the actor mailbox
//! 3. Remote owner: register a pending entry, send a request frame
//! 4. The response frame, or the timeout sweep, completes the entry
//!
//! Remote bookkeeping lives in a single [`RouterTask`]: the pending table,
//! the stream cache and the sweep are only touched from that task, so a
//! response and a timeout can never both complete the same request.

use crate::actor::mailbox::{Continuation, Envelope};
use crate::actor::message::ReplyResult;
use crate::actor::{decode_reply, ActorId, Message, NodeId, Payload, RequestId};
use crate::cluster::{Membership, Node};
use crate::config::RuntimeConfig;
use crate::error::{ActorError, TransportError};
use crate::registry::LocationRegistry;
use crate::rpc::frame::{
    from_wire, RequestFrame, RequestKind, ResponseFrame, RpcFrame, StartActorRequest,
    StreamHeaders,
};
use crate::rpc::pending::{Completion, PendingRequest, PendingTable, RequestIds};
use crate::rpc::transport::{Connector, FrameChannel};
use crate::supervisor::SupervisorRef;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub(crate) enum RouterCommand {
    /// Ship a request, registering `pending` first.
    Send {
        node: Node,
        frame: RequestFrame,
        pending: Option<PendingRequest>,
    },
    /// Track a request served locally.
    Register(PendingRequest),
    /// Result of a locally served request.
    Complete {
        id: RequestId,
        result: ReplyResult,
    },
    /// Response frame from a remote node.
    Deliver(ResponseFrame),
    /// Outcome of a stream connect attempt.
    Connected {
        node: NodeId,
        result: Result<FrameChannel, TransportError>,
    },
    /// A client stream's receive side ended.
    StreamClosed {
        node: NodeId,
        generation: u64,
    },
    PendingCount {
        reply: oneshot::Sender<usize>,
    },
}

struct RouterShared {
    node_id: NodeId,
    config: Arc<RuntimeConfig>,
    registry: Arc<LocationRegistry>,
    membership: Arc<Membership>,
    supervisor: SupervisorRef,
    connector: Arc<dyn Connector>,
    ids: RequestIds,
    commands: mpsc::UnboundedSender<RouterCommand>,
}

/// Cloneable routing handle of one node.
#[derive(Clone)]
pub struct Router {
    shared: Arc<RouterShared>,
}

impl Router {
    /// Build the router and the task that owns its remote bookkeeping.
    /// The task must be spawned with [`RouterTask::run`].
    pub fn new(
        node_id: NodeId,
        config: Arc<RuntimeConfig>,
        registry: Arc<LocationRegistry>,
        membership: Arc<Membership>,
        supervisor: SupervisorRef,
        connector: Arc<dyn Connector>,
    ) -> (Router, RouterTask) {
        let (commands, rx) = mpsc::unbounded_channel();
        let router = Router {
            shared: Arc::new(RouterShared {
                node_id,
                config,
                registry,
                membership,
                supervisor,
                connector,
                ids: RequestIds::new(),
                commands,
            }),
        };
        let task = RouterTask {
            shared: router.shared.clone(),
            commands: rx,
            pending: PendingTable::new(),
            streams: HashMap::new(),
            next_generation: 0,
        };
        (router, task)
    }

    pub fn node_id(&self) -> &NodeId {
        &self.shared.node_id
    }

    /// Call `to` and wait for the typed reply, with the default timeout.
    pub async fn call<M: Message>(&self, to: &ActorId, msg: &M) -> Result<M::Reply, ActorError> {
        self.call_from(None, to, msg, None).await
    }

    /// Call `to` with an explicit timeout.
    pub async fn call_with_timeout<M: Message>(
        &self,
        to: &ActorId,
        msg: &M,
        timeout: Duration,
    ) -> Result<M::Reply, ActorError> {
        self.call_from(None, to, msg, Some(timeout)).await
    }

    pub(crate) async fn call_from<M: Message>(
        &self,
        from: Option<&ActorId>,
        to: &ActorId,
        msg: &M,
        timeout: Option<Duration>,
    ) -> Result<M::Reply, ActorError> {
        let payload = Payload::encode(msg)?;
        let body = self.call_payload_from(from, to, payload, timeout).await?;
        decode_reply::<M>(&body)
    }

    /// Send a typed one-way message.
    pub async fn cast<M: Message>(&self, to: &ActorId, msg: &M) -> Result<(), ActorError> {
        self.cast_payload(to, Payload::encode(msg)?).await
    }

    /// Call with a raw payload; the reply body is returned undecoded.
    pub async fn call_payload(
        &self,
        to: &ActorId,
        payload: Payload,
        timeout: Option<Duration>,
    ) -> ReplyResult {
        self.call_payload_from(None, to, payload, timeout).await
    }

    async fn call_payload_from(
        &self,
        from: Option<&ActorId>,
        to: &ActorId,
        payload: Payload,
        timeout: Option<Duration>,
    ) -> ReplyResult {
        let timeout = timeout.unwrap_or(self.shared.config.call_timeout);
        match self.locate(to).await? {
            Target::Local => {
                let handle = self.shared.supervisor.get_or_start(to).await?;
                handle.call(payload, timeout).await
            }
            Target::Remote(node) => {
                let id = self.shared.ids.next();
                let (tx, rx) = oneshot::channel();
                let pending =
                    PendingRequest::new(id, from.cloned(), to.clone(), timeout, Completion::Waiter(tx));
                let frame = RequestFrame {
                    req_id: id,
                    kind: RequestKind::Call,
                    from_actor: from.cloned(),
                    to_actor: to.clone(),
                    payload,
                };
                tracing::trace!(req_id = %id, to = %to, node = %node.id, "remote call");
                self.command(RouterCommand::Send {
                    node,
                    frame,
                    pending: Some(pending),
                })?;
                rx.await.map_err(|_| ActorError::ShuttingDown)?
            }
        }
    }

    /// One-way delivery of a raw payload.
    pub async fn cast_payload(&self, to: &ActorId, payload: Payload) -> Result<(), ActorError> {
        match self.locate(to).await? {
            Target::Local => {
                let handle = self.shared.supervisor.get_or_start(to).await?;
                handle.cast(payload).await
            }
            Target::Remote(node) => {
                let frame = RequestFrame {
                    req_id: self.shared.ids.next(),
                    kind: RequestKind::Cast,
                    from_actor: None,
                    to_actor: to.clone(),
                    payload,
                };
                self.command(RouterCommand::Send {
                    node,
                    frame,
                    pending: None,
                })
            }
        }
    }

    /// Call without waiting; `continuation` later runs in `from`'s mailbox.
    ///
    /// Resolution failures are returned directly and the continuation is
    /// dropped. Once the request id is returned the continuation runs
    /// exactly once, with the reply or with `RpcTimeout`.
    pub(crate) async fn call_async_payload(
        &self,
        from: &ActorId,
        mailbox: mpsc::Sender<Envelope>,
        to: &ActorId,
        payload: Payload,
        continuation: Continuation,
    ) -> Result<RequestId, ActorError> {
        let target = self.locate(to).await?;
        let id = self.shared.ids.next();
        let pending = PendingRequest::new(
            id,
            Some(from.clone()),
            to.clone(),
            self.shared.config.call_timeout,
            Completion::Callback {
                mailbox,
                continuation,
            },
        );

        match target {
            Target::Local => {
                self.command(RouterCommand::Register(pending))?;
                let router = self.clone();
                let to = to.clone();
                tokio::spawn(async move {
                    let result = match router.shared.supervisor.get_or_start(&to).await {
                        Ok(handle) => match handle.enqueue_call(payload).await {
                            Ok(rx) => rx.await.unwrap_or(Err(ActorError::MailboxClosed)),
                            Err(e) => Err(e),
                        },
                        Err(e) => Err(e),
                    };
                    let _ = router.command(RouterCommand::Complete { id, result });
                });
            }
            Target::Remote(node) => {
                let frame = RequestFrame {
                    req_id: id,
                    kind: RequestKind::Call,
                    from_actor: Some(from.clone()),
                    to_actor: to.clone(),
                    payload,
                };
                self.command(RouterCommand::Send {
                    node,
                    frame,
                    pending: Some(pending),
                })?;
            }
        }
        Ok(id)
    }

    /// Make sure `id` is running on its owner node.
    pub async fn start_actor(&self, id: &ActorId, timeout: Duration) -> Result<(), ActorError> {
        match self.locate(id).await? {
            Target::Local => {
                tokio::time::timeout(timeout, self.shared.supervisor.get_or_start(id))
                    .await
                    .map_err(|_| ActorError::RpcTimeout)??;
                Ok(())
            }
            Target::Remote(node) => {
                let request = StartActorRequest {
                    actor_id: id.clone(),
                    timeout_nanos: timeout.as_nanos().min(u64::MAX as u128) as u64,
                };
                let response = tokio::time::timeout(
                    timeout,
                    self.shared.connector.start_actor(&node, request),
                )
                .await
                .map_err(|_| ActorError::RpcTimeout)??;
                if response.success {
                    Ok(())
                } else {
                    Err(ActorError::StartFailed(format!(
                        "node {} could not start {}",
                        node.id, id
                    )))
                }
            }
        }
    }

    /// Hand a response frame to the pending table.
    pub fn deliver_response(&self, frame: ResponseFrame) {
        let _ = self.command(RouterCommand::Deliver(frame));
    }

    /// Outstanding tracked requests. `0` once the router task is gone.
    pub async fn pending_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.command(RouterCommand::PendingCount { reply }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    async fn locate(&self, to: &ActorId) -> Result<Target, ActorError> {
        let meta = self.shared.registry.resolve(to).await?;
        match meta.owner {
            Some(owner) if owner == self.shared.node_id => Ok(Target::Local),
            Some(owner) => match self.shared.membership.get(&owner).await {
                Some(node) => Ok(Target::Remote(node)),
                None => Err(TransportError::UnknownNode(owner).into()),
            },
            None => Err(ActorError::ActorLocationMismatch {
                actor: to.clone(),
                owner: None,
                local: self.shared.node_id.clone(),
            }),
        }
    }

    fn command(&self, command: RouterCommand) -> Result<(), ActorError> {
        self.shared
            .commands
            .send(command)
            .map_err(|_| ActorError::ShuttingDown)
    }
}

enum Target {
    Local,
    Remote(Node),
}

enum StreamState {
    Connecting { queued: Vec<RpcFrame> },
    Connected {
        outbound: mpsc::UnboundedSender<RpcFrame>,
        generation: u64,
    },
}

/// Owner of the pending table and the per-node stream cache.
pub struct RouterTask {
    shared: Arc<RouterShared>,
    commands: mpsc::UnboundedReceiver<RouterCommand>,
    pending: PendingTable,
    streams: HashMap<NodeId, StreamState>,
    next_generation: u64,
}

impl RouterTask {
    /// Process commands and sweep timeouts until cancelled. Requests still
    /// pending at exit fail with `ShuttingDown`.
    pub async fn run(mut self, cancel: CancellationToken) {
        let interval = self.shared.config.rpc_sweep_interval;
        let mut sweep = tokio::time::interval_at(Instant::now() + interval, interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command, &cancel),
                    None => break,
                },
                _ = sweep.tick() => self.sweep(),
            }
        }

        for request in self.pending.drain() {
            request.complete(Err(ActorError::ShuttingDown));
        }
        tracing::debug!(node = %self.shared.node_id, "router stopped");
    }

    fn handle(&mut self, command: RouterCommand, cancel: &CancellationToken) {
        match command {
            RouterCommand::Send {
                node,
                frame,
                pending,
            } => {
                if let Some(pending) = pending {
                    self.pending.insert(pending);
                }
                self.send(node, RpcFrame::Request(frame), cancel);
            }
            RouterCommand::Register(pending) => self.pending.insert(pending),
            RouterCommand::Complete { id, result } => match self.pending.take(id) {
                Some(pending) => pending.complete(result),
                None => tracing::debug!(req_id = %id, "late local reply dropped"),
            },
            RouterCommand::Deliver(frame) => match self.pending.take(frame.req_id) {
                Some(pending) => pending.complete(from_wire(frame.result)),
                None => {
                    tracing::debug!(req_id = %frame.req_id, from = %frame.from_actor, "late or unknown response dropped")
                }
            },
            RouterCommand::Connected { node, result } => self.on_connected(node, result, cancel),
            RouterCommand::StreamClosed { node, generation } => {
                if let Some(StreamState::Connected { generation: current, .. }) = self.streams.get(&node) {
                    if *current == generation {
                        tracing::info!(node = %node, "stream to node closed");
                        self.streams.remove(&node);
                    }
                }
            }
            RouterCommand::PendingCount { reply } => {
                let _ = reply.send(self.pending.len());
            }
        }
    }

    fn send(&mut self, node: Node, frame: RpcFrame, cancel: &CancellationToken) {
        match self.streams.get_mut(&node.id) {
            Some(StreamState::Connected { outbound, .. }) => {
                if outbound.send(frame).is_err() {
                    // The request, if any, is left to the timeout sweep.
                    tracing::warn!(node = %node.id, "stream to node broken, frame dropped");
                    self.streams.remove(&node.id);
                }
            }
            Some(StreamState::Connecting { queued }) => queued.push(frame),
            None => {
                self.streams.insert(
                    node.id.clone(),
                    StreamState::Connecting {
                        queued: vec![frame],
                    },
                );
                self.connect(node, cancel);
            }
        }
    }

    fn connect(&self, node: Node, cancel: &CancellationToken) {
        let shared = self.shared.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let headers = StreamHeaders {
                node_id: node.id.clone(),
                client_node_id: shared.node_id.clone(),
            };
            let attempt = tokio::time::timeout(
                shared.config.connect_timeout,
                shared.connector.open_rpc_stream(&node, headers),
            );
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = attempt => result.unwrap_or_else(|_| Err(TransportError::ConnectTimeout(node.id.clone()))),
            };
            let _ = shared.commands.send(RouterCommand::Connected {
                node: node.id,
                result,
            });
        });
    }

    fn on_connected(
        &mut self,
        node: NodeId,
        result: Result<FrameChannel, TransportError>,
        cancel: &CancellationToken,
    ) {
        let queued = match self.streams.remove(&node) {
            Some(StreamState::Connecting { queued }) => queued,
            Some(connected) => {
                self.streams.insert(node, connected);
                return;
            }
            None => Vec::new(),
        };

        let channel = match result {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!(node = %node, error = %e, dropped = queued.len(), "failed to open stream");
                return;
            }
        };

        self.next_generation += 1;
        let generation = self.next_generation;
        let FrameChannel { outbound, inbound } = channel;
        tokio::spawn(run_client_stream(
            node.clone(),
            generation,
            inbound,
            self.shared.commands.clone(),
            cancel.clone(),
        ));
        tracing::debug!(node = %node, generation, queued = queued.len(), "stream to node opened");

        for frame in queued {
            if outbound.send(frame).is_err() {
                tracing::warn!(node = %node, "stream closed while flushing queued frames");
                return;
            }
        }
        self.streams.insert(
            node,
            StreamState::Connected {
                outbound,
                generation,
            },
        );
    }

    fn sweep(&mut self) {
        for request in self.pending.take_expired(Instant::now()) {
            tracing::debug!(req_id = %request.id, from = ?request.from, to = %request.to, "request timed out");
            request.complete(Err(ActorError::RpcTimeout));
        }
    }
}

async fn run_client_stream(
    node: NodeId,
    generation: u64,
    mut inbound: mpsc::UnboundedReceiver<RpcFrame>,
    commands: mpsc::UnboundedSender<RouterCommand>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            frame = inbound.recv() => frame,
        };
        match frame {
            Some(RpcFrame::Response(response)) => {
                if commands.send(RouterCommand::Deliver(response)).is_err() {
                    return;
                }
            }
            Some(RpcFrame::Request(request)) => {
                tracing::warn!(node = %node, req_id = %request.req_id, "request frame on a client stream ignored");
            }
            None => break,
        }
    }
    let _ = commands.send(RouterCommand::StreamClosed { node, generation });
}
