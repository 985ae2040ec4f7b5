//! Server side of the node-to-node protocol.
//!
//! Accepted streams are served by one task each. Requests of a stream are
//! handed to the supervisor and enqueued in arrival order; the replies are
//! awaited on separate tasks so a slow actor never holds up the stream.

use crate::actor::{ActorId, NodeId, Payload};
use crate::error::{ActorError, TransportError};
use crate::rpc::frame::{
    to_wire, AgentHeaders, AgentReply, AgentRequest, RequestFrame, RequestKind, ResponseFrame,
    RpcFrame, StartActorRequest, StartActorResponse, StreamHeaders,
};
use crate::rpc::router::Router;
use crate::rpc::transport::FrameChannel;
use crate::supervisor::SupervisorRef;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

struct ServiceInner {
    node_id: NodeId,
    router: Router,
    supervisor: SupervisorRef,
    cancel: CancellationToken,
}

/// Accepts streams and start requests addressed to this node.
#[derive(Clone)]
pub struct RpcService {
    inner: Arc<ServiceInner>,
}

impl RpcService {
    pub fn new(
        node_id: NodeId,
        router: Router,
        supervisor: SupervisorRef,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                node_id,
                router,
                supervisor,
                cancel,
            }),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.inner.node_id
    }

    fn check_addressee(&self, node_id: &NodeId) -> Result<(), TransportError> {
        if node_id != &self.inner.node_id {
            return Err(TransportError::NodeMismatch {
                expected: node_id.clone(),
                actual: self.inner.node_id.clone(),
            });
        }
        Ok(())
    }

    /// Serve a request stream opened by `headers.client_node_id`.
    pub fn accept_rpc_stream(
        &self,
        headers: StreamHeaders,
        channel: FrameChannel,
    ) -> Result<(), TransportError> {
        self.check_addressee(&headers.node_id)?;
        tracing::debug!(node = %self.inner.node_id, client = %headers.client_node_id, "rpc stream accepted");
        tokio::spawn(self.clone().serve_rpc_stream(headers.client_node_id, channel));
        Ok(())
    }

    async fn serve_rpc_stream(self, client: NodeId, channel: FrameChannel) {
        let FrameChannel {
            outbound,
            mut inbound,
        } = channel;
        let reply_to = if client == self.inner.node_id {
            ReplyPath::Local(self.inner.router.clone())
        } else {
            ReplyPath::Stream(outbound)
        };

        loop {
            let frame = tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                frame = inbound.recv() => frame,
            };
            match frame {
                Some(RpcFrame::Request(request)) => self.serve_request(request, &reply_to).await,
                Some(RpcFrame::Response(response)) => {
                    tracing::warn!(client = %client, req_id = %response.req_id, "response frame on a server stream ignored");
                }
                None => break,
            }
        }
        tracing::debug!(node = %self.inner.node_id, client = %client, "rpc stream closed");
    }

    async fn serve_request(&self, request: RequestFrame, reply_to: &ReplyPath) {
        let RequestFrame {
            req_id,
            kind,
            from_actor,
            to_actor,
            payload,
        } = request;

        match kind {
            RequestKind::Cast => {
                if let Err(e) = self.enqueue_cast(&to_actor, payload).await {
                    tracing::warn!(to = %to_actor, error = %e, "remote cast dropped");
                }
            }
            RequestKind::Call => {
                let rx = self.enqueue_call(&to_actor, payload).await;
                let reply_to = reply_to.clone();
                tokio::spawn(async move {
                    let result = await_reply(rx).await;
                    reply_to.send(ResponseFrame {
                        req_id,
                        from_actor: to_actor,
                        to_actor: from_actor,
                        result: to_wire(result),
                    });
                });
            }
        }
    }

    async fn enqueue_call(
        &self,
        to: &ActorId,
        payload: Payload,
    ) -> Result<oneshot::Receiver<Result<Vec<u8>, ActorError>>, ActorError> {
        let handle = self.inner.supervisor.get_or_start(to).await?;
        handle.enqueue_call(payload).await
    }

    async fn enqueue_cast(&self, to: &ActorId, payload: Payload) -> Result<(), ActorError> {
        let handle = self.inner.supervisor.get_or_start(to).await?;
        handle.cast(payload).await
    }

    /// Serve a client agent stream: every request is a call to the
    /// account actor named in the headers.
    pub fn accept_agent_stream(
        &self,
        headers: AgentHeaders,
        requests: mpsc::UnboundedReceiver<AgentRequest>,
        replies: mpsc::UnboundedSender<AgentReply>,
    ) -> Result<(), TransportError> {
        self.check_addressee(&headers.node_id)?;
        tracing::debug!(node = %self.inner.node_id, account = %headers.account_id, "agent stream accepted");
        tokio::spawn(self.clone().serve_agent_stream(headers.account_id, requests, replies));
        Ok(())
    }

    async fn serve_agent_stream(
        self,
        account: ActorId,
        mut requests: mpsc::UnboundedReceiver<AgentRequest>,
        replies: mpsc::UnboundedSender<AgentReply>,
    ) {
        loop {
            let request = tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                request = requests.recv() => request,
            };
            let Some(request) = request else { break };

            let payload = Payload::new(request.req_type, request.data);
            let rx = self.enqueue_call(&account, payload).await;
            let replies = replies.clone();
            let from_actor = account.clone();
            tokio::spawn(async move {
                let result = await_reply(rx).await;
                let reply = AgentReply {
                    req_id: request.req_id,
                    from_actor,
                    result: to_wire(result),
                };
                if replies.send(reply).is_err() {
                    tracing::debug!(req_id = %request.req_id, "agent gone, reply dropped");
                }
            });
        }
        tracing::debug!(account = %account, "agent stream closed");
    }

    /// Start `request.actor_id` here within the requested deadline.
    pub async fn start_actor(&self, request: StartActorRequest) -> StartActorResponse {
        let deadline = Duration::from_nanos(request.timeout_nanos);
        let started =
            tokio::time::timeout(deadline, self.inner.supervisor.get_or_start(&request.actor_id)).await;
        let success = match started {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::warn!(actor = %request.actor_id, error = %e, "remote start failed");
                false
            }
            Err(_) => {
                tracing::warn!(actor = %request.actor_id, "remote start timed out");
                false
            }
        };
        StartActorResponse { success }
    }
}

async fn await_reply(
    rx: Result<oneshot::Receiver<Result<Vec<u8>, ActorError>>, ActorError>,
) -> Result<Vec<u8>, ActorError> {
    match rx {
        Ok(rx) => rx.await.unwrap_or(Err(ActorError::MailboxClosed)),
        Err(e) => Err(e),
    }
}

/// Where the responses of one stream go.
#[derive(Clone)]
enum ReplyPath {
    Stream(mpsc::UnboundedSender<RpcFrame>),
    /// The client is this very node: skip the wire.
    Local(Router),
}

impl ReplyPath {
    fn send(&self, response: ResponseFrame) {
        match self {
            ReplyPath::Stream(outbound) => {
                let req_id = response.req_id;
                if outbound.send(RpcFrame::Response(response)).is_err() {
                    tracing::debug!(req_id = %req_id, "client stream gone, reply dropped");
                }
            }
            ReplyPath::Local(router) => router.deliver_response(response),
        }
    }
}
