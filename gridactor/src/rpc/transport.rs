//! Node-to-node transport seam.
//!
//! The router only needs two things from the network: a bidirectional frame
//! stream to a node, and a one-shot "start this actor" request. Both live
//! behind [`Connector`]. [`LocalNetwork`] connects runtimes of the same
//! process through channels; `rpc::tcp` does it over sockets.

use crate::actor::NodeId;
use crate::cluster::Node;
use crate::error::TransportError;
use crate::rpc::frame::{
    AgentHeaders, AgentReply, AgentRequest, RpcFrame, StartActorRequest, StartActorResponse,
    StreamHeaders,
};
use crate::rpc::service::RpcService;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;

/// One end of a frame stream.
#[derive(Debug)]
pub struct FrameChannel {
    pub outbound: mpsc::UnboundedSender<RpcFrame>,
    pub inbound: mpsc::UnboundedReceiver<RpcFrame>,
}

impl FrameChannel {
    /// Two connected ends.
    pub fn pair() -> (FrameChannel, FrameChannel) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            FrameChannel {
                outbound: a_tx,
                inbound: b_rx,
            },
            FrameChannel {
                outbound: b_tx,
                inbound: a_rx,
            },
        )
    }
}

/// Client side of the node-to-node transport.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a request/response stream to `node`.
    async fn open_rpc_stream(
        &self,
        node: &Node,
        headers: StreamHeaders,
    ) -> Result<FrameChannel, TransportError>;

    /// Ask `node` to start an actor it owns.
    async fn start_actor(
        &self,
        node: &Node,
        request: StartActorRequest,
    ) -> Result<StartActorResponse, TransportError>;
}

/// In-process network joining the runtimes of one test cluster.
#[derive(Default)]
pub struct LocalNetwork {
    services: RwLock<HashMap<NodeId, RpcService>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a node reachable.
    pub fn register(&self, service: RpcService) {
        if let Ok(mut services) = self.services.write() {
            services.insert(service.node_id().clone(), service);
        }
    }

    /// Make a node unreachable, as if its process died.
    pub fn unregister(&self, node: &NodeId) {
        if let Ok(mut services) = self.services.write() {
            services.remove(node);
        }
    }

    fn service(&self, node: &NodeId) -> Result<RpcService, TransportError> {
        self.services
            .read()
            .ok()
            .and_then(|services| services.get(node).cloned())
            .ok_or_else(|| TransportError::UnknownNode(node.clone()))
    }

    /// Open an agent stream to `node`, as a client gateway would.
    pub fn open_agent_stream(
        &self,
        node: &NodeId,
        headers: AgentHeaders,
    ) -> Result<
        (
            mpsc::UnboundedSender<AgentRequest>,
            mpsc::UnboundedReceiver<AgentReply>,
        ),
        TransportError,
    > {
        let service = self.service(node)?;
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        service.accept_agent_stream(headers, req_rx, reply_tx)?;
        Ok((req_tx, reply_rx))
    }
}

#[async_trait]
impl Connector for LocalNetwork {
    async fn open_rpc_stream(
        &self,
        node: &Node,
        headers: StreamHeaders,
    ) -> Result<FrameChannel, TransportError> {
        let service = self.service(&node.id)?;
        let (client, server) = FrameChannel::pair();
        service.accept_rpc_stream(headers, server)?;
        Ok(client)
    }

    async fn start_actor(
        &self,
        node: &Node,
        request: StartActorRequest,
    ) -> Result<StartActorResponse, TransportError> {
        let service = self.service(&node.id)?;
        Ok(service.start_actor(request).await)
    }
}
