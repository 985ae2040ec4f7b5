//! TCP transport.
//!
//! Packet format: `[length:4][payload:N]`
//!
//! - **length**: total packet size including the header (little-endian u32)
//! - **payload**: one JSON-encoded value
//!
//! Every connection starts with a [`Hello`] naming the stream kind. Rpc and
//! agent streams then carry frames both ways until either side closes;
//! start-actor connections carry one request and one response.

use crate::cluster::Node;
use crate::codec::{JsonCodec, MessageCodec};
use crate::error::TransportError;
use crate::rpc::frame::{
    AgentHeaders, AgentReply, AgentRequest, RpcFrame, StartActorRequest, StartActorResponse,
    StreamHeaders,
};
use crate::rpc::service::RpcService;
use crate::rpc::transport::{Connector, FrameChannel};
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tokio_util::sync::CancellationToken;

/// Header size: 4 bytes of length.
pub const HEADER_SIZE: usize = 4;

/// Largest accepted payload (16MB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Splits a byte stream into length-prefixed packets.
#[derive(Debug, Default, Clone, Copy)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = BytesMut;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, TransportError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }
        let length = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length < HEADER_SIZE || length - HEADER_SIZE > MAX_PAYLOAD_SIZE {
            return Err(TransportError::InvalidFrameLength(length));
        }
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }
        src.advance(HEADER_SIZE);
        Ok(Some(src.split_to(length - HEADER_SIZE)))
    }
}

impl Encoder<Bytes> for PacketCodec {
    type Error = TransportError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), TransportError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TransportError::InvalidFrameLength(payload.len()));
        }
        dst.reserve(HEADER_SIZE + payload.len());
        dst.put_u32_le((HEADER_SIZE + payload.len()) as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

type Connection = Framed<TcpStream, PacketCodec>;

/// First packet of every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stream", rename_all = "snake_case")]
pub enum Hello {
    Rpc(StreamHeaders),
    Agent(AgentHeaders),
    StartActor(StartActorRequest),
}

/// Server answer to a stream [`Hello`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum HelloAck {
    Accepted,
    Rejected(String),
}

async fn write_packet<T: Serialize>(conn: &mut Connection, value: &T) -> Result<(), TransportError> {
    let bytes = JsonCodec.encode(value)?;
    conn.send(Bytes::from(bytes)).await
}

async fn read_packet<T: DeserializeOwned>(conn: &mut Connection) -> Result<T, TransportError> {
    match conn.next().await {
        Some(Ok(bytes)) => Ok(JsonCodec.decode(&bytes)?),
        Some(Err(e)) => Err(e),
        None => Err(TransportError::Disconnected),
    }
}

async fn expect_accepted(conn: &mut Connection) -> Result<(), TransportError> {
    match read_packet::<HelloAck>(conn).await? {
        HelloAck::Accepted => Ok(()),
        HelloAck::Rejected(reason) => Err(TransportError::Handshake(reason)),
    }
}

/// Bridge a connection and a pair of channels until either side ends.
async fn pump<In, Out>(
    conn: Connection,
    to_local: mpsc::UnboundedSender<In>,
    mut from_local: mpsc::UnboundedReceiver<Out>,
    cancel: CancellationToken,
) -> Result<(), TransportError>
where
    In: DeserializeOwned,
    Out: Serialize,
{
    let (mut sink, mut stream) = conn.split();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            incoming = stream.next() => match incoming {
                Some(Ok(bytes)) => {
                    let value: In = JsonCodec.decode(&bytes)?;
                    if to_local.send(value).is_err() {
                        return Ok(());
                    }
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(()),
            },
            outgoing = from_local.recv() => match outgoing {
                Some(value) => sink.send(Bytes::from(JsonCodec.encode(&value)?)).await?,
                None => return Ok(()),
            },
        }
    }
}

/// Accepts connections for one [`RpcService`].
#[derive(Debug)]
pub struct TcpServer {
    local_addr: SocketAddr,
}

impl TcpServer {
    /// Bind `addr` and serve until `cancel` fires.
    pub async fn bind(
        addr: &str,
        service: RpcService,
        cancel: CancellationToken,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(node = %service.node_id(), addr = %local_addr, "rpc listener bound");
        tokio::spawn(accept_loop(listener, service, cancel));
        Ok(Self { local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

async fn accept_loop(listener: TcpListener, service: RpcService, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((socket, peer)) => {
                let service = service.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(socket, service, cancel).await {
                        tracing::debug!(peer = %peer, error = %e, "connection ended with error");
                    }
                });
            }
            Err(e) => tracing::warn!(error = %e, "accept failed"),
        }
    }
    tracing::debug!("rpc listener stopped");
}

async fn serve_connection(
    socket: TcpStream,
    service: RpcService,
    cancel: CancellationToken,
) -> Result<(), TransportError> {
    socket.set_nodelay(true)?;
    let mut conn = Framed::new(socket, PacketCodec);

    match read_packet::<Hello>(&mut conn).await? {
        Hello::Rpc(headers) => {
            let (to_service, requests) = mpsc::unbounded_channel::<RpcFrame>();
            let (responses, from_service) = mpsc::unbounded_channel::<RpcFrame>();
            let channel = FrameChannel {
                outbound: responses,
                inbound: requests,
            };
            accept(&mut conn, service.accept_rpc_stream(headers, channel)).await?;
            pump(conn, to_service, from_service, cancel).await
        }
        Hello::Agent(headers) => {
            let (to_service, requests) = mpsc::unbounded_channel::<AgentRequest>();
            let (replies, from_service) = mpsc::unbounded_channel::<AgentReply>();
            accept(&mut conn, service.accept_agent_stream(headers, requests, replies)).await?;
            pump(conn, to_service, from_service, cancel).await
        }
        Hello::StartActor(request) => {
            let response = service.start_actor(request).await;
            write_packet(&mut conn, &response).await
        }
    }
}

async fn accept(
    conn: &mut Connection,
    accepted: Result<(), TransportError>,
) -> Result<(), TransportError> {
    match accepted {
        Ok(()) => write_packet(conn, &HelloAck::Accepted).await,
        Err(e) => {
            write_packet(conn, &HelloAck::Rejected(e.to_string())).await?;
            Err(e)
        }
    }
}

async fn dial(addr: &str, timeout: Duration, node: &Node) -> Result<Connection, TransportError> {
    let socket = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::ConnectTimeout(node.id.clone()))??;
    socket.set_nodelay(true)?;
    Ok(Framed::new(socket, PacketCodec))
}

/// [`Connector`] dialing the `host:port` published in node records.
#[derive(Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
    cancel: CancellationToken,
}

impl TcpConnector {
    /// Pump tasks of opened streams stop when `cancel` fires.
    pub fn new(connect_timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            connect_timeout,
            cancel,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn open_rpc_stream(
        &self,
        node: &Node,
        headers: StreamHeaders,
    ) -> Result<FrameChannel, TransportError> {
        let mut conn = dial(&node.address(), self.connect_timeout, node).await?;
        write_packet(&mut conn, &Hello::Rpc(headers)).await?;
        expect_accepted(&mut conn).await?;

        let (to_router, inbound) = mpsc::unbounded_channel::<RpcFrame>();
        let (outbound, from_router) = mpsc::unbounded_channel::<RpcFrame>();
        let cancel = self.cancel.clone();
        let peer = node.id.clone();
        tokio::spawn(async move {
            if let Err(e) = pump(conn, to_router, from_router, cancel).await {
                tracing::warn!(node = %peer, error = %e, "rpc stream failed");
            }
        });
        Ok(FrameChannel { outbound, inbound })
    }

    async fn start_actor(
        &self,
        node: &Node,
        request: StartActorRequest,
    ) -> Result<StartActorResponse, TransportError> {
        let mut conn = dial(&node.address(), self.connect_timeout, node).await?;
        write_packet(&mut conn, &Hello::StartActor(request)).await?;
        read_packet(&mut conn).await
    }
}

/// Client end of an agent stream, as used by gateways.
pub struct AgentClient {
    pub requests: mpsc::UnboundedSender<AgentRequest>,
    pub replies: mpsc::UnboundedReceiver<AgentReply>,
}

impl AgentClient {
    /// Connect to `node` and bind the stream to `headers.account_id`.
    pub async fn connect(
        node: &Node,
        headers: AgentHeaders,
        connect_timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Self, TransportError> {
        let mut conn = dial(&node.address(), connect_timeout, node).await?;
        write_packet(&mut conn, &Hello::Agent(headers)).await?;
        expect_accepted(&mut conn).await?;

        let (to_client, replies) = mpsc::unbounded_channel::<AgentReply>();
        let (requests, from_client) = mpsc::unbounded_channel::<AgentRequest>();
        tokio::spawn(async move {
            if let Err(e) = pump(conn, to_client, from_client, cancel).await {
                tracing::debug!(error = %e, "agent stream failed");
            }
        });
        Ok(Self { requests, replies })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{ActorId, NodeId};

    #[test]
    fn test_packet_codec_splits_stream() {
        let mut codec = PacketCodec;
        let mut buf = BytesMut::new();
        codec.encode(Bytes::from_static(b"hello"), &mut buf).unwrap();
        codec.encode(Bytes::from_static(b"world!"), &mut buf).unwrap();
        assert_eq!(&buf[0..4], &9u32.to_le_bytes());

        // Partial header, then partial payload.
        let mut partial = buf.split_to(3);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.unsplit(buf.split_to(4));
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.unsplit(buf);

        assert_eq!(&codec.decode(&mut partial).unwrap().unwrap()[..], b"hello");
        assert_eq!(&codec.decode(&mut partial).unwrap().unwrap()[..], b"world!");
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn test_packet_codec_rejects_bad_length() {
        let mut codec = PacketCodec;
        let mut buf = BytesMut::new();
        buf.put_u32_le(2);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(TransportError::InvalidFrameLength(2))
        ));

        let mut huge = BytesMut::new();
        huge.put_u32_le((MAX_PAYLOAD_SIZE + HEADER_SIZE + 1) as u32);
        assert!(codec.decode(&mut huge).is_err());
    }

    #[test]
    fn test_hello_json_shape() {
        let hello = Hello::StartActor(StartActorRequest {
            actor_id: ActorId::new("p1"),
            timeout_nanos: 1_000,
        });
        let json = serde_json::to_value(&hello).unwrap();
        assert_eq!(json["stream"], "start_actor");
        assert_eq!(json["actor_id"], "p1");

        let rpc = Hello::Rpc(StreamHeaders {
            node_id: NodeId::new("a"),
            client_node_id: NodeId::new("b"),
        });
        let decoded: Hello = serde_json::from_value(serde_json::to_value(&rpc).unwrap()).unwrap();
        assert_eq!(decoded, rpc);
    }
}
