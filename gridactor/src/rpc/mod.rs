//! Location-transparent messaging between actors.
//!
//! - [`Router`]: caller side, resolves owners and tracks pending requests
//! - [`RpcService`]: server side, feeds incoming requests to local actors
//! - [`Connector`]: transport seam, implemented in process by
//!   [`LocalNetwork`] and over sockets by [`TcpConnector`]

pub mod frame;
pub mod pending;
pub mod router;
pub mod service;
pub mod tcp;
pub mod transport;

pub use frame::{
    AgentHeaders, AgentReply, AgentRequest, RequestFrame, RequestKind, ResponseFrame, RpcFrame,
    StartActorRequest, StartActorResponse, StreamHeaders, WireError, WireResult,
};
pub use pending::RequestIds;
pub use router::{Router, RouterTask};
pub use service::RpcService;
pub use tcp::{AgentClient, PacketCodec, TcpConnector, TcpServer};
pub use transport::{Connector, FrameChannel, LocalNetwork};
