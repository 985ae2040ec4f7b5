//! Frames exchanged between nodes.
//!
//! Every frame is a serde value; transports decide how to put it on the
//! wire (in-process channels carry it as is, TCP length-delimits its JSON
//! encoding).

use crate::actor::{ActorId, NodeId, Payload, RequestId};
use crate::error::{ActorError, RegistryError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error carried in a response frame.
///
/// Mirrors the [`ActorError`] variants a remote caller can act on; the rest
/// travel as their message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum WireError {
    RouteNotFound {
        actor: ActorId,
        category: String,
    },
    ActorLocationMismatch {
        actor: ActorId,
        owner: Option<NodeId>,
        local: NodeId,
    },
    ShuttingDown,
    Terminating(ActorId),
    RpcTimeout,
    AlreadyResponded,
    StartFailed(String),
    Handler(String),
    MailboxClosed,
    UnknownCategory(String),
    MetaNotFound(ActorId),
    DispatchNodeNotFound {
        actor: ActorId,
        policy: String,
    },
    Other(String),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", ActorError::from(self.clone()))
    }
}

impl From<&ActorError> for WireError {
    fn from(err: &ActorError) -> Self {
        match err {
            ActorError::RouteNotFound { actor, category } => WireError::RouteNotFound {
                actor: actor.clone(),
                category: category.clone(),
            },
            ActorError::ActorLocationMismatch {
                actor,
                owner,
                local,
            } => WireError::ActorLocationMismatch {
                actor: actor.clone(),
                owner: owner.clone(),
                local: local.clone(),
            },
            ActorError::ShuttingDown => WireError::ShuttingDown,
            ActorError::Terminating(id) => WireError::Terminating(id.clone()),
            ActorError::RpcTimeout => WireError::RpcTimeout,
            ActorError::AlreadyResponded => WireError::AlreadyResponded,
            ActorError::StartFailed(msg) => WireError::StartFailed(msg.clone()),
            ActorError::Handler(msg) => WireError::Handler(msg.clone()),
            ActorError::MailboxClosed => WireError::MailboxClosed,
            ActorError::UnknownCategory(category) => WireError::UnknownCategory(category.clone()),
            ActorError::Registry(RegistryError::MetaNotFound(id)) => {
                WireError::MetaNotFound(id.clone())
            }
            ActorError::Registry(RegistryError::DispatchNodeNotFound { actor, policy }) => {
                WireError::DispatchNodeNotFound {
                    actor: actor.clone(),
                    policy: policy.clone(),
                }
            }
            other => WireError::Other(other.to_string()),
        }
    }
}

impl From<WireError> for ActorError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::RouteNotFound { actor, category } => {
                ActorError::RouteNotFound { actor, category }
            }
            WireError::ActorLocationMismatch {
                actor,
                owner,
                local,
            } => ActorError::ActorLocationMismatch {
                actor,
                owner,
                local,
            },
            WireError::ShuttingDown => ActorError::ShuttingDown,
            WireError::Terminating(id) => ActorError::Terminating(id),
            WireError::RpcTimeout => ActorError::RpcTimeout,
            WireError::AlreadyResponded => ActorError::AlreadyResponded,
            WireError::StartFailed(msg) => ActorError::StartFailed(msg),
            WireError::Handler(msg) => ActorError::Handler(msg),
            WireError::MailboxClosed => ActorError::MailboxClosed,
            WireError::UnknownCategory(category) => ActorError::UnknownCategory(category),
            WireError::MetaNotFound(id) => RegistryError::MetaNotFound(id).into(),
            WireError::DispatchNodeNotFound { actor, policy } => {
                RegistryError::DispatchNodeNotFound { actor, policy }.into()
            }
            WireError::Other(msg) => ActorError::Handler(msg),
        }
    }
}

/// Result as carried on the wire.
pub type WireResult = Result<Vec<u8>, WireError>;

pub(crate) fn to_wire(result: Result<Vec<u8>, ActorError>) -> WireResult {
    result.map_err(|e| WireError::from(&e))
}

pub(crate) fn from_wire(result: WireResult) -> Result<Vec<u8>, ActorError> {
    result.map_err(ActorError::from)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Call,
    Cast,
}

/// Client to server: deliver `payload` to `to_actor`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub req_id: RequestId,
    pub kind: RequestKind,
    pub from_actor: Option<ActorId>,
    pub to_actor: ActorId,
    pub payload: Payload,
}

/// Server to client: the reply to a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub req_id: RequestId,
    pub from_actor: ActorId,
    pub to_actor: Option<ActorId>,
    pub result: WireResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum RpcFrame {
    Request(RequestFrame),
    Response(ResponseFrame),
}

/// Headers opening a node-to-node stream.
///
/// `node_id` names the node the client meant to reach; the server rejects
/// the stream if it is someone else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHeaders {
    pub node_id: NodeId,
    pub client_node_id: NodeId,
}

/// Headers opening a client agent stream bound to one account actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentHeaders {
    pub node_id: NodeId,
    pub account_id: ActorId,
}

/// Agent to server: one request for the account actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub req_id: RequestId,
    /// Message category.
    pub req_type: String,
    pub data: Vec<u8>,
}

/// Server to agent: the reply to an [`AgentRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentReply {
    pub req_id: RequestId,
    pub from_actor: ActorId,
    pub result: WireResult,
}

/// Ask a node to start an actor it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartActorRequest {
    pub actor_id: ActorId,
    pub timeout_nanos: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartActorResponse {
    pub success: bool,
}
