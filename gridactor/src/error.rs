//! Error types for the gridactor runtime.
//!
//! One enum per concern: actor-facing failures ([`ActorError`]), location
//! registry failures ([`RegistryError`]), coordination store failures
//! ([`StoreError`]), transport failures ([`TransportError`]) and payload
//! codec failures ([`CodecError`]). Lower layers convert into
//! [`ActorError`] through `#[from]` so `?` works across the stack.

use crate::actor::{ActorId, ActorMeta, ActorState, NodeId};
use thiserror::Error;

/// Errors surfaced to callers of actors and to actor behaviors.
#[derive(Debug, Error)]
pub enum ActorError {
    /// No handler is registered for the message category on this actor.
    #[error("No route for category '{category}' on actor {actor}")]
    RouteNotFound { actor: ActorId, category: String },

    /// The resolved owner node is not this node (stale or racing dispatch).
    #[error("Actor {actor} is owned by {owner:?}, not by local node {local}")]
    ActorLocationMismatch {
        actor: ActorId,
        owner: Option<NodeId>,
        local: NodeId,
    },

    /// The supervisor rejects new starts while stopping.
    #[error("Supervisor is shutting down")]
    ShuttingDown,

    /// The actor is being terminated and cannot be woken right now.
    #[error("Actor {0} is terminating")]
    Terminating(ActorId),

    /// No response arrived within the call deadline.
    #[error("Rpc timed out")]
    RpcTimeout,

    /// A second reply was attempted for an already-answered request.
    #[error("Request already responded")]
    AlreadyResponded,

    /// The behavior's start hook failed.
    #[error("Actor start failed: {0}")]
    StartFailed(String),

    /// Business logic failure reported by a handler.
    #[error("Handler failed: {0}")]
    Handler(String),

    /// The actor's mailbox is closed (actor stopped).
    #[error("Actor mailbox closed")]
    MailboxClosed,

    /// No factory is registered for the actor category.
    #[error("No factory registered for category '{0}'")]
    UnknownCategory(String),

    /// Lifecycle transition not allowed by the state machine.
    #[error("Invalid actor state transition from {from:?} to {to:?}")]
    InvalidStateTransition { from: ActorState, to: ActorState },

    /// Location registry error.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Transport error.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Payload codec error.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl ActorError {
    /// Convenience constructor for handler failures.
    pub fn handler(message: impl Into<String>) -> Self {
        ActorError::Handler(message.into())
    }
}

impl From<StoreError> for ActorError {
    fn from(err: StoreError) -> Self {
        ActorError::Registry(RegistryError::Store(err))
    }
}

/// Errors from the location registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No meta record exists for the actor.
    #[error("Actor meta not found: {0}")]
    MetaNotFound(ActorId),

    /// No live cluster node satisfies the dispatch policy.
    #[error("Dispatch failed for {actor}: no node found (policy: {policy})")]
    DispatchNodeNotFound { actor: ActorId, policy: String },

    /// Optimistic-concurrency write lost a race; carries the winning record.
    #[error("Registry write conflict for {}, current version {}", .current.id, .current.version)]
    RegistryWriteConflict { current: Box<ActorMeta> },

    /// Coordination store failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Record encoding failure.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Errors from the coordination store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store cannot serve the request.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Lease does not exist (never granted, revoked or expired).
    #[error("Lease not found: {0}")]
    LeaseNotFound(i64),

    /// Watch channel closed by the store.
    #[error("Watch channel closed")]
    WatchClosed,
}

/// Errors from node-to-node transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Peer went away.
    #[error("Stream disconnected")]
    Disconnected,

    /// Stream header names a different node than the receiver.
    #[error("Stream addressed to {expected} arrived at {actual}")]
    NodeMismatch { expected: NodeId, actual: NodeId },

    /// Target node is not a live cluster member.
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    /// Connection attempt exceeded its deadline.
    #[error("Connect to {0} timed out")]
    ConnectTimeout(NodeId),

    /// Connection handshake was malformed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Frame length field out of bounds.
    #[error("Invalid frame length: {0} bytes")]
    InvalidFrameLength(usize),

    /// Network I/O error.
    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame encoding failure.
    #[error("Frame codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Errors from payload encoding and decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Failed to encode a value to bytes.
    #[error("encode error: {0}")]
    Encode(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Failed to decode bytes to a value.
    #[error("decode error: {0}")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors related to identifier parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    /// Identifier string is empty.
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    /// Identifier contains a character reserved by the store key layout.
    #[error("{kind} contains reserved character '{ch}'")]
    ReservedCharacter { kind: &'static str, ch: char },
}
