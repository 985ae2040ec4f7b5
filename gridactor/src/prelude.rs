//! Common imports for gridactor.

pub use crate::actor::{
    ActorContext, ActorId, ActorMeta, ActorState, Behavior, Dispatch, DispatchPolicy, Handler,
    Message, NodeId, Payload, RequestId, RouteTable, TimerId,
};
pub use crate::config::RuntimeConfig;
pub use crate::error::{ActorError, RegistryError, TransportError};
pub use crate::registry::{CoordinationStore, InMemoryStore};
pub use crate::rpc::LocalNetwork;
pub use crate::runtime::{ActorRuntime, ActorRuntimeBuilder};

pub use async_trait::async_trait;
pub use serde::{Deserialize, Serialize};
pub use std::sync::Arc;
pub use std::time::Duration;

pub type Result<T> = std::result::Result<T, ActorError>;
