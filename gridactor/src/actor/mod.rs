//! Actor lifecycle and core types.

pub mod context;
pub mod factory;
pub mod handlers;
pub mod id;
pub mod lifecycle;
pub mod mailbox;
pub mod message;
pub mod meta;
pub mod traits;

pub use context::{ActorContext, ActorEnv, TimerId};
pub use factory::{ActorFactory, BehaviorFactory, FactoryTable};
pub use handlers::RouteTable;
pub use id::{ActorId, NodeId, RequestId};
pub use lifecycle::{ActorState, REASON_INACTIVE, REASON_SHUTDOWN};
pub use mailbox::ActorHandle;
pub use message::{decode_reply, Message, Payload, ReplyHandle, ReplyResult};
pub use meta::{unix_now, ActorMeta, Dispatch, DispatchPolicy};
pub use traits::{Behavior, Handler};
