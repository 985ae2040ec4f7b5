//! # gridactor
//!
//! Distributed virtual actors with location-transparent RPC.
//!
//! Actors are addressed by id and activated on demand on the node the
//! location registry assigns them. Idle actors hibernate and are woken by
//! the next message; long sleepers are terminated. Calls and casts go
//! through the node's router, which delivers locally or over a cached
//! stream to the owner node.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    runtime (ActorRuntime)                    │
//! ├───────────────┬────────────────┬─────────────────────────────┤
//! │  supervisor   │      rpc       │           cluster           │
//! │  • catalog    │  • Router      │  • Membership               │
//! │  • sweep      │  • RpcService  │  • NodeAgent (lease)        │
//! │  • shutdown   │  • Local/TCP   │                             │
//! ├───────────────┴────────────────┴─────────────────────────────┤
//! │  actor: mailbox task, context, timers, routes   │   pool     │
//! ├─────────────────────────────────────────────────┴────────────┤
//! │  registry: ActorMeta records over a CoordinationStore        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use gridactor::prelude::*;
//!
//! let runtime = ActorRuntime::builder()
//!     .register("bank", |_meta| Bank::default())
//!     .build()
//!     .await?;
//!
//! let bank = ActorId::new("bank-1");
//! runtime.find_or_create("bank", &bank, Dispatch::default_policy()).await?;
//! let balance = runtime.call(&bank, &Deposit { amount: 100 }).await?;
//! runtime.stop().await;
//! ```

pub mod actor;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod error;
pub mod pool;
pub mod prelude;
pub mod registry;
pub mod rpc;
pub mod runtime;
pub mod supervisor;

pub use actor::{ActorContext, ActorId, Behavior, Handler, Message, NodeId};
pub use config::RuntimeConfig;
pub use error::ActorError;
pub use runtime::{ActorRuntime, ActorRuntimeBuilder};
