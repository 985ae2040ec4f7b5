//! Actor runtime: one explicitly constructed context per node.

pub mod actor_runtime;
pub mod builder;

pub use actor_runtime::ActorRuntime;
pub use builder::{ActorRuntimeBuilder, Transport};
