//! Actor behavior traits.
//!
//! A behavior is the user-supplied state of one actor. The runtime owns it
//! inside the actor's mailbox task and hands out `&mut self` to exactly one
//! hook or handler at a time.

use crate::actor::{ActorContext, Message, RouteTable};
use crate::error::ActorError;
use async_trait::async_trait;

/// Lifecycle hooks and route registration of an actor category.
///
/// # Lifecycle
///
/// ```text
/// Created → Initializing (on_start) → Running → Terminating (on_stop) → Stopped
/// ```
///
/// `on_start` runs once per incarnation: waking a hibernated actor does not
/// run it again.
///
/// # Example
///
/// ```rust,ignore
/// struct Player { gold: u64 }
///
/// #[async_trait]
/// impl Behavior for Player {
///     fn routes(routes: &mut RouteTable<Self>) {
///         routes.register::<AddGold>();
///     }
///
///     async fn on_start(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
///         tracing::info!(actor = %ctx.id(), "player online");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Behavior: Send + 'static {
    /// Register a handler per message category.
    fn routes(routes: &mut RouteTable<Self>)
    where
        Self: Sized;

    /// Called once before the first message. An error aborts the start.
    async fn on_start(&mut self, _ctx: &mut ActorContext) -> Result<(), ActorError> {
        Ok(())
    }

    /// Called on termination. An error keeps the actor running; the
    /// terminating party retries later.
    async fn on_stop(&mut self, _ctx: &mut ActorContext, _reason: &str) -> Result<(), ActorError> {
        Ok(())
    }

    /// Called when a timer scheduled through the context fires.
    async fn on_timer(&mut self, _ctx: &mut ActorContext, name: &str) -> Result<(), ActorError> {
        tracing::debug!(timer = name, "timer fired without on_timer override");
        Ok(())
    }
}

/// Handler for one message type.
#[async_trait]
pub trait Handler<M: Message>: Behavior {
    /// Handle the message and produce its reply.
    async fn handle(&mut self, msg: M, ctx: &mut ActorContext) -> Result<M::Reply, ActorError>;
}
