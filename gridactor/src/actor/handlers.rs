//! Category-keyed dispatch via a route table.
//!
//! Payloads arrive as `(category, bytes)`. Rust has no runtime reflection
//! to map a category string to a `Handler<M>` implementation, so behaviors
//! register one type-erased function per message type at construction:
//!
//! ```text
//! Payload { category: "bank.deposit", body: [...] }
//!   ↓
//! routes.dispatch(behavior, payload, ctx)
//!   ↓
//! HandlerFn for Deposit:
//!   1. decode body → Deposit
//!   2. <B as Handler<Deposit>>::handle(behavior, msg, ctx)
//!   3. encode reply → Vec<u8>
//! ```

use crate::actor::{ActorContext, Behavior, Handler, Message, Payload};
use crate::codec::{JsonCodec, MessageCodec};
use crate::error::ActorError;
use futures::future::BoxFuture;
use std::collections::HashMap;

/// Type-erased handler function.
///
/// A plain function pointer instantiated per `(behavior, message)` pair, so
/// the table is `Send + Sync` and shareable between incarnations.
type HandlerFn<B> = for<'a> fn(
    &'a mut B,
    &'a [u8],
    &'a mut ActorContext,
) -> BoxFuture<'a, Result<Vec<u8>, ActorError>>;

fn dispatch_typed<'a, B, M>(
    behavior: &'a mut B,
    body: &'a [u8],
    ctx: &'a mut ActorContext,
) -> BoxFuture<'a, Result<Vec<u8>, ActorError>>
where
    B: Handler<M>,
    M: Message,
{
    Box::pin(async move {
        let msg: M = JsonCodec.decode(body)?;
        let reply = <B as Handler<M>>::handle(behavior, msg, ctx).await?;
        Ok(JsonCodec.encode(&reply)?)
    })
}

/// Table mapping message categories to handlers of behavior `B`.
pub struct RouteTable<B> {
    routes: HashMap<&'static str, HandlerFn<B>>,
}

impl<B: Behavior> RouteTable<B> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Build the table declared by `B::routes`.
    pub fn for_behavior() -> Self {
        let mut table = Self::new();
        B::routes(&mut table);
        tracing::debug!(
            behavior = std::any::type_name::<B>(),
            routes = table.len(),
            "route table built"
        );
        table
    }

    /// Register the handler for message type `M`.
    ///
    /// A second registration for the same category replaces the first.
    pub fn register<M>(&mut self) -> &mut Self
    where
        B: Handler<M>,
        M: Message,
    {
        let handler: HandlerFn<B> = dispatch_typed::<B, M>;
        if self.routes.insert(M::CATEGORY, handler).is_some() {
            tracing::warn!(category = M::CATEGORY, "route registered twice, keeping the last");
        }
        self
    }

    /// Dispatch a payload to its handler.
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<u8>)`: encoded reply
    /// - `Err(ActorError::RouteNotFound)`: no handler for the category
    /// - `Err(ActorError::Codec)`: body or reply failed to (de)serialize
    /// - `Err(_)`: handler failure
    pub async fn dispatch(
        &self,
        behavior: &mut B,
        payload: &Payload,
        ctx: &mut ActorContext,
    ) -> Result<Vec<u8>, ActorError> {
        let handler = self
            .routes
            .get(payload.category.as_str())
            .ok_or_else(|| ActorError::RouteNotFound {
                actor: ctx.id().clone(),
                category: payload.category.clone(),
            })?;
        handler(behavior, &payload.body, ctx).await
    }

    /// Check if a category has a handler.
    pub fn has_route(&self, category: &str) -> bool {
        self.routes.contains_key(category)
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no route is registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<B: Behavior> Default for RouteTable<B> {
    fn default() -> Self {
        Self::new()
    }
}
