//! Actor factories for on-demand instantiation.
//!
//! The supervisor never sees concrete behavior types: each registered
//! category maps to an [`ActorFactory`] that builds a fresh behavior and
//! spawns its mailbox task. This keeps instantiation logic apart from
//! lifecycle management and lets tests register stub categories.

use crate::actor::context::ActorEnv;
use crate::actor::mailbox::spawn_actor;
use crate::actor::{ActorHandle, ActorMeta, Behavior, RouteTable};
use std::collections::HashMap;
use std::sync::Arc;

/// Creates and spawns actors of one category.
pub trait ActorFactory: Send + Sync {
    /// Category served by this factory.
    fn category(&self) -> &str;

    /// Build a behavior for `meta` and spawn its incarnation.
    fn spawn(&self, meta: ActorMeta, env: ActorEnv, incarnation: u64) -> ActorHandle;
}

/// Factory backed by a constructor closure.
///
/// The route table is built once and shared by every incarnation.
pub struct BehaviorFactory<B, F> {
    category: String,
    build: F,
    routes: Arc<RouteTable<B>>,
}

impl<B, F> BehaviorFactory<B, F>
where
    B: Behavior,
    F: Fn(&ActorMeta) -> B + Send + Sync + 'static,
{
    pub fn new(category: impl Into<String>, build: F) -> Self {
        Self {
            category: category.into(),
            build,
            routes: Arc::new(RouteTable::for_behavior()),
        }
    }
}

impl<B, F> ActorFactory for BehaviorFactory<B, F>
where
    B: Behavior,
    F: Fn(&ActorMeta) -> B + Send + Sync + 'static,
{
    fn category(&self) -> &str {
        &self.category
    }

    fn spawn(&self, meta: ActorMeta, env: ActorEnv, incarnation: u64) -> ActorHandle {
        let behavior = (self.build)(&meta);
        spawn_actor(behavior, self.routes.clone(), meta, env, incarnation)
    }
}

/// Registered factories keyed by category.
#[derive(Clone, Default)]
pub struct FactoryTable {
    factories: HashMap<String, Arc<dyn ActorFactory>>,
}

impl FactoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. A later registration for the same category wins.
    pub fn insert(&mut self, factory: Arc<dyn ActorFactory>) {
        let category = factory.category().to_string();
        if self.factories.insert(category.clone(), factory).is_some() {
            tracing::warn!(category = %category, "actor category registered twice, keeping the last");
        }
    }

    pub fn get(&self, category: &str) -> Option<&Arc<dyn ActorFactory>> {
        self.factories.get(category)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
