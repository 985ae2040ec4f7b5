//! Actor location registry.
//!
//! Maps every actor id to its [`ActorMeta`] record in the coordination
//! store and decides where unowned actors run.
//!
//! # Consistency
//!
//! All record writes are compare-and-set on the store revision, so two
//! nodes racing to dispatch the same actor cannot both win: the loser gets
//! the winner's record back and adopts it. The local [`MetaCache`] is
//! read-through and reconciled by a watch on `actor/`; it may lag the
//! store, which is why stale ownership is re-checked against membership
//! on every `resolve`.

pub mod cache;
pub mod dispatch;
pub mod memory;
pub mod store;

pub use cache::MetaCache;
pub use dispatch::select_node;
pub use memory::InMemoryStore;
pub use store::{CasOutcome, CoordinationStore, KeyValue, LeaseId, Revision, WatchEvent};

use crate::actor::{unix_now, ActorId, ActorMeta, Dispatch, DispatchPolicy, NodeId};
use crate::cluster::{Membership, Node, ROLE_DEFAULT};
use crate::error::{RegistryError, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(crate) const ACTOR_PREFIX: &str = "actor/";
pub(crate) const DAEMON_PREFIX: &str = "daemon/";

/// Upper bound on consecutive lost write races in one operation.
const MAX_WRITE_ATTEMPTS: usize = 8;

pub(crate) fn actor_key(id: &ActorId) -> String {
    format!("{}{}", ACTOR_PREFIX, id)
}

fn daemon_key(id: &ActorId) -> String {
    format!("{}{}", DAEMON_PREFIX, id)
}

/// Result of a versioned record write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The record landed; carries it with its new version.
    Written(ActorMeta),
    /// Another writer got there first. `current` is the stored record, or
    /// `None` if it was deleted.
    Conflict {
        id: ActorId,
        current: Option<ActorMeta>,
    },
}

impl WriteOutcome {
    /// Turn a lost race into [`RegistryError::RegistryWriteConflict`].
    pub fn into_result(self) -> Result<ActorMeta, RegistryError> {
        match self {
            WriteOutcome::Written(meta) => Ok(meta),
            WriteOutcome::Conflict {
                current: Some(current),
                ..
            } => Err(RegistryError::RegistryWriteConflict {
                current: Box::new(current),
            }),
            WriteOutcome::Conflict { id, current: None } => Err(RegistryError::MetaNotFound(id)),
        }
    }
}

/// Location registry of one node.
pub struct LocationRegistry {
    node_id: NodeId,
    store: Arc<dyn CoordinationStore>,
    cache: MetaCache,
    membership: Arc<Membership>,
}

impl LocationRegistry {
    pub fn new(node_id: NodeId, store: Arc<dyn CoordinationStore>, membership: Arc<Membership>) -> Self {
        Self {
            node_id,
            store,
            cache: MetaCache::new(),
            membership,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn cache(&self) -> &MetaCache {
        &self.cache
    }

    /// Return the record of `id`, creating and dispatching it if absent.
    ///
    /// An existing record keeps its category and dispatch settings; the
    /// arguments only apply on creation.
    pub async fn find_or_create(
        &self,
        category: &str,
        id: &ActorId,
        dispatch: Dispatch,
        server_group_id: &str,
    ) -> Result<ActorMeta, RegistryError> {
        if let Some(meta) = self.lookup(id).await? {
            return self.ensure_owner(meta).await;
        }

        let meta = ActorMeta::new(category, id.clone(), dispatch, server_group_id);
        match self.write(meta).await? {
            WriteOutcome::Written(meta) => {
                tracing::debug!(actor = %id, category, "actor record created");
                self.ensure_owner(meta).await
            }
            WriteOutcome::Conflict {
                current: Some(current),
                ..
            } => {
                tracing::debug!(actor = %id, "actor record created concurrently, adopting it");
                self.ensure_owner(current).await
            }
            WriteOutcome::Conflict { current: None, .. } => Err(RegistryError::MetaNotFound(id.clone())),
        }
    }

    /// Current record of `id` with a live owner, re-dispatching if needed.
    pub async fn resolve(&self, id: &ActorId) -> Result<ActorMeta, RegistryError> {
        let meta = self
            .lookup(id)
            .await?
            .ok_or_else(|| RegistryError::MetaNotFound(id.clone()))?;
        self.ensure_owner(meta).await
    }

    /// Cached record, falling back to the store. No ownership check.
    pub async fn lookup(&self, id: &ActorId) -> Result<Option<ActorMeta>, RegistryError> {
        if let Some(meta) = self.cache.get(id).await {
            return Ok(Some(meta));
        }
        match self.store.get(&actor_key(id)).await? {
            Some(kv) => {
                let meta = ActorMeta::decode(&kv)?;
                Ok(Some(self.cache.apply(meta).await))
            }
            None => Ok(None),
        }
    }

    /// Clear this node's ownership of `id`. Daemon records are left alone.
    pub async fn expire(&self, id: &ActorId) -> Result<(), RegistryError> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let Some(meta) = self.lookup(id).await? else {
                return Ok(());
            };
            if meta.is_daemon() {
                tracing::debug!(actor = %id, "daemon actor keeps its owner");
                return Ok(());
            }
            if !meta.is_owned_by(&self.node_id) {
                tracing::debug!(actor = %id, owner = ?meta.owner, "actor not owned here, nothing to expire");
                return Ok(());
            }

            let mut next = meta;
            next.owner = None;
            next.active_at = unix_now();
            match self.write(next).await? {
                WriteOutcome::Written(_) => {
                    tracing::debug!(actor = %id, node = %self.node_id, "actor ownership expired");
                    return Ok(());
                }
                WriteOutcome::Conflict { current: Some(_), .. } => continue,
                WriteOutcome::Conflict { current: None, .. } => return Ok(()),
            }
        }
        Err(self.conflict(id).await)
    }

    /// Compare-and-set `meta` at `meta.version` (`0` = create).
    ///
    /// Both outcomes update the cache: a win with the written record, a loss
    /// with the record that won.
    pub async fn write(&self, meta: ActorMeta) -> Result<WriteOutcome, RegistryError> {
        let body = meta.encode()?;
        match self
            .store
            .compare_and_put(&actor_key(&meta.id), body, meta.version)
            .await?
        {
            CasOutcome::Written { version } => {
                let mut written = meta;
                written.version = version;
                Ok(WriteOutcome::Written(self.cache.apply(written).await))
            }
            CasOutcome::Conflict { current: Some(kv) } => {
                let current = self.cache.apply(ActorMeta::decode(&kv)?).await;
                Ok(WriteOutcome::Conflict {
                    id: meta.id,
                    current: Some(current),
                })
            }
            CasOutcome::Conflict { current: None } => {
                self.cache.remove(&meta.id, meta.version).await;
                Ok(WriteOutcome::Conflict {
                    id: meta.id,
                    current: None,
                })
            }
        }
    }

    /// Ids of every daemon actor ever dispatched.
    pub async fn daemon_ids(&self) -> Result<Vec<ActorId>, RegistryError> {
        let markers = self.store.list_prefix(DAEMON_PREFIX).await?;
        Ok(markers
            .iter()
            .filter_map(|kv| kv.key.strip_prefix(DAEMON_PREFIX))
            .filter_map(|id| ActorId::parse(id).ok())
            .collect())
    }

    async fn ensure_owner(&self, meta: ActorMeta) -> Result<ActorMeta, RegistryError> {
        match &meta.owner {
            Some(owner) if self.membership.is_live(owner).await => Ok(meta),
            _ => self.dispatch(meta).await,
        }
    }

    /// Assign an owner to `meta`. Losing the race adopts the winner's
    /// record if its owner is live.
    async fn dispatch(&self, mut meta: ActorMeta) -> Result<ActorMeta, RegistryError> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let node = self.choose_node(&meta).await?;

            let mut next = meta.clone();
            next.owner = Some(node.id.clone());
            next.active_at = unix_now();

            match self.write(next).await? {
                WriteOutcome::Written(written) => {
                    tracing::info!(
                        actor = %written.id,
                        category = %written.category,
                        node = %node.id,
                        load = node.load,
                        "actor dispatched"
                    );
                    if written.is_daemon() {
                        let marker = written.id.as_str().as_bytes().to_vec();
                        self.store.put(&daemon_key(&written.id), marker, None).await?;
                    }
                    return Ok(written);
                }
                WriteOutcome::Conflict {
                    current: Some(current),
                    ..
                } => {
                    if let Some(owner) = &current.owner {
                        if self.membership.is_live(owner).await {
                            tracing::debug!(actor = %current.id, owner = %owner, "dispatch lost the race, adopting owner");
                            return Ok(current);
                        }
                    }
                    meta = current;
                }
                WriteOutcome::Conflict { id, current: None } => {
                    return Err(RegistryError::MetaNotFound(id));
                }
            }
        }
        Err(self.conflict(&meta.id).await)
    }

    async fn choose_node(&self, meta: &ActorMeta) -> Result<Node, RegistryError> {
        let role = match &meta.dispatch.policy {
            DispatchPolicy::Default => ROLE_DEFAULT,
            DispatchPolicy::Role(role) => role.as_str(),
            DispatchPolicy::CoLocated(peer) => {
                match self.lookup(peer).await {
                    Ok(Some(peer_meta)) => tracing::debug!(
                        actor = %meta.id,
                        peer = %peer,
                        peer_owner = ?peer_meta.owner,
                        "co-located dispatch uses the default policy"
                    ),
                    Ok(None) => tracing::warn!(actor = %meta.id, peer = %peer, "co-located peer has no record"),
                    Err(e) => tracing::warn!(actor = %meta.id, peer = %peer, error = %e, "co-located peer lookup failed"),
                }
                ROLE_DEFAULT
            }
        };

        self.membership
            .choose_node(role)
            .await
            .ok_or_else(|| RegistryError::DispatchNodeNotFound {
                actor: meta.id.clone(),
                policy: meta.dispatch.policy.to_string(),
            })
    }

    async fn conflict(&self, id: &ActorId) -> RegistryError {
        match self.cache.get(id).await {
            Some(current) => RegistryError::RegistryWriteConflict {
                current: Box::new(current),
            },
            None => RegistryError::MetaNotFound(id.clone()),
        }
    }

    async fn apply_event(&self, event: WatchEvent) {
        match event {
            WatchEvent::Put(kv) => match ActorMeta::decode(&kv) {
                Ok(meta) => {
                    self.cache.apply(meta).await;
                }
                Err(e) => tracing::warn!(key = %kv.key, error = %e, "skipping undecodable actor record"),
            },
            WatchEvent::Delete { key, version } => {
                if let Some(id) = key.strip_prefix(ACTOR_PREFIX).and_then(|s| ActorId::parse(s).ok()) {
                    self.cache.remove(&id, version).await;
                }
            }
        }
    }

    async fn watch_once(&self) -> Result<(), StoreError> {
        // Subscribe before listing so nothing written in between is missed.
        let mut events = self.store.watch_prefix(ACTOR_PREFIX).await?;
        for kv in self.store.list_prefix(ACTOR_PREFIX).await? {
            self.apply_event(WatchEvent::Put(kv)).await;
        }
        while let Some(event) = events.recv().await {
            self.apply_event(event).await;
        }
        Err(StoreError::WatchClosed)
    }

    /// Reconcile the cache with `actor/` until cancelled.
    pub async fn run_watch(self: Arc<Self>, backoff: Duration, cancel: CancellationToken) {
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.watch_once() => result,
            };
            if let Err(e) = result {
                tracing::warn!(node = %self.node_id, error = %e, "actor watch failed, restarting");
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }
}
