//! Live view of cluster members.

use crate::actor::NodeId;
use crate::cluster::{Node, NODE_PREFIX};
use crate::error::StoreError;
use crate::registry::dispatch::select_node;
use crate::registry::{CoordinationStore, KeyValue, WatchEvent};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct CachedNode {
    node: Node,
    seen: Instant,
}

/// Cache of node records, reconciled by a watch on `node/`.
///
/// A node counts as live while its record was refreshed within the lease
/// TTL. Dead nodes stay cached until their delete event arrives but are
/// excluded from placement and ownership checks.
#[derive(Debug)]
pub struct Membership {
    local: NodeId,
    lease_ttl: Duration,
    nodes: RwLock<HashMap<NodeId, CachedNode>>,
}

impl Membership {
    pub fn new(local: NodeId, lease_ttl: Duration) -> Self {
        Self {
            local,
            lease_ttl,
            nodes: RwLock::new(HashMap::new()),
        }
    }

    /// The node this runtime runs on.
    pub fn local_id(&self) -> &NodeId {
        &self.local
    }

    /// Insert or refresh a member.
    pub async fn upsert(&self, node: Node) {
        let mut nodes = self.nodes.write().await;
        if !nodes.contains_key(&node.id) {
            tracing::info!(node = %node.id, role = %node.role, address = %node.address(), "node joined");
        }
        nodes.insert(
            node.id.clone(),
            CachedNode {
                node,
                seen: Instant::now(),
            },
        );
    }

    pub async fn remove(&self, id: &NodeId) -> bool {
        let removed = self.nodes.write().await.remove(id).is_some();
        if removed {
            tracing::info!(node = %id, "node left");
        }
        removed
    }

    /// A live member by id.
    pub async fn get(&self, id: &NodeId) -> Option<Node> {
        let nodes = self.nodes.read().await;
        nodes
            .get(id)
            .filter(|c| self.fresh(c))
            .map(|c| c.node.clone())
    }

    pub async fn is_live(&self, id: &NodeId) -> bool {
        self.get(id).await.is_some()
    }

    /// Every live member.
    pub async fn live_nodes(&self) -> Vec<Node> {
        let nodes = self.nodes.read().await;
        let mut live: Vec<Node> = nodes
            .values()
            .filter(|c| self.fresh(c))
            .map(|c| c.node.clone())
            .collect();
        live.sort_by(|a, b| a.id.cmp(&b.id));
        live
    }

    /// Least-loaded live node for `role`.
    pub async fn choose_node(&self, role: &str) -> Option<Node> {
        let live = self.live_nodes().await;
        select_node(&live, role).cloned()
    }

    fn fresh(&self, cached: &CachedNode) -> bool {
        cached.seen.elapsed() <= self.lease_ttl
    }

    async fn apply_put(&self, kv: &KeyValue) {
        match Node::decode(&kv.value) {
            Ok(node) => self.upsert(node).await,
            Err(e) => tracing::warn!(key = %kv.key, error = %e, "skipping undecodable node record"),
        }
    }

    /// Load the current members once. Returns how many records were read.
    pub async fn sync(&self, store: &dyn CoordinationStore) -> Result<usize, StoreError> {
        let records = store.list_prefix(NODE_PREFIX).await?;
        for kv in &records {
            self.apply_put(kv).await;
        }
        Ok(records.len())
    }

    /// Load the current members, then follow changes until the watch ends.
    async fn watch_once(&self, store: &dyn CoordinationStore) -> Result<(), StoreError> {
        // Subscribe first so no change between the list and the watch is lost.
        let mut events = store.watch_prefix(NODE_PREFIX).await?;
        for kv in store.list_prefix(NODE_PREFIX).await? {
            self.apply_put(&kv).await;
        }

        while let Some(event) = events.recv().await {
            match event {
                WatchEvent::Put(kv) => self.apply_put(&kv).await,
                WatchEvent::Delete { key, .. } => {
                    if let Some(id) = key.strip_prefix(NODE_PREFIX).and_then(|s| NodeId::parse(s).ok()) {
                        self.remove(&id).await;
                    }
                }
            }
        }
        Err(StoreError::WatchClosed)
    }

    /// Follow `node/` until cancelled, restarting after `backoff` on failure.
    pub async fn run_watch(
        self: Arc<Self>,
        store: Arc<dyn CoordinationStore>,
        backoff: Duration,
        cancel: CancellationToken,
    ) {
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.watch_once(store.as_ref()) => result,
            };
            if let Err(e) = result {
                tracing::warn!(node = %self.local, error = %e, "membership watch failed, restarting");
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }
}
