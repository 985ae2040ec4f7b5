//! Publishes the local node under a liveness lease.

use crate::actor::unix_now;
use crate::cluster::{node_key, Membership, Node};
use crate::error::ActorError;
use crate::registry::{CoordinationStore, LeaseId};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Source of the load figure published with the node record.
#[async_trait]
pub trait LoadReporter: Send + Sync {
    async fn load(&self) -> u64;
}

/// Keeps `node/<id>` alive in the store.
///
/// The record is written under a lease with the configured TTL and
/// rewritten with the current load every `ttl / 2`. If the lease is lost
/// (store outage, missed refreshes) a new one is granted after the backoff.
pub struct NodeAgent {
    node: Node,
    store: Arc<dyn CoordinationStore>,
    membership: Arc<Membership>,
    load: Arc<dyn LoadReporter>,
    lease_ttl: Duration,
    refresh: Duration,
    backoff: Duration,
}

impl NodeAgent {
    pub fn new(
        node: Node,
        store: Arc<dyn CoordinationStore>,
        membership: Arc<Membership>,
        load: Arc<dyn LoadReporter>,
        lease_ttl: Duration,
        backoff: Duration,
    ) -> Self {
        Self {
            node,
            store,
            membership,
            load,
            lease_ttl,
            refresh: lease_ttl / 2,
            backoff,
        }
    }

    /// Grant a lease and publish the node under it.
    pub async fn register(&mut self) -> Result<LeaseId, ActorError> {
        let lease = self.store.grant_lease(self.lease_ttl).await?;
        self.publish(lease).await?;
        tracing::info!(node = %self.node.id, lease = lease.0, "node registered");
        Ok(lease)
    }

    async fn publish(&mut self, lease: LeaseId) -> Result<(), ActorError> {
        self.node.active_at = unix_now();
        self.store
            .put(&node_key(&self.node.id), self.node.encode()?, Some(lease))
            .await?;
        self.membership.upsert(self.node.clone()).await;
        Ok(())
    }

    async fn refresh(&mut self, lease: LeaseId) -> Result<(), ActorError> {
        self.store.keep_alive(lease).await?;
        self.node.load = self.load.load().await;
        self.publish(lease).await
    }

    /// Refresh until cancelled, then revoke the lease.
    pub async fn run(mut self, mut lease: Option<LeaseId>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.refresh, self.refresh);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = match lease {
                Some(id) => self.refresh(id).await,
                None => self.register().await.map(|id| lease = Some(id)),
            };
            if let Err(e) = result {
                tracing::warn!(node = %self.node.id, error = %e, "node lease refresh failed, re-registering");
                lease = None;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.backoff) => {}
                }
            }
        }

        if let Some(id) = lease {
            if let Err(e) = self.store.revoke_lease(id).await {
                tracing::warn!(node = %self.node.id, error = %e, "failed to revoke node lease");
            }
        }
        tracing::info!(node = %self.node.id, "node agent stopped");
    }
}
