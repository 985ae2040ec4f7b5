//! Actor runtime, the entry point of one node.

use crate::actor::{ActorId, ActorMeta, Dispatch, Message, NodeId, Payload, ReplyResult};
use crate::cluster::Membership;
use crate::config::RuntimeConfig;
use crate::error::ActorError;
use crate::registry::LocationRegistry;
use crate::rpc::{LocalNetwork, Router, RpcService};
use crate::runtime::ActorRuntimeBuilder;
use crate::supervisor::SupervisorRef;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One node of the actor cluster.
///
/// Owns the registry, membership view, supervisor, router and rpc service
/// of the node; every background task is bound to the runtime's root
/// cancellation token. Nothing is process-global, so several runtimes can
/// share a process (and a [`LocalNetwork`]).
///
/// # Example
///
/// ```rust,ignore
/// let runtime = ActorRuntime::builder()
///     .register("bank", |_meta| Bank::default())
///     .build()
///     .await?;
///
/// let bank = ActorId::new("bank-1");
/// runtime.find_or_create("bank", &bank, Dispatch::default_policy()).await?;
/// let balance = runtime.call(&bank, &Deposit { amount: 100 }).await?;
///
/// runtime.stop().await;
/// ```
pub struct ActorRuntime {
    pub(crate) node_id: NodeId,
    pub(crate) config: Arc<RuntimeConfig>,
    pub(crate) server_group_id: String,
    pub(crate) registry: Arc<LocationRegistry>,
    pub(crate) membership: Arc<Membership>,
    pub(crate) router: Router,
    pub(crate) supervisor: SupervisorRef,
    pub(crate) service: RpcService,
    pub(crate) network: Option<Arc<LocalNetwork>>,
    pub(crate) local_addr: Option<SocketAddr>,
    pub(crate) cancel: CancellationToken,
}

impl ActorRuntime {
    pub fn builder() -> ActorRuntimeBuilder {
        ActorRuntimeBuilder::new()
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn registry(&self) -> &Arc<LocationRegistry> {
        &self.registry
    }

    pub fn membership(&self) -> &Arc<Membership> {
        &self.membership
    }

    pub fn supervisor(&self) -> &SupervisorRef {
        &self.supervisor
    }

    pub fn rpc_service(&self) -> &RpcService {
        &self.service
    }

    /// Address of the TCP listener, if the node serves TCP.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Location record of `id`, created and dispatched if absent.
    pub async fn find_or_create(
        &self,
        category: &str,
        id: &ActorId,
        dispatch: Dispatch,
    ) -> Result<ActorMeta, ActorError> {
        Ok(self
            .registry
            .find_or_create(category, id, dispatch, &self.server_group_id)
            .await?)
    }

    pub async fn call<M: Message>(&self, to: &ActorId, msg: &M) -> Result<M::Reply, ActorError> {
        self.router.call(to, msg).await
    }

    pub async fn call_with_timeout<M: Message>(
        &self,
        to: &ActorId,
        msg: &M,
        timeout: Duration,
    ) -> Result<M::Reply, ActorError> {
        self.router.call_with_timeout(to, msg, timeout).await
    }

    pub async fn call_payload(&self, to: &ActorId, payload: Payload) -> ReplyResult {
        self.router.call_payload(to, payload, None).await
    }

    pub async fn cast<M: Message>(&self, to: &ActorId, msg: &M) -> Result<(), ActorError> {
        self.router.cast(to, msg).await
    }

    /// Make sure `id` runs on its owner, within the default call timeout.
    pub async fn start_actor(&self, id: &ActorId) -> Result<(), ActorError> {
        self.router.start_actor(id, self.config.call_timeout).await
    }

    /// Start every daemon actor this node owns.
    ///
    /// Daemons whose owner is gone are dispatched again first, so after a
    /// restart the daemons land on some live node. Returns how many were
    /// started here.
    pub async fn recover_daemons(&self) -> Result<usize, ActorError> {
        let mut started = 0;
        for id in self.registry.daemon_ids().await? {
            let meta = match self.registry.resolve(&id).await {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!(actor = %id, error = %e, "daemon record unusable, skipped");
                    continue;
                }
            };
            if !meta.is_owned_by(&self.node_id) {
                continue;
            }
            match self.supervisor.get_or_start(&id).await {
                Ok(_) => started += 1,
                Err(e) => tracing::warn!(actor = %id, error = %e, "daemon failed to start"),
            }
        }
        tracing::info!(node = %self.node_id, started, "daemon actors recovered");
        Ok(started)
    }

    /// Actors tracked on this node, running or sleeping.
    pub async fn remaining_count(&self) -> usize {
        self.supervisor.remaining_count().await
    }

    pub async fn counts_by_category(&self) -> HashMap<String, usize> {
        self.supervisor.counts_by_category().await
    }

    /// Drain every local actor, then stop the background tasks and give
    /// up the node lease.
    pub async fn stop(&self) {
        tracing::info!(node = %self.node_id, "actor runtime stopping");
        self.supervisor.stop(self.config.shutdown_poll_interval).await;
        if let Some(network) = &self.network {
            network.unregister(&self.node_id);
        }
        self.cancel.cancel();
        tracing::info!(node = %self.node_id, "actor runtime stopped");
    }

    /// Stop the background tasks without draining actors. The node record
    /// is still withdrawn.
    pub fn abort(&self) {
        if let Some(network) = &self.network {
            network.unregister(&self.node_id);
        }
        self.cancel.cancel();
    }
}
