//! Actor runtime builder.

use crate::actor::{ActorEnv, ActorMeta, Behavior, BehaviorFactory, FactoryTable, NodeId};
use crate::cluster::{Membership, Node, NodeAgent, ROLE_DEFAULT};
use crate::config::RuntimeConfig;
use crate::error::ActorError;
use crate::pool::WorkerPool;
use crate::registry::{CoordinationStore, InMemoryStore, LocationRegistry};
use crate::rpc::{Connector, LocalNetwork, Router, RpcService, TcpConnector, TcpServer};
use crate::runtime::ActorRuntime;
use crate::supervisor::{Supervisor, SupervisorRef};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How the node talks to its peers.
#[derive(Clone)]
pub enum Transport {
    /// Channels inside this process.
    Local(Arc<LocalNetwork>),
    /// TCP, listening on the given address (`host:port`, port 0 picks one).
    Tcp { listen: String },
}

/// Builder for [`ActorRuntime`] with fluent API.
///
/// # Example
///
/// ```rust,ignore
/// let store = Arc::new(InMemoryStore::new());
/// let runtime = ActorRuntime::builder()
///     .store(store)
///     .role("game")
///     .tcp("127.0.0.1:0")
///     .register("player", |_meta| Player::default())
///     .build()
///     .await?;
/// ```
pub struct ActorRuntimeBuilder {
    pub(crate) config: RuntimeConfig,
    pub(crate) node_id: Option<NodeId>,
    pub(crate) role: String,
    pub(crate) server_group_id: String,
    pub(crate) store: Option<Arc<dyn CoordinationStore>>,
    pub(crate) transport: Option<Transport>,
    pub(crate) factories: FactoryTable,
}

impl ActorRuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            node_id: None,
            role: ROLE_DEFAULT.to_string(),
            server_group_id: String::new(),
            store: None,
            transport: None,
            factories: FactoryTable::new(),
        }
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Fix the node id. A random one is generated otherwise.
    pub fn node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    /// Placement role of this node.
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Server group stamped on records created through this runtime.
    pub fn server_group_id(mut self, id: impl Into<String>) -> Self {
        self.server_group_id = id.into();
        self
    }

    /// Coordination store shared by the cluster. Defaults to a private
    /// in-memory store, which only makes sense for a single node.
    pub fn store(mut self, store: Arc<dyn CoordinationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Join an in-process network.
    pub fn local_network(mut self, network: Arc<LocalNetwork>) -> Self {
        self.transport = Some(Transport::Local(network));
        self
    }

    /// Serve and dial over TCP.
    pub fn tcp(mut self, listen: impl Into<String>) -> Self {
        self.transport = Some(Transport::Tcp {
            listen: listen.into(),
        });
        self
    }

    /// Register the behavior built for actors of `category`.
    pub fn register<B, F>(mut self, category: impl Into<String>, build: F) -> Self
    where
        B: Behavior,
        F: Fn(&ActorMeta) -> B + Send + Sync + 'static,
    {
        self.factories
            .insert(Arc::new(BehaviorFactory::new(category, build)));
        self
    }

    /// Start every component and register the node.
    ///
    /// Returns once the node is published and the current members are
    /// loaded, so the first call can already be routed.
    pub async fn build(self) -> Result<ActorRuntime, ActorError> {
        let node_id = self.node_id.unwrap_or_else(NodeId::generate);
        let config = Arc::new(self.config);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()) as Arc<dyn CoordinationStore>);
        let transport = self
            .transport
            .unwrap_or_else(|| Transport::Local(Arc::new(LocalNetwork::new())));
        let cancel = CancellationToken::new();

        let membership = Arc::new(Membership::new(node_id.clone(), config.node_lease_ttl));
        let registry = Arc::new(LocationRegistry::new(
            node_id.clone(),
            store.clone(),
            membership.clone(),
        ));

        let connector: Arc<dyn Connector> = match &transport {
            Transport::Local(network) => network.clone() as Arc<dyn Connector>,
            Transport::Tcp { .. } => Arc::new(TcpConnector::new(
                config.connect_timeout,
                cancel.child_token(),
            )),
        };

        let (supervisor_ref, inbox) = SupervisorRef::channel();
        let (router, router_task) = Router::new(
            node_id.clone(),
            config.clone(),
            registry.clone(),
            membership.clone(),
            supervisor_ref.clone(),
            connector,
        );
        let env = ActorEnv::new(
            node_id.clone(),
            config.clone(),
            registry.clone(),
            router.clone(),
            supervisor_ref.clone(),
        );
        let pool = WorkerPool::start(config.worker_count, config.retry_backoff, cancel.child_token());
        let supervisor = Supervisor::new(inbox, env, Arc::new(self.factories), pool);

        tokio::spawn(supervisor.run(cancel.child_token()));
        tokio::spawn(router_task.run(cancel.child_token()));

        let service = RpcService::new(
            node_id.clone(),
            router.clone(),
            supervisor_ref.clone(),
            cancel.child_token(),
        );
        let (host, port, network, local_addr) = match transport {
            Transport::Local(network) => {
                network.register(service.clone());
                ("local".to_string(), 0, Some(network), None)
            }
            Transport::Tcp { listen } => {
                let server = TcpServer::bind(&listen, service.clone(), cancel.child_token()).await?;
                let addr = server.local_addr();
                (addr.ip().to_string(), addr.port(), None, Some(addr))
            }
        };

        membership.sync(store.as_ref()).await?;
        tokio::spawn(
            membership
                .clone()
                .run_watch(store.clone(), config.retry_backoff, cancel.child_token()),
        );
        tokio::spawn(
            registry
                .clone()
                .run_watch(config.retry_backoff, cancel.child_token()),
        );

        let node = Node::new(node_id.clone(), self.role.clone(), host, port);
        let mut agent = NodeAgent::new(
            node,
            store,
            membership.clone(),
            Arc::new(supervisor_ref.clone()),
            config.node_lease_ttl,
            config.retry_backoff,
        );
        let lease = agent.register().await?;
        tokio::spawn(agent.run(Some(lease), cancel.child_token()));

        tracing::info!(node = %node_id, role = %self.role, "actor runtime started");

        Ok(ActorRuntime {
            node_id,
            config,
            server_group_id: self.server_group_id,
            registry,
            membership,
            router,
            supervisor: supervisor_ref,
            service,
            network,
            local_addr,
            cancel,
        })
    }
}

impl Default for ActorRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
