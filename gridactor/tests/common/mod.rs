//! Shared behaviors and cluster helpers for the integration tests.

#![allow(dead_code)]

use gridactor::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const COUNTER: &str = "counter";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();
}

/// Counts hook invocations across every incarnation of a category.
#[derive(Debug, Default)]
pub struct Hooks {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub stop_attempts: AtomicUsize,
    /// Number of upcoming `on_stop` calls that fail.
    pub refuse_stops: AtomicUsize,
}

impl Hooks {
    pub fn refusing_stops(times: usize) -> Self {
        Self {
            refuse_stops: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn stop_attempts(&self) -> usize {
        self.stop_attempts.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub value: i64,
    pub log: Vec<i64>,
    pub ticks: u32,
    pub node: String,
}

#[derive(Serialize, Deserialize)]
pub struct Add {
    pub n: i64,
}

impl Message for Add {
    const CATEGORY: &'static str = "counter.add";
    type Reply = i64;
}

#[derive(Serialize, Deserialize)]
pub struct Get;

impl Message for Get {
    const CATEGORY: &'static str = "counter.get";
    type Reply = Snapshot;
}

#[derive(Serialize, Deserialize)]
pub struct Append {
    pub n: i64,
}

impl Message for Append {
    const CATEGORY: &'static str = "counter.append";
    type Reply = ();
}

#[derive(Serialize, Deserialize)]
pub struct Fail;

impl Message for Fail {
    const CATEGORY: &'static str = "counter.fail";
    type Reply = ();
}

#[derive(Serialize, Deserialize)]
pub struct Nap {
    pub ms: u64,
}

impl Message for Nap {
    const CATEGORY: &'static str = "counter.nap";
    type Reply = ();
}

/// Call `peer` with `Add { n }` and return its reply.
#[derive(Serialize, Deserialize)]
pub struct AskPeer {
    pub peer: ActorId,
    pub n: i64,
}

impl Message for AskPeer {
    const CATEGORY: &'static str = "counter.ask_peer";
    type Reply = i64;
}

/// Like [`AskPeer`] but without blocking; the reply becomes our value.
#[derive(Serialize, Deserialize)]
pub struct AskPeerLater {
    pub peer: ActorId,
    pub n: i64,
}

impl Message for AskPeerLater {
    const CATEGORY: &'static str = "counter.ask_peer_later";
    type Reply = ();
}

#[derive(Serialize, Deserialize)]
pub struct StartTimer {
    pub ms: u64,
    pub repeat: bool,
}

impl Message for StartTimer {
    const CATEGORY: &'static str = "counter.start_timer";
    type Reply = ();
}

pub struct Counter {
    value: i64,
    log: Vec<i64>,
    ticks: u32,
    hooks: Arc<Hooks>,
    fail_start: bool,
}

impl Counter {
    pub fn new(hooks: Arc<Hooks>) -> Self {
        Self {
            value: 0,
            log: Vec::new(),
            ticks: 0,
            hooks,
            fail_start: false,
        }
    }

    pub fn failing(hooks: Arc<Hooks>) -> Self {
        Self {
            fail_start: true,
            ..Self::new(hooks)
        }
    }
}

#[async_trait]
impl Behavior for Counter {
    fn routes(routes: &mut RouteTable<Self>) {
        routes
            .register::<Add>()
            .register::<Get>()
            .register::<Append>()
            .register::<Fail>()
            .register::<Nap>()
            .register::<AskPeer>()
            .register::<AskPeerLater>()
            .register::<StartTimer>();
    }

    async fn on_start(&mut self, _ctx: &mut ActorContext) -> Result<()> {
        self.hooks.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(ActorError::handler("refusing to start"));
        }
        Ok(())
    }

    async fn on_stop(&mut self, _ctx: &mut ActorContext, _reason: &str) -> Result<()> {
        self.hooks.stop_attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .hooks
            .refuse_stops
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ActorError::handler("not ready to stop"));
        }
        self.hooks.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_timer(&mut self, _ctx: &mut ActorContext, _name: &str) -> Result<()> {
        self.ticks += 1;
        Ok(())
    }
}

#[async_trait]
impl Handler<Add> for Counter {
    async fn handle(&mut self, msg: Add, _ctx: &mut ActorContext) -> Result<i64> {
        self.value += msg.n;
        Ok(self.value)
    }
}

#[async_trait]
impl Handler<Get> for Counter {
    async fn handle(&mut self, _msg: Get, ctx: &mut ActorContext) -> Result<Snapshot> {
        Ok(Snapshot {
            value: self.value,
            log: self.log.clone(),
            ticks: self.ticks,
            node: ctx.node_id().to_string(),
        })
    }
}

#[async_trait]
impl Handler<Append> for Counter {
    async fn handle(&mut self, msg: Append, _ctx: &mut ActorContext) -> Result<()> {
        self.log.push(msg.n);
        Ok(())
    }
}

#[async_trait]
impl Handler<Fail> for Counter {
    async fn handle(&mut self, _msg: Fail, _ctx: &mut ActorContext) -> Result<()> {
        Err(ActorError::handler("boom"))
    }
}

#[async_trait]
impl Handler<Nap> for Counter {
    async fn handle(&mut self, msg: Nap, _ctx: &mut ActorContext) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(msg.ms)).await;
        Ok(())
    }
}

#[async_trait]
impl Handler<AskPeer> for Counter {
    async fn handle(&mut self, msg: AskPeer, ctx: &mut ActorContext) -> Result<i64> {
        ctx.call(&msg.peer, &Add { n: msg.n }).await
    }
}

#[async_trait]
impl Handler<AskPeerLater> for Counter {
    async fn handle(&mut self, msg: AskPeerLater, ctx: &mut ActorContext) -> Result<()> {
        ctx.call_async(&msg.peer, &Add { n: msg.n }, |this: &mut Counter, _ctx, reply| {
            match reply {
                Ok(value) => this.value = value,
                Err(_) => this.value = -1,
            }
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Handler<StartTimer> for Counter {
    async fn handle(&mut self, msg: StartTimer, ctx: &mut ActorContext) -> Result<()> {
        let period = Duration::from_millis(msg.ms);
        if msg.repeat {
            ctx.schedule_interval("tick", period);
        } else {
            ctx.schedule_once("tick", period);
        }
        Ok(())
    }
}

/// Intervals short enough for paused-clock tests.
pub fn fast_config() -> RuntimeConfig {
    RuntimeConfig::default()
        .with_call_timeout(Duration::from_secs(1), Duration::from_millis(100))
        .with_retry(Duration::from_millis(100), Duration::from_millis(50))
        .with_workers(2)
}

/// A node serving the counter category.
pub async fn counter_node(
    id: &str,
    role: &str,
    store: Arc<InMemoryStore>,
    network: Arc<LocalNetwork>,
    config: RuntimeConfig,
    hooks: Arc<Hooks>,
) -> ActorRuntime {
    ActorRuntime::builder()
        .node_id(NodeId::new(id))
        .role(role)
        .store(store)
        .local_network(network)
        .config(config)
        .register(COUNTER, move |_meta: &ActorMeta| Counter::new(hooks.clone()))
        .build()
        .await
        .expect("runtime should start")
}

/// Wait until `runtime` sees `count` live nodes.
pub async fn wait_for_members(runtime: &ActorRuntime, count: usize) {
    for _ in 0..100 {
        if runtime.membership().live_nodes().await.len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("membership never reached {count} nodes");
}
