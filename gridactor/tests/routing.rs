//! Call, cast and async-call delivery, locally and across nodes.

mod common;

use common::*;
use gridactor::prelude::*;
use gridactor::rpc::{AgentHeaders, AgentRequest, Connector, StreamHeaders};

struct Cluster {
    a: ActorRuntime,
    b: ActorRuntime,
    network: Arc<LocalNetwork>,
    hooks_b: Arc<Hooks>,
}

/// Node `a` (role default) and node `b` (role "game") on one network.
async fn two_nodes() -> Cluster {
    init_tracing();
    let store = Arc::new(InMemoryStore::new());
    let network = Arc::new(LocalNetwork::new());
    let a = counter_node(
        "a",
        "default",
        store.clone(),
        network.clone(),
        fast_config(),
        Arc::new(Hooks::default()),
    )
    .await;
    let hooks_b = Arc::new(Hooks::default());
    let b = counter_node("b", "game", store, network.clone(), fast_config(), hooks_b.clone()).await;
    wait_for_members(&a, 2).await;
    wait_for_members(&b, 2).await;
    Cluster {
        a,
        b,
        network,
        hooks_b,
    }
}

impl Cluster {
    async fn stop(self) {
        self.a.stop().await;
        self.b.stop().await;
    }
}

async fn on_b(cluster: &Cluster, name: &str) -> ActorId {
    let id = ActorId::new(name);
    let meta = cluster
        .a
        .find_or_create(COUNTER, &id, Dispatch::role("game"))
        .await
        .unwrap();
    assert_eq!(meta.owner.as_ref(), Some(cluster.b.node_id()));
    id
}

#[tokio::test(start_paused = true)]
async fn test_casts_keep_sender_order() {
    let cluster = two_nodes().await;
    let local = ActorId::new("local");
    cluster
        .a
        .find_or_create(COUNTER, &local, Dispatch::default_policy())
        .await
        .unwrap();
    let remote = on_b(&cluster, "remote").await;

    for target in [&local, &remote] {
        for n in 1..=50 {
            cluster.a.cast(target, &Append { n }).await.unwrap();
        }
        let snapshot = cluster.a.call(target, &Get).await.unwrap();
        assert_eq!(snapshot.log, (1..=50).collect::<Vec<i64>>());
    }

    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_remote_call_reaches_owner_node() {
    let cluster = two_nodes().await;
    let id = on_b(&cluster, "p1").await;

    assert_eq!(cluster.a.call(&id, &Add { n: 3 }).await.unwrap(), 3);
    assert_eq!(cluster.a.call(&id, &Add { n: 4 }).await.unwrap(), 7);

    let snapshot = cluster.b.call(&id, &Get).await.unwrap();
    assert_eq!(snapshot.value, 7);
    assert_eq!(snapshot.node, "b");
    assert_eq!(cluster.a.remaining_count().await, 0);
    assert_eq!(cluster.b.remaining_count().await, 1);
    assert_eq!(cluster.a.router().pending_count().await, 0);

    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_errors_travel_back_to_the_caller() {
    let cluster = two_nodes().await;
    let id = on_b(&cluster, "p1").await;

    assert!(matches!(
        cluster.a.call(&id, &Fail).await,
        Err(ActorError::Handler(msg)) if msg == "boom"
    ));
    let unknown = Payload::new("counter.unknown", b"{}".to_vec());
    assert!(matches!(
        cluster.a.call_payload(&id, unknown).await,
        Err(ActorError::RouteNotFound { category, .. }) if category == "counter.unknown"
    ));

    // A failing handler does not take the actor down.
    assert_eq!(cluster.a.call(&id, &Add { n: 1 }).await.unwrap(), 1);
    assert_eq!(cluster.hooks_b.starts(), 1);

    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_call_completes_once() {
    let cluster = two_nodes().await;
    let id = on_b(&cluster, "slow").await;

    let started = tokio::time::Instant::now();
    let result = cluster
        .a
        .call_with_timeout(&id, &Nap { ms: 2_000 }, Duration::from_millis(300))
        .await;
    assert!(matches!(result, Err(ActorError::RpcTimeout)));
    assert!(started.elapsed() < Duration::from_millis(600));

    // The late reply arrives after the entry was swept and is dropped.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(cluster.a.router().pending_count().await, 0);
    assert_eq!(cluster.a.call(&id, &Add { n: 1 }).await.unwrap(), 1);

    // Local calls honor the same deadline.
    let local = ActorId::new("local-slow");
    cluster
        .a
        .find_or_create(COUNTER, &local, Dispatch::default_policy())
        .await
        .unwrap();
    assert!(matches!(
        cluster
            .a
            .call_with_timeout(&local, &Nap { ms: 2_000 }, Duration::from_millis(300))
            .await,
        Err(ActorError::RpcTimeout)
    ));

    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_actor_calls_actor_on_another_node() {
    let cluster = two_nodes().await;
    let caller = ActorId::new("caller");
    cluster
        .a
        .find_or_create(COUNTER, &caller, Dispatch::default_policy())
        .await
        .unwrap();
    let peer = on_b(&cluster, "peer").await;

    let reply = cluster
        .a
        .call(&caller, &AskPeer { peer: peer.clone(), n: 9 })
        .await
        .unwrap();
    assert_eq!(reply, 9);

    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_async_reply_runs_in_caller_mailbox() {
    let cluster = two_nodes().await;
    let caller = ActorId::new("caller");
    cluster
        .a
        .find_or_create(COUNTER, &caller, Dispatch::default_policy())
        .await
        .unwrap();
    let remote_peer = on_b(&cluster, "remote-peer").await;
    let local_peer = ActorId::new("local-peer");
    cluster
        .a
        .find_or_create(COUNTER, &local_peer, Dispatch::default_policy())
        .await
        .unwrap();

    cluster.a.call(&remote_peer, &Add { n: 10 }).await.unwrap();
    cluster
        .a
        .call(&caller, &AskPeerLater { peer: remote_peer, n: 5 })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cluster.a.call(&caller, &Get).await.unwrap().value, 15);

    cluster
        .a
        .call(&caller, &AskPeerLater { peer: local_peer, n: 2 })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cluster.a.call(&caller, &Get).await.unwrap().value, 2);
    assert_eq!(cluster.a.router().pending_count().await, 0);

    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_async_call_to_dead_node_times_out_into_callback() {
    let cluster = two_nodes().await;
    let caller = ActorId::new("caller");
    cluster
        .a
        .find_or_create(COUNTER, &caller, Dispatch::default_policy())
        .await
        .unwrap();
    let peer = on_b(&cluster, "peer").await;

    // b drops off the network but its record is still live.
    cluster.network.unregister(cluster.b.node_id());
    cluster
        .a
        .call(&caller, &AskPeerLater { peer, n: 5 })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(cluster.a.call(&caller, &Get).await.unwrap().value, -1);
    assert_eq!(cluster.a.router().pending_count().await, 0);

    cluster.a.stop().await;
    cluster.b.abort();
}

#[tokio::test(start_paused = true)]
async fn test_start_actor_on_owner_node() {
    let cluster = two_nodes().await;
    let id = on_b(&cluster, "eager").await;

    cluster.a.start_actor(&id).await.unwrap();
    assert_eq!(cluster.b.remaining_count().await, 1);
    assert_eq!(cluster.hooks_b.starts(), 1);

    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_agent_stream_calls_account_actor() {
    let cluster = two_nodes().await;
    let account = on_b(&cluster, "account-7").await;

    let (requests, mut replies) = cluster
        .network
        .open_agent_stream(
            cluster.b.node_id(),
            AgentHeaders {
                node_id: cluster.b.node_id().clone(),
                account_id: account.clone(),
            },
        )
        .unwrap();

    for (req_id, n) in [(1, 4), (2, 6)] {
        requests
            .send(AgentRequest {
                req_id: RequestId(req_id),
                req_type: "counter.add".to_string(),
                data: serde_json::to_vec(&Add { n }).unwrap(),
            })
            .unwrap();
    }

    let first = replies.recv().await.unwrap();
    let second = replies.recv().await.unwrap();
    let mut results = vec![
        (first.req_id, first.result.unwrap()),
        (second.req_id, second.result.unwrap()),
    ];
    results.sort_by_key(|(id, _)| id.as_u32());
    assert_eq!(results[0], (RequestId(1), b"4".to_vec()));
    assert_eq!(results[1], (RequestId(2), b"10".to_vec()));
    assert_eq!(first.from_actor, account);

    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stream_addressed_to_another_node_is_rejected() {
    let cluster = two_nodes().await;
    let b = cluster.a.membership().get(cluster.b.node_id()).await.unwrap();

    let result = cluster
        .network
        .open_rpc_stream(
            &b,
            StreamHeaders {
                node_id: NodeId::new("someone-else"),
                client_node_id: cluster.a.node_id().clone(),
            },
        )
        .await;
    assert!(matches!(
        result,
        Err(TransportError::NodeMismatch { ref actual, .. }) if actual == cluster.b.node_id()
    ));

    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_timers_fire_through_the_mailbox() {
    let cluster = two_nodes().await;
    let once = ActorId::new("once");
    let every = ActorId::new("every");
    for id in [&once, &every] {
        cluster
            .a
            .find_or_create(COUNTER, id, Dispatch::default_policy())
            .await
            .unwrap();
    }

    cluster
        .a
        .call(&once, &StartTimer { ms: 100, repeat: false })
        .await
        .unwrap();
    cluster
        .a
        .call(&every, &StartTimer { ms: 100, repeat: true })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1_050)).await;

    assert_eq!(cluster.a.call(&once, &Get).await.unwrap().ticks, 1);
    let ticks = cluster.a.call(&every, &Get).await.unwrap().ticks;
    assert!((9..=11).contains(&ticks), "got {ticks} ticks");

    cluster.stop().await;
}
