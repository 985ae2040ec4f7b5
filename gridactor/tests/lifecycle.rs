//! Activation, hibernation, termination and shutdown of local actors.

mod common;

use common::*;
use gridactor::prelude::*;
use gridactor::supervisor::Residency;

async fn single_node(config: RuntimeConfig) -> (ActorRuntime, Arc<Hooks>) {
    init_tracing();
    let hooks = Arc::new(Hooks::default());
    let runtime = counter_node(
        "solo",
        "default",
        Arc::new(InMemoryStore::new()),
        Arc::new(LocalNetwork::new()),
        config,
        hooks.clone(),
    )
    .await;
    (runtime, hooks)
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_first_calls_start_one_instance() {
    let (runtime, hooks) = single_node(fast_config()).await;
    let id = ActorId::new("c1");
    runtime
        .find_or_create(COUNTER, &id, Dispatch::default_policy())
        .await
        .unwrap();

    let mut calls = Vec::new();
    for _ in 0..20 {
        let router = runtime.router().clone();
        let id = id.clone();
        calls.push(tokio::spawn(async move { router.call(&id, &Add { n: 1 }).await }));
    }
    for call in calls {
        call.await.unwrap().unwrap();
    }

    let snapshot = runtime.call(&id, &Get).await.unwrap();
    assert_eq!(snapshot.value, 20);
    assert_eq!(hooks.starts(), 1);
    assert_eq!(runtime.remaining_count().await, 1);
    assert_eq!(runtime.counts_by_category().await.get(COUNTER), Some(&1));

    runtime.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_idle_actor_hibernates_and_wakes_with_its_state() {
    let config = fast_config()
        .with_idle(Duration::from_millis(100), Duration::from_millis(300))
        .with_sleep(Duration::from_secs(60), Duration::from_secs(3600));
    let (runtime, hooks) = single_node(config).await;
    let id = ActorId::new("sleepy");
    runtime
        .find_or_create(COUNTER, &id, Dispatch::default_policy())
        .await
        .unwrap();

    assert_eq!(runtime.call(&id, &Add { n: 5 }).await.unwrap(), 5);
    assert_eq!(runtime.supervisor().residency(&id).await, Some(Residency::Running));

    // Off the idle-check grid, so no check races the wake below.
    tokio::time::sleep(Duration::from_millis(1050)).await;
    assert_eq!(runtime.supervisor().residency(&id).await, Some(Residency::Sleeping));
    assert_eq!(runtime.remaining_count().await, 1);

    let snapshot = runtime.call(&id, &Get).await.unwrap();
    assert_eq!(snapshot.value, 5);
    assert_eq!(hooks.starts(), 1, "waking must not run on_start again");
    assert_eq!(runtime.supervisor().residency(&id).await, Some(Residency::Running));

    runtime.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_long_sleeper_is_terminated_and_restarts_fresh() {
    let config = fast_config()
        .with_idle(Duration::from_millis(100), Duration::from_millis(300))
        .with_sleep(Duration::from_millis(200), Duration::from_millis(500));
    let (runtime, hooks) = single_node(config).await;
    let id = ActorId::new("gone");
    runtime
        .find_or_create(COUNTER, &id, Dispatch::default_policy())
        .await
        .unwrap();
    runtime.call(&id, &Add { n: 5 }).await.unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(runtime.remaining_count().await, 0);
    assert_eq!(hooks.stops(), 1);

    let meta = runtime.registry().lookup(&id).await.unwrap().unwrap();
    assert_eq!(meta.owner, None, "terminated actor gives up its location");

    // The next message dispatches and starts a new incarnation.
    assert_eq!(runtime.call(&id, &Add { n: 1 }).await.unwrap(), 1);
    assert_eq!(hooks.starts(), 2);
    let meta = runtime.registry().lookup(&id).await.unwrap().unwrap();
    assert_eq!(meta.owner.as_ref(), Some(runtime.node_id()));

    runtime.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_daemon_never_hibernates_nor_expires() {
    let config = fast_config()
        .with_idle(Duration::from_millis(100), Duration::from_millis(300))
        .with_sleep(Duration::from_millis(200), Duration::from_millis(500));
    let (runtime, hooks) = single_node(config).await;
    let id = ActorId::new("daemon-1");
    runtime
        .find_or_create(COUNTER, &id, Dispatch::default_policy().daemon())
        .await
        .unwrap();
    runtime.call(&id, &Add { n: 2 }).await.unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(runtime.supervisor().residency(&id).await, Some(Residency::Running));
    assert_eq!(runtime.registry().daemon_ids().await.unwrap(), vec![id.clone()]);

    runtime.stop().await;
    assert_eq!(hooks.stops(), 1);
    let meta = runtime.registry().lookup(&id).await.unwrap().unwrap();
    assert_eq!(meta.owner.as_ref(), Some(runtime.node_id()));
}

#[tokio::test(start_paused = true)]
async fn test_recover_daemons_starts_owned_daemons() {
    let (runtime, hooks) = single_node(fast_config()).await;
    for name in ["d1", "d2"] {
        runtime
            .find_or_create(COUNTER, &ActorId::new(name), Dispatch::default_policy().daemon())
            .await
            .unwrap();
    }
    runtime
        .find_or_create(COUNTER, &ActorId::new("plain"), Dispatch::default_policy())
        .await
        .unwrap();

    assert_eq!(runtime.recover_daemons().await.unwrap(), 2);
    assert_eq!(hooks.starts(), 2);
    assert_eq!(runtime.remaining_count().await, 2);

    runtime.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_every_actor() {
    let (runtime, hooks) = single_node(fast_config()).await;
    let ids: Vec<ActorId> = (0..5).map(|i| ActorId::new(format!("a{i}"))).collect();
    for id in &ids {
        runtime
            .find_or_create(COUNTER, id, Dispatch::default_policy())
            .await
            .unwrap();
        runtime.call(id, &Add { n: 1 }).await.unwrap();
    }
    assert_eq!(runtime.remaining_count().await, 5);

    runtime.stop().await;

    assert_eq!(hooks.stops(), 5);
    for id in &ids {
        let meta = runtime.registry().lookup(id).await.unwrap().unwrap();
        assert_eq!(meta.owner, None);
    }
    assert!(matches!(
        runtime.call(&ids[0], &Get).await,
        Err(ActorError::ShuttingDown)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_retries_failed_stop_hooks() {
    init_tracing();
    let hooks = Arc::new(Hooks::refusing_stops(2));
    let runtime = counter_node(
        "solo",
        "default",
        Arc::new(InMemoryStore::new()),
        Arc::new(LocalNetwork::new()),
        fast_config(),
        hooks.clone(),
    )
    .await;
    let id = ActorId::new("reluctant");
    runtime
        .find_or_create(COUNTER, &id, Dispatch::default_policy())
        .await
        .unwrap();
    runtime.call(&id, &Add { n: 1 }).await.unwrap();

    runtime.stop().await;

    assert_eq!(hooks.stop_attempts(), 3);
    assert_eq!(hooks.stops(), 1);
    assert_eq!(runtime.remaining_count().await, 0);
    let meta = runtime.registry().lookup(&id).await.unwrap().unwrap();
    assert_eq!(meta.owner, None);
}

#[tokio::test(start_paused = true)]
async fn test_failed_start_is_reported_to_the_caller() {
    init_tracing();
    let hooks = Arc::new(Hooks::default());
    let failing = hooks.clone();
    let runtime = ActorRuntime::builder()
        .node_id(NodeId::new("solo"))
        .config(fast_config())
        .register(COUNTER, move |_meta: &ActorMeta| Counter::failing(failing.clone()))
        .build()
        .await
        .unwrap();
    let id = ActorId::new("broken");
    runtime
        .find_or_create(COUNTER, &id, Dispatch::default_policy())
        .await
        .unwrap();

    let err = runtime.call(&id, &Add { n: 1 }).await.unwrap_err();
    assert!(matches!(err, ActorError::StartFailed(_)), "got {err:?}");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runtime.remaining_count().await, 0);

    // Each new message tries a fresh incarnation.
    assert!(runtime.call(&id, &Add { n: 1 }).await.is_err());
    assert_eq!(hooks.starts(), 2);

    runtime.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_unknown_category_is_rejected() {
    let (runtime, _hooks) = single_node(fast_config()).await;
    let id = ActorId::new("mystery");
    runtime
        .find_or_create("nobody-serves-this", &id, Dispatch::default_policy())
        .await
        .unwrap();

    assert!(matches!(
        runtime.call(&id, &Get).await,
        Err(ActorError::UnknownCategory(category)) if category == "nobody-serves-this"
    ));
    assert!(matches!(
        runtime.call(&ActorId::new("never-created"), &Get).await,
        Err(ActorError::Registry(RegistryError::MetaNotFound(_)))
    ));

    runtime.stop().await;
}
