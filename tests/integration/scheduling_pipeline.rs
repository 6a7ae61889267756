//! Integration tests for the scheduling pipeline
//!
//! These tests verify that:
//! - Checks written to the store are picked up and fired on their interval
//! - Requests carry the assets and hooks the check declares
//! - Interval changes and deletions in the store take effect
//! - Unpublished checks never reach agents

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use watchpost::bus::{InMemoryBus, Message, subscription_topic};
use watchpost::config::SchedulerdConfig;
use watchpost::schedulerd::Schedulerd;
use watchpost::store::{MemoryStore, Store};
use watchpost::types::{Asset, CheckRequest, HookConfig, HookList};

use crate::helpers::*;

fn drain(rx: &mut tokio::sync::mpsc::Receiver<Message>) -> Vec<Arc<CheckRequest>> {
    let mut requests = vec![];
    while let Ok(message) = rx.try_recv() {
        if let Message::CheckRequest(request) = message {
            requests.push(request);
        }
    }
    requests
}

fn schedulerd(store: Arc<MemoryStore>, bus: Arc<InMemoryBus>) -> Schedulerd {
    Schedulerd::new(
        store,
        bus,
        &SchedulerdConfig {
            state_refresh_secs: 1,
        },
    )
}

#[tokio::test(start_paused = true)]
async fn test_request_carries_resolved_dependencies() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(InMemoryBus::new());
    let mut agent = subscribe(
        &bus,
        &subscription_topic("default", "default", "linux"),
        "agent-1",
    );

    let mut check = create_check_config("disk", 10);
    check.runtime_assets = vec!["sensu-plugins".to_string()];
    check.check_hooks = vec![HookList {
        hook_type: "critical".to_string(),
        hooks: vec!["ps".to_string()],
    }];
    store.update_check_config(&check).await.unwrap();

    for name in ["sensu-plugins-disk", "sensu-plugins-cpu", "ruby"] {
        store
            .update_asset(&Asset {
                name: name.to_string(),
                organization: "default".to_string(),
                url: format!("https://assets.example/{name}.tar.gz"),
                sha512: String::new(),
                filters: vec![],
            })
            .await
            .unwrap();
    }
    for name in ["ps", "lsof"] {
        store
            .update_hook(&HookConfig {
                name: name.to_string(),
                organization: "default".to_string(),
                environment: "default".to_string(),
                command: name.to_string(),
                timeout: 10,
                stdin: false,
            })
            .await
            .unwrap();
    }

    let mut schedulerd = schedulerd(store, bus);
    schedulerd.start().await.unwrap();

    let request = match timeout(Duration::from_secs(11), agent.recv()).await {
        Ok(Some(Message::CheckRequest(request))) => request,
        other => panic!("expected a check request, got {other:?}"),
    };

    assert_eq!(request.config, check);
    let mut assets: Vec<_> = request.assets.iter().map(|a| a.name.as_str()).collect();
    assets.sort();
    assert_eq!(assets, vec!["sensu-plugins-cpu", "sensu-plugins-disk"]);
    assert_eq!(request.hooks.len(), 1);
    assert_eq!(request.hooks[0].name, "ps");

    schedulerd.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_fires_once_per_interval() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(InMemoryBus::new());
    let mut agent = subscribe(
        &bus,
        &subscription_topic("default", "default", "linux"),
        "agent-1",
    );

    store
        .update_check_config(&create_check_config("disk", 10))
        .await
        .unwrap();

    let mut schedulerd = schedulerd(store, bus);
    schedulerd.start().await.unwrap();

    // first fire within 10s, then every 10s
    sleep(Duration::from_secs(100)).await;
    let fired = drain(&mut agent).len();
    assert!((9..=10).contains(&fired), "fired {fired} times");

    schedulerd.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_interval_update_and_deletion() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(InMemoryBus::new());
    let mut agent = subscribe(
        &bus,
        &subscription_topic("default", "default", "linux"),
        "agent-1",
    );

    let mut check = create_check_config("disk", 10);
    store.update_check_config(&check).await.unwrap();

    let mut schedulerd = schedulerd(store.clone(), bus);
    schedulerd.start().await.unwrap();
    sleep(Duration::from_secs(30)).await;
    drain(&mut agent);

    check.interval = 60;
    store.update_check_config(&check).await.unwrap();

    // at most one more fire at the old interval, then one per minute
    sleep(Duration::from_secs(11)).await;
    drain(&mut agent);
    sleep(Duration::from_secs(180)).await;
    let fired = drain(&mut agent).len();
    assert!((2..=3).contains(&fired), "fired {fired} times");

    store.delete_check_config(&check.key()).await.unwrap();
    sleep(Duration::from_secs(61)).await;
    drain(&mut agent);

    sleep(Duration::from_secs(300)).await;
    assert!(drain(&mut agent).is_empty());

    schedulerd.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unpublished_check_is_silent() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(InMemoryBus::new());
    let mut agent = subscribe(
        &bus,
        &subscription_topic("default", "default", "linux"),
        "agent-1",
    );

    let mut check = create_check_config("on-demand", 5);
    check.publish = false;
    store.update_check_config(&check).await.unwrap();

    let mut schedulerd = schedulerd(store, bus);
    schedulerd.start().await.unwrap();

    sleep(Duration::from_secs(120)).await;
    assert!(drain(&mut agent).is_empty());

    schedulerd.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_subscriptions_are_isolated() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(InMemoryBus::new());
    let mut linux = subscribe(
        &bus,
        &subscription_topic("default", "default", "linux"),
        "agent-linux",
    );
    let mut windows = subscribe(
        &bus,
        &subscription_topic("default", "default", "windows"),
        "agent-windows",
    );
    let mut other_env = subscribe(
        &bus,
        &subscription_topic("default", "prod", "linux"),
        "agent-prod",
    );

    store
        .update_check_config(&create_check_config("disk", 10))
        .await
        .unwrap();

    let mut schedulerd = schedulerd(store, bus);
    schedulerd.start().await.unwrap();
    sleep(Duration::from_secs(25)).await;

    assert!(!drain(&mut linux).is_empty());
    assert!(drain(&mut windows).is_empty());
    assert!(drain(&mut other_env).is_empty());

    schedulerd.stop().await.unwrap();
}
