//! Concurrency and race condition tests
//!
//! These tests verify thread-safety and concurrent operation:
//! - Concurrent submitters for the same entity and check lose no merges
//! - Many entities processed in parallel
//! - Many schedulers sharing one bus and one snapshot
//! - Stopping while busy

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{sleep, timeout};
use watchpost::bus::{InMemoryBus, Message, MessageBus, subscription_topic};
use watchpost::config::{EventdConfig, SchedulerdConfig};
use watchpost::eventd::Eventd;
use watchpost::schedulerd::Schedulerd;
use watchpost::store::{MemoryStore, Store};

use crate::helpers::*;

fn eventd(store: Arc<MemoryStore>, bus: Arc<InMemoryBus>, handlers: usize) -> Eventd {
    Eventd::builder()
        .store(store)
        .bus(bus)
        .config(EventdConfig {
            handler_count: handlers,
            queue_size: 32,
        })
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submitters_same_key_no_lost_merge() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(InMemoryBus::new());
    let mut handler = processed(&bus);

    let mut eventd = eventd(store.clone(), bus.clone(), 8);
    eventd.start().unwrap();

    let submitters = 8;
    let per_submitter = 25;

    let mut tasks = vec![];
    for _ in 0..submitters {
        let bus = bus.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..per_submitter {
                submit(&bus, &create_event("web-01", "disk", 0, Utc::now())).await;
            }
        }));
    }
    for _ in 0..submitters * per_submitter {
        next_processed(&mut handler).await;
    }
    for task in tasks {
        task.await.unwrap();
    }

    let stored = store
        .get_event_by_entity_check("web-01", "disk")
        .await
        .unwrap()
        .unwrap();
    // the first observation is stored as-is, every later one increments
    assert_eq!(
        stored.check.unwrap().occurrences,
        (submitters * per_submitter) as u64
    );

    eventd.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_entities_in_parallel() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(InMemoryBus::new());
    let mut handler = processed(&bus);

    let mut eventd = eventd(store.clone(), bus.clone(), 10);
    eventd.start().unwrap();

    let entities = 50;
    let mut tasks = vec![];
    for i in 0..entities {
        let bus = bus.clone();
        tasks.push(tokio::spawn(async move {
            let id = format!("node-{i}");
            for status in [0, 1, 2] {
                submit(&bus, &create_event(&id, "cpu", status, Utc::now())).await;
            }
        }));
    }
    let mut seen = HashSet::new();
    for _ in 0..entities * 3 {
        let event = next_processed(&mut handler).await;
        seen.insert(event.entity.unwrap().id);
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(seen.len(), entities);
    assert_eq!(store.event_count(), entities);

    // per-key order: the last submitted status wins for every entity
    for i in 0..entities {
        let event = store
            .get_event_by_entity_check(&format!("node-{i}"), "cpu")
            .await
            .unwrap()
            .unwrap();
        let check = event.check.unwrap();
        assert_eq!(check.status, 2);
        assert_eq!(check.history.len(), 3);
    }

    eventd.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_many_schedulers_share_one_bus() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(InMemoryBus::new());
    let (tx, mut agent) = tokio::sync::mpsc::channel(1024);
    bus.subscribe(
        &subscription_topic("default", "default", "linux"),
        "agent",
        tx,
    )
    .unwrap();

    let checks = 40;
    for i in 0..checks {
        store
            .update_check_config(&create_check_config(&format!("check-{i}"), 30))
            .await
            .unwrap();
    }

    let mut schedulerd = Schedulerd::new(
        store,
        bus,
        &SchedulerdConfig {
            state_refresh_secs: 5,
        },
    );
    schedulerd.start().await.unwrap();
    sleep(Duration::from_secs(31)).await;

    let mut names = HashSet::new();
    while let Ok(Message::CheckRequest(request)) = agent.try_recv() {
        names.insert(request.config.name.clone());
    }
    assert_eq!(names.len(), checks);

    timeout(Duration::from_secs(1), schedulerd.stop())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_while_busy() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(InMemoryBus::new());

    let mut eventd = eventd(store.clone(), bus.clone(), 2);
    eventd.start().unwrap();

    let producer = {
        let bus = bus.clone();
        tokio::spawn(async move {
            for i in 0..500 {
                let id = format!("node-{}", i % 20);
                submit(&bus, &create_event(&id, "disk", 0, Utc::now())).await;
            }
        })
    };

    sleep(Duration::from_millis(5)).await;
    timeout(WAIT, eventd.stop()).await.unwrap();

    // with eventd gone the raw topic has no subscribers, so the producer finishes
    timeout(WAIT, producer).await.unwrap().unwrap();
    assert!(store.event_count() <= 20);
}
