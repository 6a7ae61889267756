//! Integration tests for the event pipeline
//!
//! These tests verify that:
//! - Raw events submitted on the bus are merged and persisted
//! - History is capped and flapping is detected
//! - Occurrence counters follow status changes
//! - Invalid events never reach the store

use std::sync::Arc;

use chrono::{Duration, Utc};
use watchpost::bus::InMemoryBus;
use watchpost::config::EventdConfig;
use watchpost::eventd::Eventd;
use watchpost::store::{MemoryStore, Store};
use watchpost::types::{CheckState, Event};

use crate::helpers::*;

fn start_eventd(store: Arc<MemoryStore>, bus: Arc<InMemoryBus>) -> Eventd {
    let mut eventd = Eventd::builder()
        .store(store)
        .bus(bus)
        .config(EventdConfig {
            handler_count: 4,
            queue_size: 32,
        })
        .build()
        .unwrap();
    eventd.start().unwrap();
    eventd
}

#[tokio::test]
async fn test_history_is_capped_and_ordered() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(InMemoryBus::new());
    let mut handler = processed(&bus);
    let mut eventd = start_eventd(store.clone(), bus.clone());

    let start = Utc::now();
    let mut last = None;
    for i in 0..30 {
        let executed = start + Duration::seconds(60 * i);
        submit(&bus, &create_event("web-01", "disk", 0, executed)).await;
        last = Some(next_processed(&mut handler).await);
    }

    let check = last.unwrap().check.unwrap();
    assert_eq!(check.history.len(), 21);
    assert_eq!(check.history[0].executed, start + Duration::seconds(60 * 9));
    assert_eq!(check.history[20].executed, start + Duration::seconds(60 * 29));
    assert_eq!(check.occurrences, 30);
    assert_eq!(check.total_state_change, 0);
    assert_eq!(check.state, CheckState::Passing);

    eventd.stop().await;
}

#[tokio::test]
async fn test_occurrences_follow_status_changes() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(InMemoryBus::new());
    let mut handler = processed(&bus);
    let mut eventd = start_eventd(store.clone(), bus.clone());

    let start = Utc::now();
    let statuses = [0, 2, 2, 2, 0];
    let mut results: Vec<Event> = vec![];
    for (i, status) in statuses.into_iter().enumerate() {
        let executed = start + Duration::seconds(10 * i as i64);
        submit(&bus, &create_event("web-01", "disk", status, executed)).await;
        results.push(next_processed(&mut handler).await);
    }

    let failing = results[3].check.as_ref().unwrap();
    assert_eq!(failing.occurrences, 3);
    assert_eq!(failing.occurrences_watermark, 3);
    assert_eq!(failing.state, CheckState::Failing);

    let resolved = results[4].check.as_ref().unwrap();
    assert_eq!(resolved.occurrences, 1);
    assert_eq!(resolved.occurrences_watermark, 3);
    assert_eq!(resolved.state, CheckState::Passing);
    assert_eq!(resolved.last_ok, Some(start + Duration::seconds(40)));

    eventd.stop().await;
}

#[tokio::test]
async fn test_flapping_check_is_detected() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(InMemoryBus::new());
    let mut handler = processed(&bus);
    let mut eventd = start_eventd(store.clone(), bus.clone());

    let start = Utc::now();
    let mut last = None;
    for i in 0..25 {
        let executed = start + Duration::seconds(i);
        let mut event = create_event("web-01", "flappy", (i % 2) as u32, executed);
        if let Some(check) = event.check.as_mut() {
            check.config.low_flap_threshold = 20;
            check.config.high_flap_threshold = 60;
        }
        submit(&bus, &event).await;
        last = Some(next_processed(&mut handler).await);
    }

    let check = last.unwrap().check.unwrap();
    assert!(check.total_state_change >= 60);
    assert_eq!(check.state, CheckState::Flapping);

    eventd.stop().await;
}

#[tokio::test]
async fn test_entities_are_tracked_separately() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(InMemoryBus::new());
    let mut handler = processed(&bus);
    let mut eventd = start_eventd(store.clone(), bus.clone());

    let now = Utc::now();
    submit(&bus, &create_event("web-01", "disk", 0, now)).await;
    next_processed(&mut handler).await;
    submit(&bus, &create_event("web-02", "disk", 2, now)).await;
    next_processed(&mut handler).await;
    submit(&bus, &create_event("web-01", "cpu", 1, now)).await;
    next_processed(&mut handler).await;

    assert_eq!(store.event_count(), 3);
    let web02 = store
        .get_event_by_entity_check("web-02", "disk")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(web02.check.unwrap().status, 2);

    eventd.stop().await;
}

#[tokio::test]
async fn test_invalid_events_never_reach_store() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(InMemoryBus::new());
    let mut handler = processed(&bus);
    let mut eventd = start_eventd(store.clone(), bus.clone());

    let now = Utc::now();

    submit(&bus, &create_event("web-01", "disk usage!", 0, now)).await;

    let mut no_org = create_event("web-01", "disk", 0, now);
    if let Some(entity) = no_org.entity.as_mut() {
        entity.organization.clear();
    }
    submit(&bus, &no_org).await;

    submit(&bus, &create_event("web-01", "marker", 0, now)).await;
    let event = next_processed(&mut handler).await;

    assert_eq!(event.check.unwrap().config.name, "marker");
    assert_eq!(store.event_count(), 1);

    eventd.stop().await;
}
