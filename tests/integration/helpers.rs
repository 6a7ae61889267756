//! Helper functions for integration tests

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::timeout;
use watchpost::bus::{InMemoryBus, Message, MessageBus, TOPIC_EVENT, TOPIC_EVENT_RAW};
use watchpost::types::{Check, CheckConfig, CheckState, Entity, Event};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn create_check_config(name: &str, interval: u32) -> CheckConfig {
    CheckConfig {
        name: name.to_string(),
        organization: "default".to_string(),
        environment: "default".to_string(),
        interval,
        command: format!("check-{name}"),
        subscriptions: vec!["linux".to_string()],
        publish: true,
        runtime_assets: vec![],
        check_hooks: vec![],
        handlers: vec![],
        timeout: 0,
        low_flap_threshold: 0,
        high_flap_threshold: 0,
    }
}

pub fn create_entity(id: &str) -> Entity {
    Entity {
        id: id.to_string(),
        class: "agent".to_string(),
        organization: "default".to_string(),
        environment: "default".to_string(),
        subscriptions: vec!["linux".to_string()],
        last_seen: None,
    }
}

pub fn create_event(entity: &str, check: &str, status: u32, executed: DateTime<Utc>) -> Event {
    Event {
        timestamp: executed,
        entity: Some(create_entity(entity)),
        check: Some(Check {
            config: create_check_config(check, 60),
            status,
            output: format!("status {status}"),
            executed,
            duration: 0.25,
            history: vec![],
            last_ok: None,
            occurrences: 0,
            occurrences_watermark: 0,
            total_state_change: 0,
            state: CheckState::Passing,
        }),
    }
}

/// Subscribe a fresh queue to `topic`
pub fn subscribe(bus: &InMemoryBus, topic: &str, consumer: &str) -> mpsc::Receiver<Message> {
    let (tx, rx) = mpsc::channel(64);
    bus.subscribe(topic, consumer, tx).unwrap();
    rx
}

/// Submit an event the way an agent does
pub async fn submit(bus: &InMemoryBus, event: &Event) {
    bus.publish(
        TOPIC_EVENT_RAW,
        Message::Raw(serde_json::to_vec(event).unwrap()),
    )
    .await
    .unwrap();
}

pub fn processed(bus: &InMemoryBus) -> mpsc::Receiver<Message> {
    subscribe(bus, TOPIC_EVENT, "test-handler")
}

/// Next event republished by eventd
pub async fn next_processed(rx: &mut mpsc::Receiver<Message>) -> Event {
    match timeout(WAIT, rx.recv()).await {
        Ok(Some(Message::Raw(bytes))) => serde_json::from_slice(&bytes).unwrap(),
        other => panic!("expected a processed event, got {other:?}"),
    }
}
