//! Topic-addressed publish/subscribe bus
//!
//! Producers publish by topic name, consumers subscribe a named queue to a
//! topic. A published message is delivered to every queue subscribed to the
//! topic at publish time; a topic without subscribers drops the message.
//!
//! ## Topics
//!
//! ```text
//! check-request:{org}:{env}:{subscription}   Schedulerd ─► agents
//! event:raw                                  agents     ─► Eventd
//! event:processed                            Eventd     ─► handlers
//! ```
//!
//! The bus is constructed once and shared via `Arc<dyn MessageBus>`, so tests
//! can swap in their own implementation.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::{CheckRequest, Event};

pub use memory::InMemoryBus;

/// Topic carrying raw events submitted by agents
pub const TOPIC_EVENT_RAW: &str = "event:raw";

/// Topic carrying events after they were merged and persisted
pub const TOPIC_EVENT: &str = "event:processed";

/// Topic on which check requests for a subscription group are published
pub fn subscription_topic(organization: &str, environment: &str, subscription: &str) -> String {
    format!("check-request:{organization}:{environment}:{subscription}")
}

/// Result type alias for bus operations
pub type BusResult<T> = Result<T, BusError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("message bus is closed")]
    Closed,

    #[error("invalid topic name '{0}'")]
    InvalidTopic(String),

    #[error("invalid consumer name '{0}'")]
    InvalidConsumer(String),

    #[error("failed to publish to {topic}: {reason}")]
    PublishFailed { topic: String, reason: String },
}

/// Payload carried on the bus
///
/// Each topic category has its own variant, so consumers match instead of
/// downcasting.
#[derive(Debug, Clone)]
pub enum Message {
    /// Request for agents subscribed to a check-request topic
    CheckRequest(Arc<CheckRequest>),

    /// A decoded event
    Event(Box<Event>),

    /// An encoded (JSON) event, as received from an agent or republished by eventd
    Raw(Vec<u8>),
}

/// Queue end handed to the bus when subscribing
pub type Queue = mpsc::Sender<Message>;

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Deliver a message to every queue currently subscribed to `topic`
    ///
    /// Publishing to a topic without subscribers is not an error.
    async fn publish(&self, topic: &str, message: Message) -> BusResult<()>;

    /// Subscribe `queue` to `topic` under the consumer name `consumer`
    ///
    /// Subscribing the same consumer name twice replaces the earlier queue.
    fn subscribe(&self, topic: &str, consumer: &str, queue: Queue) -> BusResult<()>;

    /// Remove the consumer's queue from `topic`
    fn unsubscribe(&self, topic: &str, consumer: &str) -> BusResult<()>;
}
