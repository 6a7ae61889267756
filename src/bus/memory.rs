//! In-process message bus
//!
//! Subscriber queues are bounded tokio mpsc senders. Publishing awaits queue
//! capacity, so a slow consumer applies backpressure to its producers rather
//! than losing messages. Deliveries to the subscribers of a topic run
//! concurrently: a full queue delays the publish call but not the other
//! subscribers. Queues whose receiver was dropped are pruned on the next
//! publish.
//!
//! The subscriber table is behind a `std::sync::RwLock` that is only held
//! while copying or editing the table, never across an `.await`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, instrument, trace, warn};

use super::{BusError, BusResult, Message, MessageBus, Queue};

#[derive(Clone)]
struct Subscriber {
    consumer: String,
    queue: Queue,
}

/// Message bus backed by in-process channels
#[derive(Default)]
pub struct InMemoryBus {
    topics: RwLock<HashMap<String, Vec<Subscriber>>>,
    closed: AtomicBool,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shut the bus down
    ///
    /// Every subscriber queue is dropped, so consumers observe their channel
    /// closing. Later publishes and subscriptions fail with `BusError::Closed`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        debug!("closing message bus ({} topics)", topics.len());
        topics.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of queues currently subscribed to `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, Vec::len)
    }

    fn ensure_open(&self) -> BusResult<()> {
        if self.is_closed() {
            Err(BusError::Closed)
        } else {
            Ok(())
        }
    }

    fn prune_closed(&self, topic: &str) {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.retain(|s| !s.queue.is_closed());
            if subscribers.is_empty() {
                topics.remove(topic);
            }
        }
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    #[instrument(skip(self, message))]
    async fn publish(&self, topic: &str, message: Message) -> BusResult<()> {
        self.ensure_open()?;

        let subscribers = self
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .cloned()
            .unwrap_or_default();

        if subscribers.is_empty() {
            trace!("no subscribers, dropping message");
            return Ok(());
        }

        let message = &message;
        let deliveries = subscribers.iter().map(|subscriber| async move {
            let delivered = subscriber.queue.send(message.clone()).await.is_ok();
            if !delivered {
                warn!(
                    consumer = %subscriber.consumer,
                    "subscriber queue closed, removing subscription"
                );
            }
            delivered
        });

        if join_all(deliveries).await.contains(&false) {
            self.prune_closed(topic);
        }

        trace!("published message to {} subscribers", subscribers.len());
        Ok(())
    }

    fn subscribe(&self, topic: &str, consumer: &str, queue: Queue) -> BusResult<()> {
        self.ensure_open()?;

        if topic.is_empty() {
            return Err(BusError::InvalidTopic(topic.to_string()));
        }
        if consumer.is_empty() {
            return Err(BusError::InvalidConsumer(consumer.to_string()));
        }

        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        let subscribers = topics.entry(topic.to_string()).or_default();
        subscribers.retain(|s| s.consumer != consumer);
        subscribers.push(Subscriber {
            consumer: consumer.to_string(),
            queue,
        });

        debug!(topic, consumer, "subscribed");
        Ok(())
    }

    fn unsubscribe(&self, topic: &str, consumer: &str) -> BusResult<()> {
        self.ensure_open()?;

        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.retain(|s| s.consumer != consumer);
            if subscribers.is_empty() {
                topics.remove(topic);
            }
        }

        debug!(topic, consumer, "unsubscribed");
        Ok(())
    }
}
