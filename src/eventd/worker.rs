//! Worker tasks of the event pipeline
//!
//! Every worker pulls from the shared raw-event queue. Before an event is
//! processed its (entity, check) key is claimed in the `InFlight` table while
//! the queue is still held, so claims happen in arrival order. An event whose
//! key is already claimed is parked behind it and processed by the worker
//! holding the claim, which keeps other workers free for unrelated keys.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace, warn};

use super::EventdError;
use crate::bus::{Message, MessageBus, TOPIC_EVENT};
use crate::store::Store;
use crate::types::{Event, EventKey};

/// Keys currently being processed, each with the events parked behind it
pub(super) struct InFlight {
    keys: Mutex<HashMap<EventKey, VecDeque<Box<Event>>>>,
    backlog_limit: usize,
}

impl InFlight {
    pub fn new(backlog_limit: usize) -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            backlog_limit: backlog_limit.max(1),
        }
    }

    /// Claim `key` for `event`
    ///
    /// Returns the event when the key was free. Otherwise the event is parked
    /// behind the claim, or dropped when that backlog is full.
    pub fn claim(&self, key: EventKey, event: Box<Event>) -> Option<Box<Event>> {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        match keys.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(VecDeque::new());
                Some(event)
            }
            Entry::Occupied(mut entry) => {
                let key = entry.key().clone();
                let backlog = entry.get_mut();
                if backlog.len() >= self.backlog_limit {
                    warn!(
                        entity = %key.entity_id,
                        check = %key.check_name,
                        "backlog for busy key is full, dropping event"
                    );
                } else {
                    trace!(entity = %key.entity_id, check = %key.check_name, "key is busy, parking event");
                    backlog.push_back(event);
                }
                None
            }
        }
    }

    /// Next parked event for `key`; releases the claim when there is none
    pub fn next(&self, key: &EventKey) -> Option<Box<Event>> {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        let next = keys.get_mut(key).and_then(VecDeque::pop_front);
        if next.is_none() {
            keys.remove(key);
        }
        next
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

enum Dequeued {
    Claimed(EventKey, Box<Event>),
    Skipped,
    Closed,
}

fn decode(message: Message) -> Option<Box<Event>> {
    match message {
        Message::Event(event) => Some(event),
        Message::Raw(bytes) => match serde_json::from_slice::<Event>(&bytes) {
            Ok(event) => Some(Box::new(event)),
            Err(e) => {
                warn!("dropping undecodable event: {e}");
                None
            }
        },
        Message::CheckRequest(_) => {
            warn!("dropping check request received on the event topic");
            None
        }
    }
}

pub(super) struct Worker {
    pub id: usize,
    pub store: Arc<dyn Store>,
    pub bus: Arc<dyn MessageBus>,
    pub rx: Arc<AsyncMutex<mpsc::Receiver<Message>>>,
    pub in_flight: Arc<InFlight>,
    pub errors: mpsc::Sender<EventdError>,
    pub cancel: CancellationToken,
}

impl Worker {
    #[instrument(skip_all, fields(worker = self.id))]
    pub async fn run(self) {
        loop {
            let dequeued = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                dequeued = self.dequeue() => dequeued,
            };

            match dequeued {
                Dequeued::Claimed(key, event) => self.process_claimed(key, event).await,
                Dequeued::Skipped => {}
                Dequeued::Closed => {
                    error!("raw event queue was closed");
                    if self.errors.try_send(EventdError::ChannelClosed).is_err() {
                        debug!("channel closed was already reported");
                    }
                    break;
                }
            }
        }
        debug!("worker exited");
    }

    async fn dequeue(&self) -> Dequeued {
        let mut rx = self.rx.lock().await;
        let Some(message) = rx.recv().await else {
            return Dequeued::Closed;
        };

        let Some(event) = decode(message) else {
            return Dequeued::Skipped;
        };
        let Some(key) = event.key() else {
            warn!("dropping event without entity or check");
            return Dequeued::Skipped;
        };

        // claim before releasing the queue so same-key events keep their order
        match self.in_flight.claim(key.clone(), event) {
            Some(event) => Dequeued::Claimed(key, event),
            None => Dequeued::Skipped,
        }
    }

    /// Process `event` and then every event parked behind its key
    async fn process_claimed(&self, key: EventKey, mut event: Box<Event>) {
        loop {
            trace!(entity = %key.entity_id, check = %key.check_name, "processing event");
            match process_event(self.store.as_ref(), *event).await {
                Ok(event) => self.republish(&event).await,
                Err(e) => warn!("dropping event: {e}"),
            }

            match self.in_flight.next(&key) {
                Some(next) => event = next,
                None => break,
            }
        }
    }

    async fn republish(&self, event: &Event) {
        let bytes = match serde_json::to_vec(event) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("failed to serialize processed event: {e}");
                return;
            }
        };

        tokio::select! {
            biased;

            result = self.bus.publish(TOPIC_EVENT, Message::Raw(bytes)) => {
                if let Err(e) = result {
                    warn!("failed to publish processed event: {e}");
                }
            }

            _ = self.cancel.cancelled() => {
                debug!("stop requested, abandoning processed event publish");
            }
        }
    }
}

/// Validate, merge with the stored event and persist
///
/// Returns the event as persisted.
pub async fn process_event(store: &dyn Store, mut event: Event) -> Result<Event, EventdError> {
    let (entity, check) = match (&event.entity, &event.check) {
        (Some(entity), Some(check)) => (entity, check),
        _ => {
            return Err(EventdError::InvalidEvent(
                "event requires an entity and a check".to_string(),
            ));
        }
    };

    entity
        .validate()
        .map_err(|e| EventdError::InvalidEvent(format!("invalid entity: {e}")))?;
    check
        .validate()
        .map_err(|e| EventdError::InvalidEvent(format!("invalid check: {e}")))?;

    let previous = store
        .get_event_by_entity_check(&entity.id, check.name())
        .await?;

    if let Some(previous) = previous {
        let Some(prev_check) = previous.check.as_ref().filter(|c| c.validate().is_ok()) else {
            return Err(EventdError::InvalidEvent(
                "stored event has no valid check to merge with".to_string(),
            ));
        };
        if let Some(check) = event.check.as_mut() {
            check.merge_with(prev_check);
        }
    }

    store.update_event(&event).await?;
    Ok(event)
}
