//! Eventd - event ingestion pipeline
//!
//! Turns raw events submitted by agents into durable, merged per-entity state.
//!
//! ## Message Flow
//!
//! ```text
//!                                ┌─► Worker 0 ─┐
//! bus "event:raw" ─► shared queue ─┼─► Worker 1 ─┼─► Store (merge + persist)
//!                                  └─► Worker N ─┘        │
//!                         (claim entity+check key)        ▼
//!                                               bus "event:processed"
//! ```
//!
//! A worker claims the (entity, check) key of each event it takes. Events
//! arriving for a claimed key are parked behind it and handled by the same
//! worker, so read-merge-write cycles for one key never interleave and are
//! applied in arrival order, while a slow store call only holds up its own
//! key.
//!
//! ## Failure handling
//!
//! Invalid events and store failures are logged and the event is dropped; the
//! pipeline keeps running. If the bus closes the shared queue, a
//! `EventdError::ChannelClosed` is reported on the error channel returned by
//! [`Eventd::take_errors`] and the pipeline winds down. Acting on it is up to
//! the owner.

mod worker;

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{BusError, MessageBus, TOPIC_EVENT_RAW};
use crate::config::EventdConfig;
use crate::store::{Store, StoreError};

pub use worker::process_event;

/// Consumer name used for the raw-event subscription
pub const CONSUMER_NAME: &str = "eventd";

#[derive(Debug, Error)]
pub enum EventdError {
    #[error("no store was configured for eventd")]
    MissingStore,

    #[error("no message bus was configured for eventd")]
    MissingBus,

    #[error("eventd was already started")]
    AlreadyStarted,

    #[error("failed to subscribe to raw events: {0}")]
    Subscribe(#[source] BusError),

    #[error("raw event channel closed")]
    ChannelClosed,

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Default)]
pub struct EventdBuilder {
    store: Option<Arc<dyn Store>>,
    bus: Option<Arc<dyn MessageBus>>,
    config: EventdConfig,
}

impl EventdBuilder {
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn config(mut self, config: EventdConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Eventd, EventdError> {
        let store = self.store.ok_or(EventdError::MissingStore)?;
        let bus = self.bus.ok_or(EventdError::MissingBus)?;
        let (errors_tx, errors_rx) = mpsc::channel(1);

        Ok(Eventd {
            store,
            bus,
            handler_count: self.config.handler_count.max(1),
            queue_size: self.config.queue_size.max(1),
            cancel: CancellationToken::new(),
            handles: Vec::new(),
            errors_tx,
            errors_rx: Some(errors_rx),
        })
    }
}

pub struct Eventd {
    store: Arc<dyn Store>,
    bus: Arc<dyn MessageBus>,
    handler_count: usize,
    queue_size: usize,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    errors_tx: mpsc::Sender<EventdError>,
    errors_rx: Option<mpsc::Receiver<EventdError>>,
}

impl fmt::Debug for Eventd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Eventd")
            .field("handler_count", &self.handler_count)
            .field("queue_size", &self.queue_size)
            .field("running_tasks", &self.handles.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Eventd {
    pub fn builder() -> EventdBuilder {
        EventdBuilder::default()
    }

    pub fn handler_count(&self) -> usize {
        self.handler_count
    }

    /// Receiver for terminal pipeline errors; can be taken once
    pub fn take_errors(&mut self) -> Option<mpsc::Receiver<EventdError>> {
        self.errors_rx.take()
    }

    /// Subscribe to raw events and spawn the workers
    pub fn start(&mut self) -> Result<(), EventdError> {
        if !self.handles.is_empty() || self.cancel.is_cancelled() {
            return Err(EventdError::AlreadyStarted);
        }

        let (tx, rx) = mpsc::channel(self.queue_size);
        self.bus
            .subscribe(TOPIC_EVENT_RAW, CONSUMER_NAME, tx)
            .map_err(EventdError::Subscribe)?;

        let rx = Arc::new(AsyncMutex::new(rx));
        // a key can hold back at most one full queue per worker
        let in_flight = Arc::new(worker::InFlight::new(
            self.queue_size.saturating_mul(self.handler_count),
        ));

        for id in 0..self.handler_count {
            let worker = worker::Worker {
                id,
                store: Arc::clone(&self.store),
                bus: Arc::clone(&self.bus),
                rx: Arc::clone(&rx),
                in_flight: Arc::clone(&in_flight),
                errors: self.errors_tx.clone(),
                cancel: self.cancel.clone(),
            };
            self.handles.push(tokio::spawn(worker.run()));
        }

        info!("eventd started with {} handlers", self.handler_count);
        Ok(())
    }

    /// Signal every task to stop and wait until all of them have exited
    ///
    /// Events already taken off the queue, including those parked behind a
    /// busy key, are finished first.
    pub async fn stop(&mut self) {
        self.cancel.cancel();

        for result in join_all(self.handles.drain(..)).await {
            if let Err(e) = result {
                warn!("eventd task failed: {e}");
            }
        }

        match self.bus.unsubscribe(TOPIC_EVENT_RAW, CONSUMER_NAME) {
            Ok(()) | Err(BusError::Closed) => {}
            Err(e) => warn!("failed to unsubscribe eventd: {e}"),
        }
        debug!("eventd stopped");
    }
}
