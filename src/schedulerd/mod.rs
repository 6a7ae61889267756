//! Schedulerd - keeps one `CheckScheduler` running per defined check
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐ refresh  ┌───────┐
//!   ticker ─────► │ StateManager │ ◄─────── │ Store │
//!                 └──────┬───────┘          └───────┘
//!                        │ snapshot
//!                        ▼
//!                 ┌──────────────┐   start/reap   ┌────────────────┐
//!                 │  Schedulers  │ ─────────────► │ CheckScheduler │ ×N ──► bus
//!                 └──────────────┘                └────────────────┘
//! ```
//!
//! Every refresh swaps in a new snapshot and reconciles: checks without a
//! scheduler get one, schedulers whose loop exited (check deleted) are reaped.
//! Schedulers notice deletions and interval changes on their own at the next
//! tick.

pub mod executor;
pub mod scheduler;
pub mod state;
pub mod timer;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::bus::MessageBus;
use crate::config::SchedulerdConfig;
use crate::store::Store;
use crate::types::CheckKey;

pub use executor::CheckExecutor;
pub use scheduler::{CheckScheduler, SchedulerError, SchedulerState};
pub use state::{StateManager, StateSnapshot};
pub use timer::CheckTimer;

/// The set of running schedulers, keyed by check identity
pub struct Schedulers {
    state_manager: Arc<StateManager>,
    bus: Arc<dyn MessageBus>,
    schedulers: HashMap<CheckKey, CheckScheduler>,
}

impl Schedulers {
    pub fn new(state_manager: Arc<StateManager>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            state_manager,
            bus,
            schedulers: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.schedulers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedulers.is_empty()
    }

    pub fn contains(&self, key: &CheckKey) -> bool {
        self.schedulers.contains_key(key)
    }

    /// Bring the running set in line with the current snapshot
    pub async fn reconcile(&mut self) {
        let finished: Vec<CheckKey> = self
            .schedulers
            .iter()
            .filter(|(_, scheduler)| scheduler.is_finished())
            .map(|(key, _)| key.clone())
            .collect();

        for key in finished {
            if let Some(mut scheduler) = self.schedulers.remove(&key) {
                if let Err(e) = scheduler.stop().await {
                    warn!(check = %key, "scheduler exited abnormally: {e}");
                }
                debug!(check = %key, "reaped scheduler");
            }
        }

        let state = self.state_manager.state();
        for check in state.checks() {
            if check.subscriptions.is_empty() || self.schedulers.contains_key(&check.key()) {
                continue;
            }

            let mut scheduler = CheckScheduler::new(
                check.key(),
                Arc::clone(&self.state_manager),
                Arc::clone(&self.bus),
            );
            match scheduler.start(check.interval) {
                Ok(()) => {
                    self.schedulers.insert(check.key(), scheduler);
                }
                Err(e) => error!(check = %check.key(), "failed to start scheduler: {e}"),
            }
        }
    }

    /// Stop every scheduler concurrently and wait for all of them
    pub async fn stop_all(&mut self) {
        let stops = self.schedulers.drain().map(|(key, mut scheduler)| async move {
            if let Err(e) = scheduler.stop().await {
                warn!(check = %key, "error stopping scheduler: {e}");
            }
        });
        join_all(stops).await;
    }
}

/// Supervisor for all check schedulers
pub struct Schedulerd {
    state_manager: Arc<StateManager>,
    bus: Arc<dyn MessageBus>,
    refresh_interval: Duration,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Schedulerd {
    pub fn new(store: Arc<dyn Store>, bus: Arc<dyn MessageBus>, config: &SchedulerdConfig) -> Self {
        Self {
            state_manager: Arc::new(StateManager::new(store)),
            bus,
            refresh_interval: Duration::from_secs(config.state_refresh_secs.max(1)),
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    pub fn state_manager(&self) -> &Arc<StateManager> {
        &self.state_manager
    }

    /// Load the initial state and spawn the supervisor loop
    ///
    /// Fails if the store cannot be read.
    pub async fn start(&mut self) -> Result<(), SchedulerError> {
        if self.handle.is_some() {
            return Err(SchedulerError::AlreadyStarted("schedulerd".to_string()));
        }

        self.state_manager.refresh().await?;
        info!("starting schedulerd");

        let schedulers = Schedulers::new(Arc::clone(&self.state_manager), Arc::clone(&self.bus));
        self.handle = Some(tokio::spawn(supervise(
            schedulers,
            Arc::clone(&self.state_manager),
            self.refresh_interval,
            self.cancel.clone(),
        )));
        Ok(())
    }

    /// Stop all schedulers and wait for them to exit
    pub async fn stop(&mut self) -> Result<(), SchedulerError> {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|e| SchedulerError::Join(e.to_string()))?;
        }
        info!("schedulerd stopped");
        Ok(())
    }
}

#[instrument(skip_all)]
async fn supervise(
    mut schedulers: Schedulers,
    state_manager: Arc<StateManager>,
    refresh_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(refresh_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // the first tick completes immediately; state was loaded by start()
    ticker.tick().await;
    schedulers.reconcile().await;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = ticker.tick() => {
                if let Err(e) = state_manager.refresh().await {
                    warn!("failed to refresh state, keeping previous snapshot: {e}");
                }
                schedulers.reconcile().await;
                debug!("{} schedulers running", schedulers.len());
            }
        }
    }

    schedulers.stop_all().await;
}
