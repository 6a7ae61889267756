//! CheckScheduler - one long-running task per check identity
//!
//! ## Lifecycle
//!
//! ```text
//! Created ──start()──► Running ──stop()──► Stopping ──► Stopped
//!                         │                               ▲
//!                         └── check gone from state ──────┘
//! ```
//!
//! ## Loop
//!
//! ```text
//! timer.tick() → read snapshot → check present? ─no─► exit
//!                                      │yes
//!                                      ▼
//!                  set_interval → timer.next() → executor.execute()
//! ```
//!
//! The timer is rearmed before the request is published, so a slow publish
//! does not shift the cadence. A stop request also interrupts a publish that
//! is waiting on a full subscriber queue.

use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::executor::CheckExecutor;
use super::state::StateManager;
use super::timer::CheckTimer;
use crate::bus::MessageBus;
use crate::store::StoreError;
use crate::types::CheckKey;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("{0} was already started")]
    AlreadyStarted(String),

    #[error("scheduler task failed: {0}")]
    Join(String),

    #[error("failed to load scheduler state: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// Schedules a single check
pub struct CheckScheduler {
    key: CheckKey,
    state_manager: Arc<StateManager>,
    bus: Arc<dyn MessageBus>,
    status: Arc<Mutex<SchedulerState>>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl CheckScheduler {
    pub fn new(key: CheckKey, state_manager: Arc<StateManager>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            key,
            state_manager,
            bus,
            status: Arc::new(Mutex::new(SchedulerState::Created)),
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    pub fn key(&self) -> &CheckKey {
        &self.key
    }

    pub fn state(&self) -> SchedulerState {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True once the loop has exited, whether stopped or self-terminated
    pub fn is_finished(&self) -> bool {
        self.state() == SchedulerState::Stopped
            || self.handle.as_ref().is_some_and(JoinHandle::is_finished)
    }

    /// Spawn the scheduling loop, first firing within `initial_interval` seconds
    pub fn start(&mut self, initial_interval: u32) -> Result<(), SchedulerError> {
        {
            let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            if *status != SchedulerState::Created {
                return Err(SchedulerError::AlreadyStarted(self.key.to_string()));
            }
            *status = SchedulerState::Running;
        }

        info!(check = %self.key, "starting new scheduler");

        let run_loop = RunLoop {
            key: self.key.clone(),
            state_manager: Arc::clone(&self.state_manager),
            timer: CheckTimer::new(&self.key.name, initial_interval),
            executor: CheckExecutor::new(Arc::clone(&self.bus), self.state_manager.state()),
            cancel: self.cancel.clone(),
            status: Arc::clone(&self.status),
        };
        self.handle = Some(tokio::spawn(run_loop.run()));

        Ok(())
    }

    /// Stop the loop and wait for it to exit
    ///
    /// A publish still in flight is abandoned. Stopping an already stopped
    /// scheduler is a no-op.
    pub async fn stop(&mut self) -> Result<(), SchedulerError> {
        {
            let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            match *status {
                SchedulerState::Created => {
                    *status = SchedulerState::Stopped;
                    return Ok(());
                }
                SchedulerState::Running => *status = SchedulerState::Stopping,
                SchedulerState::Stopping | SchedulerState::Stopped => {}
            }
        }

        self.cancel.cancel();

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|e| SchedulerError::Join(e.to_string()))?;
        }

        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = SchedulerState::Stopped;
        debug!(check = %self.key, "scheduler stopped");
        Ok(())
    }
}

struct RunLoop {
    key: CheckKey,
    state_manager: Arc<StateManager>,
    timer: CheckTimer,
    executor: CheckExecutor,
    cancel: CancellationToken,
    status: Arc<Mutex<SchedulerState>>,
}

impl RunLoop {
    #[instrument(skip_all, fields(check = %self.key))]
    async fn run(mut self) {
        self.timer.start();

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("stop requested");
                    break;
                }

                _ = self.timer.tick() => {
                    if !self.on_tick().await {
                        break;
                    }
                }
            }
        }

        self.timer.stop();
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = SchedulerState::Stopped;
    }

    /// Returns false when the loop should exit
    async fn on_tick(&mut self) -> bool {
        let state = self.state_manager.state();
        let Some(check) = state.get_check(
            &self.key.name,
            &self.key.organization,
            &self.key.environment,
        ) else {
            info!("check is no longer in state, stopping scheduler");
            return false;
        };

        if check.interval == 0 {
            warn!("ignoring zero interval, keeping {:?}", self.timer.interval());
        } else {
            self.timer.set_interval(check.interval);
        }
        self.timer.next();

        self.executor.set_state(Arc::clone(&state));
        tokio::select! {
            biased;

            _ = self.cancel.cancelled() => {
                debug!("stop requested while publishing");
                return false;
            }

            result = self.executor.execute(check) => {
                if let Err(e) = result {
                    error!("error executing check: {e}");
                }
            }
        }

        true
    }
}
