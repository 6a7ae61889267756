//! Per-check interval timer with deterministic splay
//!
//! Every check gets a stable 64-bit splay derived from its name. The first
//! fire is delayed so that, across restarts and across nodes, the same check
//! lands on the same phase of its interval while different checks spread out:
//!
//! ```text
//! offset = (splay - now_ns) mod interval_ns
//! ```
//!
//! The subtraction wraps in unsigned 64-bit arithmetic. After the first fire
//! the timer is rearmed with `next()`, one full interval from the moment of
//! rearming. Interval changes made with `set_interval()` take effect at the
//! next rearm, never mid-sleep. Intervals are at least one second.

use std::future;
use std::pin::Pin;
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::time::{Instant, Sleep, sleep_until};

/// Stable splay of a check name: the first 8 digest bytes, little-endian
pub fn splay(name: &str) -> u64 {
    let digest = Sha256::digest(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Delay before the first fire, always strictly less than `interval`
///
/// A zero interval yields a zero offset.
pub fn initial_offset(splay: u64, now_nanos: u64, interval: Duration) -> Duration {
    let interval_nanos = u64::try_from(interval.as_nanos()).unwrap_or(u64::MAX);
    if interval_nanos == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(splay.wrapping_sub(now_nanos) % interval_nanos)
}

/// Shortest interval a timer is armed with
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

fn interval_from_secs(secs: u32) -> Duration {
    Duration::from_secs(u64::from(secs)).max(MIN_INTERVAL)
}

fn now_nanos() -> u64 {
    Utc::now()
        .timestamp_nanos_opt()
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or_default()
}

pub struct CheckTimer {
    splay: u64,
    interval: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
    armed: bool,
}

impl CheckTimer {
    pub fn new(name: &str, interval_secs: u32) -> Self {
        Self {
            splay: splay(name),
            interval: interval_from_secs(interval_secs),
            sleep: None,
            armed: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Arm the timer for its first fire at the splayed offset
    pub fn start(&mut self) {
        let offset = initial_offset(self.splay, now_nanos(), self.interval);
        self.arm(Instant::now() + offset);
    }

    /// Rearm for one full interval from now
    pub fn next(&mut self) {
        self.arm(Instant::now() + self.interval);
    }

    /// Record a new interval; applied by the following `next()`
    pub fn set_interval(&mut self, interval_secs: u32) {
        self.interval = interval_from_secs(interval_secs);
    }

    /// Disarm the timer; pending `tick()` calls never complete
    pub fn stop(&mut self) {
        self.armed = false;
        self.sleep = None;
    }

    /// Wait for the timer to fire
    ///
    /// Resolves once per arming. Cancel-safe: dropping the future leaves the
    /// timer armed.
    pub async fn tick(&mut self) -> Instant {
        match self.sleep.as_mut() {
            Some(sleep) if self.armed => {
                sleep.as_mut().await;
                self.armed = false;
                sleep.deadline()
            }
            _ => future::pending().await,
        }
    }

    fn arm(&mut self, deadline: Instant) {
        match self.sleep.as_mut() {
            Some(sleep) => sleep.as_mut().reset(deadline),
            None => self.sleep = Some(Box::pin(sleep_until(deadline))),
        }
        self.armed = true;
    }
}

impl std::fmt::Debug for CheckTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckTimer")
            .field("splay", &self.splay)
            .field("interval", &self.interval)
            .field("armed", &self.armed)
            .finish()
    }
}
