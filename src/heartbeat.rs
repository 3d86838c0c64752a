//! Heartbeat liveness monitor.
//!
//! Two cooperating timers owned by the engine:
//!
//! - a repeating heartbeat timer (default every 1000 ms) that tells the engine to
//!   send one internal heartbeat envelope, and
//! - a single failure deadline (default 1500 ms) armed by the first tick
//!   sent while no deadline is pending.
//!
//! A received heartbeat, or any state transition, cancels the deadline. If the
//! deadline fires first the engine reports `heartbeat failure`. At most one
//! deadline is ever pending. Both timers use `tokio::time`, so tests can run
//! them on a paused clock.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior, Sleep};

/// Default heartbeat period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1000);

/// Default time allowed for the peer's heartbeat to arrive.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(1500);

/// Timer event surfaced to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Time to send a heartbeat.
    Tick,
    /// The pending deadline elapsed without a heartbeat.
    Expired,
}

/// Heartbeat timer plus failure deadline.
pub struct HeartbeatMonitor {
    ticker: Interval,
    timeout: Duration,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl HeartbeatMonitor {
    /// Create a monitor; the first tick fires one `interval` from now.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            ticker,
            timeout,
            deadline: None,
        }
    }

    /// Arm the failure deadline unless one is already pending.
    ///
    /// Returns `true` if a new deadline was armed.
    pub fn arm(&mut self) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(Box::pin(tokio::time::sleep(self.timeout)));
        true
    }

    /// Cancel the pending deadline, if any.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Whether a deadline is pending.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Wait for the next heartbeat tick or deadline expiry.
    ///
    /// Cancel safe: dropping the future loses no state.
    pub async fn next(&mut self) -> HeartbeatEvent {
        let event = {
            let ticker = &mut self.ticker;
            let deadline = &mut self.deadline;
            let expiry = async move {
                match deadline.as_mut() {
                    Some(sleep) => sleep.as_mut().await,
                    None => pending::<()>().await,
                }
            };

            tokio::select! {
                _ = ticker.tick() => HeartbeatEvent::Tick,
                _ = expiry => HeartbeatEvent::Expired,
            }
        };

        if event == HeartbeatEvent::Expired {
            self.deadline = None;
        }
        event
    }
}
