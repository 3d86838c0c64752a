//! Connection state machine.
//!
//! Two states, `disconnected` (initial) and `connected`. Every transition
//! notifies the observer once with a reason; re-affirming the current state
//! is silent.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

/// Reason reported when a port is attached.
pub const REASON_PORT_ATTACHED: &str = "port attached";
/// Reason reported when the active port closes.
pub const REASON_PORT_CLOSED: &str = "port disconnected";
/// Reason reported when a heartbeat arrives.
pub const REASON_HEARTBEAT_RECEIVED: &str = "heartbeat received";
/// Reason reported when no heartbeat arrives in time.
pub const REASON_HEARTBEAT_FAILURE: &str = "heartbeat failure";
/// Reason reported when a transmission fails.
pub const REASON_SEND_FAILED: &str = "send failed";

/// Liveness of the link to the peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No usable peer.
    #[default]
    Disconnected,
    /// Peer reachable.
    Connected,
}

impl ConnectionState {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observer invoked on every transition.
pub type StateObserver = Arc<dyn Fn(ConnectionState, &str) + Send + Sync>;

/// Tracks the current state and fans out transitions.
pub struct StateMachine {
    state: ConnectionState,
    observer: Option<StateObserver>,
    watch: watch::Sender<ConnectionState>,
}

impl StateMachine {
    /// Start in `disconnected`.
    pub fn new(observer: Option<StateObserver>) -> Self {
        let (watch, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state: ConnectionState::Disconnected,
            observer,
            watch,
        }
    }

    /// Current state.
    #[inline]
    pub fn current(&self) -> ConnectionState {
        self.state
    }

    /// Whether the peer is considered reachable.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.watch.subscribe()
    }

    /// Move to `next`, notifying only when the state actually changes.
    ///
    /// Returns `true` on a real transition.
    pub fn transition(&mut self, next: ConnectionState, reason: &str) -> bool {
        if self.state == next {
            return false;
        }

        tracing::info!("Connection {} -> {}: {}", self.state, next, reason);
        self.state = next;
        self.watch.send_replace(next);

        if let Some(observer) = &self.observer {
            let observer = observer.clone();
            let reason = reason.to_string();
            let outcome =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| observer(next, &reason)));
            if outcome.is_err() {
                tracing::error!("State observer panicked on transition to {}", next);
            }
        }
        true
    }
}
