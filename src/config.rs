//! Engine configuration.
//!
//! All fields have defaults, so a host application can embed a partial
//! `CommsConfig` in its own JSON config:
//!
//! ```
//! use portlink::CommsConfig;
//!
//! let config: CommsConfig = serde_json::from_str(r#"{ "heartbeat_timeout_ms": 3000 }"#).unwrap();
//! assert_eq!(config.heartbeat_interval_ms, 1000);
//! assert_eq!(config.heartbeat_timeout_ms, 3000);
//! assert_eq!(config.unclaimed_capacity, 1000);
//! assert!(config.reply_timeout_ms.is_none());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::PayloadCodec;
use crate::error::{CommsError, Result};
use crate::heartbeat::{DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_HEARTBEAT_TIMEOUT};
use crate::queue::DEFAULT_UNCLAIMED_CAPACITY;

/// Tunables for one engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommsConfig {
    /// Period between outgoing heartbeats.
    pub heartbeat_interval_ms: u64,
    /// Time allowed for the peer's heartbeat before `heartbeat failure`.
    pub heartbeat_timeout_ms: u64,
    /// Bound of the unclaimed inbound queue.
    pub unclaimed_capacity: usize,
    /// Evict unanswered reply callbacks after this long. `None` keeps them.
    pub reply_timeout_ms: Option<u64>,
    /// Payload codec.
    pub codec: PayloadCodec,
}

impl Default for CommsConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL.as_millis() as u64,
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT.as_millis() as u64,
            unclaimed_capacity: DEFAULT_UNCLAIMED_CAPACITY,
            reply_timeout_ms: None,
            codec: PayloadCodec::default(),
        }
    }
}

impl CommsConfig {
    /// Heartbeat period as a `Duration`.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Heartbeat timeout as a `Duration`.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Reply TTL as a `Duration`.
    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout_ms.map(Duration::from_millis)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(CommsError::Config(
                "heartbeat interval must be greater than zero".into(),
            ));
        }
        if self.heartbeat_timeout_ms == 0 {
            return Err(CommsError::Config(
                "heartbeat timeout must be greater than zero".into(),
            ));
        }
        if self.unclaimed_capacity == 0 {
            return Err(CommsError::Config(
                "unclaimed capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
