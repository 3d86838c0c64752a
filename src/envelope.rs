//! Envelope - the unit exchanged over a port.
//!
//! An envelope wraps an opaque payload with routing and correlation metadata.
//! On the wire it is a MessagePack map with camelCase keys:
//!
//! | key          | type              | notes                                   |
//! |--------------|-------------------|-----------------------------------------|
//! | `internal`   | bool              | protocol control (heartbeats)           |
//! | `channel`    | string            | logical topic, `"internal"` for control |
//! | `version`    | string            | must match the receiver's version       |
//! | `queryId`    | uuid              | fresh for every outbound envelope       |
//! | `responseId` | uuid / nil        | `queryId` of the message replied to     |
//! | `sentAt`     | timestamp         | stamped by the sender                   |
//! | `receivedAt` | timestamp / nil   | stamped by the receiver only            |
//! | `payload`    | bin               | encoded by the payload codec            |
//!
//! # Example
//!
//! ```
//! use portlink::envelope::Envelope;
//! use bytes::Bytes;
//!
//! let env = Envelope::message("ping", "1.0.0", Bytes::from_static(b"{}"));
//! let wire = env.encode().unwrap();
//! let back = Envelope::decode(&wire).unwrap();
//! assert_eq!(back.query_id, env.query_id);
//! assert!(back.response_id.is_none());
//! ```

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::MsgPackCodec;
use crate::error::Result;

/// Channel name carried by internal control envelopes.
pub const INTERNAL_CHANNEL: &str = "internal";

/// Identifier correlating a query with its replies.
pub type QueryId = Uuid;

/// Message wrapper exchanged with the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Protocol-control message, invisible to channel subscribers.
    #[serde(default)]
    pub internal: bool,
    /// Logical topic.
    pub channel: String,
    /// Producer's version.
    pub version: String,
    /// Unique per outbound message.
    pub query_id: QueryId,
    /// Set on replies.
    #[serde(default)]
    pub response_id: Option<QueryId>,
    /// Sender clock at construction.
    pub sent_at: DateTime<Utc>,
    /// Receiver clock at arrival.
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
    /// Opaque encoded payload.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Build an application message with a fresh query ID.
    pub fn message(channel: impl Into<String>, version: impl Into<String>, payload: Bytes) -> Self {
        Self {
            internal: false,
            channel: channel.into(),
            version: version.into(),
            query_id: Uuid::new_v4(),
            response_id: None,
            sent_at: Utc::now(),
            received_at: None,
            payload: payload.to_vec(),
        }
    }

    /// Build an internal control message.
    pub fn control(version: impl Into<String>, payload: Bytes) -> Self {
        Self {
            internal: true,
            ..Self::message(INTERNAL_CHANNEL, version, payload)
        }
    }

    /// Mark this envelope as a reply to `query_id`.
    pub fn in_reply_to(mut self, query_id: QueryId) -> Self {
        self.response_id = Some(query_id);
        self
    }

    /// Whether this envelope answers an earlier query.
    #[inline]
    pub fn is_reply(&self) -> bool {
        self.response_id.is_some()
    }

    /// Payload as shared bytes.
    pub fn payload_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.payload)
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(MsgPackCodec::encode(self)?))
    }

    /// Parse from the wire.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        MsgPackCodec::decode(bytes)
    }
}

/// Payload of internal control envelopes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    /// Liveness check.
    #[serde(default)]
    pub heartbeat: bool,
}

impl Control {
    /// A heartbeat.
    pub fn heartbeat() -> Self {
        Self { heartbeat: true }
    }
}
