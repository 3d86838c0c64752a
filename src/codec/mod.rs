//! Codec module - payload serialization chosen once per engine.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (struct-as-map)
//! - [`JsonCodec`] - JSON using `serde_json`
//! - [`PayloadCodec`] - runtime selector handed to the engine at construction
//!
//! # Design
//!
//! The individual codecs are marker structs with static methods. The engine
//! stores a [`PayloadCodec`] and treats every encoded payload as opaque bytes;
//! only handlers decode, into whatever type they ask for.
//!
//! # Example
//!
//! ```
//! use portlink::codec::PayloadCodec;
//!
//! let codec = PayloadCodec::Json;
//! let bytes = codec.encode(&vec![1, 2, 3]).unwrap();
//! assert_eq!(&bytes[..], b"[1,2,3]");
//! let back: Vec<i32> = codec.decode(&bytes).unwrap();
//! assert_eq!(back, vec![1, 2, 3]);
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Payload codec selected at engine construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadCodec {
    /// MessagePack maps, compact and binary-safe.
    #[default]
    MsgPack,
    /// JSON text, readable on the wire.
    Json,
}

impl PayloadCodec {
    /// Encode a value into opaque payload bytes.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes> {
        let bytes = match self {
            PayloadCodec::MsgPack => MsgPackCodec::encode(value)?,
            PayloadCodec::Json => JsonCodec::encode(value)?,
        };
        Ok(Bytes::from(bytes))
    }

    /// Decode payload bytes into a value.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            PayloadCodec::MsgPack => MsgPackCodec::decode(bytes),
            PayloadCodec::Json => JsonCodec::decode(bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Ping {
        n: u32,
    }

    #[test]
    fn test_default_is_msgpack() {
        assert_eq!(PayloadCodec::default(), PayloadCodec::MsgPack);
    }

    #[test]
    fn test_codecs_are_not_interchangeable() {
        let bytes = PayloadCodec::MsgPack.encode(&Ping { n: 1 }).unwrap();
        let result: Result<Ping> = PayloadCodec::Json.decode(&bytes);
        assert!(result.is_err());
    }

    #[test]
    fn test_json_payload_is_text() {
        let bytes = PayloadCodec::Json.encode(&Ping { n: 1 }).unwrap();
        assert_eq!(&bytes[..], br#"{"n":1}"#);
    }

    #[test]
    fn test_codec_selector_from_config_text() {
        let codec: PayloadCodec = serde_json::from_str(r#""json""#).unwrap();
        assert_eq!(codec, PayloadCodec::Json);
    }
}
