//! MsgPack codec using `rmp-serde`.
//!
//! Always `to_vec_named`: structs go on the wire as maps keyed by field name,
//! which keeps envelopes and payloads readable by peers whose structs carry
//! extra or reordered fields.

use crate::error::Result;

/// MessagePack codec for envelopes and payloads.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns `MsgPackDecode` if the bytes do not describe a `T`.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
