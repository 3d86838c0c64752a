//! JSON codec using `serde_json`.

use crate::error::Result;

/// JSON codec for structured data.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to JSON bytes.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Decode JSON bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_decode_object() {
        let decoded: HashMap<String, i32> = JsonCodec::decode(br#"{"n":1}"#).unwrap();
        assert_eq!(decoded.get("n"), Some(&1));
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<HashMap<String, i32>> = JsonCodec::decode(b"{not json");
        assert!(matches!(result, Err(crate::CommsError::Json(_))));
    }
}
