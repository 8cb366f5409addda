//! JSON codec using `serde_json`.
//!
//! The human-readable format: usable from curl or a browser. Encoded
//! payloads end with a newline so terminal output stays tidy.

use crate::error::{CatwireError, Result};

/// MIME type of the text format.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// JSON codec for structured data.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to JSON bytes, newline terminated.
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        let mut out = serde_json::to_vec(value).map_err(|e| CatwireError::Encode(e.to_string()))?;
        out.push(b'\n');
        Ok(out)
    }

    /// Decode JSON bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns [`CatwireError::Decode`] on invalid UTF-8, invalid JSON or a
    /// type mismatch.
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| CatwireError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_encode_appends_newline() {
        let encoded = JsonCodec::encode(&json!({"pong": true})).unwrap();
        assert_eq!(encoded, b"{\"pong\":true}\n");
    }

    #[test]
    fn test_decode_tolerates_trailing_whitespace() {
        let decoded: Value = JsonCodec::decode(b"{\"count\": 3}\r\n").unwrap();
        assert_eq!(decoded["count"], 3);
    }

    #[test]
    fn test_msgpack_bytes_are_rejected() {
        let packed = crate::codec::MsgPackCodec::encode(&json!({"count": 3})).unwrap();
        let result: Result<Value> = JsonCodec::decode(&packed);
        assert!(matches!(result, Err(CatwireError::Decode(_))));
    }
}
