//! MsgPack codec using `rmp-serde`.
//!
//! Always encodes with `to_vec_named` so structs become maps (string keys),
//! matching the structured-value model shared with the JSON codec.
//!
//! Decoding rejects trailing bytes. Without that check, a JSON body such as
//! `{"a":1}` would decode as the positive fixint `0x7b` and silently yield
//! garbage instead of a decode error.

use std::io::Cursor;

use serde::Deserialize;

use crate::error::{CatwireError, Result};

/// MIME type of the binary format.
pub const MSGPACK_CONTENT_TYPE: &str = "application/x-msgpack";

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns [`CatwireError::Decode`] if the bytes are not exactly one
    /// MsgPack value of type `T`.
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        let mut cursor = Cursor::new(bytes);
        let value = {
            let mut de = rmp_serde::Deserializer::new(&mut cursor);
            T::deserialize(&mut de).map_err(|e| CatwireError::Decode(e.to_string()))?
        };

        let consumed = cursor.position() as usize;
        if consumed != bytes.len() {
            return Err(CatwireError::Decode(format!(
                "{} trailing bytes after MsgPack value",
                bytes.len() - consumed
            )));
        }

        Ok(value)
    }
}
