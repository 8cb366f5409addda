//! Codec module - serialization/deserialization for payloads.
//!
//! Two interchangeable formats carry the same structured values (scalars,
//! sequences and string-keyed maps):
//!
//! - [`MsgPackCodec`] - compact binary, `application/x-msgpack`
//! - [`JsonCodec`] - human-readable text, `application/json`
//!
//! [`Codec`] selects one of them from a request's `Content-Type` (or, when
//! that is absent, from `Accept`), and the response mirrors the choice.
//!
//! # Example
//!
//! ```
//! use catwire::codec::{Codec, Value};
//! use serde_json::json;
//!
//! let codec = Codec::from_content_type("application/x-msgpack").unwrap();
//! let bytes = codec.encode(&json!({"count": 3})).unwrap();
//! let value: Value = codec.decode(&bytes).unwrap();
//! assert_eq!(value["count"], 3);
//! ```

mod json;
mod msgpack;

use bytes::Bytes;

use crate::error::Result;

pub use json::{JsonCodec, JSON_CONTENT_TYPE};
pub use msgpack::{MsgPackCodec, MSGPACK_CONTENT_TYPE};

/// Structured payload value.
pub use serde_json::Value;

/// String-keyed mapping of values.
pub type Map = serde_json::Map<String, Value>;

/// MIME type for UTF-8 text payloads with no explicit type.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// MIME type for binary payloads with no explicit type.
pub const OCTET_STREAM_CONTENT_TYPE: &str = "application/octet-stream";

/// One of the two wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// MessagePack.
    MsgPack,
    /// JSON.
    #[default]
    Json,
}

impl Codec {
    /// The MIME type announced in `Content-Type`.
    pub fn content_type(self) -> &'static str {
        match self {
            Codec::MsgPack => MSGPACK_CONTENT_TYPE,
            Codec::Json => JSON_CONTENT_TYPE,
        }
    }

    /// Map a `Content-Type` value to a codec, ignoring parameters and case.
    pub fn from_content_type(content_type: &str) -> Option<Codec> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();

        if essence.eq_ignore_ascii_case(MSGPACK_CONTENT_TYPE) {
            Some(Codec::MsgPack)
        } else if essence.eq_ignore_ascii_case(JSON_CONTENT_TYPE) {
            Some(Codec::Json)
        } else {
            None
        }
    }

    /// Pick the codec for a request.
    ///
    /// A declared `Content-Type` naming a supported format wins. Otherwise
    /// MsgPack is used if `Accept` mentions it, else JSON. A body of an
    /// unsupported type is not read at all.
    pub fn negotiate(content_type: Option<&str>, accept: Option<&str>) -> Codec {
        if let Some(codec) = content_type.and_then(Codec::from_content_type) {
            return codec;
        }

        let wants_msgpack = accept
            .map(|a| {
                a.split(',')
                    .any(|item| Codec::from_content_type(item) == Some(Codec::MsgPack))
            })
            .unwrap_or(false);

        if wants_msgpack {
            Codec::MsgPack
        } else {
            Codec::Json
        }
    }

    /// Encode a value in this format.
    pub fn encode<T: serde::Serialize + ?Sized>(self, value: &T) -> Result<Bytes> {
        let data = match self {
            Codec::MsgPack => MsgPackCodec::encode(value)?,
            Codec::Json => JsonCodec::encode(value)?,
        };
        Ok(Bytes::from(data))
    }

    /// Decode a value in this format.
    pub fn decode<T: serde::de::DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        match self {
            Codec::MsgPack => MsgPackCodec::decode(bytes),
            Codec::Json => JsonCodec::decode(bytes),
        }
    }
}

/// MIME type for raw bytes given no explicit type: text if valid UTF-8.
pub fn sniff_content_type(data: &[u8]) -> &'static str {
    if std::str::from_utf8(data).is_ok() {
        TEXT_CONTENT_TYPE
    } else {
        OCTET_STREAM_CONTENT_TYPE
    }
}
