//! Handler outputs and their rendering to response bodies.
//!
//! An [`Output`] is a MIME type plus either a structured value or raw bytes.
//! When the MIME type is [`Mime::Unspecified`] the rendering step chooses one
//! from the payload shape:
//!
//! | body            | MIME                  | rendered as                       |
//! |-----------------|-----------------------|-----------------------------------|
//! | value           | unspecified           | negotiated codec                  |
//! | value           | a codec's type        | that codec                        |
//! | string value    | other explicit type   | the string's bytes                |
//! | other value     | other explicit type   | negotiated codec                  |
//! | bytes           | unspecified           | `text/plain` if UTF-8, else octets|
//! | bytes           | explicit              | as-is                             |

use bytes::Bytes;

use crate::codec::{sniff_content_type, Codec, Value};
use crate::error::{CatwireError, Result};
use crate::transport::Descriptor;

/// MIME type of an output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Mime {
    /// Let the payload shape decide.
    #[default]
    Unspecified,
    /// A concrete type, e.g. `text/plain`.
    Explicit(String),
}

impl Mime {
    /// The explicit type, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Mime::Unspecified => None,
            Mime::Explicit(mime) => Some(mime),
        }
    }
}

/// Payload of an output.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Structured value, encoded by a codec.
    Value(Value),
    /// Raw bytes, sent untouched.
    Bytes(Bytes),
}

impl Default for Body {
    fn default() -> Self {
        Body::Value(Value::Null)
    }
}

/// One result of a method: MIME type, payload and optional descriptors.
#[derive(Debug, Default)]
pub struct Output {
    mime: Mime,
    body: Body,
    fds: Vec<Descriptor>,
}

/// An output rendered for the wire.
#[derive(Debug)]
pub struct Rendered {
    /// `Content-Type` to announce.
    pub content_type: String,
    /// Encoded body.
    pub body: Bytes,
    /// Descriptors to send with the body.
    pub fds: Vec<Descriptor>,
}

impl Output {
    /// A structured value with no explicit MIME type.
    pub fn value(value: impl Into<Value>) -> Self {
        Self::new(Mime::Unspecified, Body::Value(value.into()))
    }

    /// Text with an explicit `text/plain` type.
    pub fn text(text: impl Into<String>) -> Self {
        Self::raw("text/plain", Bytes::from(text.into()))
    }

    /// Raw bytes with no explicit MIME type.
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Self::new(Mime::Unspecified, Body::Bytes(data.into()))
    }

    /// Raw bytes with an explicit MIME type.
    pub fn raw(mime: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::new(Mime::Explicit(mime.into()), Body::Bytes(data.into()))
    }

    /// Any MIME and body combination.
    pub fn new(mime: Mime, body: Body) -> Self {
        Self {
            mime,
            body,
            fds: Vec::new(),
        }
    }

    /// Attach descriptors, sent alongside the body on unix sockets.
    pub fn with_fds(mut self, fds: impl IntoIterator<Item = Descriptor>) -> Self {
        self.fds.extend(fds);
        self
    }

    /// Take the attached descriptors.
    pub fn take_fds(&mut self) -> Vec<Descriptor> {
        std::mem::take(&mut self.fds)
    }

    /// The MIME type.
    pub fn mime(&self) -> &Mime {
        &self.mime
    }

    /// The payload.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// The payload as a structured value, if it is one.
    pub fn as_value(&self) -> Option<&Value> {
        match &self.body {
            Body::Value(value) => Some(value),
            Body::Bytes(_) => None,
        }
    }

    /// The payload as raw bytes, if it is raw.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match &self.body {
            Body::Bytes(data) => Some(data),
            Body::Value(_) => None,
        }
    }

    /// The payload as text: a string value or UTF-8 bytes.
    pub fn as_text(&self) -> Option<&str> {
        match &self.body {
            Body::Value(Value::String(text)) => Some(text),
            Body::Bytes(data) => std::str::from_utf8(data).ok(),
            _ => None,
        }
    }

    /// Take the payload as a structured value. Raw bytes become a string
    /// when UTF-8, else a list of byte values.
    pub fn into_value(self) -> Value {
        match self.body {
            Body::Value(value) => value,
            Body::Bytes(data) => match std::str::from_utf8(&data) {
                Ok(text) => Value::String(text.to_string()),
                Err(_) => Value::Array(data.iter().map(|b| Value::from(*b)).collect()),
            },
        }
    }

    /// Convert the payload into `T`.
    pub fn decode<T: serde::de::DeserializeOwned>(self) -> Result<T> {
        serde_json::from_value(self.into_value())
            .map_err(|e| CatwireError::Decode(e.to_string()))
    }

    /// Encode for the wire given the request's negotiated codec.
    pub fn render(self, negotiated: Codec) -> Result<Rendered> {
        let Output { mime, body, fds } = self;

        let (content_type, body) = match (mime, body) {
            (Mime::Explicit(mime), Body::Bytes(data)) => (mime, data),
            (Mime::Unspecified, Body::Bytes(data)) => {
                (sniff_content_type(&data).to_string(), data)
            }
            (Mime::Unspecified, Body::Value(value)) => (
                negotiated.content_type().to_string(),
                negotiated.encode(&value)?,
            ),
            (Mime::Explicit(mime), Body::Value(value)) => match Codec::from_content_type(&mime) {
                Some(codec) => (mime, codec.encode(&value)?),
                None => match value {
                    Value::String(text) => (mime, Bytes::from(text)),
                    other => (
                        negotiated.content_type().to_string(),
                        negotiated.encode(&other)?,
                    ),
                },
            },
        };

        Ok(Rendered {
            content_type,
            body,
            fds,
        })
    }

    /// Encode a later stream item under the `Content-Type` fixed by the
    /// first one.
    ///
    /// Values follow the stream's codec; text joins a codec stream as a
    /// string value. Anything else must render to the stream's type, or the
    /// item is refused.
    pub fn render_for_stream(self, negotiated: Codec, stream_type: &str) -> Result<Rendered> {
        let Output { mime, body, fds } = self;
        let stream_codec = Codec::from_content_type(stream_type);

        let output = match (stream_codec, mime, body) {
            (Some(codec), _, Body::Value(value)) => Output::new(
                Mime::Explicit(codec.content_type().to_string()),
                Body::Value(value),
            ),
            (Some(codec), mime, Body::Bytes(data)) if is_text(&mime, &data) => Output::new(
                Mime::Explicit(codec.content_type().to_string()),
                Body::Value(Value::String(String::from_utf8_lossy(&data).into_owned())),
            ),
            (None, _, Body::Value(Value::String(text))) => {
                Output::raw(stream_type, Bytes::from(text))
            }
            (_, mime, body) => Output::new(mime, body),
        };

        let rendered = output.render(negotiated)?;
        if !same_mime(&rendered.content_type, stream_type) {
            return Err(CatwireError::Handler(format!(
                "Stream item of type {} does not fit a {} stream",
                rendered.content_type, stream_type
            )));
        }

        Ok(Rendered { fds, ..rendered })
    }

    /// Rebuild an output from a received body.
    ///
    /// Codec types are decoded to values; anything else stays raw.
    pub fn from_wire(content_type: Option<&str>, body: Bytes) -> Result<Self> {
        let Some(content_type) = content_type else {
            return Ok(Output::bytes(body));
        };

        match Codec::from_content_type(content_type) {
            Some(codec) => {
                let value: Value = codec.decode(&body)?;
                Ok(Output::new(
                    Mime::Explicit(content_type.to_string()),
                    Body::Value(value),
                ))
            }
            None => Ok(Output::raw(content_type, body)),
        }
    }
}

/// UTF-8 bytes typed as text, or not typed at all.
fn is_text(mime: &Mime, data: &[u8]) -> bool {
    let texty = match mime.as_str() {
        None => true,
        Some(mime) => essence(mime).starts_with("text/"),
    };
    texty && std::str::from_utf8(data).is_ok()
}

/// Compare MIME types ignoring parameters and case.
fn same_mime(a: &str, b: &str) -> bool {
    essence(a).eq_ignore_ascii_case(essence(b))
}

fn essence(mime: &str) -> &str {
    mime.split(';').next().unwrap_or_default().trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{JSON_CONTENT_TYPE, MSGPACK_CONTENT_TYPE, OCTET_STREAM_CONTENT_TYPE};
    use serde_json::json;

    #[test]
    fn test_explicit_text() {
        let rendered = Output::text("Meow world, meow!\n").render(Codec::Json).unwrap();

        assert_eq!(rendered.content_type, "text/plain");
        assert_eq!(&rendered.body[..], b"Meow world, meow!\n");
    }

    #[test]
    fn test_unspecified_value_uses_negotiated_codec() {
        let output = Output::value(json!({"purr": "purr"}));
        let rendered = output.render(Codec::MsgPack).unwrap();

        assert_eq!(rendered.content_type, MSGPACK_CONTENT_TYPE);
        let back: Value = Codec::MsgPack.decode(&rendered.body).unwrap();
        assert_eq!(back, json!({"purr": "purr"}));
    }

    #[test]
    fn test_unspecified_bytes_sniffed() {
        let text = Output::bytes("Pong\n").render(Codec::Json).unwrap();
        assert!(text.content_type.starts_with("text/plain"));

        let binary = Output::bytes(vec![0xffu8, 0x00]).render(Codec::Json).unwrap();
        assert_eq!(binary.content_type, OCTET_STREAM_CONTENT_TYPE);
    }

    #[test]
    fn test_explicit_codec_mime_overrides_negotiation() {
        let output = Output::new(
            Mime::Explicit(JSON_CONTENT_TYPE.to_string()),
            Body::Value(json!([1, 2])),
        );
        let rendered = output.render(Codec::MsgPack).unwrap();

        assert_eq!(rendered.content_type, JSON_CONTENT_TYPE);
        assert_eq!(&rendered.body[..], b"[1,2]\n");
    }

    #[test]
    fn test_explicit_other_mime_with_string_value() {
        let output = Output::new(
            Mime::Explicit("text/html".to_string()),
            Body::Value(json!("<b>meow</b>")),
        );
        let rendered = output.render(Codec::Json).unwrap();

        assert_eq!(rendered.content_type, "text/html");
        assert_eq!(&rendered.body[..], b"<b>meow</b>");
    }

    #[test]
    fn test_explicit_other_mime_with_structured_value() {
        let output = Output::new(
            Mime::Explicit("text/html".to_string()),
            Body::Value(json!({"a": 1})),
        );
        let rendered = output.render(Codec::Json).unwrap();
        assert_eq!(rendered.content_type, JSON_CONTENT_TYPE);
    }

    #[test]
    fn test_from_wire() {
        let packed = Codec::MsgPack.encode(&json!({"pong": true})).unwrap();
        let output = Output::from_wire(Some(MSGPACK_CONTENT_TYPE), packed).unwrap();
        assert_eq!(output.as_value(), Some(&json!({"pong": true})));

        let text = Output::from_wire(Some("text/plain"), Bytes::from_static(b"Pong\n")).unwrap();
        assert_eq!(text.as_text(), Some("Pong\n"));
        assert_eq!(text.mime().as_str(), Some("text/plain"));
    }

    #[test]
    fn test_from_wire_codec_mismatch_fails() {
        let packed = Codec::MsgPack.encode(&json!({"pong": true})).unwrap();
        let result = Output::from_wire(Some(JSON_CONTENT_TYPE), packed);
        assert!(matches!(result, Err(crate::error::CatwireError::Decode(_))));
    }

    #[test]
    fn test_into_value_and_decode() {
        assert_eq!(Output::text("hi").into_value(), json!("hi"));

        let count: u32 = Output::value(3).decode().unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_stream_items_follow_codec_stream() {
        let rendered = Output::text("second")
            .render_for_stream(Codec::MsgPack, MSGPACK_CONTENT_TYPE)
            .unwrap();
        assert_eq!(rendered.content_type, MSGPACK_CONTENT_TYPE);
        let back: Value = Codec::MsgPack.decode(&rendered.body).unwrap();
        assert_eq!(back, json!("second"));

        let json_value = Output::new(
            Mime::Explicit(JSON_CONTENT_TYPE.to_string()),
            Body::Value(json!({"x": 1})),
        );
        let rendered = json_value
            .render_for_stream(Codec::Json, MSGPACK_CONTENT_TYPE)
            .unwrap();
        let back: Value = Codec::MsgPack.decode(&rendered.body).unwrap();
        assert_eq!(back, json!({"x": 1}));
    }

    #[test]
    fn test_stream_items_follow_text_stream() {
        let rendered = Output::bytes("purr")
            .render_for_stream(Codec::MsgPack, "text/plain")
            .unwrap();
        assert_eq!(&rendered.body[..], b"purr");

        let rendered = Output::value("purr")
            .render_for_stream(Codec::MsgPack, "text/plain")
            .unwrap();
        assert_eq!(rendered.content_type, "text/plain");
        assert_eq!(&rendered.body[..], b"purr");
    }

    #[test]
    fn test_stream_item_of_another_type_is_refused() {
        let result =
            Output::value(json!({"x": 1})).render_for_stream(Codec::MsgPack, "text/plain");
        assert!(matches!(result, Err(CatwireError::Handler(_))));

        let result = Output::bytes(vec![0xffu8, 0x00])
            .render_for_stream(Codec::MsgPack, MSGPACK_CONTENT_TYPE);
        assert!(matches!(result, Err(CatwireError::Handler(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_descriptors_travel_with_rendering() {
        let file = tempfile::tempfile().unwrap();
        let output = Output::text("file").with_fds([Descriptor::from(file)]);

        let rendered = output.render(Codec::Json).unwrap();
        assert_eq!(rendered.fds.len(), 1);
    }
}
