//! Message heads: start line plus headers.
//!
//! Only the HTTP/1.1 subset needed for one POST per call is understood:
//!
//! ```text
//! POST /<token>/<method> HTTP/1.1\r\n
//! Content-Type: application/x-msgpack\r\n
//! Content-Length: 42\r\n
//! \r\n
//! <body>
//! ```
//!
//! Lines may end with CRLF or a bare LF. Header names are matched
//! case-insensitively.

use bytes::{BufMut, Bytes, BytesMut};

use super::Status;
use crate::error::{CatwireError, Result};

/// Protocol version written on every start line.
pub const HTTP_VERSION: &str = "HTTP/1.1";

/// Header list preserving order and original casing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty header list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name`, case-insensitive.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Iterate over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of headers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when there are no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parsed `Content-Length`, if present.
    pub fn content_length(&self) -> Result<Option<usize>> {
        match self.get("Content-Length") {
            None => Ok(None),
            Some(v) => v.trim().parse::<usize>().map(Some).map_err(|_| {
                CatwireError::MalformedRequest(format!("Invalid Content-Length: {}", v))
            }),
        }
    }

    /// True when `Transfer-Encoding` ends in `chunked`.
    pub fn is_chunked(&self) -> bool {
        self.get("Transfer-Encoding")
            .and_then(|v| v.rsplit(',').next())
            .map(|v| v.trim().eq_ignore_ascii_case("chunked"))
            .unwrap_or(false)
    }

    /// True when `Connection` lists `keep-alive`.
    pub fn wants_keep_alive(&self) -> bool {
        self.get("Connection")
            .map(|v| {
                v.split(',')
                    .any(|t| t.trim().eq_ignore_ascii_case("keep-alive"))
            })
            .unwrap_or(false)
    }

    fn parse_line(line: &str) -> Result<(String, String)> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| CatwireError::MalformedRequest(format!("Bad header line: {:?}", line)))?;

        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(CatwireError::MalformedRequest(format!(
                "Bad header name: {:?}",
                name
            )));
        }

        Ok((name.to_string(), value.trim().to_string()))
    }
}

/// A parsed message head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Head {
    /// The start line, without its line ending.
    pub start_line: String,
    /// Headers in arrival order.
    pub headers: Headers,
}

/// `METHOD target HTTP/1.x`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine<'a> {
    /// Request method, e.g. `POST`.
    pub method: &'a str,
    /// Request target, e.g. `/token/purr`.
    pub target: &'a str,
}

impl Head {
    /// Parse a head from its raw bytes (without the blank line).
    pub fn parse(raw: &[u8]) -> Result<Head> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| CatwireError::MalformedRequest("Head is not valid UTF-8".to_string()))?;

        let mut lines = text
            .split('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
            .skip_while(|l| l.is_empty());

        let start_line = lines
            .next()
            .ok_or_else(|| CatwireError::MalformedRequest("Empty head".to_string()))?
            .to_string();

        let mut headers = Headers::new();
        for line in lines {
            let (name, value) = Headers::parse_line(line)?;
            headers.insert(name, value);
        }

        Ok(Head {
            start_line,
            headers,
        })
    }

    /// Interpret the start line as a request line.
    pub fn request_line(&self) -> Result<RequestLine<'_>> {
        let mut parts = self.start_line.split_whitespace();
        let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(t), Some(v)) => (m, t, v),
            _ => {
                return Err(CatwireError::MalformedRequest(format!(
                    "Bad request line: {:?}",
                    self.start_line
                )))
            }
        };

        if parts.next().is_some() || !version.starts_with("HTTP/1.") || !target.starts_with('/') {
            return Err(CatwireError::MalformedRequest(format!(
                "Bad request line: {:?}",
                self.start_line
            )));
        }

        Ok(RequestLine { method, target })
    }

    /// Interpret the start line as a status line and return its code.
    pub fn status_code(&self) -> Result<u16> {
        let mut parts = self.start_line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(version), Some(code)) if version.starts_with("HTTP/1.") => code
                .parse::<u16>()
                .map_err(|_| CatwireError::Protocol(format!("Bad status code: {:?}", code))),
            _ => Err(CatwireError::Protocol(format!(
                "Bad status line: {:?}",
                self.start_line
            ))),
        }
    }
}

/// How a response body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `Content-Length: n`.
    Length(usize),
    /// `Transfer-Encoding: chunked`.
    Chunked,
}

/// Encode a response head, including the blank line.
pub fn encode_response_head(
    status: Status,
    content_type: &str,
    framing: Framing,
    keep_alive: bool,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(128);
    put_line(
        &mut buf,
        &format!("{} {} {}", HTTP_VERSION, status.code(), status.reason()),
    );
    put_line(&mut buf, &format!("Content-Type: {}", content_type));
    match framing {
        Framing::Length(n) => put_line(&mut buf, &format!("Content-Length: {}", n)),
        Framing::Chunked => put_line(&mut buf, "Transfer-Encoding: chunked"),
    }
    put_connection(&mut buf, keep_alive);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Encode a POST request head, including the blank line.
pub fn encode_request_head(
    target: &str,
    content_type: &str,
    content_length: usize,
    keep_alive: bool,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(128);
    put_line(&mut buf, &format!("POST {} {}", target, HTTP_VERSION));
    put_line(&mut buf, "Host: catwire");
    put_line(&mut buf, &format!("Content-Type: {}", content_type));
    put_line(&mut buf, &format!("Accept: {}", content_type));
    put_line(&mut buf, &format!("Content-Length: {}", content_length));
    put_connection(&mut buf, keep_alive);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

fn put_connection(buf: &mut BytesMut, keep_alive: bool) {
    if keep_alive {
        put_line(buf, "Connection: keep-alive");
    } else {
        put_line(buf, "Connection: close");
    }
}

fn put_line(buf: &mut BytesMut, line: &str) {
    buf.put_slice(line.as_bytes());
    buf.put_slice(b"\r\n");
}
