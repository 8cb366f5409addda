//! Error types for catwire.

use thiserror::Error;

use crate::protocol::Status;

/// Main error type for all catwire operations.
#[derive(Debug, Error)]
pub enum CatwireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// JSON (or other) serialization error on an outgoing payload.
    #[error("Encode error: {0}")]
    Encode(String),

    /// Bad start line, headers or body framing. No dispatch happens.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// A well-framed body that the codec could not decode.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Private method called without a valid token.
    #[error("Access denied: {0}")]
    Unauthorized(String),

    /// Method name not present in the registry.
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// Arity, unknown keyword or missing parameter mismatch.
    #[error("Invalid arguments: {0}")]
    ArgumentBinding(String),

    /// The method body failed.
    #[error("Handler failed: {0}")]
    Handler(String),

    /// Descriptors can only travel over unix sockets.
    #[error("Descriptor passing unavailable: {0}")]
    DescriptorPassing(String),

    /// Malformed response from the remote worker.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The remote worker answered with an error status.
    #[error("HTTP {}: {message}", status.code())]
    Remote {
        /// Status classification of the reply.
        status: Status,
        /// Error description sent by the worker.
        message: String,
    },

    /// Connection closed before a complete message arrived.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Streamed response ended without its terminating chunk.
    #[error("Stream truncated after {received} items")]
    StreamTruncated {
        /// Items successfully received before the connection dropped.
        received: usize,
    },
}

impl CatwireError {
    /// Status classification used when this error is reported to a caller.
    pub fn status(&self) -> Status {
        match self {
            CatwireError::MalformedRequest(_)
            | CatwireError::Decode(_)
            | CatwireError::ArgumentBinding(_) => Status::BadRequest,
            CatwireError::Unauthorized(_) => Status::Forbidden,
            CatwireError::UnknownMethod(_) => Status::NotFound,
            CatwireError::Remote { status, .. } => *status,
            _ => Status::InternalError,
        }
    }

    /// Short stable name for error bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CatwireError::Io(_) | CatwireError::ConnectionClosed => "transport",
            CatwireError::MsgPackEncode(_) | CatwireError::Encode(_) => "encode",
            CatwireError::MalformedRequest(_) => "malformed_request",
            CatwireError::Decode(_) => "decode",
            CatwireError::Unauthorized(_) => "unauthorized",
            CatwireError::UnknownMethod(_) => "unknown_method",
            CatwireError::ArgumentBinding(_) => "argument_binding",
            CatwireError::Handler(_) => "handler",
            CatwireError::DescriptorPassing(_) => "descriptor_passing",
            CatwireError::Protocol(_) => "protocol",
            CatwireError::Remote { .. } => "remote",
            CatwireError::StreamTruncated { .. } => "stream_truncated",
        }
    }

    /// Build a handler fault from any displayable error.
    pub fn handler(err: impl std::fmt::Display) -> Self {
        CatwireError::Handler(err.to_string())
    }

    /// True for errors that leave the connection unusable.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            CatwireError::Io(_)
                | CatwireError::ConnectionClosed
                | CatwireError::StreamTruncated { .. }
        )
    }
}

/// Result type alias using CatwireError.
pub type Result<T> = std::result::Result<T, CatwireError>;
