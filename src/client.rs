//! Remote invoker: calling a worker's methods.
//!
//! A [`RemoteInvoker`] knows where a worker listens and how to authenticate.
//! Every call opens a connection, sends one request and reads the reply:
//! - single methods resolve to one [`Output`]
//! - stream methods resolve to a [`RemoteStream`], read lazily chunk by chunk
//!
//! Once the catalogue is known (see [`RemoteInvoker::discover`]), arguments
//! are bound locally before anything is sent, with the worker's own rules.
//!
//! # Example
//!
//! ```no_run
//! use catwire::{Args, RemoteInvoker};
//!
//! # async fn demo() -> catwire::Result<()> {
//! let mut invoker = RemoteInvoker::from_url("http://127.0.0.1:4000/s3cret")?;
//! invoker.discover().await?;
//!
//! let meow = invoker.call_single("meow", Args::new()).await?;
//! assert_eq!(meow.as_text(), Some("Meow world, meow!\n"));
//!
//! let mut purrs = invoker.call_stream("purr", Args::new().kwarg("count", 3)).await?;
//! while let Some(purr) = purrs.next().await {
//!     println!("{}", purr?.into_value());
//! }
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use bytes::{Bytes, BytesMut};
use futures::Stream;

use crate::codec::{Codec, Value};
use crate::error::{CatwireError, Result};
use crate::handler::{Args, MethodDescriptor, Output};
use crate::protocol::{
    encode_request_head, ChunkDecoder, ChunkEvent, Message, MessageBuffer, Status,
};
use crate::transport::{Connection, Descriptor, Endpoint};
use crate::writer::OutboundFrame;

/// Reply to a call.
#[derive(Debug)]
pub enum Response {
    /// One output.
    Single(Output),
    /// A sequence of outputs, still on the wire.
    Stream(RemoteStream),
}

impl Response {
    /// True for streamed replies.
    pub fn is_stream(&self) -> bool {
        matches!(self, Response::Stream(_))
    }

    /// Every output of the reply, reading a stream to its end.
    pub async fn into_outputs(self) -> Result<Vec<Output>> {
        match self {
            Response::Single(output) => Ok(vec![output]),
            Response::Stream(stream) => stream.collect().await,
        }
    }
}

/// Client handle for one worker.
#[derive(Debug, Clone)]
pub struct RemoteInvoker {
    endpoint: Endpoint,
    token: Option<String>,
    prefix: String,
    codec: Codec,
    catalog: Option<Vec<MethodDescriptor>>,
}

impl RemoteInvoker {
    /// Invoker for a worker at `endpoint`, without a token.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            token: None,
            prefix: String::new(),
            codec: Codec::MsgPack,
            catalog: None,
        }
    }

    /// Invoker for a TCP worker.
    pub fn tcp(addr: SocketAddr) -> Self {
        Self::new(Endpoint::Tcp(addr))
    }

    /// Invoker for a unix socket worker.
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::new(Endpoint::Local(path.into()))
    }

    /// Parse a worker URL.
    ///
    /// Accepts `http://<ip:port>/[<prefix>/]<token>` as printed by
    /// [`Server::url`](crate::Server::url), or `unix:<path>`.
    pub fn from_url(url: &str) -> Result<Self> {
        if let Some(path) = url.strip_prefix("unix:") {
            return Ok(Self::local(path));
        }

        let rest = url
            .strip_prefix("http://")
            .ok_or_else(|| CatwireError::Protocol(format!("Unsupported URL: {}", url)))?;
        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));

        let addr: SocketAddr = authority.parse().map_err(|_| {
            CatwireError::Protocol(format!("URL host must be ip:port, got {:?}", authority))
        })?;

        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut invoker = Self::tcp(addr);
        if let Some(token) = segments.pop() {
            invoker.token = Some(token.to_string());
        }
        invoker.prefix = segments.join("/");

        Ok(invoker)
    }

    /// Authenticate with `token`.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Encode requests with `codec` (default MessagePack).
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Prefix every request path with `/<prefix>`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into().trim_matches('/').to_string();
        self
    }

    /// Use a known catalogue for local argument checks.
    pub fn with_catalog(mut self, catalog: Vec<MethodDescriptor>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Where calls go.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The request codec.
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// The catalogue, once known.
    pub fn catalog(&self) -> Option<&[MethodDescriptor]> {
        self.catalog.as_deref()
    }

    /// Fetch the worker's catalogue with `help` and keep it.
    pub async fn discover(&mut self) -> Result<&[MethodDescriptor]> {
        let catalog: Vec<MethodDescriptor> = self.call_single("help", Args::new()).await?.decode()?;
        tracing::debug!(endpoint = %self.endpoint, methods = catalog.len(), "Discovered methods");

        Ok(self.catalog.insert(catalog).as_slice())
    }

    /// A callable bound to one catalogued method.
    ///
    /// # Errors
    ///
    /// [`CatwireError::UnknownMethod`] if the catalogue is unknown or lacks
    /// `name`.
    pub fn method(&self, name: &str) -> Result<RemoteMethod<'_>> {
        let descriptor = self
            .catalog
            .as_deref()
            .and_then(|c| c.iter().find(|d| d.name == name))
            .ok_or_else(|| CatwireError::UnknownMethod(name.to_string()))?;

        Ok(RemoteMethod {
            invoker: self,
            descriptor,
        })
    }

    /// Call `method` and return its reply.
    pub async fn call(&self, method: &str, args: Args) -> Result<Response> {
        self.call_with_fds(method, args, Vec::new()).await
    }

    /// Call `method`, passing open descriptors alongside the request.
    ///
    /// Only unix socket endpoints can carry descriptors.
    pub async fn call_with_fds(
        &self,
        method: &str,
        args: Args,
        fds: Vec<Descriptor>,
    ) -> Result<Response> {
        self.check_locally(method, &args)?;

        let body = self.codec.encode(&args.into_body())?;
        let head = encode_request_head(
            &self.target(method),
            self.codec.content_type(),
            body.len(),
            false,
        );

        tracing::debug!(endpoint = %self.endpoint, method, "Calling");
        let mut conn = Connection::connect(&self.endpoint).await?;
        conn.send(&[OutboundFrame::message(head, body)], &fds).await?;
        drop(fds);

        let mut buffer = MessageBuffer::for_responses();
        let message = read_response(&mut conn, &mut buffer).await?;

        let status = Status::from_code(message.head.status_code()?);
        let content_type = message
            .head
            .headers
            .get("content-type")
            .map(str::to_string);

        if !status.is_success() {
            return Err(remote_error(status, content_type.as_deref(), &message.body));
        }

        if message.head.headers.is_chunked() {
            let buffered = buffer.take_remaining();
            return Ok(Response::Stream(RemoteStream::new(
                conn,
                buffered,
                content_type,
                self.codec,
            )));
        }

        let output = Output::from_wire(content_type.as_deref(), message.body)?;
        Ok(Response::Single(output.with_fds(conn.take_fds())))
    }

    /// Call a single-output method.
    pub async fn call_single(&self, method: &str, args: Args) -> Result<Output> {
        match self.call(method, args).await? {
            Response::Single(output) => Ok(output),
            Response::Stream(_) => Err(CatwireError::Protocol(format!(
                "{} replied with a stream",
                method
            ))),
        }
    }

    /// Call a streaming method.
    pub async fn call_stream(&self, method: &str, args: Args) -> Result<RemoteStream> {
        match self.call(method, args).await? {
            Response::Stream(stream) => Ok(stream),
            Response::Single(_) => Err(CatwireError::Protocol(format!(
                "{} replied with a single output",
                method
            ))),
        }
    }

    /// `/[prefix/]<token>/<method>`; the token slot stays empty without one.
    fn target(&self, method: &str) -> String {
        let mut target = String::from("/");
        if !self.prefix.is_empty() {
            target.push_str(&self.prefix);
            target.push('/');
        }
        target.push_str(self.token.as_deref().unwrap_or_default());
        target.push('/');
        target.push_str(method);
        target
    }

    fn check_locally(&self, method: &str, args: &Args) -> Result<()> {
        let Some(catalog) = &self.catalog else {
            return Ok(());
        };

        let descriptor = catalog
            .iter()
            .find(|d| d.name == method)
            .ok_or_else(|| CatwireError::UnknownMethod(method.to_string()))?;
        args.check(descriptor)
    }
}

/// A catalogued method of a [`RemoteInvoker`].
#[derive(Debug, Clone, Copy)]
pub struct RemoteMethod<'a> {
    invoker: &'a RemoteInvoker,
    descriptor: &'a MethodDescriptor,
}

impl<'a> RemoteMethod<'a> {
    /// The method's descriptor.
    pub fn descriptor(&self) -> &'a MethodDescriptor {
        self.descriptor
    }

    /// Call with `args`.
    pub async fn call(&self, args: Args) -> Result<Response> {
        self.invoker.call(&self.descriptor.name, args).await
    }

    /// Call and return the outputs, single or streamed.
    pub async fn call_all(&self, args: Args) -> Result<Vec<Output>> {
        self.call(args).await?.into_outputs().await
    }
}

/// A streamed reply, read one chunk per item.
///
/// Single pass and forward only. Ends cleanly only on the terminator; a
/// connection that closes first yields [`CatwireError::StreamTruncated`].
/// After any error the stream is exhausted.
pub struct RemoteStream {
    conn: Connection,
    buffer: BytesMut,
    decoder: ChunkDecoder,
    content_type: Option<String>,
    codec: Codec,
    received: usize,
    finished: bool,
}

impl std::fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStream")
            .field("content_type", &self.content_type)
            .field("received", &self.received)
            .field("finished", &self.finished)
            .finish()
    }
}

impl RemoteStream {
    fn new(conn: Connection, buffer: BytesMut, content_type: Option<String>, codec: Codec) -> Self {
        Self {
            conn,
            buffer,
            decoder: ChunkDecoder::new(),
            content_type,
            codec,
            received: 0,
            finished: false,
        }
    }

    /// The stream's `Content-Type`.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Items yielded so far.
    pub fn received(&self) -> usize {
        self.received
    }

    /// The next item, or `None` after the terminator or an error.
    pub async fn next(&mut self) -> Option<Result<Output>> {
        if self.finished {
            return None;
        }

        match self.next_item().await {
            Ok(Some(output)) => {
                self.received += 1;
                Some(Ok(output))
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }

    /// Read every remaining item.
    pub async fn collect(mut self) -> Result<Vec<Output>> {
        let mut outputs = Vec::new();
        while let Some(item) = self.next().await {
            outputs.push(item?);
        }
        Ok(outputs)
    }

    /// Adapt into a [`futures::Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<Output>> {
        futures::stream::unfold(self, |mut stream| async move {
            let item = stream.next().await?;
            Some((item, stream))
        })
    }

    async fn next_item(&mut self) -> Result<Option<Output>> {
        loop {
            match self.decoder.decode(&mut self.buffer)? {
                Some(ChunkEvent::End) => return Ok(None),
                Some(ChunkEvent::Chunk(chunk)) if chunk.is_error => {
                    return Err(remote_error(
                        Status::InternalError,
                        Some(self.codec.content_type()),
                        &chunk.data,
                    ))
                }
                Some(ChunkEvent::Chunk(chunk)) => {
                    let output = Output::from_wire(self.content_type.as_deref(), chunk.data)?;
                    return Ok(Some(output.with_fds(self.conn.take_fds())));
                }
                None => {}
            }

            let closed = match self.conn.read_into(&mut self.buffer).await {
                Ok(n) => n == 0,
                Err(err) => {
                    tracing::debug!(error = %err, "Stream read failed");
                    true
                }
            };
            if closed {
                return Err(CatwireError::StreamTruncated {
                    received: self.received,
                });
            }
        }
    }
}

async fn read_response(conn: &mut Connection, buffer: &mut MessageBuffer) -> Result<Message> {
    loop {
        if let Some(message) = buffer.try_next()? {
            return Ok(message);
        }
        if conn.read_into(buffer.buffer_mut()).await? == 0 {
            return buffer.finish()?.ok_or(CatwireError::ConnectionClosed);
        }
    }
}

/// Turn an error reply into [`CatwireError::Remote`], using the `error`
/// field of a codec body when there is one.
fn remote_error(status: Status, content_type: Option<&str>, body: &Bytes) -> CatwireError {
    let described = content_type
        .and_then(Codec::from_content_type)
        .and_then(|codec| codec.decode::<Value>(body).ok())
        .and_then(|value| value.get("error").and_then(Value::as_str).map(str::to_string));

    let message = described.unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());
    CatwireError::Remote { status, message }
}
