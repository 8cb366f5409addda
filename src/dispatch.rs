//! Request dispatch: the request/response cycles of one connection.
//!
//! Each cycle reads one request, routes it, checks the caller's token,
//! binds arguments against the method's parameter table and drives the
//! handler's reply back onto the socket:
//!
//! ```text
//! read → route → authenticate → resolve → bind → invoke → write
//!          │          │            │        │       │
//!         404        403       403 / 404   400     500
//! ```
//!
//! Single replies go out with `Content-Length`. Stream replies go out
//! chunked, one chunk per item, and always end with the zero-length
//! terminator. A failure after the first chunk becomes an error chunk.
//!
//! While a handler is pending the connection is still read, so a peer that
//! hangs up cancels the handler instead of leaving it computing unread
//! results.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{FutureExt, StreamExt};
use serde_json::json;

use crate::codec::{Codec, Value};
use crate::config::ServerConfig;
use crate::error::{CatwireError, Result};
use crate::handler::{
    Args, BoundArgs, BoxFuture, BoxStream, Handler, HandlerResult, MethodDescriptor,
    MethodRegistry, Reply, RequestContext,
};
use crate::protocol::{encode_response_head, Framing, Headers, Message, MessageBuffer, Status};
use crate::shutdown::Shutdown;
use crate::transport::{Connection, Descriptor};
use crate::writer::{batch_size, OutboundFrame};

/// Shared by every connection task of a server.
pub(crate) struct Dispatcher<S> {
    registry: MethodRegistry<S>,
    catalog: Arc<[MethodDescriptor]>,
    state: Arc<S>,
    token: String,
    prefix: String,
    keep_alive: bool,
    max_head_size: usize,
    max_request_size: usize,
    request_timeout: Option<Duration>,
    config: Arc<ServerConfig>,
    shutdown: Shutdown,
}

/// What happened to one request, for the access log.
struct Outcome {
    /// `None` when the peer left before a reply was written.
    status: Option<Status>,
    sent: usize,
    reusable: bool,
}

impl Outcome {
    fn new(status: Status, sent: usize, reusable: bool) -> Self {
        Self {
            status: Some(status),
            sent,
            reusable,
        }
    }

    fn abandoned(sent: usize) -> Self {
        Self {
            status: None,
            sent,
            reusable: false,
        }
    }
}

/// A resolved, authorized, bound call that has not started yet.
struct Call<'a, S> {
    handler: &'a dyn Handler<S>,
    ctx: RequestContext<S>,
    args: BoundArgs,
}

/// Token slot and method name taken from a request path.
#[derive(Debug, PartialEq, Eq)]
struct Route<'a> {
    token: Option<&'a str>,
    method: &'a str,
}

impl<S: Send + Sync + 'static> Dispatcher<S> {
    pub(crate) fn new(
        registry: MethodRegistry<S>,
        state: Arc<S>,
        token: String,
        config: &ServerConfig,
        shutdown: Shutdown,
    ) -> Self {
        let catalog: Arc<[MethodDescriptor]> = registry.descriptors().into();
        Self {
            registry,
            catalog,
            state,
            token,
            prefix: config.normalized_prefix().to_string(),
            keep_alive: config.keep_alive,
            max_head_size: config.max_head_size,
            max_request_size: config.max_request_size,
            request_timeout: config.request_timeout,
            config: Arc::new(config.clone()),
            shutdown,
        }
    }

    /// Descriptors of every registered method, in registration order.
    pub(crate) fn catalog(&self) -> &Arc<[MethodDescriptor]> {
        &self.catalog
    }

    /// Serve request/response cycles until the connection closes.
    pub(crate) async fn serve(&self, mut conn: Connection) {
        let mut buffer =
            MessageBuffer::for_requests_with_limits(self.max_head_size, self.max_request_size);

        loop {
            let cycle = self.cycle(&mut conn, &mut buffer);
            let reusable = match self.request_timeout {
                Some(limit) => tokio::time::timeout(limit, cycle).await.ok(),
                None => Some(cycle.await),
            };

            match reusable {
                Some(true) => continue,
                Some(false) => break,
                None => {
                    tracing::warn!(peer = %conn.peer(), "Request timed out, closing connection");
                    break;
                }
            }
        }

        tracing::trace!(peer = %conn.peer(), "Connection closed");
    }

    /// One request and its reply. Returns true if the connection may be
    /// reused.
    async fn cycle(&self, conn: &mut Connection, buffer: &mut MessageBuffer) -> bool {
        let read = tokio::select! {
            biased;
            read = read_message(conn, buffer) => read,
            _ = self.shutdown.wait() => return false,
        };

        let message = match read {
            Ok(Some(message)) => message,
            Ok(None) => return false,
            Err(err) if err.is_transport() => {
                tracing::trace!(peer = %conn.peer(), error = %err, "Connection ended");
                return false;
            }
            Err(err) => {
                // Framing is lost; answer once and close.
                let status = err.status();
                let sent = send_error(conn, Codec::Json, &err, false)
                    .await
                    .unwrap_or(0);
                self.access_log("-", Some(status), sent, conn.peer());
                return false;
            }
        };

        let keep_alive = self.keep_alive && message.head.headers.wants_keep_alive();
        let start_line = message.head.start_line.clone();

        match self.respond(conn, buffer, message, keep_alive).await {
            Ok(outcome) => {
                self.access_log(&start_line, outcome.status, outcome.sent, conn.peer());
                outcome.reusable && !self.shutdown.is_triggered()
            }
            Err(err) => {
                tracing::debug!(peer = %conn.peer(), error = %err, "Reply aborted");
                false
            }
        }
    }

    /// Route, authorize, bind and invoke. `Err` only for transport faults.
    async fn respond(
        &self,
        conn: &mut Connection,
        buffer: &mut MessageBuffer,
        message: Message,
        keep_alive: bool,
    ) -> Result<Outcome> {
        let fds = conn.take_fds();
        let headers = &message.head.headers;

        let codec = Codec::negotiate(headers.get("content-type"), headers.get("accept"));

        let call = match self.prepare(conn, &message, codec, fds) {
            Ok(call) => call,
            Err(err) => return self.reject(conn, codec, err, keep_alive).await,
        };

        let Call { handler, ctx, args } = call;
        let reply = match std::panic::catch_unwind(AssertUnwindSafe(|| handler.call(ctx, args))) {
            Ok(reply) => reply,
            Err(panic) => return self.reject(conn, codec, panic_error(panic), keep_alive).await,
        };

        match reply {
            Reply::Single(fut) => self.respond_single(conn, buffer, codec, fut, keep_alive).await,
            Reply::Stream(items) => {
                self.respond_stream(conn, buffer, codec, items, keep_alive)
                    .await
            }
        }
    }

    fn prepare(
        &self,
        conn: &Connection,
        message: &Message,
        codec: Codec,
        fds: Vec<Descriptor>,
    ) -> Result<Call<'_, S>> {
        let line = message.head.request_line()?;
        if line.method != "POST" {
            return Err(CatwireError::MalformedRequest(format!(
                "Unsupported method {}",
                line.method
            )));
        }

        let route = self.route(line.target)?;
        let authenticated = self.authenticate(route.token, &message.head.headers);

        // Anonymous callers only learn about public methods.
        let (descriptor, handler) = match self.registry.get(route.method) {
            Some(found) if authenticated || found.0.is_public() => found,
            _ if !authenticated => {
                return Err(CatwireError::Unauthorized(route.method.to_string()))
            }
            _ => return Err(CatwireError::UnknownMethod(route.method.to_string())),
        };

        let body = match message.head.headers.get("content-type") {
            // e.g. the form encoding `curl -d` sends: call without arguments.
            Some(ct) if Codec::from_content_type(ct).is_none() => {
                tracing::debug!(content_type = ct, "Ignoring body of unsupported type");
                Value::Null
            }
            _ if message.body.is_empty() => Value::Null,
            _ => codec.decode(&message.body)?,
        };
        let args = Args::from_body(body)?.bind(descriptor)?;

        let ctx = RequestContext::new(route.method, self.state.clone())
            .with_auth(authenticated)
            .with_peer(conn.kind(), conn.local_addr())
            .with_codec(codec)
            .with_fds(fds)
            .with_catalog(self.catalog.clone())
            .with_config(self.config.clone())
            .with_shutdown(self.shutdown.clone());

        Ok(Call { handler, ctx, args })
    }

    async fn respond_single(
        &self,
        conn: &mut Connection,
        buffer: &mut MessageBuffer,
        codec: Codec,
        fut: BoxFuture<'static, HandlerResult>,
        keep_alive: bool,
    ) -> Result<Outcome> {
        let guarded = AssertUnwindSafe(fut).catch_unwind().map(settle);
        let Some(result) = watch_peer(conn, buffer, guarded).await else {
            tracing::debug!(peer = %conn.peer(), "Peer left before the reply was ready");
            return Ok(Outcome::abandoned(0));
        };

        let rendered = match result.and_then(|output| output.render(codec)) {
            Ok(rendered) => rendered,
            Err(err) => return self.reject(conn, codec, err, keep_alive).await,
        };

        let head = encode_response_head(
            Status::Ok,
            &rendered.content_type,
            Framing::Length(rendered.body.len()),
            keep_alive,
        );
        let batch = [OutboundFrame::message(head, rendered.body)];

        match conn.send(&batch, &rendered.fds).await {
            Ok(()) => Ok(Outcome::new(Status::Ok, batch_size(&batch), keep_alive)),
            // Nothing was written; report instead.
            Err(err) if !err.is_transport() => self.reject(conn, codec, err, keep_alive).await,
            Err(err) => Err(err),
        }
    }

    async fn respond_stream(
        &self,
        conn: &mut Connection,
        buffer: &mut MessageBuffer,
        codec: Codec,
        items: BoxStream<'static, HandlerResult>,
        keep_alive: bool,
    ) -> Result<Outcome> {
        let mut items = AssertUnwindSafe(items).catch_unwind().map(settle);

        // The first item fixes the Content-Type for the whole stream; failing
        // here still gets a plain error response.
        let Some(first) = watch_peer(conn, buffer, items.next()).await else {
            tracing::debug!(peer = %conn.peer(), "Peer left before the first item");
            return Ok(Outcome::abandoned(0));
        };

        let (content_type, mut batch, fds, finished) = match first {
            None => (
                codec.content_type().to_string(),
                vec![OutboundFrame::last_chunk()],
                Vec::new(),
                true,
            ),
            Some(Err(err)) => return self.reject(conn, codec, err, keep_alive).await,
            Some(Ok(output)) => match output.render(codec) {
                Ok(rendered) => (
                    rendered.content_type,
                    data_chunk(rendered.body).into_iter().collect(),
                    rendered.fds,
                    false,
                ),
                Err(err) => return self.reject(conn, codec, err, keep_alive).await,
            },
        };

        let head = encode_response_head(Status::Ok, &content_type, Framing::Chunked, keep_alive);
        batch.insert(0, OutboundFrame::message(head, Bytes::new()));

        match conn.send(&batch, &fds).await {
            Ok(()) => {}
            Err(err) if !err.is_transport() => {
                return self.reject(conn, codec, err, keep_alive).await
            }
            Err(err) => return Err(err),
        }
        let mut sent = batch_size(&batch);
        let mut count = usize::from(!finished);

        if finished {
            return Ok(Outcome::new(Status::Ok, sent, keep_alive));
        }

        loop {
            let Some(next) = watch_peer(conn, buffer, items.next()).await else {
                tracing::debug!(
                    peer = %conn.peer(),
                    items = count,
                    "Peer left mid-stream, dropping producer"
                );
                return Ok(Outcome::abandoned(sent));
            };

            let (batch, fds, done) = match next {
                None => (vec![OutboundFrame::last_chunk()], Vec::new(), true),
                Some(Ok(output)) => match output.render_for_stream(codec, &content_type) {
                    Ok(rendered) => (
                        data_chunk(rendered.body).into_iter().collect(),
                        rendered.fds,
                        false,
                    ),
                    Err(err) => (error_trailer(codec, &err, count), Vec::new(), true),
                },
                Some(Err(err)) => (error_trailer(codec, &err, count), Vec::new(), true),
            };

            match conn.send(&batch, &fds).await {
                Ok(()) => sent += batch_size(&batch),
                Err(err) if !err.is_transport() => {
                    let trailer = error_trailer(codec, &err, count);
                    conn.send(&trailer, &[]).await?;
                    sent += batch_size(&trailer);
                    return Ok(Outcome::new(Status::Ok, sent, keep_alive));
                }
                Err(err) => return Err(err),
            }

            if done {
                return Ok(Outcome::new(Status::Ok, sent, keep_alive));
            }
            count += 1;
        }
    }

    /// Answer with a structured error.
    async fn reject(
        &self,
        conn: &mut Connection,
        codec: Codec,
        err: CatwireError,
        keep_alive: bool,
    ) -> Result<Outcome> {
        let status = err.status();
        if status == Status::InternalError {
            tracing::error!(kind = err.kind(), error = %err, "Request failed");
        }

        let sent = send_error(conn, codec, &err, keep_alive).await?;
        Ok(Outcome::new(status, sent, keep_alive))
    }

    /// Split `/[prefix/][token/]method[/hints...]`.
    ///
    /// The first segment is a token slot when it is empty, equals the token,
    /// or names no method while a second segment follows.
    fn route<'a>(&self, target: &'a str) -> Result<Route<'a>> {
        let path = target.split(['?', '#']).next().unwrap_or_default();
        let not_found = || CatwireError::UnknownMethod(self.redact(path));

        let mut rest = path.strip_prefix('/').unwrap_or(path);
        if !self.prefix.is_empty() {
            rest = rest
                .strip_prefix(self.prefix.as_str())
                .and_then(|r| {
                    if r.is_empty() {
                        Some(r)
                    } else {
                        r.strip_prefix('/')
                    }
                })
                .ok_or_else(not_found)?;
        }

        let segments: Vec<&str> = rest.split('/').collect();
        let route = match segments.as_slice() {
            [first, second, ..] if self.is_token_slot(first) => Route {
                token: Some(*first).filter(|t| !t.is_empty()),
                method: *second,
            },
            [first, ..] => Route {
                token: None,
                method: *first,
            },
            [] => return Err(not_found()),
        };

        if route.method.is_empty() {
            return Err(not_found());
        }
        Ok(route)
    }

    fn is_token_slot(&self, segment: &str) -> bool {
        segment.is_empty()
            || (!self.token.is_empty() && segment == self.token)
            || !self.registry.contains(segment)
    }

    /// True if the path token or any header value carries the token, bare or
    /// as its last word.
    fn authenticate(&self, path_token: Option<&str>, headers: &Headers) -> bool {
        if self.token.is_empty() {
            return false;
        }
        if path_token == Some(self.token.as_str()) {
            return true;
        }

        headers
            .iter()
            .any(|(_, value)| value.split_whitespace().last() == Some(self.token.as_str()))
    }

    fn redact(&self, text: &str) -> String {
        if self.token.is_empty() {
            text.to_string()
        } else {
            text.replace(self.token.as_str(), "-")
        }
    }

    fn access_log(&self, start_line: &str, status: Option<Status>, sent: usize, peer: &str) {
        let mut words = start_line.split_whitespace();
        let method = words.next().unwrap_or("-");
        let path = self.redact(words.next().unwrap_or("-"));

        match status {
            Some(status) if status.is_success() => {
                tracing::debug!(method, path = %path, status = status.code(), sent, peer, "HTTP")
            }
            Some(status) => {
                tracing::warn!(method, path = %path, status = status.code(), sent, peer, "HTTP")
            }
            None => tracing::warn!(method, path = %path, status = "-", sent, peer, "HTTP"),
        }
    }
}

/// Read until one complete request is buffered.
///
/// `Ok(None)` when the peer closed between requests.
async fn read_message(conn: &mut Connection, buffer: &mut MessageBuffer) -> Result<Option<Message>> {
    loop {
        if let Some(message) = buffer.try_next()? {
            return Ok(Some(message));
        }

        let n = conn.read_into(buffer.buffer_mut()).await?;
        if n == 0 {
            return buffer.finish();
        }
        tracing::trace!(bytes = n, buffered = buffer.len(), "Read request bytes");
    }
}

/// Drive `work` while watching the peer.
///
/// Returns `None` if the peer closed or failed first; `work` is dropped.
/// Bytes the peer sends meanwhile stay buffered for the next cycle, up to
/// one request's worth; a peer that sends more is dropped too.
///
/// A peer that half-closes its write side after the request reads as gone,
/// so it never gets a reply.
async fn watch_peer<F: Future>(
    conn: &mut Connection,
    buffer: &mut MessageBuffer,
    work: F,
) -> Option<F::Output> {
    tokio::pin!(work);

    loop {
        tokio::select! {
            biased;
            output = &mut work => return Some(output),
            read = conn.read_into(buffer.buffer_mut()) => match read {
                Ok(0) | Err(_) => return None,
                Ok(_) if buffer.is_overfull() => {
                    tracing::warn!(
                        peer = %conn.peer(),
                        buffered = buffer.len(),
                        "Peer sent too much while a reply was pending"
                    );
                    return None;
                }
                Ok(_) => {}
            },
        }
    }
}

async fn send_error(
    conn: &mut Connection,
    codec: Codec,
    err: &CatwireError,
    keep_alive: bool,
) -> Result<usize> {
    let body = error_body(codec, err);
    let head = encode_response_head(
        err.status(),
        codec.content_type(),
        Framing::Length(body.len()),
        keep_alive,
    );
    let batch = [OutboundFrame::message(head, body)];

    conn.send(&batch, &[]).await?;
    Ok(batch_size(&batch))
}

/// `{"error": ..., "kind": ...}` in the request's codec.
fn error_body(codec: Codec, err: &CatwireError) -> Bytes {
    let description = json!({
        "error": err.to_string(),
        "kind": err.kind(),
    });
    codec
        .encode(&description)
        .unwrap_or_else(|_| Bytes::from(description.to_string()))
}

/// Error chunk plus terminator, ending a stream that failed midway.
fn error_trailer(codec: Codec, err: &CatwireError, delivered: usize) -> Vec<OutboundFrame> {
    tracing::error!(
        kind = err.kind(),
        error = %err,
        delivered,
        "Stream failed after first item"
    );
    vec![
        OutboundFrame::chunk(error_body(codec, err), true),
        OutboundFrame::last_chunk(),
    ]
}

/// A data chunk, or nothing for an empty body (a zero-length chunk would
/// end the stream).
fn data_chunk(body: Bytes) -> Option<OutboundFrame> {
    if body.is_empty() {
        tracing::warn!("Dropping empty stream item, the client will not see it");
        None
    } else {
        Some(OutboundFrame::chunk(body, false))
    }
}

fn settle(result: std::thread::Result<HandlerResult>) -> HandlerResult {
    result.unwrap_or_else(|panic| Err(panic_error(panic)))
}

fn panic_error(panic: Box<dyn Any + Send>) -> CatwireError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());

    CatwireError::Handler(format!("panicked: {}", message))
}
