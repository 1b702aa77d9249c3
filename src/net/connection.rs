//! Per-connection request loop.
//!
//! # Responsibilities
//! - Read request heads and bodies off the stream, pipelined requests included
//! - Reject oversized, malformed or unsupported requests before parsing further
//! - Hand each request to the orchestrator and write its producer chain out
//! - Close on the orchestrator's keep-alive decision, on idle timeout, or
//!   when the peer goes away
//!
//! # Data Flow
//! ```text
//! bytes → [skip blank lines] → head (≤ max_header_bytes)
//!       → Content-Length body (≤ max_body_bytes)
//!       → Orchestrator::process → Finalized { producer, close }
//!       → write chunks → next request | close
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::http::orchestrator::Orchestrator;
use crate::http::producer::{BoxProducer, SimpleProducer};
use crate::http::request::{HttpVersion, RequestHead, RequestLine};
use crate::http::response::Finalized;
use crate::http::status;
use crate::http::Request;
use crate::observability::metrics;
use crate::security::RequestLimits;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is enough; only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("reply producer failed: {0}")]
    Producer(std::io::Error),
}

/// Where a complete head sits in the read buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeadSpan {
    /// End of the header block, terminator excluded.
    end: usize,
    /// Bytes to consume, terminator included.
    consumed: usize,
}

/// Drop blank lines a client may send between requests.
fn skip_blank_lines(buf: &mut BytesMut) {
    loop {
        if buf.starts_with(b"\r\n") {
            buf.advance(2);
        } else if buf.starts_with(b"\n") {
            buf.advance(1);
        } else {
            return;
        }
    }
}

/// Find the end of the head. A versionless request line is a whole
/// HTTP/0.9 request.
fn scan_head(buf: &[u8]) -> Option<HeadSpan> {
    let line_end = buf.iter().position(|&b| b == b'\n')?;
    let first = String::from_utf8_lossy(&buf[..line_end]);
    if let Some(line) = RequestLine::parse(first.trim_end_matches('\r')) {
        if line.version == HttpVersion::Http09 {
            return Some(HeadSpan { end: line_end, consumed: line_end + 1 });
        }
    }

    let crlf = find(buf, b"\r\n\r\n").map(|i| HeadSpan { end: i, consumed: i + 4 });
    let lf = find(buf, b"\n\n").map(|i| HeadSpan { end: i, consumed: i + 2 });
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.end <= b.end { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// What the body framing headers ask for.
fn body_length(head: &RequestHead, limits: &RequestLimits) -> Result<usize, u16> {
    if head.headers.contains("Transfer-Encoding") {
        return Err(status::LENGTH_REQUIRED);
    }
    let len = match head.headers.get("Content-Length") {
        None => 0,
        Some(value) => value.trim().parse::<usize>().map_err(|_| status::BAD_REQUEST)?,
    };
    match limits.check_body(len) {
        Some(code) => Err(code),
        None => Ok(len),
    }
}

/// Read more bytes, bounded by the idle timeout. `Ok(0)` means the peer
/// closed or went quiet for too long.
async fn fill<S>(stream: &mut S, buf: &mut BytesMut, limits: &RequestLimits, id: ConnectionId) -> std::io::Result<usize>
where
    S: AsyncRead + Unpin,
{
    match tokio::time::timeout(limits.idle_timeout, stream.read_buf(buf)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!(connection_id = %id, "Idle connection timed out");
            Ok(0)
        }
    }
}

async fn write_out<S>(stream: &mut S, finalized: &mut Finalized) -> Result<(), ConnectionError>
where
    S: AsyncWrite + Unpin,
{
    let mut producer = std::mem::replace(&mut finalized.producer, Box::new(SimpleProducer::new(Bytes::new())));
    loop {
        let (returned, chunk) = next_chunk(producer).await?;
        producer = returned;
        match chunk {
            Some(chunk) => stream.write_all(&chunk).await?,
            None => break,
        }
    }
    stream.flush().await?;
    Ok(())
}

/// Pull the next chunk on the blocking pool. File reads and archive
/// inflation block, and a producer may panic; neither reaches the runtime.
async fn next_chunk(mut producer: BoxProducer) -> Result<(BoxProducer, Option<Bytes>), ConnectionError> {
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    let (producer, chunk) = tokio::task::spawn_blocking(move || {
        tracing::dispatcher::with_default(&dispatch, || {
            let chunk = producer.more();
            (producer, chunk)
        })
    })
    .await
    .map_err(|e| ConnectionError::Producer(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
    Ok((producer, chunk.map_err(ConnectionError::Producer)?))
}

/// Serve requests on one connection until it closes.
pub async fn serve_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    orchestrator: &Arc<Orchestrator>,
    limits: RequestLimits,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let id = ConnectionId::new();
    metrics::record_connection_opened();
    orchestrator.stats().client();
    tracing::trace!(connection_id = %id, peer = %peer, "Connection opened");

    let result = request_loop(&mut stream, peer, orchestrator, &limits, id).await;

    if let Err(e) = stream.shutdown().await {
        tracing::trace!(connection_id = %id, error = %e, "Shutdown after close failed");
    }
    metrics::record_connection_closed();
    tracing::trace!(connection_id = %id, "Connection closed");
    result
}

async fn request_loop<S>(
    stream: &mut S,
    peer: SocketAddr,
    orchestrator: &Arc<Orchestrator>,
    limits: &RequestLimits,
    id: ConnectionId,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut buf = BytesMut::with_capacity(8 * 1024);

    loop {
        let span = loop {
            skip_blank_lines(&mut buf);
            if let Some(span) = scan_head(&buf) {
                break span;
            }
            if let Some(code) = limits.check_head(buf.len()) {
                tracing::info!(connection_id = %id, peer = %peer, bytes = buf.len(), "Request head too large");
                return reject(stream, orchestrator, code).await;
            }
            if fill(stream, &mut buf, limits, id).await? == 0 {
                return Ok(());
            }
        };

        if let Some(code) = limits.check_head(span.end) {
            tracing::info!(connection_id = %id, peer = %peer, bytes = span.end, "Request head too large");
            return reject(stream, orchestrator, code).await;
        }

        let block = String::from_utf8_lossy(&buf[..span.end]).into_owned();
        buf.advance(span.consumed);

        let head = match RequestHead::parse(&block) {
            Some(head) => head,
            None => {
                let line = block.lines().next().unwrap_or("");
                tracing::info!(connection_id = %id, peer = %peer, line, "Malformed request line");
                return reject(stream, orchestrator, status::BAD_REQUEST).await;
            }
        };

        let len = match body_length(&head, limits) {
            Ok(len) => len,
            Err(code) => {
                tracing::info!(connection_id = %id, peer = %peer, status = code, "Rejecting request body");
                return reject(stream, orchestrator, code).await;
            }
        };
        while buf.len() < len {
            if fill(stream, &mut buf, limits, id).await? == 0 {
                tracing::debug!(connection_id = %id, expected = len, got = buf.len(), "Peer left mid-body");
                return Ok(());
            }
        }
        let body: Bytes = buf.split_to(len).freeze();
        orchestrator.stats().received((span.consumed + len) as u64);

        let req = Request::new(head.line, head.headers, body, peer);
        let mut finalized = orchestrator.process(req).await;
        if let Err(e) = write_out(stream, &mut finalized).await {
            tracing::debug!(connection_id = %id, peer = %peer, error = %e, "Reply aborted");
            return Err(e);
        }
        if finalized.close {
            return Ok(());
        }
    }
}

async fn reject<S>(stream: &mut S, orchestrator: &Orchestrator, code: u16) -> Result<(), ConnectionError>
where
    S: AsyncWrite + Unpin,
{
    let mut finalized = Finalized::bare(code, orchestrator.response_settings(), orchestrator.dates());
    write_out(stream, &mut finalized).await
}
