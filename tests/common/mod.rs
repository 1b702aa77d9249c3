//! Shared utilities for the integration suites.
#![allow(dead_code)]

use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use portico::http::{HttpServer, Orchestrator, OrchestratorBuilder};
use portico::routing::RouteRegistry;
use portico::security::RequestLimits;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing_subscriber::fmt::MakeWriter;

pub const PEER: &str = "192.0.2.10:40000";

/// A server around `registry`, with whatever extra settings `configure` applies.
pub fn server(registry: RouteRegistry, configure: impl FnOnce(OrchestratorBuilder) -> OrchestratorBuilder) -> HttpServer {
    server_with_limits(registry, configure, RequestLimits::default())
}

pub fn server_with_limits(
    registry: RouteRegistry,
    configure: impl FnOnce(OrchestratorBuilder) -> OrchestratorBuilder,
    limits: RequestLimits,
) -> HttpServer {
    let builder = configure(Orchestrator::builder(registry));
    HttpServer::new(builder.build(), limits)
}

/// Write `raw` on a fresh in-memory connection, close the client side and
/// return everything the server answered until it closed.
pub async fn exchange(server: &HttpServer, raw: &[u8]) -> Vec<u8> {
    let (mut client, server_side) = tokio::io::duplex(1 << 20);
    let peer: SocketAddr = PEER.parse().unwrap();
    let server = server.clone();
    let task = tokio::spawn(async move { server.serve_stream(server_side, peer).await });

    client.write_all(raw).await.unwrap();
    client.shutdown().await.unwrap();
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), client.read_to_end(&mut out))
        .await
        .expect("server did not close the connection")
        .unwrap();
    let _ = task.await.unwrap();
    out
}

/// One parsed reply.
#[derive(Debug, Clone)]
pub struct Response {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Parse one reply off the front of `raw`. `with_body` is false for
/// answers to HEAD. Returns the reply and the remaining bytes.
pub fn parse_one(raw: &[u8], with_body: bool) -> (Response, &[u8]) {
    let head_end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("reply head terminator");
    let head = String::from_utf8(raw[..head_end].to_vec()).unwrap();
    let mut rest = &raw[head_end + 4..];

    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap().to_string();
    let status: u16 = parts.next().unwrap().parse().unwrap();
    let reason = parts.next().unwrap_or("").to_string();
    let headers: Vec<(String, String)> = lines
        .map(|l| {
            let (k, v) = l.split_once(':').unwrap();
            (k.trim().to_string(), v.trim().to_string())
        })
        .collect();

    let mut response = Response { version, status, reason, headers, body: Vec::new() };
    if !with_body || status == 304 || status == 204 || (100..200).contains(&status) {
        return (response, rest);
    }

    if let Some(len) = response.header("Content-Length") {
        let len: usize = len.parse().unwrap();
        response.body = rest[..len].to_vec();
        rest = &rest[len..];
    } else if response.header("Transfer-Encoding").is_some_and(|te| te.eq_ignore_ascii_case("chunked")) {
        loop {
            let line_end = rest.windows(2).position(|w| w == b"\r\n").unwrap();
            let size = usize::from_str_radix(std::str::from_utf8(&rest[..line_end]).unwrap().trim(), 16).unwrap();
            rest = &rest[line_end + 2..];
            if size == 0 {
                let trailer_end = rest.windows(2).position(|w| w == b"\r\n").unwrap();
                rest = &rest[trailer_end + 2..];
                break;
            }
            response.body.extend_from_slice(&rest[..size]);
            rest = &rest[size + 2..];
        }
    } else {
        response.body = rest.to_vec();
        rest = &[];
    }
    (response, rest)
}

/// Parse every reply in `raw`, all assumed to carry bodies.
pub fn parse_all(raw: &[u8]) -> Vec<Response> {
    let mut out = Vec::new();
    let mut rest = raw;
    while !rest.is_empty() {
        let (response, remaining) = parse_one(rest, true);
        out.push(response);
        rest = remaining;
    }
    out
}

pub async fn get(server: &HttpServer, path: &str) -> Response {
    let raw = exchange(server, format!("GET {} HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n", path).as_bytes()).await;
    parse_one(&raw, true).0
}

/// Log sink shared between a subscriber and the test reading it.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Capture every event emitted on this thread while the guard lives.
pub fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (buffer, guard)
}
