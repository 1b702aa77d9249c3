//! Wire-level behaviour: keep-alive, pipelining, framing and limits.

use std::time::{Duration, Instant};

use bytes::Bytes;
use portico::http::producer::Producer;
use portico::routing::{handler, Outcome, RouteRegistry};
use portico::security::RequestLimits;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

mod common;
use common::{exchange, parse_all, parse_one};

fn registry() -> RouteRegistry {
    let mut registry = RouteRegistry::new();
    registry
        .add_context("/", "/srv")
        .add_pattern("/sized", handler(|req| {
            req.set_header("Content-Length", "5");
            req.write("sized");
            Ok(Outcome::Done)
        }))
        .unwrap()
        .add_pattern("/stream", handler(|req| {
            req.write("first,");
            req.write("second");
            Ok(Outcome::Done)
        }))
        .unwrap()
        .add_pattern("/echo", handler(|req| {
            let body = req.body.clone();
            req.set_header("Content-Length", body.len().to_string());
            req.write(body);
            Ok(Outcome::Done)
        }))
        .unwrap();
    registry
}

#[tokio::test]
async fn pipelined_requests_answer_in_order() {
    let server = common::server(registry(), |b| b);
    let raw = exchange(
        &server,
        b"GET /sized HTTP/1.1\r\nHost: t\r\n\r\n\r\nPOST /echo HTTP/1.1\r\nContent-Length: 4\r\n\r\npingGET /stream HTTP/1.1\r\nConnection: close\r\n\r\n",
    )
    .await;
    let responses = parse_all(&raw);
    assert_eq!(responses.len(), 3);
    assert_eq!(responses[0].text(), "sized");
    assert_eq!(responses[1].text(), "ping");
    assert_eq!(responses[2].text(), "first,second");
}

#[tokio::test]
async fn http11_without_length_is_chunked() {
    let server = common::server(registry(), |b| b);
    let raw = exchange(&server, b"GET /stream HTTP/1.1\r\nHost: t\r\n\r\n").await;
    let (response, rest) = parse_one(&raw, true);
    assert_eq!(response.header("Transfer-Encoding"), Some("chunked"));
    assert_eq!(response.text(), "first,second");
    assert!(rest.is_empty());
}

#[tokio::test]
async fn http10_closes_unless_keep_alive_with_length() {
    let server = common::server(registry(), |b| b);

    let raw = exchange(&server, b"GET /stream HTTP/1.0\r\n\r\nGET /sized HTTP/1.0\r\n\r\n").await;
    let responses = parse_all(&raw);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].version, "HTTP/1.0");
    assert_eq!(responses[0].text(), "first,second");

    let raw = exchange(
        &server,
        b"GET /sized HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\nGET /sized HTTP/1.0\r\n\r\n",
    )
    .await;
    let responses = parse_all(&raw);
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].header("Connection"), Some("Keep-Alive"));
}

#[tokio::test]
async fn versionless_requests_close() {
    let server = common::server(registry(), |b| b);
    let raw = exchange(&server, b"GET /sized\r\nGET /sized HTTP/1.1\r\n\r\n").await;
    let responses = parse_all(&raw);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].text(), "sized");
}

#[tokio::test]
async fn malformed_request_line_is_400() {
    let server = common::server(registry(), |b| b);
    let raw = exchange(&server, b"NONSENSE\r\nHost: t\r\n\r\n").await;
    let (response, _) = parse_one(&raw, true);
    assert_eq!(response.status, 400);
    assert_eq!(response.header("Connection"), Some("close"));
}

#[tokio::test]
async fn limits_reject_before_parsing() {
    let limits = RequestLimits { max_header_bytes: 256, max_body_bytes: 16, ..RequestLimits::default() };
    let server = common::server_with_limits(registry(), |b| b, limits);

    let big_head = format!("GET /sized HTTP/1.1\r\nX-Pad: {}\r\n\r\n", "a".repeat(400));
    let raw = exchange(&server, big_head.as_bytes()).await;
    assert_eq!(parse_one(&raw, true).0.status, 431);

    let raw = exchange(&server, b"POST /echo HTTP/1.1\r\nContent-Length: 17\r\n\r\n").await;
    assert_eq!(parse_one(&raw, true).0.status, 413);

    let raw = exchange(&server, b"POST /echo HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n").await;
    assert_eq!(parse_one(&raw, true).0.status, 411);

    let raw = exchange(&server, b"POST /echo HTTP/1.1\r\nContent-Length: x\r\n\r\n").await;
    assert_eq!(parse_one(&raw, true).0.status, 400);
}

#[tokio::test]
async fn idle_connections_time_out() {
    let limits = RequestLimits { idle_timeout: Duration::from_millis(50), ..RequestLimits::default() };
    let server = common::server_with_limits(registry(), |b| b, limits);

    let (mut client, server_side) = tokio::io::duplex(4096);
    let task = tokio::spawn({
        let server = server.clone();
        async move { server.serve_stream(server_side, common::PEER.parse().unwrap()).await }
    });

    client.write_all(b"GET /sized HTTP/1.1\r\n\r\n").await.unwrap();
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut out))
        .await
        .expect("idle connection was not closed")
        .unwrap();
    assert!(task.await.unwrap().is_ok());
    assert_eq!(parse_all(&out).len(), 1);
}

#[tokio::test]
async fn byte_counters_follow_the_wire() {
    let server = common::server(registry(), |b| b);
    let raw = exchange(&server, b"POST /echo HTTP/1.1\r\nContent-Length: 3\r\nConnection: close\r\n\r\nabc").await;
    let stats = server.orchestrator().stats().snapshot();
    assert_eq!(stats.requests, 1);
    assert_eq!(stats.clients, 1);
    assert_eq!(stats.bytes_out, raw.len() as u64);
    assert!(stats.bytes_in >= 3);
}

/// Blocks like a slow disk on its first pull.
struct SlowDisk {
    delay: Duration,
    sent: bool,
}

impl Producer for SlowDisk {
    fn more(&mut self) -> std::io::Result<Option<Bytes>> {
        if self.sent {
            return Ok(None);
        }
        std::thread::sleep(self.delay);
        self.sent = true;
        Ok(Some(Bytes::from_static(b"slow")))
    }
}

#[tokio::test]
async fn slow_body_reads_do_not_stall_other_connections() {
    let mut registry = registry();
    registry
        .add_context("/disk", "/srv")
        .set_catch_all(handler(|req| {
            req.set_header("Content-Length", "4");
            req.reply.push(SlowDisk { delay: Duration::from_millis(1_500), sent: false });
            Ok(Outcome::Done)
        }))
        .unwrap();
    let server = common::server(registry, |b| b);

    let slow_server = server.clone();
    let slow = tokio::spawn(async move { common::get(&slow_server, "/disk/big.iso").await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let fast = common::get(&server, "/sized").await;
    assert_eq!(fast.text(), "sized");
    assert!(started.elapsed() < Duration::from_millis(1_000), "fast request waited {:?}", started.elapsed());
    assert!(!slow.is_finished());

    assert_eq!(slow.await.unwrap().text(), "slow");
}
