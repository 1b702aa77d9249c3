//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define server metrics (requests, latency, handler errors, bytes, connections)
//! - Expose a Prometheus-compatible scrape endpoint when enabled
//! - Keep in-process counters for the status page
//!
//! # Metrics
//! - `portico_requests_total` (counter): requests by method, status
//! - `portico_request_duration_seconds` (histogram): time from parse to flush
//! - `portico_handler_errors_total` (counter): contained handler failures
//! - `portico_bytes_sent_total` / `portico_bytes_received_total` (counters)
//! - `portico_static_total` (counter): static delivery by outcome (hit, file, cache)
//! - `portico_active_connections` (gauge)
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - [`ServerStats`] mirrors the totals as plain atomics so they can be read
//!   back without an exporter

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use serde::Serialize;

/// Install the Prometheus exporter and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, started: Instant) {
    metrics::counter!(
        "portico_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("portico_request_duration_seconds", "method" => method.to_string())
        .record(started.elapsed().as_secs_f64());
}

pub fn record_handler_error() {
    metrics::counter!("portico_handler_errors_total").increment(1);
}

pub fn record_bytes_sent(bytes: u64) {
    metrics::counter!("portico_bytes_sent_total").increment(bytes);
}

pub fn record_bytes_received(bytes: u64) {
    metrics::counter!("portico_bytes_received_total").increment(bytes);
}

/// `kind` is one of `hit`, `file` or `cache`.
pub fn record_static(kind: &'static str) {
    metrics::counter!("portico_static_total", "kind" => kind).increment(1);
}

pub fn record_connection_opened() {
    metrics::gauge!("portico_active_connections").increment(1.0);
}

pub fn record_connection_closed() {
    metrics::gauge!("portico_active_connections").decrement(1.0);
}

/// Process-wide totals.
#[derive(Debug, Default)]
pub struct ServerStats {
    requests: AtomicU64,
    exceptions: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    clients: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub exceptions: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub clients: u64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn exception(&self) {
        self.exceptions.fetch_add(1, Ordering::Relaxed);
        record_handler_error();
    }

    pub fn received(&self, bytes: u64) {
        self.bytes_in.fetch_add(bytes, Ordering::Relaxed);
        record_bytes_received(bytes);
    }

    pub fn sent(&self, bytes: u64) {
        self.bytes_out.fetch_add(bytes, Ordering::Relaxed);
        record_bytes_sent(bytes);
    }

    pub fn client(&self) {
        self.clients.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            exceptions: self.exceptions.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            clients: self.clients.load(Ordering::Relaxed),
        }
    }
}
