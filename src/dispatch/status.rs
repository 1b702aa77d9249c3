//! JSON status page for workers and server totals.

use std::sync::Arc;

use serde::Serialize;

use crate::dispatch::{Dispatcher, WorkerStatus};
use crate::observability::{ServerStats, StatsSnapshot};
use crate::routing::{handler, Handler, Outcome};

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub mode: &'static str,
    pub queued: usize,
    pub workers: Vec<WorkerStatus>,
    pub stats: StatsSnapshot,
}

impl StatusReport {
    pub fn collect(dispatcher: &Dispatcher, stats: &ServerStats) -> Self {
        Self {
            mode: if dispatcher.is_threaded() { "threaded" } else { "inline" },
            queued: dispatcher.queued(),
            workers: dispatcher.worker_status(),
            stats: stats.snapshot(),
        }
    }
}

/// A handler answering with the current [`StatusReport`].
pub fn status_handler(dispatcher: Dispatcher, stats: Arc<ServerStats>) -> Handler {
    handler(move |req| {
        let body = serde_json::to_vec_pretty(&StatusReport::collect(&dispatcher, &stats))?;
        req.set_header("Content-Type", "application/json");
        req.set_header("Content-Length", body.len().to_string());
        req.set_header("Cache-Control", "no-cache");
        req.write(body);
        Ok(Outcome::Done)
    })
}
