//! Static delivery from one virtual filesystem.
//!
//! # Data Flow
//! ```text
//! contextfree path ─→ strip leading '/'
//!     directory? ── no trailing '/' ─→ 301 Location: path + '/'
//!                └─ index file? ─────→ continue with it, else 404
//!     file?      ── If-Modified-Since (+ length=N) not older ─→ 304
//!                └─ Last-Modified, Content-Length, Content-Type, body
//! ```
//!
//! The request path arrives already percent-decoded; it is not decoded again.
//! Redirect targets are re-encoded so they survive the header safety check.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Serialize;

use crate::http::date::DateCodec;
use crate::http::producer::FileProducer;
use crate::http::{status, Request};
use crate::observability::metrics;
use crate::vfs::VirtualFilesystem;

/// Bytes escaped when a decoded path goes back into a `Location` header.
const LOCATION_PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Index names tried, in order, for a directory request.
pub const DEFAULT_INDEX_FILES: &[&str] = &["index.html", "default.html"];

/// Delivery counters of one handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryCounters {
    /// Requests handled at all.
    pub hits: u64,
    /// Full file bodies sent.
    pub files: u64,
    /// Conditional requests answered with 304.
    pub cache: u64,
}

pub struct StaticFileHandler {
    filesystem: Arc<dyn VirtualFilesystem>,
    index_files: Vec<String>,
    hits: AtomicU64,
    files: AtomicU64,
    cache: AtomicU64,
}

impl StaticFileHandler {
    pub fn new(filesystem: Arc<dyn VirtualFilesystem>) -> Self {
        Self {
            filesystem,
            index_files: DEFAULT_INDEX_FILES.iter().map(|s| s.to_string()).collect(),
            hits: AtomicU64::new(0),
            files: AtomicU64::new(0),
            cache: AtomicU64::new(0),
        }
    }

    pub fn with_index_files(mut self, names: Vec<String>) -> Self {
        self.index_files = names;
        self
    }

    pub fn filesystem(&self) -> &Arc<dyn VirtualFilesystem> {
        &self.filesystem
    }

    pub fn counters(&self) -> DeliveryCounters {
        DeliveryCounters {
            hits: self.hits.load(Ordering::Relaxed),
            files: self.files.load(Ordering::Relaxed),
            cache: self.cache.load(Ordering::Relaxed),
        }
    }

    /// Whether this filesystem has something at the request path.
    pub fn can_handle(&self, req: &Request) -> bool {
        let path = relative_path(req);
        if self.filesystem.isfile(path) {
            return true;
        }
        if self.filesystem.isdir(path) {
            return !path.is_empty() && !path.ends_with('/') || self.find_index(path).is_some();
        }
        false
    }

    /// Serve the request. The outcome is written onto `req.reply`.
    pub fn handle_request(&self, req: &mut Request, dates: &DateCodec) {
        if req.method != "GET" && req.method != "HEAD" {
            tracing::info!(method = %req.method, path = %req.path, "Static delivery refused method");
            req.error(status::BAD_REQUEST);
            return;
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::record_static("hit");

        let mut path = relative_path(req).to_string();

        if self.filesystem.isdir(&path) {
            if !path.is_empty() && !path.ends_with('/') {
                req.set_header("Location", directory_location(req));
                req.set_header("Content-Length", "0");
                req.set_status(status::MOVED_PERMANENTLY);
                return;
            }
            match self.find_index(&path) {
                Some(index) => path = index,
                None => {
                    req.error(status::NOT_FOUND);
                    return;
                }
            }
        }

        if !self.filesystem.isfile(&path) {
            req.error(status::NOT_FOUND);
            return;
        }

        let stat = match self.filesystem.stat(&path) {
            Ok(stat) => stat,
            Err(e) => {
                tracing::debug!(path = %path, fs = %self.filesystem.describe(), error = %e, "Stat failed");
                req.error(status::NOT_FOUND);
                return;
            }
        };

        if let Some(since) = req.header("If-Modified-Since").and_then(|v| if_modified_since(v, stat.size, dates)) {
            if stat.mtime <= since {
                self.cache.fetch_add(1, Ordering::Relaxed);
                metrics::record_static("cache");
                req.set_status(status::NOT_MODIFIED);
                return;
            }
        }

        let reader = match self.filesystem.open(&path) {
            Ok(reader) => reader,
            Err(e) => {
                tracing::warn!(path = %path, fs = %self.filesystem.describe(), error = %e, "Open failed");
                req.error(status::NOT_FOUND);
                return;
            }
        };

        let content_type = mime_guess::from_path(&path).first_raw().unwrap_or("text/plain");
        req.set_header("Last-Modified", dates.format(stat.mtime));
        req.set_header("Content-Length", stat.size.to_string());
        req.set_header("Content-Type", content_type);
        req.set_status(status::OK);
        if req.method == "GET" {
            req.reply.push(FileProducer::new(reader));
        }

        self.files.fetch_add(1, Ordering::Relaxed);
        metrics::record_static("file");
    }

    fn find_index(&self, dir: &str) -> Option<String> {
        self.index_files
            .iter()
            .map(|name| format!("{}{}", dir, name))
            .find(|candidate| self.filesystem.isfile(candidate))
    }
}

impl std::fmt::Debug for StaticFileHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticFileHandler")
            .field("filesystem", &self.filesystem.describe())
            .field("counters", &self.counters())
            .finish()
    }
}

/// The request path with a trailing slash, encoded for the wire, plus the
/// original query.
fn directory_location(req: &Request) -> String {
    let mut location = format!("{}/", utf8_percent_encode(&req.path, LOCATION_PATH));
    if !req.query.is_empty() {
        location.push('?');
        location.extend(utf8_percent_encode(&req.query, CONTROLS));
    }
    location
}

fn relative_path(req: &Request) -> &str {
    req.contextfree_path.trim_start_matches('/')
}

/// Epoch seconds of an `If-Modified-Since` value, or `None` when the
/// conditional check must be skipped.
///
/// A trailing `; length=N` hint must match `size`.
fn if_modified_since(value: &str, size: u64, dates: &DateCodec) -> Option<i64> {
    let (date, hint) = match value.split_once(';') {
        Some((date, rest)) => (date, Some(rest.trim())),
        None => (value, None),
    };
    if let Some(hint) = hint {
        let length = hint.strip_prefix("length=")?.trim().parse::<u64>().ok()?;
        if length != size {
            return None;
        }
    }
    match dates.parse_calibrated(date) {
        0 => None,
        epoch => Some(epoch),
    }
}
