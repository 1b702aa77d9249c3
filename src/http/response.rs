//! Response finalization.
//!
//! # Responsibilities
//! - Decide whether the connection stays open after this reply
//! - Choose between `Content-Length` framing, chunked framing and close-delimited
//! - Add the default headers (`Server`, `Date`, `Cache-Control`, `Connection`)
//! - Build the status line and header block
//! - Compose the producer chain handed to the connection writer
//!
//! # Persistent connections
//! ```text
//! HTTP/1.0  keep-alive requested + Content-Length  → keep (Connection: Keep-Alive)
//!           anything else                          → close
//! HTTP/1.1  Connection: close                      → close
//!           Content-Length or no body              → keep
//!           Transfer-Encoding other than chunked   → close
//!           chunking enabled                       → keep, chunked
//!           otherwise                              → close
//! other     → close
//! ```
//! A 500 is never chunked; it closes the connection instead.

use crate::http::date::DateCodec;
use crate::http::headers::{is_header_safe, Headers};
use crate::http::producer::{
    BoxProducer, ChunkedProducer, CompositeProducer, GlobbingProducer, HookedProducer, SentHook, SimpleProducer,
};
use crate::http::request::{HttpVersion, Request};
use crate::http::status;

#[derive(Debug, Clone)]
pub struct ResponseSettings {
    pub server_name: String,
    pub default_no_cache: bool,
    pub use_chunked: bool,
}

impl Default for ResponseSettings {
    fn default() -> Self {
        Self {
            server_name: format!("portico/{}", env!("CARGO_PKG_VERSION")),
            default_no_cache: true,
            use_chunked: true,
        }
    }
}

/// A reply ready for the wire.
pub struct Finalized {
    pub producer: BoxProducer,
    pub close: bool,
    pub status: u16,
}

impl Finalized {
    /// Standalone error reply for failures outside any request context
    /// (unparseable heads, oversized requests, lost jobs). Always closes.
    pub fn bare(code: u16, settings: &ResponseSettings, dates: &DateCodec) -> Self {
        let page = status::error_page(code);
        let mut headers = Headers::new();
        headers.set("Content-Type", "text/html");
        headers.set("Content-Length", page.len().to_string());
        headers.set("Connection", "close");
        add_defaults(&mut headers, settings, dates);

        let head = build_reply_header(HttpVersion::Http10, code, &headers);
        let chain = CompositeProducer::new([
            Box::new(SimpleProducer::new(head)) as BoxProducer,
            Box::new(SimpleProducer::new(page)),
        ]);
        Self { producer: Box::new(GlobbingProducer::new(Box::new(chain))), close: true, status: code }
    }
}

impl std::fmt::Debug for Finalized {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Finalized").field("status", &self.status).field("close", &self.close).finish()
    }
}

/// Turn the reply accumulated on `req` into a producer chain.
///
/// `sent` fires once with the number of bytes produced, header included.
pub fn finalize(
    req: &mut Request,
    settings: &ResponseSettings,
    dates: &DateCodec,
    sent: Option<SentHook>,
) -> Finalized {
    let code = req.reply.status;
    let bodyless = status::is_bodyless(code) || req.method == "HEAD";
    let connection = req.header("Connection").unwrap_or("").to_ascii_lowercase();
    let version = req.version;
    let headers = &mut req.reply.headers;
    let has_length = headers.contains("Content-Length");
    let handler_encoding = headers.get("Transfer-Encoding").map(|te| te.eq_ignore_ascii_case("chunked"));

    let mut chunked = false;
    let mut close = match version {
        HttpVersion::Http10 => {
            if connection == "keep-alive" && has_length {
                headers.set("Connection", "Keep-Alive");
                false
            } else {
                true
            }
        }
        HttpVersion::Http11 => {
            if connection == "close" {
                true
            } else if has_length || bodyless {
                false
            } else if let Some(is_chunked) = handler_encoding {
                chunked = is_chunked;
                !is_chunked
            } else if settings.use_chunked {
                headers.set("Transfer-Encoding", "chunked");
                chunked = true;
                false
            } else {
                true
            }
        }
        HttpVersion::Http09 => true,
    };

    if code == status::INTERNAL_SERVER_ERROR && chunked {
        chunked = false;
        headers.remove("Transfer-Encoding");
        close = true;
    }

    if settings.default_no_cache && !headers.contains("Cache-Control") {
        headers.set("Cache-Control", "no-cache");
    }
    if close {
        headers.set("Connection", "close");
    }
    add_defaults(headers, settings, dates);

    let head = build_reply_header(version, code, headers);
    let outgoing = req.reply.take_outgoing();

    let mut chain = CompositeProducer::new([Box::new(SimpleProducer::new(head)) as BoxProducer]);
    if !bodyless {
        let body: BoxProducer = Box::new(CompositeProducer::new(outgoing));
        if chunked {
            chain.push(Box::new(ChunkedProducer::new(body)));
        } else {
            chain.push(body);
        }
    }

    let inner: BoxProducer = match sent {
        Some(hook) => Box::new(HookedProducer::new(Box::new(chain), hook)),
        None => Box::new(chain),
    };
    Finalized { producer: Box::new(GlobbingProducer::new(inner)), close, status: code }
}

/// Status line plus header block, terminated by the blank line.
///
/// Headers that would corrupt the block are dropped.
pub fn build_reply_header(version: HttpVersion, code: u16, headers: &Headers) -> String {
    let mut head = format!("{} {} {}\r\n", version.reply_token(), code, status::reason(code));
    for (name, value) in headers.iter() {
        if !is_header_safe(name) || !is_header_safe(value) || name.contains(':') {
            tracing::warn!(header = %name.escape_debug(), "Dropping reply header with unsafe characters");
            continue;
        }
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    head
}

fn add_defaults(headers: &mut Headers, settings: &ResponseSettings, dates: &DateCodec) {
    if !headers.contains("Server") {
        headers.set("Server", settings.server_name.clone());
    }
    if !headers.contains("Date") {
        headers.set("Date", dates.format(chrono::Utc::now().timestamp()));
    }
}
