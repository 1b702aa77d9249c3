//! Per-request state.
//!
//! # Responsibilities
//! - Split the request line and the header block
//! - Split the URI into path, params, query and fragment
//! - Carry everything handlers read (params, cookies, files, session)
//! - Carry everything handlers write (status, reply headers, body producers)

use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Instant;

use bytes::Bytes;
use regex::Regex;

use crate::http::form::{decode_component, FormError};
use crate::http::headers::Headers;
use crate::http::producer::{BoxProducer, Producer, SimpleProducer};
use crate::http::status;

/// Protocol version of the request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    /// No version on the request line, or one we do not speak.
    Http09,
    Http10,
    Http11,
}

impl HttpVersion {
    pub fn from_token(token: Option<&str>) -> Self {
        match token {
            Some("1.1") => HttpVersion::Http11,
            Some("1.0") => HttpVersion::Http10,
            _ => HttpVersion::Http09,
        }
    }

    /// Version written on the status line.
    pub fn reply_token(&self) -> &'static str {
        match self {
            HttpVersion::Http11 => "HTTP/1.1",
            _ => "HTTP/1.0",
        }
    }
}

/// `METHOD URI [HTTP/x.y]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub uri: String,
    pub version: HttpVersion,
}

impl RequestLine {
    pub fn parse(line: &str) -> Option<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"^([^ ]+) ([^ ]+)(?:( HTTP/([0-9.]+))$|$)").expect("request line pattern")
        });
        let caps = pattern.captures(line)?;
        Some(Self {
            method: caps[1].to_ascii_uppercase(),
            uri: caps[2].to_string(),
            version: HttpVersion::from_token(caps.get(4).map(|m| m.as_str())),
        })
    }
}

/// Request line plus headers, as read off the wire.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub line: RequestLine,
    pub headers: Headers,
}

impl RequestHead {
    /// Parse a header block (without the terminating blank line).
    pub fn parse(block: &str) -> Option<Self> {
        let mut lines = block.split("\r\n").flat_map(|l| l.split('\n'));
        let line = RequestLine::parse(lines.next()?.trim_end_matches('\r'))?;
        let headers = Headers::from_lines(lines.map(|l| l.trim_end_matches('\r')));
        Some(Self { line, headers })
    }
}

/// A file part of a multipart body, spooled to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub field: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub path: PathBuf,
    pub size: u64,
}

/// Everything the server will send back.
pub struct Reply {
    pub status: u16,
    pub headers: Headers,
    outgoing: Vec<BoxProducer>,
}

impl Reply {
    pub fn new() -> Self {
        Self { status: status::OK, headers: Headers::new(), outgoing: Vec::new() }
    }

    /// Append a body producer.
    pub fn push(&mut self, producer: impl Producer + 'static) {
        self.outgoing.push(Box::new(producer));
    }

    /// Append bytes to the body.
    pub fn write(&mut self, data: impl Into<Bytes>) {
        self.push(SimpleProducer::new(data));
    }

    pub fn clear_body(&mut self) {
        self.outgoing.clear();
    }

    pub fn has_body(&self) -> bool {
        !self.outgoing.is_empty()
    }

    pub(crate) fn take_outgoing(&mut self) -> Vec<BoxProducer> {
        std::mem::take(&mut self.outgoing)
    }
}

impl Default for Reply {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("producers", &self.outgoing.len())
            .finish()
    }
}

/// One HTTP request and the reply being built for it.
#[derive(Debug)]
pub struct Request {
    pub method: String,
    /// Raw request target.
    pub uri: String,
    pub version: HttpVersion,
    pub headers: Headers,
    pub body: Bytes,
    pub peer: SocketAddr,
    /// Client address, `X-Forwarded-For` first.
    pub ip: String,

    /// Decoded components of the request target.
    pub path: String,
    pub uri_params: String,
    pub query: String,
    pub fragment: String,

    pub args: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    /// Query and form values merged, repeated keys joined with `;`.
    pub params: HashMap<String, String>,
    pub files: Vec<UploadedFile>,
    pub cookies: HashMap<String, String>,

    pub session_id: Option<String>,
    /// Token for forms rendered by this request.
    pub csrf_token: Option<String>,

    /// Prefix of the context serving this request.
    pub context_prefix: Option<String>,
    /// Path below the context prefix, always starting with `/`.
    pub contextfree_path: String,

    pub reply: Reply,
    pub started: Instant,
}

impl Request {
    pub fn new(line: RequestLine, headers: Headers, body: Bytes, peer: SocketAddr) -> Self {
        Self {
            method: line.method,
            uri: line.uri,
            version: line.version,
            headers,
            body,
            peer,
            ip: peer.ip().to_string(),
            path: String::new(),
            uri_params: String::new(),
            query: String::new(),
            fragment: String::new(),
            args: Vec::new(),
            form: Vec::new(),
            params: HashMap::new(),
            files: Vec::new(),
            cookies: HashMap::new(),
            session_id: None,
            csrf_token: None,
            context_prefix: None,
            contextfree_path: String::new(),
            reply: Reply::new(),
            started: Instant::now(),
        }
    }

    /// Split `uri` into its components and percent-decode each of them.
    pub fn split_uri(&mut self) -> Result<(), FormError> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"^([^;?#]*)(;[^?#]*)?(\?[^#]*)?(#.*)?$").expect("uri pattern")
        });

        let target = strip_authority(&self.uri);
        let caps = pattern
            .captures(target)
            .ok_or_else(|| FormError::Encoding { field: "uri".to_string() })?;
        let part = |i: usize, marker: usize| {
            caps.get(i).map(|m| &m.as_str()[marker..]).unwrap_or("")
        };

        self.path = decode_component(part(1, 0), false, "path")?;
        self.uri_params = decode_component(part(2, 1), false, "params")?;
        self.query = part(3, 1).to_string();
        self.fragment = decode_component(part(4, 1), false, "fragment")?;
        if !self.path.starts_with('/') {
            self.path.insert(0, '/');
        }
        Ok(())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn write(&mut self, data: impl Into<Bytes>) {
        self.reply.write(data);
    }

    pub fn set_status(&mut self, code: u16) {
        self.reply.status = code;
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.reply.headers.set(name, value);
    }

    /// Replace the reply with the standard error page for `code`.
    pub fn error(&mut self, code: u16) {
        let page = status::error_page(code);
        self.reply.status = code;
        self.reply.clear_body();
        self.reply.headers.set("Content-Length", page.len().to_string());
        self.reply.headers.set("Content-Type", "text/html");
        self.reply.write(page);
    }

    /// Replace the reply with a short plain-text body.
    pub fn respond_text(&mut self, code: u16, text: impl Into<String>) {
        let text = text.into();
        self.reply.status = code;
        self.reply.clear_body();
        self.reply.headers.set("Content-Length", text.len().to_string());
        self.reply.headers.set("Content-Type", "text/plain");
        self.reply.write(text);
    }

    /// `METHOD URI HTTP/x.y`, as logged.
    pub fn request_line(&self) -> String {
        match self.version {
            HttpVersion::Http09 => format!("{} {}", self.method, self.uri),
            v => format!("{} {} {}", self.method, self.uri, v.reply_token()),
        }
    }

    /// Remove spool files a handler left behind.
    pub fn remove_spooled_uploads(&mut self) {
        for file in self.files.drain(..) {
            if file.path.exists() {
                match fs::remove_file(&file.path) {
                    Ok(()) => tracing::debug!(path = %file.path.display(), "Removed leftover upload"),
                    Err(e) => tracing::warn!(path = %file.path.display(), error = %e, "Could not remove upload"),
                }
            }
        }
    }
}

/// Drop `scheme://host` from absolute-form request targets.
fn strip_authority(uri: &str) -> &str {
    match uri.find("://") {
        Some(pos) if !uri[..pos].contains('/') => {
            let rest = &uri[pos + 3..];
            rest.find('/').map(|i| &rest[i..]).unwrap_or("/")
        }
        _ => uri,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> Request {
        let line = RequestLine { method: "GET".into(), uri: uri.into(), version: HttpVersion::Http11 };
        Request::new(line, Headers::new(), Bytes::new(), "127.0.0.1:9".parse().unwrap())
    }

    #[test]
    fn request_line_variants() {
        let line = RequestLine::parse("get /a?b=1 HTTP/1.1").unwrap();
        assert_eq!(line.method, "GET");
        assert_eq!(line.uri, "/a?b=1");
        assert_eq!(line.version, HttpVersion::Http11);

        let old = RequestLine::parse("GET /").unwrap();
        assert_eq!(old.version, HttpVersion::Http09);

        assert!(RequestLine::parse("GET /a b HTTP/1.1").is_none());
        assert!(RequestLine::parse("GET").is_none());
        assert!(RequestLine::parse("").is_none());
    }

    #[test]
    fn head_block() {
        let head = RequestHead::parse("POST /x HTTP/1.0\r\nHost: h\r\nContent-Length: 3").unwrap();
        assert_eq!(head.line.version, HttpVersion::Http10);
        assert_eq!(head.headers.get("content-length"), Some("3"));
    }

    #[test]
    fn split_uri_decodes_components() {
        let mut req = request("/a%20b;v=1?x=%41&y#frag%21");
        req.split_uri().unwrap();
        assert_eq!(req.path, "/a b");
        assert_eq!(req.uri_params, "v=1");
        assert_eq!(req.query, "x=%41&y");
        assert_eq!(req.fragment, "frag!");
    }

    #[test]
    fn split_uri_absolute_form() {
        let mut req = request("http://example.org/docs/?q=1");
        req.split_uri().unwrap();
        assert_eq!(req.path, "/docs/");
        assert_eq!(req.query, "q=1");
    }

    #[test]
    fn split_uri_rejects_invalid_utf8() {
        let mut req = request("/%ff%fe");
        assert!(req.split_uri().is_err());
    }

    #[test]
    fn error_replaces_body() {
        let mut req = request("/");
        req.write("partial");
        req.error(404);
        assert_eq!(req.reply.status, 404);
        assert_eq!(req.reply.headers.get("Content-Type"), Some("text/html"));
        let len: usize = req.reply.headers.get("Content-Length").unwrap().parse().unwrap();
        assert_eq!(len, status::error_page(404).len());
    }
}
