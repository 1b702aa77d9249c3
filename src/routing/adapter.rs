//! Delegation of a whole context to an application object.
//!
//! # Data Flow
//! ```text
//! Request ─→ Environ (CGI-style variables + body as input stream)
//!         ─→ Application::call(environ, &mut StartResponse)
//!                 start("200 OK", headers)   status + headers onto the reply
//!                 returns body iterator      drained, then pushed as a producer
//! ```
//!
//! The application must call `start` before returning its body iterator.
//! The iterator is drained inside `serve`, so a failing body is handled by
//! the request's error boundary like any other handler failure.

use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Cursor};

use bytes::Bytes;

use crate::http::producer::Producer;
use crate::http::Request;
use crate::routing::handler::{HandlerError, HandlerResult, Outcome};

/// Body chunks returned by an application.
pub type AppBody = Box<dyn Iterator<Item = Bytes> + Send>;

/// Request environment handed to an application.
#[derive(Debug, Clone)]
pub struct Environ {
    vars: BTreeMap<String, String>,
    pub input: Cursor<Bytes>,
}

impl Environ {
    pub fn from_request(req: &Request) -> Self {
        let mut vars = BTreeMap::new();
        vars.insert("REQUEST_METHOD".to_string(), req.method.clone());
        vars.insert("SCRIPT_NAME".to_string(), req.context_prefix.clone().unwrap_or_default());
        vars.insert("PATH_INFO".to_string(), req.contextfree_path.clone());
        vars.insert("QUERY_STRING".to_string(), req.query.clone());
        vars.insert("CONTENT_TYPE".to_string(), req.header("Content-Type").unwrap_or("").to_string());
        vars.insert("CONTENT_LENGTH".to_string(), req.body.len().to_string());
        vars.insert("REMOTE_ADDR".to_string(), req.ip.clone());
        vars.insert("SERVER_PROTOCOL".to_string(), req.version.reply_token().to_string());

        let host = req.header("Host").unwrap_or("");
        let (name, port) = match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => (name, port),
            _ => (host, "80"),
        };
        vars.insert("SERVER_NAME".to_string(), name.to_string());
        vars.insert("SERVER_PORT".to_string(), port.to_string());

        for (name, value) in req.headers.iter() {
            if name.eq_ignore_ascii_case("content-type") || name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            let key = format!("HTTP_{}", name.to_ascii_uppercase().replace('-', "_"));
            vars.entry(key)
                .and_modify(|existing: &mut String| {
                    existing.push(',');
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        Self { vars, input: Cursor::new(req.body.clone()) }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }
}

/// The start callback: records status and headers for the reply.
#[derive(Debug, Default)]
pub struct StartResponse {
    status: Option<u16>,
    headers: Vec<(String, String)>,
}

impl StartResponse {
    /// `status` is a status line such as `"200 OK"`.
    pub fn start(&mut self, status: &str, headers: Vec<(String, String)>) -> Result<(), HandlerError> {
        let code = status
            .split_whitespace()
            .next()
            .and_then(|token| token.parse::<u16>().ok())
            .ok_or_else(|| format!("invalid status line {:?}", status))?;
        self.status = Some(code);
        self.headers = headers;
        Ok(())
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }
}

/// An application a context can delegate to.
pub trait Application: Send + Sync {
    fn call(&self, environ: Environ, start: &mut StartResponse) -> Result<AppBody, HandlerError>;
}

/// Application backed by a closure.
pub struct FnApplication<F>(F);

impl<F> Application for FnApplication<F>
where
    F: Fn(Environ, &mut StartResponse) -> Result<AppBody, HandlerError> + Send + Sync,
{
    fn call(&self, environ: Environ, start: &mut StartResponse) -> Result<AppBody, HandlerError> {
        (self.0)(environ, start)
    }
}

/// Wrap a closure as an [`Application`].
pub fn application<F>(f: F) -> FnApplication<F>
where
    F: Fn(Environ, &mut StartResponse) -> Result<AppBody, HandlerError> + Send + Sync,
{
    FnApplication(f)
}

struct BodyProducer {
    chunks: VecDeque<Bytes>,
}

impl Producer for BodyProducer {
    fn more(&mut self) -> io::Result<Option<Bytes>> {
        Ok(self.chunks.pop_front())
    }
}

/// Run `app` for `req`, moving its status, headers and body onto the reply.
pub fn serve(app: &dyn Application, req: &mut Request) -> HandlerResult {
    let environ = Environ::from_request(req);
    let mut start = StartResponse::default();
    let body = app.call(environ, &mut start)?;

    let code = start.status.ok_or("application returned without starting the response")?;
    let chunks: VecDeque<Bytes> = body.filter(|chunk| !chunk.is_empty()).collect();

    req.reply.status = code;
    for (name, value) in start.headers {
        req.reply.headers.append(name, value);
    }
    req.reply.push(BodyProducer { chunks });
    Ok(Outcome::Done)
}
