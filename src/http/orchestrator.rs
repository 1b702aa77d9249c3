//! Request lifecycle.
//!
//! # Data Flow
//! ```text
//! received
//!     → split URI                      (bad encoding: 400)
//!     → resolve context and target     (no route: 404)
//!     → cookies, query, form, params   (bad encoding: 400)
//!     → session, CSRF on form POSTs    (missing or forged token: 400)
//!     → Dispatcher (inline or worker pool)
//!         → handler inside the error boundary (failure: 500 + XID)
//!         → finished hooks
//!     → finalize (keep-alive decision, producer chain, access log hook)
//! ```
//!
//! # Design Decisions
//! - Routing, protocol and filesystem errors become replies where they occur
//! - Handler failures (errors and panics) are contained here and never reach
//!   the connection loop
//! - Users see an XID; the log carries the error, its digests and the request

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::http::date::DateCodec;
use crate::http::form::{self, merge_params, parse_cookies, parse_query};
use crate::http::producer::SentHook;
use crate::http::response::{finalize, Finalized, ResponseSettings};
use crate::http::status;
use crate::http::Request;
use crate::observability::logging::ACCESS_TARGET;
use crate::observability::{metrics, Incident, ServerStats};
use crate::routing::adapter;
use crate::routing::{HandlerResult, Outcome, RouteRegistry, Target};
use crate::security::{CsrfError, CsrfGuard, MemorySessions, NoSessions, SessionLookup, TOKEN_FIELD};

/// Callbacks around handler execution.
pub trait RequestHooks: Send + Sync {
    /// A handler failed; undo whatever it left half done.
    fn rollback(&self, _req: &Request) {}

    /// Runs after every handler invocation, failed or not.
    fn finished(&self, _req: &Request) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl RequestHooks for NoHooks {}

pub struct Orchestrator {
    registry: Arc<RouteRegistry>,
    dispatcher: Dispatcher,
    dates: Arc<DateCodec>,
    csrf: Option<Arc<CsrfGuard>>,
    sessions: Arc<dyn SessionLookup>,
    hooks: Arc<dyn RequestHooks>,
    response: ResponseSettings,
    testing: bool,
    support_email: Option<String>,
    spool_dir: PathBuf,
    stats: Arc<ServerStats>,
}

impl Orchestrator {
    pub fn builder(registry: RouteRegistry) -> OrchestratorBuilder {
        OrchestratorBuilder::new(registry)
    }

    pub fn registry(&self) -> &RouteRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn dates(&self) -> &DateCodec {
        &self.dates
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    pub fn response_settings(&self) -> &ResponseSettings {
        &self.response
    }

    pub fn sessions(&self) -> &Arc<dyn SessionLookup> {
        &self.sessions
    }

    /// Run one request to completion and hand back the reply.
    pub async fn process(self: &Arc<Self>, mut req: Request) -> Finalized {
        self.stats.request();

        let req = match self.prepare(&mut req).await {
            None => req,
            Some(target) => {
                let this = Arc::clone(self);
                let label = req.request_line();
                let job = move || {
                    let mut req = req;
                    this.invoke(&target, &mut req);
                    req
                };
                match self.dispatcher.run(&label, job).await {
                    Ok(req) => req,
                    Err(e) => {
                        tracing::error!(request = %label, error = %e, "Dispatch failed");
                        return Finalized::bare(status::INTERNAL_SERVER_ERROR, &self.response, &self.dates);
                    }
                }
            }
        };

        self.finish(req)
    }

    /// Everything before the handler. `None` means the reply is already final.
    async fn prepare(&self, req: &mut Request) -> Option<Target> {
        if let Err(e) = req.split_uri() {
            tracing::info!(uri = %req.uri, error = %e, "Rejecting undecodable request target");
            req.error(status::BAD_REQUEST);
            return None;
        }

        if let Some(forwarded) = req.header("X-Forwarded-For") {
            if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
                req.ip = first.to_string();
            }
        }

        let (target, csrf_protected) = match self.registry.resolve(&req.path) {
            Ok(resolved) => {
                req.context_prefix = Some(resolved.context.prefix().to_string());
                req.contextfree_path = resolved.contextfree_path;
                (resolved.target, resolved.context.csrf_protected())
            }
            Err(miss) => {
                tracing::debug!(path = %req.path, miss = ?miss, "No route");
                let body = format!("File {} not found", req.path);
                req.respond_text(status::NOT_FOUND, body);
                return None;
            }
        };

        req.cookies = parse_cookies(req.headers.get_all("Cookie"));

        match parse_query(&req.query) {
            Ok(args) => req.args = args,
            Err(e) => {
                tracing::info!(query = %req.query, error = %e, "Rejecting undecodable query");
                req.error(status::BAD_REQUEST);
                return None;
            }
        }

        if !req.body.is_empty() {
            let content_type = req.header("Content-Type").map(str::to_string);
            match form::collect(content_type.as_deref(), req.body.clone(), &self.spool_dir).await {
                Ok(form) => {
                    req.form = form.fields;
                    req.files = form.files;
                }
                Err(e) => {
                    tracing::info!(path = %req.path, error = %e, "Rejecting undecodable form");
                    req.error(status::BAD_REQUEST);
                    return None;
                }
            }
        }
        req.params = merge_params(&req.args, &req.form);

        // Static deliveries embed no forms, so they neither open a session
        // nor need a token.
        if matches!(target, Target::Files(_)) {
            return Some(target);
        }

        req.session_id = self.sessions.session_for(req);

        if let Some(csrf) = &self.csrf {
            let session = req.session_id.clone().unwrap_or_default();
            let has_form = !req.form.is_empty() || !req.files.is_empty();
            if req.method == "POST" && csrf_protected && has_form {
                match csrf.validate(&session, req.form_value(TOKEN_FIELD)) {
                    Ok(()) => {}
                    Err(CsrfError::Expired) => {
                        tracing::debug!(path = %req.path, "Expired CSRF token accepted, issuing a fresh one");
                    }
                    Err(e) => {
                        tracing::info!(path = %req.path, ip = %req.ip, error = %e, "CSRF validation failed");
                        req.error(status::BAD_REQUEST);
                        return None;
                    }
                }
            }
            req.csrf_token = Some(csrf.generate(&session));
        }

        Some(target)
    }

    /// Run the target inside the error boundary.
    fn invoke(&self, target: &Target, req: &mut Request) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.call_target(target, req)));
        match result {
            Ok(Ok(Outcome::Done)) => {}
            Ok(Ok(Outcome::Status(code))) => apply_status(req, code),
            Ok(Err(error)) => {
                let message = error.to_string();
                self.contain_failure(req, &message, &describe_error(error.as_ref()));
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                self.contain_failure(req, &message, &format!("handler panicked: {}", message));
            }
        }

        self.hooks.finished(req);
    }

    fn call_target(&self, target: &Target, req: &mut Request) -> HandlerResult {
        match target {
            Target::Pattern { handler, .. } | Target::CatchAll(handler) => handler(req),
            Target::Files(store) => {
                store.handle(req, &self.dates);
                Ok(Outcome::Done)
            }
            Target::Adapter(app) => adapter::serve(app.as_ref(), req),
        }
    }

    fn contain_failure(&self, req: &mut Request, message: &str, trace: &str) {
        self.hooks.rollback(req);
        let incident = Incident::new(message, trace);
        self.stats.exception();

        tracing::error!(
            xid = %incident.xid,
            error_hash = %incident.error_hash,
            trace_hash = %incident.trace_hash,
            method = %req.method,
            path = %req.contextfree_path,
            ip = %req.ip,
            error = %trace,
            "Handler failed"
        );
        if self.support_email.is_none() {
            tracing::debug!("No support address configured for error pages");
        }

        let page = if self.testing {
            format!(
                "<html><head><title>Internal Server Error</title></head><body>\
                 <h1>Internal Server Error</h1><pre>{}</pre></body></html>",
                status::escape_html(trace)
            )
        } else {
            let contact = match &self.support_email {
                Some(email) => format!(
                    "<p>If the problem persists, contact <a href=\"mailto:{0}\">{0}</a> and quote this id.</p>",
                    status::escape_html(email)
                ),
                None => String::new(),
            };
            format!(
                "<html><head><title>Internal Server Error</title></head><body>\
                 <h1>Internal Server Error</h1><p>The request could not be completed. Error id: {}</p>{}\
                 </body></html>",
                incident.xid, contact
            )
        };

        req.reply.clear_body();
        req.reply.headers.remove("Content-Length");
        req.reply.headers.remove("Transfer-Encoding");
        req.reply.status = status::INTERNAL_SERVER_ERROR;
        req.reply.headers.set("X-XID", incident.xid);
        req.reply.headers.set("Content-Type", "text/html; charset=utf-8");
        req.reply.headers.set("Content-Length", page.len().to_string());
        req.reply.write(page);
    }

    fn finish(&self, mut req: Request) -> Finalized {
        req.remove_spooled_uploads();

        let code = req.reply.status;
        let stats = Arc::clone(&self.stats);
        let peer = req.peer;
        let line = req.request_line();
        let method = req.method.clone();
        let started = req.started;
        let sent: SentHook = Box::new(move |bytes| {
            stats.sent(bytes);
            metrics::record_request(&method, code, started);
            tracing::info!(target: ACCESS_TARGET, peer = %peer, request = %line, status = code, bytes, "");
        });

        finalize(&mut req, &self.response, &self.dates, Some(sent))
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("contexts", &self.registry.contexts().len())
            .field("dispatcher", &self.dispatcher)
            .field("csrf", &self.csrf.is_some())
            .field("testing", &self.testing)
            .finish()
    }
}

/// Handler status convention: errors replace the body, others only set the status.
fn apply_status(req: &mut Request, code: u16) {
    if code >= 400 {
        req.respond_text(code, status::reason(code));
    } else if code > 10 {
        req.reply.status = code;
    }
}

fn describe_error(error: &(dyn std::error::Error + 'static)) -> String {
    let mut text = format!("{}\n{:?}", error, error);
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(&format!("\ncaused by: {}", cause));
        source = cause.source();
    }
    text
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Assembles an [`Orchestrator`].
pub struct OrchestratorBuilder {
    registry: RouteRegistry,
    dispatcher: Dispatcher,
    dates: Arc<DateCodec>,
    csrf: Option<Arc<CsrfGuard>>,
    sessions: Arc<dyn SessionLookup>,
    hooks: Arc<dyn RequestHooks>,
    response: ResponseSettings,
    testing: bool,
    support_email: Option<String>,
    spool_dir: PathBuf,
    stats: Arc<ServerStats>,
}

impl OrchestratorBuilder {
    fn new(registry: RouteRegistry) -> Self {
        Self {
            registry,
            dispatcher: Dispatcher::Inline,
            dates: Arc::new(DateCodec::new()),
            csrf: None,
            sessions: Arc::new(NoSessions),
            hooks: Arc::new(NoHooks),
            response: ResponseSettings::default(),
            testing: false,
            support_email: None,
            spool_dir: std::env::temp_dir(),
            stats: Arc::new(ServerStats::new()),
        }
    }

    /// Take every setting the configuration carries. CSRF uses the configured
    /// secret, or a random one.
    pub fn configure(mut self, config: &ServerConfig) -> Self {
        self.response = ResponseSettings {
            server_name: config.server.server_name.clone(),
            default_no_cache: config.server.default_no_cache,
            use_chunked: config.server.use_chunked,
        };
        self.testing = config.server.testing;
        self.support_email = config.server.support_email.clone();
        self.spool_dir = config.paths.temp_dir.clone();
        self.csrf = if config.security.csrf_enabled {
            let limit = Duration::from_secs(config.security.csrf_time_limit_secs);
            Some(Arc::new(match &config.security.csrf_secret {
                Some(secret) => CsrfGuard::new(secret.as_bytes().to_vec(), limit),
                None => CsrfGuard::with_random_secret(limit),
            }))
        } else {
            None
        };
        if self.csrf.is_some() {
            self.sessions = Arc::new(MemorySessions::new(config.security.session_cookie.clone()));
        }
        self
    }

    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn dates(mut self, dates: Arc<DateCodec>) -> Self {
        self.dates = dates;
        self
    }

    pub fn csrf(mut self, guard: Option<CsrfGuard>) -> Self {
        self.csrf = guard.map(Arc::new);
        self
    }

    pub fn sessions(mut self, sessions: Arc<dyn SessionLookup>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn RequestHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn response_settings(mut self, settings: ResponseSettings) -> Self {
        self.response = settings;
        self
    }

    pub fn testing(mut self, testing: bool) -> Self {
        self.testing = testing;
        self
    }

    pub fn support_email(mut self, email: Option<String>) -> Self {
        self.support_email = email;
        self
    }

    pub fn spool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spool_dir = dir.into();
        self
    }

    pub fn stats(mut self, stats: Arc<ServerStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn build(self) -> Orchestrator {
        Orchestrator {
            registry: Arc::new(self.registry),
            dispatcher: self.dispatcher,
            dates: self.dates,
            csrf: self.csrf,
            sessions: self.sessions,
            hooks: self.hooks,
            response: self.response,
            testing: self.testing,
            support_email: self.support_email,
            spool_dir: self.spool_dir,
            stats: self.stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::headers::Headers;
    use crate::http::producer::drain;
    use crate::http::request::{HttpVersion, RequestLine};
    use crate::routing::handler;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(method: &str, uri: &str, headers: &[&str], body: impl Into<Bytes>) -> Request {
        let line = RequestLine { method: method.into(), uri: uri.into(), version: HttpVersion::Http11 };
        Request::new(
            line,
            Headers::from_lines(headers.iter().copied()),
            body.into(),
            "10.1.1.1:4000".parse().unwrap(),
        )
    }

    fn wire(mut finalized: Finalized) -> String {
        String::from_utf8_lossy(&drain(finalized.producer.as_mut()).unwrap()).into_owned()
    }

    fn echo_registry() -> RouteRegistry {
        let mut registry = RouteRegistry::new();
        let ctx = registry.add_context("/app", "/srv");
        ctx.add_pattern(
            "/echo",
            handler(|req| {
                let text = format!("{}|{}|{}", req.contextfree_path, req.param("q").unwrap_or(""), req.ip);
                req.write(text);
                Ok(Outcome::Done)
            }),
        )
        .unwrap();
        ctx.add_pattern("/teapot", handler(|_req| Ok(Outcome::Status(418)))).unwrap();
        ctx.add_pattern("/created", handler(|_req| Ok(Outcome::Status(201)))).unwrap();
        ctx.add_pattern("/fail", handler(|_req| Err("database exploded".into()))).unwrap();
        ctx.add_pattern("/panic", handler(|_req| panic!("index out of range"))).unwrap();
        registry
    }

    #[tokio::test]
    async fn handler_sees_decoded_request() {
        let orchestrator = Arc::new(Orchestrator::builder(echo_registry()).build());
        let req = request("GET", "/app/echo?q=a+b", &["X-Forwarded-For: 203.0.113.9, 10.0.0.1"], "");
        let text = wire(orchestrator.process(req).await);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("/echo|a b|203.0.113.9"));
    }

    #[tokio::test]
    async fn status_convention() {
        let orchestrator = Arc::new(Orchestrator::builder(echo_registry()).build());
        let text = wire(orchestrator.process(request("GET", "/app/teapot", &[], "")).await);
        assert!(text.starts_with("HTTP/1.1 418 I'm a Teapot\r\n"));
        assert!(text.ends_with("I'm a Teapot"));

        let text = wire(orchestrator.process(request("GET", "/app/created", &[], "")).await);
        assert!(text.starts_with("HTTP/1.1 201 Created\r\n"));
    }

    #[tokio::test]
    async fn missing_routes_are_404() {
        let orchestrator = Arc::new(Orchestrator::builder(echo_registry()).build());
        let text = wire(orchestrator.process(request("GET", "/app/nothing", &[], "")).await);
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.ends_with("File /app/nothing not found"));

        let text = wire(orchestrator.process(request("GET", "/elsewhere", &[], "")).await);
        assert!(text.ends_with("File /elsewhere not found"));
    }

    #[tokio::test]
    async fn bad_encoding_is_400() {
        let orchestrator = Arc::new(Orchestrator::builder(echo_registry()).build());
        let text = wire(orchestrator.process(request("GET", "/app/%ff", &[], "")).await);
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        let text = wire(orchestrator.process(request("GET", "/app/echo?q=%fe", &[], "")).await);
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    struct CountingHooks {
        rollbacks: AtomicUsize,
        finished: AtomicUsize,
    }

    impl RequestHooks for CountingHooks {
        fn rollback(&self, _req: &Request) {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
        fn finished(&self, _req: &Request) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn failures_are_contained() {
        let hooks = Arc::new(CountingHooks { rollbacks: AtomicUsize::new(0), finished: AtomicUsize::new(0) });
        let orchestrator = Arc::new(
            Orchestrator::builder(echo_registry())
                .hooks(hooks.clone())
                .support_email(Some("ops@example.org".into()))
                .build(),
        );

        for path in ["/app/fail", "/app/panic"] {
            let text = wire(orchestrator.process(request("GET", path, &[], "")).await);
            assert!(text.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
            assert!(text.contains("X-XID: "));
            assert!(text.contains("ops@example.org"));
            assert!(!text.contains("database exploded"));
            assert!(!text.contains("index out of range"));
        }
        assert_eq!(hooks.rollbacks.load(Ordering::SeqCst), 2);
        assert_eq!(hooks.finished.load(Ordering::SeqCst), 2);
        assert_eq!(orchestrator.stats().snapshot().exceptions, 2);

        orchestrator.process(request("GET", "/app/echo", &[], "")).await;
        assert_eq!(hooks.finished.load(Ordering::SeqCst), 3);
        assert_eq!(hooks.rollbacks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn testing_mode_shows_the_error() {
        let orchestrator = Arc::new(Orchestrator::builder(echo_registry()).testing(true).build());
        let text = wire(orchestrator.process(request("GET", "/app/fail", &[], "")).await);
        assert!(text.contains("<pre>"));
        assert!(text.contains("database exploded"));
    }

    #[tokio::test]
    async fn threaded_dispatch() {
        let orchestrator = Arc::new(
            Orchestrator::builder(echo_registry())
                .dispatcher(Dispatcher::from_threads(2).unwrap())
                .build(),
        );
        let text = wire(orchestrator.process(request("GET", "/app/echo?q=t", &[], "")).await);
        assert!(text.contains("/echo|t|10.1.1.1"));
        let text = wire(orchestrator.process(request("GET", "/app/panic", &[], "")).await);
        assert!(text.starts_with("HTTP/1.1 500"));
    }

    fn form_registry(calls: Arc<AtomicUsize>) -> RouteRegistry {
        let mut registry = RouteRegistry::new();
        registry
            .add_context("/forms", "/srv")
            .add_pattern(
                "/save",
                handler(move |req| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let token = req.csrf_token.clone().unwrap_or_default();
                    req.write(token);
                    Ok(Outcome::Done)
                }),
            )
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn csrf_guards_form_posts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let orchestrator = Arc::new(
            Orchestrator::builder(form_registry(calls.clone()))
                .csrf(Some(CsrfGuard::new(b"k".to_vec(), Duration::from_secs(60))))
                .build(),
        );
        let form = &["Content-Type: application/x-www-form-urlencoded"];

        let text = wire(orchestrator.process(request("POST", "/forms/save", form, "name=x")).await);
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let text = wire(orchestrator.process(request("POST", "/forms/save", form, "name=x&csrf_token=1%23%23abc")).await);
        assert!(text.starts_with("HTTP/1.1 400"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let token = CsrfGuard::new(b"k".to_vec(), Duration::from_secs(60)).generate("");
        let body = format!("name=x&csrf_token={}", token.replace('#', "%23"));
        let text = wire(orchestrator.process(request("POST", "/forms/save", form, body)).await);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let text = wire(orchestrator.process(request("GET", "/forms/save", &[], "")).await);
        assert!(text.contains("##"));
    }

    #[tokio::test]
    async fn exempt_contexts_skip_csrf() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut registry = RouteRegistry::new();
        registry
            .add_context("/hooks", "/srv")
            .exempt_csrf()
            .add_pattern(
                "/in",
                handler(move |_req| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Outcome::Done)
                }),
            )
            .unwrap();
        let orchestrator = Arc::new(
            Orchestrator::builder(registry)
                .csrf(Some(CsrfGuard::new(b"k".to_vec(), Duration::from_secs(60))))
                .build(),
        );
        let form = &["Content-Type: application/x-www-form-urlencoded"];
        let text = wire(orchestrator.process(request("POST", "/hooks/in", form, "name=x")).await);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
