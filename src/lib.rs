//! Portico: an embeddable HTTP/1.x application server.
//!
//! Requests are routed by URL-prefix context to handler functions, static
//! file stores (directories or zip archives) or adapter applications, and
//! run either inline or on a worker pool behind an error boundary.

pub mod config;
pub mod dispatch;
pub mod files;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;
pub mod security;
pub mod vfs;

pub use config::ServerConfig;
pub use http::{HttpServer, Orchestrator, Request};
pub use lifecycle::Shutdown;
pub use routing::RouteRegistry;
