//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Decoded path
//!     → router.rs (longest context prefix wins)
//!     → context.rs (strip prefix, first matching pattern, else catch-all)
//!     → handler.rs Target: Pattern | CatchAll | Files | Adapter
//!
//! Registration (at startup):
//!     RouteRegistry::add_context / add_file_store / add_adapter
//!     → Context::add_file(module).add_handler(name, f).add_pattern(re)
//!     → Shared as Arc<RouteRegistry>, immutable at runtime
//! ```
//!
//! # Design Decisions
//! - Patterns are compiled at registration, never on the request path
//! - Deterministic: registration order breaks every tie
//! - A closed set of targets instead of dynamic lookup by name

pub mod adapter;
pub mod context;
pub mod handler;
pub mod matcher;
pub mod router;

pub use adapter::{application, AppBody, Application, Environ, StartResponse};
pub use context::{Context, ContextKind, Route, RouteError};
pub use handler::{handler, Handler, HandlerError, HandlerResult, Outcome, Target};
pub use router::{Resolved, RouteMiss, RouteRegistry};
