//! Handler calling convention.
//!
//! A handler receives the request, may write status, headers and body on
//! `request.reply`, and returns an [`Outcome`]:
//! - `Outcome::Done`: the reply stands as written
//! - `Outcome::Status(code)` with `code < 400`: final status
//! - `Outcome::Status(code)` with `code >= 400`: error status, the body is
//!   replaced by the reason phrase
//!
//! Returning `Err` (or panicking) is a handler failure and ends in a 500.

use std::sync::Arc;

use crate::files::FileStore;
use crate::http::Request;
use crate::routing::adapter::Application;

/// Error type handlers may return; anything implementing `Error` converts.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Status(u16),
}

impl From<u16> for Outcome {
    fn from(code: u16) -> Self {
        Outcome::Status(code)
    }
}

pub type HandlerResult = Result<Outcome, HandlerError>;

/// A registered handler function.
pub type Handler = Arc<dyn Fn(&mut Request) -> HandlerResult + Send + Sync>;

/// Wrap a closure or function as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&mut Request) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// What a resolved route will run.
#[derive(Clone)]
pub enum Target {
    /// First pattern that matched.
    Pattern { handler: Handler, description: Arc<str> },
    /// Context fallback when no pattern matched.
    CatchAll(Handler),
    /// Static delivery from a file store.
    Files(Arc<FileStore>),
    /// Whole subtree delegated to an application object.
    Adapter(Arc<dyn Application>),
}

impl Target {
    /// Short label for logs.
    pub fn label(&self) -> &str {
        match self {
            Target::Pattern { description, .. } => description,
            Target::CatchAll(_) => "catch-all",
            Target::Files(_) => "file-store",
            Target::Adapter(_) => "adapter",
        }
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Target({})", self.label())
    }
}
