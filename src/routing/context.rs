//! URL-prefix contexts.
//!
//! A context owns one URL prefix and one of three kinds of content:
//! an ordered pattern table with an optional catch-all, a file store, or an
//! adapter application.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::files::FileStore;
use crate::routing::adapter::Application;
use crate::routing::handler::{Handler, Target};
use crate::routing::matcher::{Matcher, PathPrefixMatcher, PatternMatcher};

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("context {0} does not take handler patterns")]
    NotAHandlerContext(String),
}

/// One `pattern -> handler` binding.
#[derive(Clone)]
pub struct Route {
    matcher: PatternMatcher,
    handler: Handler,
    description: Arc<str>,
}

impl Route {
    pub fn pattern(&self) -> &str {
        self.matcher.source()
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern())
            .field("description", &self.description)
            .finish()
    }
}

pub enum ContextKind {
    Handlers { routes: Vec<Route>, catch_all: Option<Handler> },
    Files(Arc<FileStore>),
    Adapter(Arc<dyn Application>),
}

/// A registered URL-prefix scope.
pub struct Context {
    prefix: PathPrefixMatcher,
    root: PathBuf,
    kind: ContextKind,
    csrf_protected: bool,
}

impl Context {
    pub(crate) fn new(prefix: &str, root: PathBuf, kind: ContextKind) -> Self {
        Self {
            prefix: PathPrefixMatcher::new(prefix),
            root: qualify_root(root),
            kind,
            csrf_protected: true,
        }
    }

    pub fn prefix(&self) -> &str {
        self.prefix.prefix()
    }

    /// Filesystem root handlers of this context resolve templates and files against.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn kind(&self) -> &ContextKind {
        &self.kind
    }

    pub fn csrf_protected(&self) -> bool {
        self.csrf_protected
    }

    /// Skip CSRF validation for POSTs into this context.
    pub fn exempt_csrf(&mut self) -> &mut Self {
        self.csrf_protected = false;
        self
    }

    /// Start registering handlers defined by `module`.
    pub fn add_file(&mut self, module: &str) -> WebFile<'_> {
        WebFile { context: self, module: module.to_string() }
    }

    /// Bind `pattern` directly to `handler`.
    pub fn add_pattern(&mut self, pattern: &str, handler: Handler) -> Result<&mut Self, RouteError> {
        self.push_route(pattern, handler, Arc::from(pattern))?;
        Ok(self)
    }

    /// Handler used when no pattern matches.
    pub fn set_catch_all(&mut self, handler: Handler) -> Result<&mut Self, RouteError> {
        match &mut self.kind {
            ContextKind::Handlers { catch_all, .. } => {
                *catch_all = Some(handler);
                Ok(self)
            }
            _ => Err(RouteError::NotAHandlerContext(self.prefix.prefix().to_string())),
        }
    }

    pub fn routes(&self) -> &[Route] {
        match &self.kind {
            ContextKind::Handlers { routes, .. } => routes,
            _ => &[],
        }
    }

    pub(crate) fn matches(&self, path: &str) -> bool {
        self.prefix.matches(path)
    }

    pub(crate) fn strip_prefix(&self, path: &str) -> Option<String> {
        self.prefix.strip(path)
    }

    /// Pick the target for a path below this context's prefix.
    pub fn resolve(&self, contextfree_path: &str) -> Option<Target> {
        match &self.kind {
            ContextKind::Handlers { routes, catch_all } => routes
                .iter()
                .find(|route| route.matcher.matches(contextfree_path))
                .map(|route| Target::Pattern {
                    handler: Arc::clone(&route.handler),
                    description: Arc::clone(&route.description),
                })
                .or_else(|| catch_all.as_ref().map(|h| Target::CatchAll(Arc::clone(h)))),
            ContextKind::Files(store) => Some(Target::Files(Arc::clone(store))),
            ContextKind::Adapter(app) => Some(Target::Adapter(Arc::clone(app))),
        }
    }

    fn push_route(&mut self, pattern: &str, handler: Handler, description: Arc<str>) -> Result<(), RouteError> {
        let matcher = PatternMatcher::new(pattern).map_err(|source| RouteError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        match &mut self.kind {
            ContextKind::Handlers { routes, .. } => {
                tracing::debug!(context = %self.prefix.prefix(), pattern, handler = %description, "Route registered");
                routes.push(Route { matcher, handler, description });
                Ok(())
            }
            _ => Err(RouteError::NotAHandlerContext(self.prefix.prefix().to_string())),
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            ContextKind::Handlers { .. } => "handlers",
            ContextKind::Files(_) => "files",
            ContextKind::Adapter(_) => "adapter",
        };
        f.debug_struct("Context")
            .field("prefix", &self.prefix())
            .field("root", &self.root)
            .field("kind", &kind)
            .field("routes", &self.routes())
            .finish()
    }
}

/// Handlers from one source module, registered under a common name.
pub struct WebFile<'a> {
    context: &'a mut Context,
    module: String,
}

impl WebFile<'_> {
    pub fn add_handler(&mut self, name: &str, handler: Handler) -> WebHandler<'_> {
        WebHandler {
            context: &mut *self.context,
            handler,
            description: Arc::from(format!("{}.{}", self.module, name)),
        }
    }
}

/// A handler waiting for its patterns.
pub struct WebHandler<'a> {
    context: &'a mut Context,
    handler: Handler,
    description: Arc<str>,
}

impl WebHandler<'_> {
    pub fn add_pattern(&mut self, pattern: &str) -> Result<&mut Self, RouteError> {
        self.context
            .push_route(pattern, Arc::clone(&self.handler), Arc::clone(&self.description))?;
        Ok(self)
    }
}

fn qualify_root(root: PathBuf) -> PathBuf {
    if root.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        root
    }
}
