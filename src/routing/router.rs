//! Context registry and dispatch.
//!
//! # Responsibilities
//! - Hold every registered context in registration order
//! - Pick the context with the longest matching prefix
//! - Strip the prefix and resolve the context's target
//!
//! # Design Decisions
//! - Built once at startup, read-only afterwards (shared via `Arc`, no locks)
//! - Equal-length prefixes resolve to whichever was registered first
//! - Explicit miss values rather than a silent default

use std::path::PathBuf;
use std::sync::Arc;

use crate::files::FileStore;
use crate::routing::adapter::Application;
use crate::routing::context::{Context, ContextKind};
use crate::routing::handler::Target;

/// Why a path did not resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMiss {
    /// No context prefix matches.
    NoContext,
    /// A context matched but none of its patterns did and it has no catch-all.
    NoPattern,
}

/// A successful lookup.
#[derive(Debug)]
pub struct Resolved<'a> {
    pub context: &'a Context,
    pub contextfree_path: String,
    pub target: Target,
}

/// Ordered set of contexts.
#[derive(Debug, Default)]
pub struct RouteRegistry {
    contexts: Vec<Context>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler context.
    pub fn add_context(&mut self, prefix: &str, root: impl Into<PathBuf>) -> &mut Context {
        self.push(Context::new(
            prefix,
            root.into(),
            ContextKind::Handlers { routes: Vec::new(), catch_all: None },
        ))
    }

    /// Register a context served entirely by a file store.
    pub fn add_file_store(&mut self, prefix: &str, store: FileStore) -> &mut Context {
        let root = store.primary_root().unwrap_or_default();
        self.push(Context::new(prefix, root, ContextKind::Files(Arc::new(store))))
    }

    /// Register a context delegated to an application object.
    pub fn add_adapter(&mut self, prefix: &str, app: impl Application + 'static) -> &mut Context {
        let app: Arc<dyn Application> = Arc::new(app);
        self.push(Context::new(prefix, PathBuf::new(), ContextKind::Adapter(app)))
    }

    pub fn contexts(&self) -> &[Context] {
        &self.contexts
    }

    /// Longest-prefix context for `path`.
    pub fn find_context(&self, path: &str) -> Option<&Context> {
        let mut best: Option<&Context> = None;
        for context in &self.contexts {
            if context.matches(path) && best.map_or(true, |b| context.prefix().len() > b.prefix().len()) {
                best = Some(context);
            }
        }
        best
    }

    /// Full dispatch: context, prefix stripping, pattern scan.
    pub fn resolve(&self, path: &str) -> Result<Resolved<'_>, RouteMiss> {
        let context = self.find_context(path).ok_or(RouteMiss::NoContext)?;
        let contextfree_path = context.strip_prefix(path).ok_or(RouteMiss::NoContext)?;
        let target = context.resolve(&contextfree_path).ok_or(RouteMiss::NoPattern)?;
        Ok(Resolved { context, contextfree_path, target })
    }

    fn push(&mut self, context: Context) -> &mut Context {
        tracing::debug!(prefix = %context.prefix(), root = %context.root().display(), "Context registered");
        self.contexts.push(context);
        let last = self.contexts.len() - 1;
        &mut self.contexts[last]
    }
}
