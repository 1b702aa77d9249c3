//! Path matching primitives.
//!
//! # Responsibilities
//! - Match a context prefix (plain string prefix, case-sensitive)
//! - Match a handler pattern (regex anchored at both ends)
//!
//! # Design Decisions
//! - Patterns always match the whole remaining path; a trailing `$` is
//!   accepted and implied when missing
//! - Prefix matching is deliberately a raw string prefix: `/app` also
//!   covers `/apple`

use regex::Regex;

/// Trait for matching a request path against a condition.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    fn matches(&self, path: &str) -> bool;
}

/// Matches paths starting with a context prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn len(&self) -> usize {
        self.prefix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefix.is_empty()
    }

    /// The remainder of `path` below the prefix, always starting with `/`.
    pub fn strip(&self, path: &str) -> Option<String> {
        let rest = path.strip_prefix(self.prefix.as_str())?;
        if rest.starts_with('/') {
            Some(rest.to_string())
        } else {
            Some(format!("/{}", rest))
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }
}

/// Matches the whole remaining path against a regular expression.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    source: String,
    regex: Regex,
}

impl PatternMatcher {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let core = match pattern.strip_suffix('$') {
            Some(core) if !core.ends_with('\\') => core,
            _ => pattern,
        };
        Ok(Self {
            source: pattern.to_string(),
            regex: Regex::new(&format!("^(?:{})$", core))?,
        })
    }

    /// The pattern as registered.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl Matcher for PatternMatcher {
    fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}
