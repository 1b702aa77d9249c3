//! Request and connection limits.
//!
//! # Responsibilities
//! - Enforce maximum request body size
//! - Enforce maximum header size
//! - Bound how long an idle connection is kept
//!
//! # Design Decisions
//! - Limits checked before parsing (early rejection)
//! - Return 413 Payload Too Large or 431 Request Header Fields Too Large

use std::time::Duration;

use crate::config::ServerConfig;
use crate::http::status;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
    pub idle_timeout: Duration,
}

impl RequestLimits {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            max_header_bytes: config.server.max_header_bytes,
            max_body_bytes: config.server.max_body_bytes,
            idle_timeout: Duration::from_secs(config.listener.idle_timeout_secs),
        }
    }

    /// Status to reject a head of `len` bytes with, if any.
    pub fn check_head(&self, len: usize) -> Option<u16> {
        (len > self.max_header_bytes).then_some(status::HEADERS_TOO_LARGE)
    }

    /// Status to reject a declared body of `len` bytes with, if any.
    pub fn check_body(&self, len: usize) -> Option<u16> {
        (len > self.max_body_bytes).then_some(status::PAYLOAD_TOO_LARGE)
    }
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}
