//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, connection limits).
    pub listener: ListenerConfig,

    /// HTTP behaviour.
    pub server: HttpConfig,

    /// Temp and root directories.
    pub paths: PathConfig,

    /// CSRF and session settings.
    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Static file contexts registered at startup.
    pub file_stores: Vec<FileStoreConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8081").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Idle connections are dropped after this many seconds.
    pub idle_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8081".to_string(),
            max_connections: 1_024,
            idle_timeout_secs: 1_800,
        }
    }
}

/// HTTP request handling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Value of the `Server` reply header.
    pub server_name: String,

    /// Worker threads; 1 or less runs handlers inline.
    pub threads: usize,

    /// Show stack traces instead of the generic error page.
    pub testing: bool,

    /// Add `Cache-Control: no-cache` unless a handler set one.
    pub default_no_cache: bool,

    /// Use chunked transfer for HTTP/1.1 replies without `Content-Length`.
    pub use_chunked: bool,

    /// Directory index names, tried in order.
    pub index_files: Vec<String>,

    /// Largest accepted request head.
    pub max_header_bytes: usize,

    /// Largest accepted request body.
    pub max_body_bytes: usize,

    /// Contact shown on the error page.
    pub support_email: Option<String>,

    /// Path of the JSON status page; disabled when unset.
    pub status_path: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            server_name: format!("portico/{}", env!("CARGO_PKG_VERSION")),
            threads: 8,
            testing: false,
            default_no_cache: true,
            use_chunked: true,
            index_files: vec!["index.html".to_string(), "default.html".to_string()],
            max_header_bytes: 64 * 1024,
            max_body_bytes: 64 * 1024 * 1024,
            support_email: None,
            status_path: None,
        }
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathConfig {
    /// Upload spool and date calibration directory.
    pub temp_dir: PathBuf,

    /// Base for relative file store roots.
    pub root_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self { temp_dir: std::env::temp_dir(), root_dir: PathBuf::from(".") }
    }
}

/// CSRF and sessions.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Validate CSRF tokens on form POSTs.
    pub csrf_enabled: bool,

    /// Token lifetime in seconds.
    pub csrf_time_limit_secs: u64,

    /// Signing secret; a random one per process when unset.
    pub csrf_secret: Option<String>,

    /// Session cookie name.
    pub session_cookie: String,

    /// Sessions unused for this long are dropped by the periodic sweep.
    pub session_idle_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            csrf_enabled: true,
            csrf_time_limit_secs: 3_600,
            csrf_secret: None,
            session_cookie: "PSESSION".to_string(),
            session_idle_secs: 7_200,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// `text` or `json`.
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// One static context.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileStoreConfig {
    /// URL prefix, e.g. `/static`.
    pub prefix: String,

    /// Directories or `.zip` archives, tried in order.
    pub roots: Vec<PathBuf>,
}
