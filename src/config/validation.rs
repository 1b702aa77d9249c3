//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, addresses parse)
//! - Detect conflicting file store prefixes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServerConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: {value:?} is not a socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("log_format must be \"text\" or \"json\", got {0:?}")]
    LogFormat(String),

    #[error("file store prefix {0:?} must start with '/'")]
    RelativePrefix(String),

    #[error("file store prefix {0:?} is registered twice")]
    DuplicatePrefix(String),

    #[error("file store {0:?} has no roots")]
    NoRoots(String),

    #[error("status_path {0:?} must start with '/'")]
    StatusPath(String),
}

pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    let positive = [
        ("listener.max_connections", config.listener.max_connections as u64),
        ("listener.idle_timeout_secs", config.listener.idle_timeout_secs),
        ("server.max_header_bytes", config.server.max_header_bytes as u64),
        ("security.csrf_time_limit_secs", config.security.csrf_time_limit_secs),
        ("security.session_idle_secs", config.security.session_idle_secs),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }

    let format = config.observability.log_format.to_ascii_lowercase();
    if format != "text" && format != "json" {
        errors.push(ValidationError::LogFormat(config.observability.log_format.clone()));
    }

    if let Some(path) = &config.server.status_path {
        if !path.starts_with('/') {
            errors.push(ValidationError::StatusPath(path.clone()));
        }
    }

    let mut seen = HashSet::new();
    for store in &config.file_stores {
        if !store.prefix.starts_with('/') {
            errors.push(ValidationError::RelativePrefix(store.prefix.clone()));
        }
        if !seen.insert(store.prefix.as_str()) {
            errors.push(ValidationError::DuplicatePrefix(store.prefix.clone()));
        }
        if store.roots.is_empty() {
            errors.push(ValidationError::NoRoots(store.prefix.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
