//! CSRF tokens bound to a session.
//!
//! Token shape: `<expiry>##<sha256 hex of secret|session|expiry>`.
//! The expiry is in clear so an expired token can be told apart from a forged one.

use std::time::Duration;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Form field carrying the token.
pub const TOKEN_FIELD: &str = "csrf_token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CsrfError {
    #[error("the CSRF token is missing")]
    Missing,

    #[error("the CSRF token is invalid")]
    Invalid,

    #[error("the CSRF token has expired")]
    Expired,
}

pub struct CsrfGuard {
    secret: Vec<u8>,
    time_limit: Duration,
}

impl CsrfGuard {
    pub fn new(secret: impl Into<Vec<u8>>, time_limit: Duration) -> Self {
        Self { secret: secret.into(), time_limit }
    }

    /// Guard with a per-process random secret; tokens die with the process.
    pub fn with_random_secret(time_limit: Duration) -> Self {
        let secret: [u8; 32] = rand::random();
        Self::new(secret.to_vec(), time_limit)
    }

    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    pub fn generate(&self, session_id: &str) -> String {
        self.generate_at(session_id, now())
    }

    pub fn generate_at(&self, session_id: &str, now: i64) -> String {
        let expiry = now + self.time_limit.as_secs() as i64;
        format!("{}##{}", expiry, self.sign(session_id, expiry))
    }

    pub fn validate(&self, session_id: &str, token: Option<&str>) -> Result<(), CsrfError> {
        self.validate_at(session_id, token, now())
    }

    pub fn validate_at(&self, session_id: &str, token: Option<&str>, now: i64) -> Result<(), CsrfError> {
        let token = token.map(str::trim).filter(|t| !t.is_empty()).ok_or(CsrfError::Missing)?;
        let (expiry, signature) = token.split_once("##").ok_or(CsrfError::Invalid)?;
        let expiry: i64 = expiry.parse().map_err(|_| CsrfError::Invalid)?;

        if !constant_time_eq(self.sign(session_id, expiry).as_bytes(), signature.as_bytes()) {
            return Err(CsrfError::Invalid);
        }
        if expiry < now {
            return Err(CsrfError::Expired);
        }
        Ok(())
    }

    fn sign(&self, session_id: &str, expiry: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update(b"|");
        hasher.update(session_id.as_bytes());
        hasher.update(b"|");
        hasher.update(expiry.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl std::fmt::Debug for CsrfGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfGuard")
            .field("secret", &"<redacted>")
            .field("time_limit", &self.time_limit)
            .finish()
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
