//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming connection:
//!     → limits.rs (head and body size, idle timeout)
//! Parsed request:
//!     → session.rs (session id from cookie, or a new one)
//!     → csrf.rs (validate token on form POSTs, issue the next token)
//!     → Pass to handler
//! ```
//!
//! # Design Decisions
//! - Fail closed: a missing or forged token rejects the request
//! - No trust in client input
//! - An expired token alone does not fail a request

pub mod csrf;
pub mod limits;
pub mod session;

pub use csrf::{CsrfError, CsrfGuard, TOKEN_FIELD};
pub use limits::RequestLimits;
pub use session::{new_session_id, MemorySessions, NoSessions, SessionLookup};
