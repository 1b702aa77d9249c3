//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (head/body reading, keep-alive, reply writing)
//!     → Orchestrator (per request)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - The connection loop is generic over the stream so tests can drive it
//!   through in-memory pipes

pub mod connection;
pub mod listener;

pub use connection::{serve_connection, ConnectionError, ConnectionId};
pub use listener::{Accepted, ConnectionPermit, Listener, ListenerError};
