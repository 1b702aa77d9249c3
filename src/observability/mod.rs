//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, access log)
//!     → metrics.rs (counters, gauges, histograms, ServerStats)
//!     → incident.rs (XID + digests for contained handler failures)
//!
//! Consumers:
//!     → Log aggregation (stdout, text or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Status handler (JSON snapshot)
//! ```
//!
//! # Design Decisions
//! - Structured fields on every event, never formatted-in values
//! - Metrics are cheap (atomic increments)
//! - Users only ever see the XID, operators see the full error in the log

pub mod incident;
pub mod logging;
pub mod metrics;

pub use incident::Incident;
pub use metrics::{ServerStats, StatsSnapshot};
