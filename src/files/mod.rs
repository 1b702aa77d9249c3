//! Static file delivery.
//!
//! # Data Flow
//! ```text
//! Files context
//!     → store.rs (roots in order, first that can_handle)
//!     → handler.rs (GET/HEAD, directory index, conditional GET)
//!     → vfs (OS directory or zip archive)
//! ```

pub mod handler;
pub mod store;

pub use handler::{DeliveryCounters, StaticFileHandler, DEFAULT_INDEX_FILES};
pub use store::FileStore;
