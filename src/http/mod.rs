//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! connection bytes
//!     → request.rs (request line, headers, URI split)
//!     → orchestrator.rs (route, decode, session/CSRF, dispatch, error boundary)
//!         → form.rs (query, urlencoded and multipart bodies, cookies)
//!     → response.rs (keep-alive decision, default headers)
//!     → producer.rs (header + body chain, chunking, coalescing)
//!     → connection writes chunks
//! ```
//!
//! `date.rs`, `headers.rs` and `status.rs` are the shared protocol vocabulary.

pub mod date;
pub mod form;
pub mod headers;
pub mod orchestrator;
pub mod producer;
pub mod request;
pub mod response;
pub mod server;
pub mod status;

pub use date::DateCodec;
pub use headers::Headers;
pub use orchestrator::{NoHooks, Orchestrator, OrchestratorBuilder, RequestHooks};
pub use request::{HttpVersion, Reply, Request, UploadedFile};
pub use response::{Finalized, ResponseSettings};
pub use server::HttpServer;
