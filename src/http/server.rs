//! HTTP server setup.
//!
//! # Responsibilities
//! - Accept connections from the bounded listener
//! - Spawn one task per connection, holding its permit for the task's lifetime
//! - Stop accepting when the shutdown signal fires

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::http::orchestrator::Orchestrator;
use crate::lifecycle::Shutdown;
use crate::net::{serve_connection, ConnectionError, Listener, ListenerError};
use crate::security::RequestLimits;

/// The server: shared request pipeline plus connection limits.
#[derive(Debug, Clone)]
pub struct HttpServer {
    orchestrator: Arc<Orchestrator>,
    limits: RequestLimits,
}

impl HttpServer {
    pub fn new(orchestrator: Orchestrator, limits: RequestLimits) -> Self {
        Self { orchestrator: Arc::new(orchestrator), limits }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn limits(&self) -> &RequestLimits {
        &self.limits
    }

    /// Accept connections until `shutdown` fires.
    pub async fn run(self, listener: Listener, shutdown: Shutdown) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(address = %addr, "HTTP server starting");

        let mut stop = shutdown.subscribe();
        loop {
            let accepted = tokio::select! {
                _ = stop.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => accepted,
            };

            let accepted = match accepted {
                Ok(accepted) => accepted,
                Err(ListenerError::Accept(e)) => {
                    tracing::warn!(error = %e, "Accept failed");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let server = self.clone();
            tokio::spawn(async move {
                let _permit = accepted.permit;
                if let Err(e) = server.serve_stream(accepted.stream, accepted.peer).await {
                    tracing::debug!(peer = %accepted.peer, error = %e, "Connection ended with error");
                }
            });
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Serve one already accepted stream.
    pub async fn serve_stream<S>(&self, stream: S, peer: SocketAddr) -> Result<(), ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        serve_connection(stream, peer, &self.orchestrator, self.limits).await
    }
}
