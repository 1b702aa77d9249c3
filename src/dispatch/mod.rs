//! Concurrency dispatch for handler execution.
//!
//! # Data Flow
//! ```text
//! connection task
//!     → Dispatcher::run(label, job)
//!         Inline:   job runs on the connection task
//!         Threaded: job queued on WorkerPool, result back over a oneshot
//!     → connection task resumes with the finished reply
//! ```
//!
//! # Design Decisions
//! - One process-wide mode, chosen from the configured thread count
//! - Handlers are synchronous; only the hand-off is async

pub mod pool;
pub mod status;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;

pub use pool::{WorkerPool, WorkerState, WorkerStatus};
pub use status::status_handler;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("worker pool is shut down")]
    Closed,

    #[error("job was dropped before producing a result")]
    Lost,

    #[error("could not spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub enum Dispatcher {
    Inline,
    Threaded(Arc<WorkerPool>),
}

impl Dispatcher {
    /// `threads <= 1` runs handlers inline.
    pub fn from_threads(threads: usize) -> Result<Self, DispatchError> {
        if threads > 1 {
            Ok(Dispatcher::Threaded(Arc::new(WorkerPool::new(threads)?)))
        } else {
            Ok(Dispatcher::Inline)
        }
    }

    pub fn is_threaded(&self) -> bool {
        matches!(self, Dispatcher::Threaded(_))
    }

    pub async fn run<T, F>(&self, label: &str, job: F) -> Result<T, DispatchError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        match self {
            Dispatcher::Inline => Ok(job()),
            Dispatcher::Threaded(pool) => {
                let (tx, rx) = oneshot::channel();
                pool.submit(
                    label,
                    Box::new(move || {
                        let _ = tx.send(job());
                    }),
                )?;
                rx.await.map_err(|_| DispatchError::Lost)
            }
        }
    }

    /// Worker snapshots; empty when running inline.
    pub fn worker_status(&self) -> Vec<WorkerStatus> {
        match self {
            Dispatcher::Inline => Vec::new(),
            Dispatcher::Threaded(pool) => pool.status(),
        }
    }

    pub fn queued(&self) -> usize {
        match self {
            Dispatcher::Inline => 0,
            Dispatcher::Threaded(pool) => pool.queued(),
        }
    }

    pub fn shutdown(&self) {
        if let Dispatcher::Threaded(pool) = self {
            pool.shutdown();
        }
    }
}
