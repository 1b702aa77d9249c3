//! Fixed-size worker pool.
//!
//! # Responsibilities
//! - Run blocking handler jobs on dedicated OS threads
//! - Keep a FIFO queue; enqueue and dequeue are the only locked operations
//! - Record per-worker state for the status page
//!
//! # Design Decisions
//! - Panics are contained per job; a worker survives any handler
//! - Shutdown stops intake, lets workers drain what is queued, then joins

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use serde::Serialize;

use crate::dispatch::DispatchError;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueuedJob {
    label: String,
    job: Job,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Working,
    Stopped,
}

#[derive(Debug)]
struct Slot {
    state: WorkerState,
    label: Option<String>,
    since: Option<Instant>,
    served: u64,
}

/// Snapshot of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub worker: usize,
    pub state: WorkerState,
    /// What the worker is running, usually `METHOD URI`.
    pub uri: Option<String>,
    pub busy_ms: Option<u64>,
    pub served: u64,
}

struct Shared {
    queue: Mutex<VecDeque<QueuedJob>>,
    available: Condvar,
    closed: AtomicBool,
    slots: Vec<Mutex<Slot>>,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, VecDeque<QueuedJob>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn slot(&self, index: usize) -> MutexGuard<'_, Slot> {
        self.slots[index].lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self, DispatchError> {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(size * 2)),
            available: Condvar::new(),
            closed: AtomicBool::new(false),
            slots: (0..size)
                .map(|_| Mutex::new(Slot { state: WorkerState::Idle, label: None, since: None, served: 0 }))
                .collect(),
        });

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("portico-worker-{}", index))
                .spawn(move || worker_loop(index, &shared))?;
            workers.push(handle);
        }

        tracing::info!(workers = size, "Worker pool started");
        Ok(Self { shared, workers: Mutex::new(workers) })
    }

    /// Queue a job. Fails once the pool is shutting down.
    pub fn submit(&self, label: impl Into<String>, job: Job) -> Result<(), DispatchError> {
        {
            let mut queue = self.shared.queue();
            // Checked under the queue lock so nothing lands after shutdown.
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(DispatchError::Closed);
            }
            queue.push_back(QueuedJob { label: label.into(), job });
        }
        self.shared.available.notify_one();
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.shared.slots.len()
    }

    pub fn queued(&self) -> usize {
        self.shared.queue().len()
    }

    pub fn status(&self) -> Vec<WorkerStatus> {
        (0..self.size())
            .map(|index| {
                let slot = self.shared.slot(index);
                WorkerStatus {
                    worker: index,
                    state: slot.state,
                    uri: slot.label.clone(),
                    busy_ms: slot.since.map(|t| t.elapsed().as_millis() as u64),
                    served: slot.served,
                }
            })
            .collect()
    }

    /// Stop intake, finish queued jobs and join the workers.
    pub fn shutdown(&self) {
        {
            let _queue = self.shared.queue();
            self.shared.closed.store(true, Ordering::Release);
        }
        self.shared.available.notify_all();

        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            workers.drain(..).collect()
        };
        let current = thread::current().id();
        for handle in handles {
            // The last reference may be released by a job running on a worker.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::warn!("Worker thread exited abnormally");
            }
        }

        // Dropping a leftover job drops its reply channel, so its waiter
        // sees the job as lost.
        let leftover: Vec<QueuedJob> = self.shared.queue().drain(..).collect();
        if !leftover.is_empty() {
            tracing::warn!(jobs = leftover.len(), "Dropping jobs queued at shutdown");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size())
            .field("queued", &self.queued())
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish()
    }
}

fn worker_loop(index: usize, shared: &Shared) {
    loop {
        let next = {
            let mut queue = shared.queue();
            while queue.is_empty() && !shared.closed.load(Ordering::Acquire) {
                queue = shared.available.wait(queue).unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            queue.pop_front()
        };

        let Some(QueuedJob { label, job }) = next else {
            shared.slot(index).state = WorkerState::Stopped;
            tracing::debug!(worker = index, "Worker stopped");
            return;
        };

        {
            let mut slot = shared.slot(index);
            slot.state = WorkerState::Working;
            slot.label = Some(label);
            slot.since = Some(Instant::now());
        }

        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!(worker = index, "Job panicked");
        }

        let mut slot = shared.slot(index);
        slot.state = WorkerState::Idle;
        slot.label = None;
        slot.since = None;
        slot.served += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn runs_jobs_in_fifo_order_on_one_worker() {
        let pool = WorkerPool::new(1).unwrap();
        let (tx, rx) = mpsc::channel();
        for n in 0..5 {
            let tx = tx.clone();
            pool.submit(format!("job {}", n), Box::new(move || tx.send(n).unwrap())).unwrap();
        }
        let seen: Vec<i32> = (0..5).map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap()).collect();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn survives_panicking_jobs() {
        let pool = WorkerPool::new(1).unwrap();
        pool.submit("boom", Box::new(|| panic!("handler bug"))).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.submit("after", Box::new(move || tx.send(()).unwrap())).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn shutdown_drains_queue_and_refuses_new_work() {
        let pool = WorkerPool::new(2).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let done = Arc::clone(&done);
            pool.submit("count", Box::new(move || {
                done.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(done.load(Ordering::SeqCst), 10);
        assert!(matches!(pool.submit("late", Box::new(|| {})), Err(DispatchError::Closed)));
        assert!(pool.status().iter().all(|w| w.state == WorkerState::Stopped));
    }

    #[test]
    fn jobs_racing_shutdown_run_or_are_refused() {
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let (tx, rx) = mpsc::channel();
        let submitters: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let tx = tx.clone();
                thread::spawn(move || {
                    let mut accepted = 0;
                    for _ in 0..200 {
                        let tx = tx.clone();
                        if pool.submit("race", Box::new(move || {
                            let _ = tx.send(());
                        }))
                        .is_ok()
                        {
                            accepted += 1;
                        }
                    }
                    accepted
                })
            })
            .collect();
        thread::sleep(Duration::from_millis(1));
        pool.shutdown();
        let accepted: usize = submitters.into_iter().map(|h| h.join().unwrap()).sum();
        drop(tx);

        let mut ran = 0;
        loop {
            match rx.recv_timeout(Duration::from_secs(5)) {
                Ok(()) => ran += 1,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
                Err(e) => panic!("a queued job outlived shutdown: {:?}", e),
            }
        }
        assert_eq!(ran, accepted);
        assert_eq!(pool.queued(), 0);
    }

    #[test]
    fn status_reports_busy_worker() {
        let pool = WorkerPool::new(1).unwrap();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        pool.submit("GET /slow", Box::new(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        }))
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let status = pool.status();
        assert_eq!(status[0].state, WorkerState::Working);
        assert_eq!(status[0].uri.as_deref(), Some("GET /slow"));
        assert!(status[0].busy_ms.is_some());

        release_tx.send(()).unwrap();
        pool.shutdown();
        assert_eq!(pool.status()[0].served, 1);
    }
}
