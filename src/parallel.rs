//! Bounded worker pool for the identification fan-out.
//!
//! Each worker owns a bounded job queue. A search splits its gallery into
//! chunks, dispatches them round-robin and waits on a reply channel for one
//! report per chunk; that wait is the only join point of a search. Workers keep
//! their best score locally and never touch shared search state.

use crate::error::AfisError;
use crate::identify::{ChunkReport, ScanJob};
use crossbeam::channel::{bounded, Receiver, SendTimeoutError, Sender};
use std::fmt;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;
use tracing::{debug, error};

/// Cooperative cancellation flag shared between a caller and a running search.
///
/// A child token observes its parent's cancellation but cancelling the child
/// leaves the parent untouched.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
            || self.parent.as_ref().is_some_and(|parent| parent.load(Ordering::Relaxed))
    }

    pub(crate) fn child(&self) -> Self {
        Self { flag: Arc::new(AtomicBool::new(false)), parent: Some(Arc::clone(&self.flag)) }
    }
}

/// Statistics for a single worker
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerStats {
    /// Worker ID
    pub id: usize,
    /// Chunks waiting in this worker's queue (approximate)
    pub queue_size: usize,
    /// Chunks this worker has finished
    pub chunks: u64,
    /// Gallery entries this worker has scored
    pub scored: u64,
}

impl fmt::Display for WorkerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Worker {}: queue_size={}, chunks={}, scored={}",
            self.id, self.queue_size, self.chunks, self.scored
        )
    }
}

/// Pool statistics for monitoring
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Chunks dispatched to workers since start
    pub total_dispatched: u64,
    /// Gallery entries scored since start
    pub total_scored: u64,
    /// Per-worker statistics (current state)
    pub workers: Vec<WorkerStats>,
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Identify Pool Stats - chunks dispatched: {}, entries scored: {}",
            self.total_dispatched, self.total_scored
        )?;
        for worker in &self.workers {
            writeln!(f, "  {worker}")?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct WorkerCounters {
    chunks: AtomicU64,
    scored: AtomicU64,
}

/// Fixed-size pool of scoring threads.
pub struct WorkerPool {
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    job_senders: Mutex<Vec<Sender<ScanJob>>>,
    pub num_workers: NonZeroUsize,
    next_worker: AtomicUsize,
    dispatched_count: AtomicU64,
    counters: Arc<Vec<WorkerCounters>>,
}

impl WorkerPool {
    /// Creates a new worker pool.
    ///
    /// # Parameters
    /// - `num_workers`: Number of worker threads
    /// - `queue_size`: Bound of each worker's job queue
    ///
    /// # Errors
    /// Returns error if `num_workers` or `queue_size` is 0 or thread creation fails.
    pub fn new(num_workers: usize, queue_size: usize) -> Result<Self, AfisError> {
        let num_workers = NonZeroUsize::new(num_workers).ok_or_else(|| {
            AfisError::Misconfiguration("Worker count must be greater than 0".to_string())
        })?;
        if queue_size == 0 {
            return Err(AfisError::Misconfiguration(
                "queue_size must be greater than 0".to_string(),
            ));
        }

        debug!("Creating identify worker pool: {} workers, queue size: {}", num_workers, queue_size);

        let num_workers_val = num_workers.get();
        let mut workers = Vec::with_capacity(num_workers_val);
        let mut job_senders = Vec::with_capacity(num_workers_val);
        let counters: Arc<Vec<WorkerCounters>> =
            Arc::new((0..num_workers_val).map(|_| WorkerCounters::default()).collect());

        for worker_id in 0..num_workers_val {
            let (tx, rx) = bounded::<ScanJob>(queue_size);
            job_senders.push(tx);

            let worker_counters = Arc::clone(&counters);

            let handle = thread::Builder::new()
                .name(format!("identify-worker-{worker_id}"))
                .spawn(move || {
                    Self::worker_loop(worker_id, rx, worker_counters);
                })
                .map_err(|e| {
                    AfisError::Misconfiguration(format!("Failed to spawn worker thread: {e}"))
                })?;

            workers.push(handle);
        }

        Ok(Self {
            workers: Mutex::new(workers),
            job_senders: Mutex::new(job_senders),
            num_workers,
            next_worker: AtomicUsize::new(0),
            dispatched_count: AtomicU64::new(0),
            counters,
        })
    }

    fn worker_loop(worker_id: usize, rx: Receiver<ScanJob>, counters: Arc<Vec<WorkerCounters>>) {
        debug!("Identify worker {} started", worker_id);

        while let Ok(job) = rx.recv() {
            let reply = job.reply.clone();
            let chunk_index = job.chunk_index;

            let report = match panic::catch_unwind(AssertUnwindSafe(|| job.run())) {
                Ok(report) => report,
                Err(_) => {
                    error!("Identify worker {} panicked while scoring chunk {}", worker_id, chunk_index);
                    ChunkReport::panicked(chunk_index)
                }
            };

            if let Some(counter) = counters.get(worker_id) {
                counter.chunks.fetch_add(1, Ordering::Relaxed);
                counter.scored.fetch_add(report.scored as u64, Ordering::Relaxed);
            }

            // The searcher may already have given up (cancelled or timed out).
            let _ = reply.send(report);
        }

        debug!("Identify worker {} stopped", worker_id);
    }

    /// Queues a chunk on the next worker (round-robin).
    ///
    /// Blocks while that worker's queue is full, up to `deadline` if one is
    /// given; running out of time is reported as `AfisError::Cancelled`.
    pub(crate) fn dispatch(&self, job: ScanJob, deadline: Option<Instant>) -> Result<(), AfisError> {
        let counter = self.next_worker.fetch_add(1, Ordering::Relaxed);
        let worker_id = counter.checked_rem(self.num_workers.get()).unwrap_or(0);

        let sender = {
            let senders = self.job_senders.lock().unwrap_or_else(|p| p.into_inner());
            match senders.get(worker_id) {
                Some(sender) => sender.clone(),
                None => return Err(AfisError::PoolShutdown),
            }
        };

        match deadline {
            Some(deadline) => sender.send_deadline(job, deadline).map_err(|e| match e {
                SendTimeoutError::Timeout(_) => AfisError::Cancelled,
                SendTimeoutError::Disconnected(_) => AfisError::PoolShutdown,
            })?,
            None => sender.send(job).map_err(|_| AfisError::PoolShutdown)?,
        }
        self.dispatched_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Get current statistics
    pub fn stats(&self) -> PoolStats {
        let senders = self.job_senders.lock().unwrap_or_else(|p| p.into_inner());
        let workers: Vec<WorkerStats> = self
            .counters
            .iter()
            .enumerate()
            .map(|(id, counter)| WorkerStats {
                id,
                queue_size: senders.get(id).map(|s| s.len()).unwrap_or(0),
                chunks: counter.chunks.load(Ordering::Relaxed),
                scored: counter.scored.load(Ordering::Relaxed),
            })
            .collect();

        PoolStats {
            total_dispatched: self.dispatched_count.load(Ordering::Relaxed),
            total_scored: workers.iter().map(|w| w.scored).sum(),
            workers,
        }
    }

    /// Stops accepting work and waits for the workers to drain their queues.
    pub fn shutdown(&self) {
        self.job_senders.lock().unwrap_or_else(|p| p.into_inner()).clear();

        let handles: Vec<_> =
            self.workers.lock().unwrap_or_else(|p| p.into_inner()).drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("Identify worker exited with a panic");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_token_sees_parent_but_not_vice_versa() {
        let parent = CancelToken::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn rejects_zero_sizes() {
        assert!(matches!(WorkerPool::new(0, 4), Err(AfisError::Misconfiguration(_))));
        assert!(matches!(WorkerPool::new(2, 0), Err(AfisError::Misconfiguration(_))));
    }

    #[test]
    fn fresh_pool_reports_idle_workers() {
        let pool = match WorkerPool::new(3, 4) {
            Ok(pool) => pool,
            Err(e) => panic!("Failed to create WorkerPool: {e}"),
        };
        let stats = pool.stats();
        assert_eq!(stats.workers.len(), 3);
        assert_eq!(stats.total_dispatched, 0);
        assert_eq!(stats.total_scored, 0);
        assert!(stats.to_string().contains("Worker 2"));
    }
}
