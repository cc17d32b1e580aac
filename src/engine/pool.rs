//! # Bounded Worker Pool
//!
//! A fixed set of threads draining a capacity-limited FIFO queue. Producers
//! are never blocked: a full queue is reported immediately so the caller can
//! shed load.
//!
//! ```text
//!     enqueue ─┐                                 ┌─► worker-0 ─► task()
//!     enqueue ─┼─► [ t5 | t4 | t3 | t2 | t1 ] ───┼─► worker-1 ─► task()
//!     enqueue ─┘    ◄──── max_queue_size ────►   └─► worker-N ─► task()
//!        │
//!        └── full or shutting down ─► false (backpressure)
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//!     Running ──shutdown()──► ShuttingDown ──queue empty, workers joined──► Stopped
//!        │                        │
//!        accepts tasks            rejects new tasks, still runs queued ones
//! ```
//!
//! A task that returns an error or panics is logged and counted; the worker
//! moves on to the next task.

use super::{
    config::PoolConfig,
    error::{Error, Rejection, Result},
    utils::panic_message,
};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, info, warn};

type Job = Box<dyn FnOnce() -> std::result::Result<(), String> + Send + 'static>;

/// Lifecycle state of a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting and running tasks.
    Running,
    /// Rejecting new tasks, finishing queued ones.
    ShuttingDown,
    /// Every worker has exited.
    Stopped,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::ShuttingDown => write!(f, "shutting down"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

struct Queue {
    tasks: VecDeque<Job>,
    state: PoolState,
}

/// State shared between the pool handle and its workers.
struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
    max_queue_size: usize,

    active: AtomicUsize,
    accepted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Fixed-size thread pool with a bounded queue.
///
/// ## Example
///
/// ```rust
/// use metricstream::{PoolConfig, WorkerPool};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let pool = WorkerPool::new(PoolConfig::new(4, 100)).unwrap();
/// let done = Arc::new(AtomicUsize::new(0));
///
/// for _ in 0..10 {
///     let done = done.clone();
///     assert!(pool.enqueue(move || {
///         done.fetch_add(1, Ordering::Relaxed);
///     }));
/// }
///
/// // Runs everything already queued before returning
/// pool.shutdown();
/// assert_eq!(done.load(Ordering::Relaxed), 10);
/// assert!(!pool.enqueue(|| {}));
/// ```
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_ids: Vec<ThreadId>,
    worker_count: usize,
}

impl WorkerPool {
    /// Starts `config.worker_count` workers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero worker count or queue size,
    /// and [`Error::Spawn`] if a worker thread cannot be created. Workers
    /// already started are stopped before the error is returned.
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                tasks: VecDeque::with_capacity(config.max_queue_size.min(1024)),
                state: PoolState::Running,
            }),
            available: Condvar::new(),
            max_queue_size: config.max_queue_size,
            active: AtomicUsize::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        let mut handles = Vec::with_capacity(config.worker_count);
        for index in 0..config.worker_count {
            let name = format!("metricstream-worker-{index}");
            let worker_shared = shared.clone();

            match thread::Builder::new()
                .name(name.clone())
                .spawn(move || run_worker(&worker_shared, index))
            {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    shared.queue.lock().state = PoolState::Stopped;
                    shared.available.notify_all();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(Error::Spawn { name, source });
                }
            }
        }

        info!(
            workers = config.worker_count,
            max_queue_size = config.max_queue_size,
            "worker pool started"
        );

        Ok(Self {
            worker_ids: handles.iter().map(|h| h.thread().id()).collect(),
            workers: Mutex::new(handles),
            worker_count: config.worker_count,
            shared,
        })
    }

    /// Queues `task`, or says why not. Never blocks on a full queue.
    ///
    /// # Errors
    ///
    /// [`Rejection::QueueFull`] at `max_queue_size`, or
    /// [`Rejection::ShuttingDown`] once [`shutdown`](Self::shutdown) has begun.
    pub fn submit<F>(&self, task: F) -> std::result::Result<(), Rejection>
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(Box::new(move || {
            task();
            Ok(())
        }))
    }

    /// Like [`submit`](Self::submit) for a task that can fail.
    ///
    /// An `Err` returned by the task is logged at `WARN` and counted as failed.
    pub fn submit_fallible<F, E>(&self, task: F) -> std::result::Result<(), Rejection>
    where
        F: FnOnce() -> std::result::Result<(), E> + Send + 'static,
        E: fmt::Display,
    {
        self.push(Box::new(move || task().map_err(|err| err.to_string())))
    }

    /// Queues `task`. Returns `false` on backpressure or during shutdown.
    #[inline]
    pub fn enqueue<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(task).is_ok()
    }

    /// Boolean form of [`submit_fallible`](Self::submit_fallible).
    #[inline]
    pub fn enqueue_fallible<F, E>(&self, task: F) -> bool
    where
        F: FnOnce() -> std::result::Result<(), E> + Send + 'static,
        E: fmt::Display,
    {
        self.submit_fallible(task).is_ok()
    }

    fn push(&self, job: Job) -> std::result::Result<(), Rejection> {
        let outcome = {
            let mut queue = self.shared.queue.lock();
            if queue.state != PoolState::Running {
                Err(Rejection::ShuttingDown)
            } else if queue.tasks.len() >= self.shared.max_queue_size {
                Err(Rejection::QueueFull)
            } else {
                queue.tasks.push_back(job);
                Ok(())
            }
        };

        match outcome {
            Ok(()) => {
                self.shared.accepted.fetch_add(1, Ordering::Relaxed);
                self.shared.available.notify_one();
            }
            Err(_) => {
                self.shared.rejected.fetch_add(1, Ordering::Relaxed);
            }
        }
        outcome
    }

    /// Stops accepting tasks, runs everything already queued, joins workers.
    ///
    /// Idempotent. A concurrent second caller waits for the first to finish
    /// joining. Called from inside a task, it stops admission but returns
    /// without waiting, since a worker cannot join itself.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock();
            if queue.state == PoolState::Running {
                queue.state = PoolState::ShuttingDown;
                info!(queued = queue.tasks.len(), "worker pool shutting down");
            }
        }
        self.shared.available.notify_all();

        if self.is_worker_thread() {
            warn!("shutdown called from a worker thread, not waiting for workers");
            return;
        }

        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread exited by panic");
            }
        }

        let mut queue = self.shared.queue.lock();
        if queue.state != PoolState::Stopped {
            queue.state = PoolState::Stopped;
            info!(
                completed = self.shared.completed.load(Ordering::Relaxed),
                failed = self.shared.failed.load(Ordering::Relaxed),
                "worker pool stopped"
            );
        }
    }

    /// `true` when called from one of this pool's workers.
    pub(crate) fn is_worker_thread(&self) -> bool {
        self.worker_ids.contains(&thread::current().id())
    }

    /// Tasks waiting for a worker.
    #[inline]
    pub fn queue_size(&self) -> usize {
        self.shared.queue.lock().tasks.len()
    }

    /// Number of worker threads, fixed at construction.
    #[inline]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Queue bound.
    #[inline]
    pub fn max_queue_size(&self) -> usize {
        self.shared.max_queue_size
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> PoolState {
        self.shared.queue.lock().state
    }

    /// `true` while tasks are accepted.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.state() == PoolState::Running
    }

    /// Snapshot of the pool's counters.
    pub fn stats(&self) -> PoolStats {
        let (queue_size, state) = {
            let queue = self.shared.queue.lock();
            (queue.tasks.len(), queue.state)
        };

        PoolStats {
            worker_count: self.worker_count,
            active_workers: self.shared.active.load(Ordering::Relaxed),
            queue_size,
            max_queue_size: self.shared.max_queue_size,
            accepted: self.shared.accepted.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            state,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_count", &self.worker_count)
            .field("max_queue_size", &self.shared.max_queue_size)
            .field("queue_size", &self.queue_size())
            .field("state", &self.state())
            .finish()
    }
}

fn run_worker(shared: &Shared, index: usize) {
    debug!(worker = index, "worker started");

    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.tasks.pop_front() {
                    break job;
                }
                if queue.state != PoolState::Running {
                    debug!(worker = index, "worker exiting");
                    return;
                }
                shared.available.wait(&mut queue);
            }
        };

        shared.active.fetch_add(1, Ordering::Relaxed);
        let outcome = panic::catch_unwind(AssertUnwindSafe(job));
        shared.active.fetch_sub(1, Ordering::Relaxed);

        match outcome {
            Ok(Ok(())) => {
                shared.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(message)) => {
                shared.failed.fetch_add(1, Ordering::Relaxed);
                warn!(worker = index, error = %message, "task failed");
            }
            Err(payload) => {
                shared.failed.fetch_add(1, Ordering::Relaxed);
                error!(worker = index, panic = panic_message(&*payload), "task panicked");
            }
        }
    }
}

/// Snapshot of a [`WorkerPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Worker threads.
    pub worker_count: usize,
    /// Workers running a task right now.
    pub active_workers: usize,
    /// Tasks waiting.
    pub queue_size: usize,
    /// Queue bound.
    pub max_queue_size: usize,
    /// Tasks accepted since start.
    pub accepted: u64,
    /// Tasks refused (full queue or shutting down).
    pub rejected: u64,
    /// Tasks that ran to completion.
    pub completed: u64,
    /// Tasks that returned an error or panicked.
    pub failed: u64,
    /// Lifecycle state.
    pub state: PoolState,
}

impl PoolStats {
    /// Queue fill level, 0.0 to 1.0.
    #[inline]
    pub fn utilization(&self) -> f64 {
        if self.max_queue_size == 0 {
            0.0
        } else {
            self.queue_size as f64 / self.max_queue_size as f64
        }
    }

    /// `true` when the next task would be rejected for lack of room.
    #[inline]
    pub fn is_saturated(&self) -> bool {
        self.queue_size >= self.max_queue_size
    }

    /// Tasks accepted but not yet finished.
    #[inline]
    pub fn in_flight(&self) -> u64 {
        self.accepted
            .saturating_sub(self.completed + self.failed)
    }

    /// Human-readable report.
    pub fn summary(&self) -> String {
        format!(
            "Worker Pool Stats:\n\
             ├─ State: {}\n\
             ├─ Workers: {}/{} active\n\
             ├─ Queue: {}/{} ({:.2}%)\n\
             └─ Tasks:\n\
                ├─ Accepted: {}\n\
                ├─ Rejected: {}\n\
                ├─ Completed: {}\n\
                └─ Failed: {}",
            self.state,
            self.active_workers,
            self.worker_count,
            self.queue_size,
            self.max_queue_size,
            self.utilization() * 100.0,
            self.accepted,
            self.rejected,
            self.completed,
            self.failed,
        )
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    /// Occupies the pool's only worker until the returned sender fires.
    fn block_single_worker(pool: &WorkerPool) -> mpsc::Sender<()> {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        assert!(pool.enqueue(move || {
            let _ = release_rx.recv();
        }));

        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.queue_size() > 0 {
            assert!(Instant::now() < deadline, "worker never picked up the gate task");
            thread::sleep(Duration::from_millis(1));
        }
        release_tx
    }

    #[test]
    fn test_runs_every_task() {
        let pool = WorkerPool::new(PoolConfig::new(4, 1000)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..200 {
            let counter = counter.clone();
            assert!(pool.enqueue(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            }));
        }

        pool.shutdown();
        assert_eq!(counter.load(Ordering::Relaxed), 200);

        let stats = pool.stats();
        assert_eq!(stats.accepted, 200);
        assert_eq!(stats.completed, 200);
        assert_eq!(stats.in_flight(), 0);
        assert_eq!(stats.state, PoolState::Stopped);
    }

    #[test]
    fn test_backpressure_when_full() {
        let pool = WorkerPool::new(PoolConfig::new(1, 2)).unwrap();
        let release = block_single_worker(&pool);

        assert!(pool.enqueue(|| {}));
        assert!(pool.enqueue(|| {}));
        assert_eq!(pool.submit(|| {}), Err(Rejection::QueueFull));
        assert!(pool.stats().is_saturated());

        release.send(()).unwrap();

        // Room frees up once the worker catches up
        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.queue_size() == 2 {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(1));
        }
        assert!(pool.enqueue(|| {}));

        pool.shutdown();
        assert_eq!(pool.stats().rejected, 1);
    }

    #[test]
    fn test_fifo_with_single_worker() {
        let pool = WorkerPool::new(PoolConfig::new(1, 100)).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20 {
            let order = order.clone();
            pool.enqueue(move || order.lock().push(i));
        }

        pool.shutdown();
        assert_eq!(*order.lock(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let pool = WorkerPool::new(PoolConfig::new(1, 10)).unwrap();
        let release = block_single_worker(&pool);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let counter = counter.clone();
            assert!(pool.enqueue(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            }));
        }

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            release.send(()).unwrap();
        });

        pool.shutdown();
        releaser.join().unwrap();

        assert_eq!(counter.load(Ordering::Relaxed), 5);
        assert_eq!(pool.queue_size(), 0);
    }

    #[test]
    fn test_rejects_after_shutdown() {
        let pool = WorkerPool::new(PoolConfig::new(2, 10)).unwrap();
        pool.shutdown();

        assert_eq!(pool.submit(|| {}), Err(Rejection::ShuttingDown));
        assert!(!pool.enqueue(|| {}));
        assert!(!pool.is_running());
    }

    #[test]
    fn test_failing_tasks_do_not_kill_workers() {
        let pool = WorkerPool::new(PoolConfig::new(1, 10)).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        assert!(pool.enqueue_fallible(|| Err::<(), _>("bad input")));
        assert!(pool.enqueue(|| panic!("task blew up")));
        {
            let ran = ran.clone();
            assert!(pool.enqueue(move || {
                ran.fetch_add(1, Ordering::Relaxed);
            }));
        }

        pool.shutdown();

        let stats = pool.stats();
        assert_eq!(ran.load(Ordering::Relaxed), 1);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.completed, 1);
    }

    #[test]
    fn test_shutdown_is_idempotent_and_concurrent() {
        let pool = Arc::new(WorkerPool::new(PoolConfig::new(2, 10)).unwrap());
        for _ in 0..5 {
            pool.enqueue(|| thread::sleep(Duration::from_millis(5)));
        }

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    pool.shutdown();
                    // Every caller returns only once the pool is stopped
                    pool.state()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), PoolState::Stopped);
        }
        pool.shutdown();
        assert_eq!(pool.stats().completed, 5);
    }

    #[test]
    fn test_shutdown_from_inside_task() {
        let pool = Arc::new(WorkerPool::new(PoolConfig::new(2, 10)).unwrap());
        let (done_tx, done_rx) = mpsc::channel();

        {
            let inner = pool.clone();
            assert!(pool.enqueue(move || {
                inner.shutdown();
                done_tx.send(inner.is_running()).unwrap();
            }));
        }

        let running = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!running);

        pool.shutdown();
        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            WorkerPool::new(PoolConfig::new(0, 10)),
            Err(Error::InvalidConfig(_))
        ));
        assert!(WorkerPool::new(PoolConfig::new(1, 0)).is_err());
    }

    #[test]
    fn test_stats_display() {
        let pool = WorkerPool::new(PoolConfig::new(3, 4)).unwrap();
        assert_eq!(pool.worker_count(), 3);
        assert_eq!(pool.max_queue_size(), 4);

        let stats = pool.stats();
        assert_eq!(stats.utilization(), 0.0);
        let summary = stats.to_string();
        assert!(summary.contains("Worker Pool Stats"));
        assert!(summary.contains("running"));

        assert!(format!("{:?}", pool).contains("WorkerPool"));
    }
}
