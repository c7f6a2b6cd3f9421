//! Work-stealing worker pool, the unit of parallel execution.
//!
//! A fixed set of worker threads, each driving one bounded [`TaskQueue`].
//! A worker pops its own queue LIFO; when empty it pops the unbounded
//! [`GlobalQueue`], then tries to steal FIFO from a pseudo-randomly chosen
//! peer; when everything is empty it parks until new work arrives or
//! shutdown is requested.
//!
//! Cross-thread communication happens only through task submission and
//! async value resolution; workers share no other mutable state.
//!
//! # Submission and affinity
//!
//! [`Scheduler::enqueue`] called from a worker thread pushes to that
//! worker's own queue (keeps producer and consumer local), overflowing to
//! the global queue when the bounded queue rejects the push. Calls from
//! outside the pool, or with an explicit affinity, go to the designated
//! queue or the global queue.
//!
//! # Quiescence
//!
//! [`Scheduler::quiesce`] blocks the calling non-worker thread until every
//! queue is empty and no task is in flight, for deterministic shutdown and
//! synchronous test execution.

pub mod global_queue;
pub mod stealing;
pub mod task_queue;
pub mod worker;

pub use global_queue::GlobalQueue;
pub use task_queue::{Stealer, TaskQueue, DEFAULT_CAPACITY};

use crate::util::DetRng;
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, trace};
use worker::{Parker, Worker};

/// A deferred unit of work: an opaque callable executed exactly once.
///
/// Tasks do not retry themselves; idempotent re-submission, if needed, is
/// the caller's responsibility.
pub struct Task {
    f: Box<dyn FnOnce() + Send + 'static>,
}

impl Task {
    /// Wraps a callable in a task.
    #[must_use]
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self { f: Box::new(f) }
    }

    /// Executes the task, consuming it.
    pub fn run(self) {
        (self.f)();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Task")
    }
}

thread_local! {
    /// (pool identity, worker index) for the current thread, when it is a
    /// pool worker.
    static CURRENT_WORKER: Cell<Option<(usize, usize)>> = const { Cell::new(None) };
}

/// True when the current thread is a scheduler worker of any pool.
///
/// Blocking waits are forbidden on worker threads; this is the guard the
/// blocking paths consult.
#[must_use]
pub fn on_worker_thread() -> bool {
    CURRENT_WORKER.with(|c| c.get().is_some())
}

/// Pool-shared state.
pub(crate) struct Shared {
    queues: Vec<Arc<TaskQueue>>,
    global: GlobalQueue,
    parkers: Vec<Parker>,
    shutdown: AtomicBool,
    /// Tasks queued or in flight; quiesce waits for this to reach zero.
    pending: Mutex<usize>,
    quiesced: Condvar,
}

impl Shared {
    fn pool_token(self: &Arc<Self>) -> usize {
        Arc::as_ptr(self) as usize
    }

    fn task_queued(&self) {
        let mut pending = self.pending.lock().expect("pending lock poisoned");
        *pending += 1;
    }

    pub(crate) fn task_finished(&self) {
        let mut pending = self.pending.lock().expect("pending lock poisoned");
        *pending -= 1;
        if *pending == 0 {
            self.quiesced.notify_all();
        }
    }

    fn submit(self: &Arc<Self>, task: Task, affinity: Option<usize>) {
        self.task_queued();
        let token = self.pool_token();
        let target = affinity.or_else(|| {
            CURRENT_WORKER.with(|c| match c.get() {
                Some((pool, idx)) if pool == token => Some(idx),
                _ => None,
            })
        });
        match target {
            Some(idx) => {
                if let Err(task) = self.queues[idx].push(task) {
                    trace!(worker = idx, "worker queue full, overflowing to global");
                    self.global.push(task);
                }
            }
            None => self.global.push(task),
        }
        for parker in &self.parkers {
            parker.unpark();
        }
    }
}

/// Scopes the thread-local worker registration to the worker loop.
pub(crate) struct WorkerGuard;

impl WorkerGuard {
    pub(crate) fn enter(shared: &Arc<Shared>, id: usize) -> Self {
        CURRENT_WORKER.with(|c| c.set(Some((shared.pool_token(), id))));
        Self
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        CURRENT_WORKER.with(|c| c.set(None));
    }
}

/// A fixed pool of worker threads driving work-stealing queues.
pub struct Scheduler {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Creates a pool of `workers` threads with per-worker queues of
    /// `queue_capacity` slots. Thread names are `{name_prefix}-{index}`.
    ///
    /// # Panics
    ///
    /// Panics if `workers` or `queue_capacity` is zero, or if thread
    /// spawning fails.
    #[must_use]
    pub fn new(workers: usize, queue_capacity: usize, name_prefix: &str) -> Self {
        assert!(workers > 0, "scheduler needs at least one worker");
        let queues: Vec<_> = (0..workers)
            .map(|_| Arc::new(TaskQueue::with_capacity(queue_capacity)))
            .collect();
        let parkers: Vec<_> = (0..workers).map(|_| Parker::new()).collect();
        let shared = Arc::new(Shared {
            queues,
            global: GlobalQueue::new(),
            parkers,
            shutdown: AtomicBool::new(false),
            pending: Mutex::new(0),
            quiesced: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let stealers: Vec<_> = shared
                .queues
                .iter()
                .enumerate()
                .filter(|(peer, _)| *peer != id)
                .map(|(_, queue)| queue.stealer())
                .collect();
            let mut worker = Worker {
                id,
                local: Arc::clone(&shared.queues[id]),
                stealers,
                shared: Arc::clone(&shared),
                rng: DetRng::new(id as u64 + 1),
            };
            let handle = std::thread::Builder::new()
                .name(format!("{name_prefix}-{id}"))
                .spawn(move || worker.run_loop())
                .expect("failed to spawn scheduler worker");
            handles.push(handle);
        }
        debug!(workers, queue_capacity, "scheduler started");

        Self {
            shared,
            handles: Mutex::new(handles),
        }
    }

    /// Submits a task for execution.
    ///
    /// From a worker thread the task lands on that worker's own queue,
    /// overflowing to the global queue if the bounded queue is full. From
    /// any other thread it lands on the global queue.
    pub fn enqueue(&self, task: Task) {
        self.shared.submit(task, None);
    }

    /// Submits a task with an explicit worker affinity.
    ///
    /// The task lands on worker `affinity`'s queue, overflowing to the
    /// global queue when that queue is full. Affinity is a placement hint,
    /// not an execution guarantee: a peer may still steal the task.
    ///
    /// # Panics
    ///
    /// Panics if `affinity` is out of range.
    pub fn enqueue_with_affinity(&self, task: Task, affinity: usize) {
        assert!(affinity < self.worker_count(), "affinity out of range");
        self.shared.submit(task, Some(affinity));
    }

    /// Blocks until all queues are empty and no task is in flight.
    ///
    /// # Panics
    ///
    /// Panics when called from a worker thread, which could never observe
    /// its own quiescence.
    pub fn quiesce(&self) {
        assert!(
            !on_worker_thread(),
            "Scheduler::quiesce called from a worker thread"
        );
        let mut pending = self.shared.pending.lock().expect("pending lock poisoned");
        while *pending > 0 {
            pending = self
                .shared
                .quiesced
                .wait(pending)
                .expect("pending lock poisoned");
        }
    }

    /// Returns the number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.shared.queues.len()
    }

    /// Signals shutdown and joins every worker thread.
    ///
    /// Queued tasks may be abandoned; call [`Scheduler::quiesce`] first for
    /// a deterministic drain.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
        for parker in &self.shared.parkers {
            parker.unpark();
        }
        let mut handles = self.handles.lock().expect("handles lock poisoned");
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("workers", &self.worker_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn enqueued_tasks_all_run() {
        let scheduler = Scheduler::new(4, 64, "test-worker");
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..500 {
            let count = Arc::clone(&count);
            scheduler.enqueue(Task::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        scheduler.quiesce();
        assert_eq!(count.load(Ordering::SeqCst), 500);
    }

    #[test]
    fn quiesce_on_empty_pool_returns_immediately() {
        let scheduler = Scheduler::new(2, 16, "test-worker");
        scheduler.quiesce();
    }

    #[test]
    fn tasks_spawned_from_workers_complete_before_quiesce_returns() {
        let scheduler = Arc::new(Scheduler::new(4, 64, "test-worker"));
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let inner_scheduler = Arc::clone(&scheduler);
            let count = Arc::clone(&count);
            scheduler.enqueue(Task::new(move || {
                let count = Arc::clone(&count);
                inner_scheduler.enqueue(Task::new(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                }));
            }));
        }
        scheduler.quiesce();
        assert_eq!(count.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn worker_thread_is_detectable() {
        let scheduler = Scheduler::new(2, 16, "test-worker");
        assert!(!on_worker_thread());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        scheduler.enqueue(Task::new(move || {
            if on_worker_thread() {
                seen2.fetch_add(1, Ordering::SeqCst);
            }
        }));
        scheduler.quiesce();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn affinity_lands_on_designated_queue_and_overflows() {
        let scheduler = Scheduler::new(2, 4, "test-worker");
        let count = Arc::new(AtomicUsize::new(0));
        // More tasks than one queue holds; overflow must not lose any.
        for _ in 0..64 {
            let count = Arc::clone(&count);
            scheduler.enqueue_with_affinity(
                Task::new(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                }),
                1,
            );
        }
        scheduler.quiesce();
        assert_eq!(count.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn load_spreads_via_stealing() {
        // One long prefix task occupies a worker; remaining work is stolen
        // and finished by peers rather than waiting behind it.
        let scheduler = Scheduler::new(4, 64, "test-worker");
        let count = Arc::new(AtomicUsize::new(0));
        scheduler.enqueue(Task::new(|| {
            std::thread::sleep(Duration::from_millis(50));
        }));
        for _ in 0..100 {
            let count = Arc::clone(&count);
            scheduler.enqueue(Task::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        scheduler.quiesce();
        assert_eq!(count.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn shutdown_joins_workers() {
        let scheduler = Scheduler::new(3, 16, "test-worker");
        scheduler.quiesce();
        scheduler.shutdown();
        // Second shutdown is a no-op.
        scheduler.shutdown();
    }
}
