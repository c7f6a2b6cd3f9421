//! Worker thread logic.

use super::stealing;
use super::task_queue::{Stealer, TaskQueue};
use super::{Shared, Task};
use crate::util::DetRng;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tracing::trace;

/// Identifier for a scheduler worker.
pub type WorkerId = usize;

/// A worker thread that executes tasks.
pub(super) struct Worker {
    /// Index of this worker within the pool.
    pub id: WorkerId,
    /// This worker's own queue (owner end).
    pub local: Arc<TaskQueue>,
    /// Thief-end handles for the other workers' queues.
    pub stealers: Vec<Stealer>,
    /// Pool-shared state: global queue, parkers, shutdown, quiesce.
    pub shared: Arc<Shared>,
    /// Deterministic RNG for steal-target selection.
    pub rng: DetRng,
}

impl Worker {
    /// Runs the worker scheduling loop until shutdown.
    ///
    /// Priority order: own queue (LIFO), global queue, steal from a peer,
    /// park. Tasks run to completion; there is no mid-task cancellation.
    pub fn run_loop(&mut self) {
        let _guard = super::WorkerGuard::enter(&self.shared, self.id);
        while !self.shared.shutdown.load(Ordering::Relaxed) {
            if let Some(task) = self.local.pop() {
                self.execute(task);
                continue;
            }
            if let Some(task) = self.shared.global.pop() {
                self.execute(task);
                continue;
            }
            if let Some(task) = stealing::steal_task(&self.stealers, &mut self.rng) {
                self.execute(task);
                continue;
            }
            self.shared.parkers[self.id].park();
        }
    }

    fn execute(&self, task: Task) {
        trace!(worker_id = self.id, "executing task");
        task.run();
        self.shared.task_finished();
    }
}

/// A parking mechanism for idle workers.
#[derive(Debug, Clone)]
pub(super) struct Parker {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Parker {
    /// Creates a new parker.
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Parks the current thread until notified.
    ///
    /// A notification delivered before the park is not lost: the next park
    /// returns immediately.
    pub fn park(&self) {
        let (lock, cvar) = &*self.inner;
        let mut notified = lock.lock().expect("parker lock poisoned");
        while !*notified {
            notified = cvar.wait(notified).expect("parker lock poisoned");
        }
        *notified = false;
    }

    /// Parks the current thread for at most `duration`.
    #[allow(dead_code)]
    pub fn park_timeout(&self, duration: Duration) {
        let (lock, cvar) = &*self.inner;
        let mut notified = lock.lock().expect("parker lock poisoned");
        if !*notified {
            let (guard, _) = cvar
                .wait_timeout(notified, duration)
                .expect("parker lock poisoned");
            notified = guard;
        }
        *notified = false;
    }

    /// Unparks the associated thread.
    pub fn unpark(&self) {
        let (lock, cvar) = &*self.inner;
        {
            let mut notified = lock.lock().expect("parker lock poisoned");
            *notified = true;
        }
        cvar.notify_one();
    }
}
