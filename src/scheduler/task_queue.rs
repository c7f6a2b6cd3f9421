//! Fixed-capacity per-worker task queue.
//!
//! A double-ended buffer with an owner end and a thief end. The owning
//! worker pushes and pops at the back (LIFO, favors cache locality); any
//! other worker steals from the front (FIFO). Capacity is fixed at
//! construction: a full queue rejects the push and hands the task back so
//! the caller can overflow to the unbounded global queue. The queue never
//! blocks and never grows.
//!
//! Uses a lock-based deque, which stays within the crate's `unsafe`
//! prohibition while preserving work-stealing semantics.

use super::Task;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Default capacity for worker queues, overridable via
/// [`RuntimeConfig`](crate::runtime::RuntimeConfig).
pub const DEFAULT_CAPACITY: usize = 256;

/// A bounded work-stealing queue owned by a single worker.
#[derive(Debug)]
pub struct TaskQueue {
    inner: Arc<Mutex<VecDeque<Task>>>,
    capacity: usize,
}

impl TaskQueue {
    /// Creates a queue with [`DEFAULT_CAPACITY`] slots.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a queue with `capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "task queue capacity must be non-zero");
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Pushes a task at the owner end.
    ///
    /// Returns the task back if the queue is at capacity. Rejection is not
    /// an error: it is the signal to fall back to the overflow path.
    pub fn push(&self, task: Task) -> Result<(), Task> {
        let mut queue = self.inner.lock().expect("task queue lock poisoned");
        if queue.len() == self.capacity {
            return Err(task);
        }
        queue.push_back(task);
        Ok(())
    }

    /// Pops a task from the owner end (LIFO).
    #[must_use]
    pub fn pop(&self) -> Option<Task> {
        let mut queue = self.inner.lock().expect("task queue lock poisoned");
        queue.pop_back()
    }

    /// Returns the number of resident tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        let queue = self.inner.lock().expect("task queue lock poisoned");
        queue.len()
    }

    /// Returns true if no tasks are resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let queue = self.inner.lock().expect("task queue lock poisoned");
        queue.is_empty()
    }

    /// Returns the fixed capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Creates a thief-end handle for this queue.
    #[must_use]
    pub fn stealer(&self) -> Stealer {
        Stealer {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle to steal tasks from the thief end of a [`TaskQueue`].
#[derive(Debug, Clone)]
pub struct Stealer {
    inner: Arc<Mutex<VecDeque<Task>>>,
}

impl Stealer {
    /// Steals the oldest task (FIFO).
    #[must_use]
    pub fn steal(&self) -> Option<Task> {
        let mut queue = self.inner.lock().expect("task queue lock poisoned");
        queue.pop_front()
    }

    /// Steals roughly half of the resident tasks into `dest`, preserving
    /// their FIFO order. Returns false if there was nothing to steal.
    ///
    /// Tasks that do not fit in `dest` are handed back one by one via the
    /// returned overflow; the caller routes them to the global queue.
    pub fn steal_batch(&self, dest: &TaskQueue) -> (bool, Vec<Task>) {
        let mut stolen = Vec::new();
        {
            let mut queue = self.inner.lock().expect("task queue lock poisoned");
            if queue.is_empty() {
                return (false, Vec::new());
            }
            let count = (queue.len() / 2).max(1);
            for _ in 0..count {
                match queue.pop_front() {
                    Some(task) => stolen.push(task),
                    None => break,
                }
            }
        }

        let mut overflow = Vec::new();
        for task in stolen {
            if let Err(task) = dest.push(task) {
                overflow.push(task);
            }
        }
        (true, overflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn marker(log: &Arc<Mutex<Vec<u32>>>, id: u32) -> Task {
        let log = Arc::clone(log);
        Task::new(move || log.lock().unwrap().push(id))
    }

    fn run_all(tasks: Vec<Task>) {
        for task in tasks {
            task.run();
        }
    }

    #[test]
    fn owner_pop_is_lifo() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = TaskQueue::with_capacity(8);
        for id in 1..=3 {
            queue.push(marker(&log, id)).unwrap();
        }

        let mut popped = Vec::new();
        while let Some(task) = queue.pop() {
            popped.push(task);
        }
        run_all(popped);
        assert_eq!(*log.lock().unwrap(), vec![3, 2, 1]);
    }

    #[test]
    fn thief_steal_is_fifo() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = TaskQueue::with_capacity(8);
        for id in 1..=3 {
            queue.push(marker(&log, id)).unwrap();
        }

        let stealer = queue.stealer();
        while let Some(task) = stealer.steal() {
            task.run();
        }
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn push_beyond_capacity_rejects_without_corruption() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = TaskQueue::with_capacity(4);
        for id in 1..=4 {
            assert!(queue.push(marker(&log, id)).is_ok());
        }

        // The 5th push is rejected and the task handed back intact.
        let rejected = queue.push(marker(&log, 5)).unwrap_err();
        rejected.run();
        assert_eq!(*log.lock().unwrap(), vec![5]);
        log.lock().unwrap().clear();

        // The 4 residents are unharmed and pop in LIFO order.
        assert_eq!(queue.len(), 4);
        let mut popped = Vec::new();
        while let Some(task) = queue.pop() {
            popped.push(task);
        }
        run_all(popped);
        assert_eq!(*log.lock().unwrap(), vec![4, 3, 2, 1]);
    }

    #[test]
    fn capacity_is_fixed_at_construction() {
        let queue = TaskQueue::with_capacity(2);
        assert_eq!(queue.capacity(), 2);
        assert!(queue.push(Task::new(|| {})).is_ok());
        assert!(queue.push(Task::new(|| {})).is_ok());
        assert!(queue.push(Task::new(|| {})).is_err());
        queue.pop();
        // Freed slot is reusable; capacity never grew.
        assert!(queue.push(Task::new(|| {})).is_ok());
        assert!(queue.push(Task::new(|| {})).is_err());
    }

    #[test]
    fn interleaved_owner_thief_operations_preserve_tasks() {
        let count = Arc::new(AtomicUsize::new(0));
        let queue = TaskQueue::with_capacity(16);
        let stealer = queue.stealer();

        let counted = |count: &Arc<AtomicUsize>| {
            let count = Arc::clone(count);
            Task::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };

        queue.push(counted(&count)).unwrap();
        stealer.steal().unwrap().run();

        queue.push(counted(&count)).unwrap();
        queue.push(counted(&count)).unwrap();
        queue.pop().unwrap().run();
        stealer.steal().unwrap().run();
        assert!(queue.pop().is_none());

        // Owner push after the queue drained completely.
        queue.push(counted(&count)).unwrap();
        queue.pop().unwrap().run();
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn steal_batch_moves_about_half() {
        let src = TaskQueue::with_capacity(16);
        let dest = TaskQueue::with_capacity(16);
        for _ in 0..10 {
            src.push(Task::new(|| {})).unwrap();
        }

        let (stole, overflow) = src.stealer().steal_batch(&dest);
        assert!(stole);
        assert!(overflow.is_empty());
        assert_eq!(src.len() + dest.len(), 10);
        assert!((4..=6).contains(&dest.len()), "stole {}", dest.len());
    }

    #[test]
    fn steal_batch_overflow_hands_tasks_back() {
        let src = TaskQueue::with_capacity(16);
        let dest = TaskQueue::with_capacity(1);
        for _ in 0..8 {
            src.push(Task::new(|| {})).unwrap();
        }

        let (stole, overflow) = src.stealer().steal_batch(&dest);
        assert!(stole);
        assert_eq!(dest.len(), 1);
        assert_eq!(overflow.len() + src.len() + dest.len(), 8);
    }

    #[test]
    fn steal_batch_from_empty_returns_false() {
        let src = TaskQueue::with_capacity(4);
        let dest = TaskQueue::with_capacity(4);
        let (stole, overflow) = src.stealer().steal_batch(&dest);
        assert!(!stole);
        assert!(overflow.is_empty());
    }

    #[test]
    fn concurrent_owner_and_stealers_run_every_task_once() {
        let total = 256;
        let queue = Arc::new(TaskQueue::with_capacity(total));
        let counts: Arc<Vec<AtomicUsize>> =
            Arc::new((0..total).map(|_| AtomicUsize::new(0)).collect());
        for i in 0..total {
            let counts = Arc::clone(&counts);
            queue
                .push(Task::new(move || {
                    counts[i].fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }

        let stealer_threads = 4;
        let barrier = Arc::new(Barrier::new(stealer_threads + 1));
        let mut handles = Vec::new();

        let owner_queue = Arc::clone(&queue);
        let owner_barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            owner_barrier.wait();
            while let Some(task) = owner_queue.pop() {
                task.run();
                thread::yield_now();
            }
        }));

        for _ in 0..stealer_threads {
            let stealer = queue.stealer();
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                while let Some(task) = stealer.steal() {
                    task.run();
                    thread::yield_now();
                }
            }));
        }

        for handle in handles {
            handle.join().expect("worker join");
        }
        for (i, count) in counts.iter().enumerate() {
            assert_eq!(count.load(Ordering::SeqCst), 1, "task {i} ran wrong count");
        }
    }
}
