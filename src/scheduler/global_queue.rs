//! Global injection and overflow queue.
//!
//! An unbounded thread-safe FIFO for tasks that cannot be locally queued:
//! submissions from non-worker threads and overflow from full worker
//! queues.

use super::Task;
use crossbeam_queue::SegQueue;

/// The pool-wide unbounded task queue.
#[derive(Debug, Default)]
pub struct GlobalQueue {
    inner: SegQueue<Task>,
}

impl GlobalQueue {
    /// Creates an empty global queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: SegQueue::new(),
        }
    }

    /// Pushes a task. Never fails and never blocks.
    pub fn push(&self, task: Task) {
        self.inner.push(task);
    }

    /// Pops the oldest task.
    #[must_use]
    pub fn pop(&self) -> Option<Task> {
        self.inner.pop()
    }

    /// Returns the number of queued tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if no tasks are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
