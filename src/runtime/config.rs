//! Runtime configuration.

use std::thread;

/// Tunables for a [`CoreRuntime`](super::CoreRuntime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Worker threads in the pool. `0` means one per available core.
    pub workers: usize,
    /// Per-worker local queue capacity. `0` falls back to the default.
    pub queue_capacity: usize,
    /// Worker thread name prefix.
    pub thread_name_prefix: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_capacity: 0,
            thread_name_prefix: "coreflow-worker".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Resolves zero placeholders to concrete values.
    #[must_use]
    pub fn normalize(mut self) -> Self {
        if self.workers == 0 {
            self.workers = thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        }
        if self.queue_capacity == 0 {
            self.queue_capacity = crate::scheduler::DEFAULT_CAPACITY;
        }
        self
    }
}
