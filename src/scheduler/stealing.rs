//! Work stealing logic.

use super::task_queue::Stealer;
use super::Task;
use crate::util::DetRng;

/// Tries to steal a task from a list of peer stealers.
///
/// Starts at a pseudo-random index and sweeps every peer once, so repeated
/// attempts spread contention instead of hammering one victim.
pub fn steal_task(stealers: &[Stealer], rng: &mut DetRng) -> Option<Task> {
    if stealers.is_empty() {
        return None;
    }

    let len = stealers.len();
    let start = rng.next_usize(len);
    for i in 0..len {
        let idx = (start + i) % len;
        if let Some(task) = stealers[idx].steal() {
            return Some(task);
        }
    }
    None
}
