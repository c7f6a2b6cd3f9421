//! Single-assignment async values, the unit of dataflow.
//!
//! An [`AsyncValueRef`] is a reference-counted container for a value that
//! becomes available once, either successfully or with an error. Producers
//! resolve it exactly once; consumers either register continuations with
//! [`AsyncValueRef::and_then`] or block with [`AsyncValueRef::wait`] (only
//! permitted off scheduler worker threads).
//!
//! # Resolution discipline
//!
//! Each async value has exactly one producer. Resolving twice is a
//! programming error and panics; it is not a recoverable failure.
//! Continuations registered before resolution run at resolution time in
//! registration order, on the resolving thread. Continuations registered
//! after resolution run immediately on the registering thread. Either way,
//! every continuation runs exactly once.
//!
//! # Indirection
//!
//! A value produced before its defining computation starts can be forwarded
//! to another value with [`AsyncValueRef::forward_to`]. The forwarding link
//! is set at most once; afterwards the value resolves when (and how) the
//! target resolves.

use crate::error::Error;
use std::sync::{Arc, Condvar, Mutex};

/// The resolved form of an async value: a shared payload or an error.
///
/// Payloads are shared (`Arc`) because a terminal value is immutable and
/// read concurrently by any number of consumers.
pub type Resolved<T> = Result<Arc<T>, Error>;

enum State<T> {
    Unresolved,
    Concrete(Arc<T>),
    Failed(Error),
}

impl<T> State<T> {
    fn peek(&self) -> Option<Resolved<T>> {
        match self {
            Self::Unresolved => None,
            Self::Concrete(value) => Some(Ok(Arc::clone(value))),
            Self::Failed(err) => Some(Err(err.clone())),
        }
    }
}

type Continuation<T> = Box<dyn FnOnce(Resolved<T>) + Send>;

struct Inner<T> {
    state: State<T>,
    /// Continuations registered before resolution, in registration order.
    waiters: Vec<Continuation<T>>,
    /// Set once by `forward_to`; blocks direct producer writes afterwards.
    forwarded: bool,
}

struct AsyncCell<T> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
}

/// A shared handle to a single-assignment async value.
///
/// Cloning the handle shares ownership of the same underlying value; the
/// value is destroyed when the last handle is dropped.
pub struct AsyncValueRef<T> {
    cell: Arc<AsyncCell<T>>,
}

impl<T> Clone for AsyncValueRef<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> std::fmt::Debug for AsyncValueRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.cell.inner.lock().expect("async value lock poisoned");
        let state = match &inner.state {
            State::Unresolved => "unresolved",
            State::Concrete(_) => "concrete",
            State::Failed(_) => "failed",
        };
        f.debug_struct("AsyncValueRef")
            .field("state", &state)
            .field("waiters", &inner.waiters.len())
            .finish()
    }
}

impl<T: Send + Sync + 'static> AsyncValueRef<T> {
    /// Creates an unresolved async value.
    #[must_use]
    pub fn unresolved() -> Self {
        Self {
            cell: Arc::new(AsyncCell {
                inner: Mutex::new(Inner {
                    state: State::Unresolved,
                    waiters: Vec::new(),
                    forwarded: false,
                }),
                available: Condvar::new(),
            }),
        }
    }

    /// Creates an async value already resolved to `value`.
    #[must_use]
    pub fn concrete(value: T) -> Self {
        let av = Self::unresolved();
        av.set_value(value);
        av
    }

    /// Creates an async value already resolved to `error`.
    #[must_use]
    pub fn failed(error: Error) -> Self {
        let av = Self::unresolved();
        av.set_error(error);
        av
    }

    /// Resolves this value to `value`.
    ///
    /// # Panics
    ///
    /// Panics if the value is already resolved or forwarded; each async
    /// value has exactly one producer.
    pub fn set_value(&self, value: T) {
        self.resolve(Ok(Arc::new(value)), false);
    }

    /// Resolves this value to `error`.
    ///
    /// # Panics
    ///
    /// Panics if the value is already resolved or forwarded.
    pub fn set_error(&self, error: Error) {
        self.resolve(Err(error), false);
    }

    /// Registers a continuation to run when the value resolves.
    ///
    /// If the value is already resolved the continuation runs immediately
    /// on the calling thread; otherwise it runs on the resolving thread, in
    /// registration order relative to other continuations.
    pub fn and_then(&self, f: impl FnOnce(Resolved<T>) + Send + 'static) {
        let ready = {
            let mut inner = self.cell.inner.lock().expect("async value lock poisoned");
            match inner.state.peek() {
                Some(resolved) => resolved,
                None => {
                    inner.waiters.push(Box::new(f));
                    return;
                }
            }
        };
        f(ready);
    }

    /// Blocks until the value resolves and returns it.
    ///
    /// # Panics
    ///
    /// Panics when called from a scheduler worker thread: blocking a worker
    /// on a value that another queued task must produce deadlocks the pool.
    pub fn wait(&self) -> Resolved<T> {
        assert!(
            !crate::scheduler::on_worker_thread(),
            "AsyncValueRef::wait called from a scheduler worker thread"
        );
        let mut inner = self.cell.inner.lock().expect("async value lock poisoned");
        loop {
            if let Some(resolved) = inner.state.peek() {
                return resolved;
            }
            inner = self
                .cell
                .available
                .wait(inner)
                .expect("async value lock poisoned");
        }
    }

    /// Returns the resolved value without blocking, or `None` if pending.
    #[must_use]
    pub fn peek(&self) -> Option<Resolved<T>> {
        let inner = self.cell.inner.lock().expect("async value lock poisoned");
        inner.state.peek()
    }

    /// True once the value has reached a terminal state.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        let inner = self.cell.inner.lock().expect("async value lock poisoned");
        !matches!(inner.state, State::Unresolved)
    }

    /// Returns the error if the value resolved to one.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        let inner = self.cell.inner.lock().expect("async value lock poisoned");
        match &inner.state {
            State::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Forwards this value to `target`: when the target resolves, this
    /// value resolves the same way.
    ///
    /// # Panics
    ///
    /// Panics if this value is already resolved or already forwarded; the
    /// forwarding link is set at most once.
    pub fn forward_to(&self, target: &Self) {
        {
            let mut inner = self.cell.inner.lock().expect("async value lock poisoned");
            assert!(
                matches!(inner.state, State::Unresolved),
                "forward_to on a resolved async value"
            );
            assert!(!inner.forwarded, "forward_to called twice");
            inner.forwarded = true;
        }
        let this = self.clone();
        target.and_then(move |resolved| this.resolve(resolved, true));
    }

    /// Number of live handles to this value (producer + consumers +
    /// pending-continuation captures).
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.cell)
    }

    fn resolve(&self, resolved: Resolved<T>, via_forward: bool) {
        let waiters = {
            let mut inner = self.cell.inner.lock().expect("async value lock poisoned");
            assert!(
                matches!(inner.state, State::Unresolved),
                "async value resolved twice"
            );
            assert!(
                via_forward || !inner.forwarded,
                "set on a forwarded async value"
            );
            inner.state = match &resolved {
                Ok(value) => State::Concrete(Arc::clone(value)),
                Err(err) => State::Failed(err.clone()),
            };
            std::mem::take(&mut inner.waiters)
        };
        self.cell.available.notify_all();
        // Run outside the lock so continuations may inspect or register on
        // this value without deadlocking.
        for waiter in waiters {
            waiter(resolved.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Chain token
// ---------------------------------------------------------------------------

/// The execution-ordering token threaded through side-effecting dispatches.
///
/// A resolved `AsyncValueRef<Chain>` means "all prior side-effecting ops on
/// this path have completed". Each side-effecting dispatch consumes the
/// incoming chain and produces a new one, establishing a total order among
/// otherwise-unordered dataflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Chain;

/// Creates an already-resolved chain token, the head of a new ordering path.
#[must_use]
pub fn ready_chain() -> AsyncValueRef<Chain> {
    AsyncValueRef::concrete(Chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ErrorKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn concrete_value_is_immediately_available() {
        let av = AsyncValueRef::concrete(41);
        assert!(av.is_resolved());
        assert_eq!(*av.peek().unwrap().unwrap(), 41);
    }

    #[test]
    fn continuation_after_resolution_runs_immediately() {
        let av = AsyncValueRef::concrete(7);
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        av.and_then(move |v| {
            assert_eq!(*v.unwrap(), 7);
            ran2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn continuations_fire_in_registration_order() {
        let av: AsyncValueRef<u32> = AsyncValueRef::unresolved();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = Arc::clone(&order);
            av.and_then(move |_| order.lock().unwrap().push(i));
        }
        av.set_value(0);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn each_continuation_runs_exactly_once() {
        let av: AsyncValueRef<u32> = AsyncValueRef::unresolved();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let count = Arc::clone(&count);
            av.and_then(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        av.set_value(1);
        // Late registration also runs exactly once.
        let count2 = Arc::clone(&count);
        av.and_then(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 11);
    }

    #[test]
    #[should_panic(expected = "async value resolved twice")]
    fn double_resolution_panics() {
        let av = AsyncValueRef::unresolved();
        av.set_value(1);
        av.set_value(2);
    }

    #[test]
    fn failure_is_a_value() {
        let av: AsyncValueRef<u32> =
            AsyncValueRef::failed(Error::new(ErrorKind::FailedInput, "upstream"));
        assert_eq!(av.error().unwrap().kind(), ErrorKind::FailedInput);
        let saw_error = Arc::new(AtomicUsize::new(0));
        let saw = Arc::clone(&saw_error);
        av.and_then(move |v| {
            assert!(v.is_err());
            saw.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(saw_error.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wait_blocks_until_producer_resolves() {
        let av: AsyncValueRef<u32> = AsyncValueRef::unresolved();
        let producer = av.clone();
        let handle = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(10));
            producer.set_value(99);
        });
        assert_eq!(*av.wait().unwrap(), 99);
        handle.join().unwrap();
    }

    #[test]
    fn forwarded_value_resolves_with_target() {
        let indirect: AsyncValueRef<u32> = AsyncValueRef::unresolved();
        let target: AsyncValueRef<u32> = AsyncValueRef::unresolved();
        indirect.forward_to(&target);
        assert!(!indirect.is_resolved());
        target.set_value(5);
        assert_eq!(*indirect.peek().unwrap().unwrap(), 5);
    }

    #[test]
    fn forwarded_value_propagates_errors() {
        let indirect: AsyncValueRef<u32> = AsyncValueRef::unresolved();
        let target: AsyncValueRef<u32> = AsyncValueRef::unresolved();
        indirect.forward_to(&target);
        target.set_error(Error::new(ErrorKind::Cancelled, "timer won"));
        assert_eq!(indirect.error().unwrap().kind(), ErrorKind::Cancelled);
    }

    #[test]
    #[should_panic(expected = "forward_to called twice")]
    fn forwarding_link_set_at_most_once() {
        let indirect: AsyncValueRef<u32> = AsyncValueRef::unresolved();
        let a = AsyncValueRef::unresolved();
        let b = AsyncValueRef::unresolved();
        indirect.forward_to(&a);
        indirect.forward_to(&b);
    }

    #[test]
    #[should_panic(expected = "set on a forwarded async value")]
    fn direct_set_after_forward_panics() {
        let indirect: AsyncValueRef<u32> = AsyncValueRef::unresolved();
        let target = AsyncValueRef::unresolved();
        indirect.forward_to(&target);
        indirect.set_value(1);
    }

    #[test]
    fn terminal_value_is_shared_not_copied() {
        let av = AsyncValueRef::concrete(vec![1u8, 2, 3]);
        let a = av.peek().unwrap().unwrap();
        let b = av.peek().unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn ready_chain_is_resolved() {
        let chain = ready_chain();
        assert!(chain.is_resolved());
        assert!(chain.error().is_none());
    }

    #[test]
    fn concurrent_consumers_see_one_resolution() {
        let av: AsyncValueRef<u64> = AsyncValueRef::unresolved();
        let count = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let av = av.clone();
            let count = Arc::clone(&count);
            handles.push(thread::spawn(move || {
                av.and_then(move |v| {
                    assert_eq!(*v.unwrap(), 77);
                    count.fetch_add(1, Ordering::SeqCst);
                });
            }));
        }
        av.set_value(77);
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 8);
    }
}
