//! Per-session distributed context state.
//!
//! A context owns its program table, its object namespace, and an inbox
//! of out-of-band payloads, all behind one lock. Requests against the
//! same context serialize on that lock, which is also what makes a close
//! racing an execute safe: whichever acquires the lock second observes
//! the other's effect.

use crate::distributed::program::Program;
use crate::distributed::protocol::{ClusterConfig, RemoteObjectIdProto};
use crate::error::{Error, ErrorKind, Result};
use crate::tensor::TensorHandle;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// A program as stored after registration: decoded once, with its output
/// device attribution precomputed.
#[derive(Debug, Clone)]
pub struct RegisteredProgram {
    /// The decoded steps.
    pub program: Program,
    /// Whether the caller asked for ahead-of-time compilation.
    pub need_compilation: bool,
    /// One device name per program output, in program order.
    pub output_devices: Vec<String>,
}

/// Everything mutable in a context, guarded by one lock.
#[derive(Debug, Default)]
pub(crate) struct ContextState {
    pub(crate) programs: HashMap<String, RegisteredProgram>,
    pub(crate) objects: HashMap<RemoteObjectIdProto, TensorHandle>,
    pub(crate) inbox: HashMap<u64, Vec<u8>>,
    pub(crate) closed: bool,
}

/// One distributed session, keyed by its 64-bit context id.
pub struct DistributedContext {
    context_id: u64,
    cluster: ClusterConfig,
    next_local_id: AtomicU64,
    state: Mutex<ContextState>,
}

impl DistributedContext {
    /// Creates an open context with an empty namespace.
    #[must_use]
    pub fn new(context_id: u64, cluster: ClusterConfig) -> Self {
        Self {
            context_id,
            cluster,
            next_local_id: AtomicU64::new(1),
            state: Mutex::new(ContextState::default()),
        }
    }

    /// The session key.
    #[must_use]
    pub fn context_id(&self) -> u64 {
        self.context_id
    }

    /// The session's cluster topology.
    #[must_use]
    pub fn cluster(&self) -> &ClusterConfig {
        &self.cluster
    }

    /// Allocates a fresh object id owned by `device` under `prefix_id`.
    /// Local ids are monotonic within this context; allocation alone does
    /// not store an object.
    pub fn allocate_object_id(&self, prefix_id: u64, device: &str) -> RemoteObjectIdProto {
        RemoteObjectIdProto {
            prefix_id,
            local_id: self.next_local_id.fetch_add(1, Ordering::Relaxed),
            device: device.to_string(),
        }
    }

    /// Locks the state, failing with `ContextClosed` if the context has
    /// been torn down. Holders of a stale context reference land here.
    pub(crate) fn checked_state(&self) -> Result<MutexGuard<'_, ContextState>> {
        let state = self.state.lock().expect("context state lock poisoned");
        if state.closed {
            return Err(Error::new(
                ErrorKind::ContextClosed,
                format!("context {:#x} is closed", self.context_id),
            ));
        }
        Ok(state)
    }

    /// Marks the context closed and drops every program, object, and
    /// pending payload. Subsequent state access fails with
    /// `ContextClosed`.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock().expect("context state lock poisoned");
        state.closed = true;
        state.programs.clear();
        state.objects.clear();
        state.inbox.clear();
    }
}
