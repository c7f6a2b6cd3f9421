//! Op invocations and the execution context threaded through dispatch.

use crate::op::attrs::OpAttrs;
use crate::scheduler::{Scheduler, Task};
use crate::tensor::{TensorHandle, TensorMetadata};
use crate::value::{ready_chain, AsyncValueRef, Chain};
use std::sync::Arc;

/// How dispatch completions are run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Completions are enqueued on the scheduler when inputs become ready.
    #[default]
    Async,
    /// Everything runs inline on the calling thread with no queueing,
    /// bypassing the pool. Inputs must already be available when the
    /// invocation reaches dispatch.
    Sync,
}

/// Per-path execution state handed to every dispatch call: the scheduler
/// to defer onto and the evaluation mode.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    scheduler: Arc<Scheduler>,
    mode: ExecutionMode,
}

impl ExecutionContext {
    /// Creates a context over `scheduler` in the given mode.
    #[must_use]
    pub fn new(scheduler: Arc<Scheduler>, mode: ExecutionMode) -> Self {
        Self { scheduler, mode }
    }

    /// The scheduler backing this context.
    #[must_use]
    pub const fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// The evaluation mode.
    #[must_use]
    pub const fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Runs `f` now (sync mode) or as a scheduler task (async mode).
    pub fn defer(&self, f: impl FnOnce() + Send + 'static) {
        match self.mode {
            ExecutionMode::Sync => f(),
            ExecutionMode::Async => self.scheduler.enqueue(Task::new(f)),
        }
    }
}

/// One op invocation: dataflow inputs, attributes, declared outputs, and
/// the incoming ordering chain.
#[derive(Debug)]
pub struct OpInvocation {
    /// Dataflow inputs with device attribution.
    pub inputs: Vec<TensorHandle>,
    /// Compile-time-constant arguments.
    pub attrs: OpAttrs,
    /// Number of declared outputs.
    pub num_outputs: usize,
    /// Declared result metadata, when known at invoke time; may be empty.
    pub result_mds: Vec<TensorMetadata>,
    /// The ordering token: resolved once all prior side-effecting ops on
    /// this path have completed.
    pub chain: AsyncValueRef<Chain>,
}

impl OpInvocation {
    /// Creates an invocation at the head of a fresh ordering path.
    #[must_use]
    pub fn new(inputs: Vec<TensorHandle>, attrs: OpAttrs, num_outputs: usize) -> Self {
        Self {
            inputs,
            attrs,
            num_outputs,
            result_mds: Vec::new(),
            chain: ready_chain(),
        }
    }

    /// Replaces the ordering chain, linking this invocation behind prior
    /// side-effecting ops.
    #[must_use]
    pub fn with_chain(mut self, chain: AsyncValueRef<Chain>) -> Self {
        self.chain = chain;
        self
    }

    /// Declares result metadata.
    #[must_use]
    pub fn with_result_mds(mut self, mds: Vec<TensorMetadata>) -> Self {
        self.result_mds = mds;
        self
    }
}

/// What a dispatch produces: one async output per declared result plus the
/// updated ordering chain.
#[derive(Debug)]
pub struct DispatchResult {
    /// Outputs with device attribution, one per declared result.
    pub outputs: Vec<TensorHandle>,
    /// The chain downstream side-effecting ops should consume: new for
    /// side-effecting ops, the input chain unchanged for pure ops.
    pub chain: AsyncValueRef<Chain>,
}
