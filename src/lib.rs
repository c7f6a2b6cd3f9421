//! Coreflow: an asynchronous execution runtime for dataflow computation graphs.
//!
//! # Overview
//!
//! Coreflow executes graphs of operations with data dependencies across
//! heterogeneous devices (host CPU, accelerators) and optionally across
//! process boundaries. Each operation runs as soon as its inputs are ready,
//! on the correct device, without blocking worker threads. Required ordering
//! between side-effecting operations is expressed with an explicit chain
//! token rather than scheduler-level serialization.
//!
//! # Core pieces
//!
//! - [`value`]: single-assignment async values, the unit of dataflow
//! - [`scheduler`]: work-stealing worker pool, the unit of concurrency
//! - [`op`]: device-polymorphic op handler chain and dispatch
//! - [`runtime`]: the [`CoreRuntime`] composition root
//! - [`distributed`]: per-session distributed contexts and their
//!   request/response protocol
//! - [`device`], [`tensor`]: execution targets and opaque payloads
//! - [`error`]: the error taxonomy; failures inside the dataflow graph are
//!   values that flow through async values like results
//!
//! # Guarantees
//!
//! - **Single assignment**: an async value resolves exactly once; every
//!   registered continuation runs exactly once, in registration order
//! - **No blocked workers**: waiting is continuation registration, never a
//!   blocked worker thread; a full work queue overflows instead of blocking
//! - **Failure is a value**: a failed input fails every declared output of a
//!   dispatch without running it; nothing is silently retried
//! - **Ordered side effects**: chain tokens thread a total order through
//!   otherwise-unordered side-effecting operations

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod device;
pub mod distributed;
pub mod error;
pub mod op;
pub mod runtime;
pub mod scheduler;
pub mod tensor;
pub mod util;
pub mod value;

pub use device::{Device, DeviceKind};
pub use error::{Error, ErrorCategory, ErrorKind, Result};
pub use op::{
    AttrValue, ExecutionContext, ExecutionMode, OpAttrs, OpEntry, OpFlags, OpHandler,
    OpInvocation, OpRegistry, RuntimeOp,
};
pub use runtime::{CoreRuntime, RuntimeBuilder, RuntimeConfig};
pub use scheduler::{Scheduler, Task};
pub use tensor::{DType, Tensor, TensorHandle, TensorMetadata, TensorType};
pub use value::{ready_chain, AsyncValueRef, Chain};
