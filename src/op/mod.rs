//! Op dispatch: attributes, registries, the handler chain, and the
//! non-blocking dispatch path.
//!
//! An op is resolved through a chain of device handlers ([`make_op`]),
//! yielding a [`RuntimeOp`] bound to the device that will run it. Invoking
//! the op returns unresolved outputs immediately; the registered dispatch
//! function runs once every input is available.

pub mod attrs;
pub mod builtin;
mod dispatch;
pub mod handler;
pub mod invocation;
pub mod registry;

pub use attrs::{AttrValue, OpAttrs};
pub use builtin::{host_registry, register_host_ops};
pub use handler::{make_op, DeviceOpHandler, OpHandler, RuntimeOp};
pub use invocation::{DispatchResult, ExecutionContext, ExecutionMode, OpInvocation};
pub use registry::{DispatchArgs, DispatchFn, OpEntry, OpFlags, OpRegistry};
