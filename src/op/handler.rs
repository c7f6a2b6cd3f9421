//! The op handler chain: device-specific dispatch strategies composed via
//! explicit fallback links.
//!
//! Each handler owns an [`OpRegistry`] for one device. [`make_op`] walks
//! the chain: the first handler with an entry for the requested name wins;
//! a miss on the last handler is a terminal `NoSuchOp` error. Tensor copy
//! operations defer the same way: a handler that does not understand a
//! tensor's representation hands the copy to its fallback.

use crate::device::Device;
use crate::error::{Error, ErrorKind, Result};
use crate::op::dispatch;
use crate::op::invocation::{DispatchResult, ExecutionContext, OpInvocation};
use crate::op::registry::{OpEntry, OpRegistry};
use crate::tensor::{Tensor, TensorType};
use crate::value::AsyncValueRef;
use std::fmt;
use std::sync::Arc;

/// A device-specific dispatch strategy, composable in a fallback chain.
pub trait OpHandler: Send + Sync {
    /// Handler name, conventionally the device name.
    fn name(&self) -> &str;

    /// The device this handler dispatches for.
    fn device(&self) -> &Arc<Device>;

    /// The tensor representation this handler's ops consume natively.
    fn native_tensor_type(&self) -> TensorType;

    /// The next handler in the chain, if any.
    fn fallback(&self) -> Option<&Arc<dyn OpHandler>>;

    /// Looks up an op entry in this handler's own registry only; chain
    /// traversal lives in [`make_op`].
    fn lookup_entry(&self, name: &str) -> Option<Arc<OpEntry>>;

    /// Converts a device-resident tensor to the host representation,
    /// deferring to the fallback for foreign representations.
    fn copy_device_tensor_to_host(&self, tensor: &Tensor) -> AsyncValueRef<Tensor>;

    /// Converts a host-resident tensor to this handler's representation.
    fn copy_host_tensor_to_device(&self, tensor: &Tensor) -> AsyncValueRef<Tensor>;
}

/// Resolves `name` through the handler chain starting at `handler`.
///
/// Consults each handler's own registry once, in chain order, and stops at
/// the first hit; handlers past the hit are never consulted. With no hit
/// anywhere, fails with `NoSuchOp` naming the full chain.
pub fn make_op(handler: &Arc<dyn OpHandler>, name: &str) -> Result<RuntimeOp> {
    let mut current = Arc::clone(handler);
    loop {
        if let Some(entry) = current.lookup_entry(name) {
            return Ok(RuntimeOp {
                entry,
                handler: current,
                chain_head: Arc::clone(handler),
            });
        }
        let Some(next) = current.fallback() else {
            return Err(Error::new(
                ErrorKind::NoSuchOp,
                format!("op {name} not found in handler chain starting at {}", handler.name()),
            ));
        };
        current = Arc::clone(next);
    }
}

/// A dispatchable op bound to the handler (and device) that will run it.
///
/// Produced by [`make_op`]; invoking it routes through
/// [`dispatch::execute_on_handler`].
#[derive(Clone)]
pub struct RuntimeOp {
    pub(crate) entry: Arc<OpEntry>,
    /// The handler whose registry held the entry; the op runs on its
    /// device, in its native tensor representation.
    pub(crate) handler: Arc<dyn OpHandler>,
    /// The handler the lookup started from. Device-resident inputs are
    /// converted through this chain, which knows every representation the
    /// caller's devices produce.
    pub(crate) chain_head: Arc<dyn OpHandler>,
}

impl RuntimeOp {
    /// The op name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.entry.name()
    }

    /// The device results will be attributed to.
    #[must_use]
    pub fn device(&self) -> &Arc<Device> {
        self.handler.device()
    }

    /// True if this op consumes and produces an ordering chain.
    #[must_use]
    pub fn is_side_effecting(&self) -> bool {
        self.entry.flags().side_effecting
    }

    /// True if the op resolved through a fallback rather than the handler
    /// the lookup started from.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        !Arc::ptr_eq(&self.handler, &self.chain_head)
    }

    /// Dispatches the invocation. Never blocks the calling thread: pending
    /// inputs defer the dispatch function onto the scheduler.
    #[must_use]
    pub fn invoke(&self, exec: &ExecutionContext, invocation: OpInvocation) -> DispatchResult {
        dispatch::execute_on_handler(self, exec, invocation)
    }
}

impl fmt::Debug for RuntimeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeOp")
            .field("name", &self.entry.name())
            .field("device", &self.handler.device().name())
            .finish()
    }
}

/// The concrete handler used for both host and accelerator devices: an op
/// registry, a device, a native tensor representation, and an optional
/// fallback link.
pub struct DeviceOpHandler {
    name: String,
    device: Arc<Device>,
    native: TensorType,
    registry: OpRegistry,
    fallback: Option<Arc<dyn OpHandler>>,
}

impl DeviceOpHandler {
    /// Creates a handler for `device` with the given registry.
    #[must_use]
    pub fn new(
        device: Arc<Device>,
        native: TensorType,
        registry: OpRegistry,
        fallback: Option<Arc<dyn OpHandler>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: device.name().to_string(),
            device,
            native,
            registry,
            fallback,
        })
    }
}

impl OpHandler for DeviceOpHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn device(&self) -> &Arc<Device> {
        &self.device
    }

    fn native_tensor_type(&self) -> TensorType {
        self.native
    }

    fn fallback(&self) -> Option<&Arc<dyn OpHandler>> {
        self.fallback.as_ref()
    }

    fn lookup_entry(&self, name: &str) -> Option<Arc<OpEntry>> {
        self.registry.lookup(name)
    }

    fn copy_device_tensor_to_host(&self, tensor: &Tensor) -> AsyncValueRef<Tensor> {
        if tensor.tensor_type() == self.native {
            return AsyncValueRef::concrete(tensor.with_tensor_type(TensorType::DenseHost));
        }
        match &self.fallback {
            Some(next) => next.copy_device_tensor_to_host(tensor),
            None => AsyncValueRef::failed(Error::new(
                ErrorKind::TensorConversion,
                format!(
                    "no handler in chain converts {} to host",
                    tensor.tensor_type()
                ),
            )),
        }
    }

    fn copy_host_tensor_to_device(&self, tensor: &Tensor) -> AsyncValueRef<Tensor> {
        if tensor.tensor_type() != TensorType::DenseHost {
            return AsyncValueRef::failed(Error::new(
                ErrorKind::TensorConversion,
                format!("expected host tensor, got {}", tensor.tensor_type()),
            ));
        }
        AsyncValueRef::concrete(tensor.with_tensor_type(self.native))
    }
}

impl fmt::Debug for DeviceOpHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceOpHandler")
            .field("name", &self.name)
            .field("native", &self.native)
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}
