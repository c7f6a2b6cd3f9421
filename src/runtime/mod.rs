//! The composition root: a scheduler, a device registry, and one op
//! handler chain per device.
//!
//! [`CoreRuntime`] is built once through [`RuntimeBuilder`] and shared by
//! reference afterwards. The host device and its handler (preloaded with
//! the built-in ops) always exist; accelerator handlers are layered on top
//! with the host handler as their fallback, so an op missing from an
//! accelerator registry transparently runs on the host.

mod config;

pub use config::RuntimeConfig;

use crate::device::{Device, DeviceKind};
use crate::error::{Error, ErrorKind, Result};
use crate::op::{
    builtin, make_op, DeviceOpHandler, DispatchResult, ExecutionContext, ExecutionMode,
    OpEntry, OpHandler, OpInvocation, OpRegistry, RuntimeOp,
};
use crate::scheduler::Scheduler;
use crate::tensor::{Tensor, TensorHandle, TensorType};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Configures and assembles a [`CoreRuntime`].
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    host_registry: OpRegistry,
    accelerators: Vec<(String, OpRegistry)>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self {
            config: RuntimeConfig::default(),
            host_registry: builtin::host_registry(),
            accelerators: Vec::new(),
        }
    }
}

impl RuntimeBuilder {
    /// Starts from the default configuration: built-in host ops, no
    /// accelerators.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the runtime configuration.
    #[must_use]
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers an additional host op, replacing any built-in of the same
    /// name.
    #[must_use]
    pub fn register_host_op(mut self, entry: OpEntry) -> Self {
        self.host_registry.register(entry);
        self
    }

    /// Adds an accelerator device with its own op registry. Its handler
    /// falls back to the host handler for ops it does not implement.
    #[must_use]
    pub fn add_accelerator(mut self, name: impl Into<String>, registry: OpRegistry) -> Self {
        self.accelerators.push((name.into(), registry));
        self
    }

    /// Builds the runtime and starts its worker pool.
    #[must_use]
    pub fn build(self) -> CoreRuntime {
        let config = self.config.normalize();
        let scheduler = Arc::new(Scheduler::new(
            config.workers,
            config.queue_capacity,
            &config.thread_name_prefix,
        ));

        let host_device = Device::host();
        let host_handler: Arc<dyn OpHandler> = DeviceOpHandler::new(
            Arc::clone(&host_device),
            TensorType::DenseHost,
            self.host_registry,
            None,
        );

        let mut handlers: HashMap<String, Arc<dyn OpHandler>> = HashMap::new();
        handlers.insert(host_device.name().to_string(), Arc::clone(&host_handler));
        for (name, registry) in self.accelerators {
            let device = Device::new(&name, DeviceKind::Accelerator);
            debug!(device = %device, "adding accelerator handler");
            let handler: Arc<dyn OpHandler> = DeviceOpHandler::new(
                device,
                TensorType::DenseDevice,
                registry,
                Some(Arc::clone(&host_handler)),
            );
            handlers.insert(name, handler);
        }

        CoreRuntime {
            scheduler,
            host_device,
            handlers,
        }
    }
}

/// The assembled runtime: worker pool plus per-device handler chains.
pub struct CoreRuntime {
    scheduler: Arc<Scheduler>,
    host_device: Arc<Device>,
    handlers: HashMap<String, Arc<dyn OpHandler>>,
}

impl CoreRuntime {
    /// A builder starting from the default configuration.
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// A runtime with the default configuration and only the host device.
    #[must_use]
    pub fn host_only() -> Self {
        Self::builder().build()
    }

    /// The scheduler backing this runtime.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// The host device.
    #[must_use]
    pub fn host_device(&self) -> &Arc<Device> {
        &self.host_device
    }

    /// The handler chain registered for `device_name`.
    #[must_use]
    pub fn handler(&self, device_name: &str) -> Option<&Arc<dyn OpHandler>> {
        self.handlers.get(device_name)
    }

    /// An execution context over this runtime's scheduler.
    #[must_use]
    pub fn execution_context(&self, mode: ExecutionMode) -> ExecutionContext {
        ExecutionContext::new(Arc::clone(&self.scheduler), mode)
    }

    /// Resolves `op_name` through the handler chain rooted at
    /// `device_name`.
    pub fn make_op(&self, device_name: &str, op_name: &str) -> Result<RuntimeOp> {
        let handler = self.handler(device_name).ok_or_else(|| {
            Error::new(
                ErrorKind::NoSuchOp,
                format!("no handler registered for device {device_name}"),
            )
        })?;
        make_op(handler, op_name)
    }

    /// Wraps an already-available tensor as a host-attributed handle.
    #[must_use]
    pub fn constant(&self, tensor: Tensor) -> TensorHandle {
        TensorHandle::concrete(tensor, Arc::clone(&self.host_device))
    }

    /// Resolves and dispatches an op in one step.
    pub fn execute(
        &self,
        device_name: &str,
        op_name: &str,
        invocation: OpInvocation,
        mode: ExecutionMode,
    ) -> Result<DispatchResult> {
        let op = self.make_op(device_name, op_name)?;
        Ok(op.invoke(&self.execution_context(mode), invocation))
    }

    /// Blocks until every enqueued task has finished. Must not be called
    /// from a worker thread.
    pub fn quiesce(&self) {
        self.scheduler.quiesce();
    }
}
