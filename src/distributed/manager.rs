//! The server side of the context protocol.
//!
//! A [`ContextManager`] owns the context table for one process and maps
//! each request to state changes on a [`DistributedContext`], executing
//! programs on the local [`CoreRuntime`]. RPC-level failures come back as
//! typed errors; the [`ContextManager::handle`] envelope folds them into
//! [`Response::Error`] for the transport.

use crate::distributed::context::{DistributedContext, RegisteredProgram};
use crate::distributed::program::ProgramDecoder;
use crate::distributed::protocol::{
    CloseContextRequest, CloseContextResponse, CreateContextRequest, CreateContextResponse,
    DeleteRemoteObjectsRequest, DeleteRemoteObjectsResponse, ErrorProto, RegisterFunctionRequest,
    RegisterFunctionResponse, RemoteExecuteRequest, RemoteExecuteResponse, RemoteObjectIdProto,
    Request, Response, SendDataRequest, SendDataResponse,
};
use crate::error::{Error, ErrorKind, Result};
use crate::op::{ExecutionMode, OpInvocation};
use crate::runtime::CoreRuntime;
use crate::tensor::{Tensor, TensorHandle};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Handles context protocol requests against a local runtime.
pub struct ContextManager {
    runtime: Arc<CoreRuntime>,
    decoder: Arc<dyn ProgramDecoder>,
    /// Allocation epoch stamped into every object id this host mints.
    host_prefix: u64,
    contexts: Mutex<HashMap<u64, Arc<DistributedContext>>>,
}

impl ContextManager {
    /// Creates a manager minting object ids under `host_prefix`.
    #[must_use]
    pub fn new(runtime: Arc<CoreRuntime>, decoder: Arc<dyn ProgramDecoder>, host_prefix: u64) -> Self {
        Self {
            runtime,
            decoder,
            host_prefix,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Dispatches an enveloped request, folding errors into
    /// [`Response::Error`].
    pub fn handle(&self, request: &Request) -> Response {
        let result = match request {
            Request::CreateContext(req) => self.create_context(req).map(Response::CreateContext),
            Request::CloseContext(req) => self.close_context(req).map(Response::CloseContext),
            Request::SendData(req) => self.send_data(req).map(Response::SendData),
            Request::RegisterFunction(req) => {
                self.register_function(req).map(Response::RegisterFunction)
            }
            Request::RemoteExecute(req) => self.remote_execute(req).map(Response::RemoteExecute),
            Request::DeleteRemoteObjects(req) => self
                .delete_remote_objects(req)
                .map(Response::DeleteRemoteObjects),
        };
        result.unwrap_or_else(|err| {
            warn!(error = %err, "request failed");
            Response::Error(ErrorProto::from(&err))
        })
    }

    /// Creates a context. A duplicate create for a live id fails with
    /// `ContextAlreadyExists`; the response names an already-resolved
    /// object usable as an ordering input.
    pub fn create_context(&self, req: &CreateContextRequest) -> Result<CreateContextResponse> {
        let mut contexts = self.lock_contexts();
        let ctx = match contexts.entry(req.context_id) {
            Entry::Occupied(_) => {
                return Err(Error::new(
                    ErrorKind::ContextAlreadyExists,
                    format!("context {:#x} already exists", req.context_id),
                ));
            }
            Entry::Vacant(slot) => slot.insert(Arc::new(DistributedContext::new(
                req.context_id,
                req.dist_config.clone(),
            ))),
        };

        let host = self.runtime.host_device();
        let ready_chain = ctx.allocate_object_id(self.host_prefix, host.name());
        ctx.checked_state()?.objects.insert(
            ready_chain.clone(),
            TensorHandle::concrete(Tensor::unit(), Arc::clone(host)),
        );
        debug!(context_id = req.context_id, "context created");
        Ok(CreateContextResponse { ready_chain })
    }

    /// Closes a context: removes it from the table and invalidates every
    /// program and object id under it. Requests already holding the
    /// context fail with `ContextClosed`; later requests see
    /// `UnknownContext`.
    pub fn close_context(&self, req: &CloseContextRequest) -> Result<CloseContextResponse> {
        let ctx = self
            .lock_contexts()
            .remove(&req.context_id)
            .ok_or_else(|| unknown_context(req.context_id))?;
        ctx.close();
        debug!(context_id = req.context_id, "context closed");
        Ok(CloseContextResponse {})
    }

    /// Stores an out-of-band payload under its instance key, replacing
    /// any unclaimed payload with the same key.
    pub fn send_data(&self, req: &SendDataRequest) -> Result<SendDataResponse> {
        let ctx = self.context(req.context_id)?;
        ctx.checked_state()?
            .inbox
            .insert(req.instance_key, req.payload.clone());
        Ok(SendDataResponse {})
    }

    /// Claims a payload previously delivered via
    /// [`ContextManager::send_data`], removing it from the inbox.
    pub fn take_data(&self, context_id: u64, instance_key: u64) -> Result<Option<Vec<u8>>> {
        let ctx = self.context(context_id)?;
        let payload = ctx.checked_state()?.inbox.remove(&instance_key);
        Ok(payload)
    }

    /// Decodes and stores a program, returning the device attribution of
    /// each program output. Re-registering a name replaces the previous
    /// program, which makes a transport retry safe.
    pub fn register_function(
        &self,
        req: &RegisterFunctionRequest,
    ) -> Result<RegisterFunctionResponse> {
        let ctx = self.context(req.context_id)?;
        let program = self.decoder.decode(&req.program)?;

        // Resolve each step now so an unknown op fails registration, not
        // the first execute; resolution also yields the output devices.
        let host_name = self.runtime.host_device().name();
        let mut output_devices = Vec::with_capacity(program.output_count());
        for step in &program.steps {
            let op = self.runtime.make_op(host_name, &step.op_name)?;
            for _ in 0..step.output_count {
                output_devices.push(op.device().name().to_string());
            }
        }

        ctx.checked_state()?.programs.insert(
            req.program_name.clone(),
            RegisteredProgram {
                program,
                need_compilation: req.need_compilation,
                output_devices: output_devices.clone(),
            },
        );
        debug!(
            context_id = req.context_id,
            program = req.program_name,
            "program registered"
        );
        Ok(RegisterFunctionResponse {
            output_device: output_devices,
        })
    }

    /// Executes a registered program over stored objects.
    ///
    /// Runs under the context's state lock in synchronous evaluation
    /// mode, so an execute and a close on the same context serialize
    /// rather than race. Request inputs bind the leading slots; the
    /// trailing slots are stored under the requested output ids.
    pub fn remote_execute(&self, req: &RemoteExecuteRequest) -> Result<RemoteExecuteResponse> {
        let ctx = self.context(req.context_id)?;
        let mut state = ctx.checked_state()?;

        let registered = state
            .programs
            .get(&req.program_name)
            .cloned()
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::UnknownProgram,
                    format!(
                        "program {} not registered in context {:#x}",
                        req.program_name, req.context_id
                    ),
                )
            })?;

        let mut slots: Vec<TensorHandle> = Vec::with_capacity(req.input.len());
        for id in &req.input {
            let handle = state.objects.get(id).cloned().ok_or_else(|| {
                Error::new(
                    ErrorKind::UnknownObject,
                    format!("object {id:?} unknown or deleted in context {:#x}", req.context_id),
                )
            })?;
            slots.push(handle);
        }

        let exec = self.runtime.execution_context(ExecutionMode::Sync);
        let host_name = self.runtime.host_device().name();
        for (index, step) in registered.program.steps.iter().enumerate() {
            let op = self.runtime.make_op(host_name, &step.op_name)?;
            let mut inputs = Vec::with_capacity(step.input_slots.len());
            for &slot in &step.input_slots {
                let handle = slots.get(slot).cloned().ok_or_else(|| {
                    Error::new(
                        ErrorKind::InvalidProgram,
                        format!("step {index} reads slot {slot}, only {} defined", slots.len()),
                    )
                })?;
                inputs.push(handle);
            }
            let result = op.invoke(
                &exec,
                OpInvocation::new(inputs, step.attrs.clone(), step.output_count),
            );
            slots.extend(result.outputs);
        }

        let first_output = slots.len().checked_sub(req.output.len()).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidProgram,
                format!(
                    "{} outputs requested, program defines only {} slots",
                    req.output.len(),
                    slots.len()
                ),
            )
        })?;

        // Every requested id must be fresh, against the namespace and
        // against the rest of the request, before anything is stored. A
        // rejected request leaves the namespace untouched.
        let mut claimed = HashSet::with_capacity(req.output.len());
        for out in &req.output {
            if state.objects.contains_key(&out.id) || !claimed.insert(&out.id) {
                return Err(Error::new(
                    ErrorKind::InvalidProgram,
                    format!("output object id {:?} already in use", out.id),
                ));
            }
        }

        let mut metadata = Vec::new();
        for (out, handle) in req.output.iter().zip(&slots[first_output..]) {
            if out.need_metadata {
                let resolved = handle.value().peek().ok_or_else(|| {
                    Error::new(
                        ErrorKind::Internal,
                        "synchronous execution left an output unresolved",
                    )
                })?;
                let tensor = resolved?;
                let bytes = serde_json::to_vec(&*tensor)
                    .map_err(|e| Error::new(ErrorKind::Internal, e.to_string()))?;
                metadata.push(bytes);
            }
            state.objects.insert(out.id.clone(), handle.clone());
        }
        Ok(RemoteExecuteResponse { metadata })
    }

    /// Removes objects from the context namespace. Absent ids, including
    /// already-deleted ones, are skipped: the request is idempotent and a
    /// repeat leaves the namespace unchanged.
    pub fn delete_remote_objects(
        &self,
        req: &DeleteRemoteObjectsRequest,
    ) -> Result<DeleteRemoteObjectsResponse> {
        let ctx = self.context(req.context_id)?;
        let mut state = ctx.checked_state()?;
        for id in &req.input {
            state.objects.remove(id);
        }
        Ok(DeleteRemoteObjectsResponse {})
    }

    /// Installs an already-available tensor as a remote object, returning
    /// its freshly minted id. This is how a host seeds constants into a
    /// context for later execution.
    pub fn seed_object(&self, context_id: u64, tensor: Tensor) -> Result<RemoteObjectIdProto> {
        let ctx = self.context(context_id)?;
        let host = self.runtime.host_device();
        let id = ctx.allocate_object_id(self.host_prefix, host.name());
        ctx.checked_state()?
            .objects
            .insert(id.clone(), TensorHandle::concrete(tensor, Arc::clone(host)));
        Ok(id)
    }

    fn context(&self, context_id: u64) -> Result<Arc<DistributedContext>> {
        self.lock_contexts()
            .get(&context_id)
            .map(Arc::clone)
            .ok_or_else(|| unknown_context(context_id))
    }

    fn lock_contexts(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Arc<DistributedContext>>> {
        self.contexts.lock().expect("context table lock poisoned")
    }
}

fn unknown_context(context_id: u64) -> Error {
    Error::new(
        ErrorKind::UnknownContext,
        format!("no context with id {context_id:#x}"),
    )
}
