//! The dispatch path shared by every handler.
//!
//! `execute_on_handler` takes an invocation whose inputs may still be
//! pending and returns immediately with one unresolved output per declared
//! result plus the updated ordering chain. The dispatch function itself
//! runs when the last pending input resolves: inline in sync mode, as a
//! scheduler task in async mode. Worker threads are never blocked.
//!
//! Stages:
//!
//! 1. wait for raw inputs (and the incoming chain for side-effecting ops)
//! 2. short-circuit failed inputs; convert mismatched tensor
//!    representations through the handler chain's copy operations
//! 3. wait for conversions, then run the dispatch function

use crate::error::Error;
use crate::op::attrs::OpAttrs;
use crate::op::handler::RuntimeOp;
use crate::op::invocation::{DispatchResult, ExecutionContext, OpInvocation};
use crate::op::registry::DispatchArgs;
use crate::tensor::{Tensor, TensorHandle, TensorMetadata, TensorType};
use crate::value::{AsyncValueRef, Chain};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;

/// Dispatches `invocation` on the handler `op` is bound to.
///
/// Returns one output per declared result, attributed to the handler's
/// device, and the chain downstream side-effecting ops must consume. If
/// any input resolves to an error, every output (and, for side-effecting
/// ops, the produced chain) resolves to that error and the dispatch
/// function never runs.
#[must_use]
pub fn execute_on_handler(
    op: &RuntimeOp,
    exec: &ExecutionContext,
    invocation: OpInvocation,
) -> DispatchResult {
    let OpInvocation {
        inputs,
        attrs,
        num_outputs,
        result_mds,
        chain: in_chain,
    } = invocation;

    let results: Vec<AsyncValueRef<Tensor>> =
        (0..num_outputs).map(|_| AsyncValueRef::unresolved()).collect();
    let outputs: Vec<TensorHandle> = results
        .iter()
        .map(|r| TensorHandle::new(r.clone(), Arc::clone(op.device())))
        .collect();
    let side_effecting = op.is_side_effecting();
    let out_chain = if side_effecting {
        AsyncValueRef::unresolved()
    } else {
        in_chain.clone()
    };

    let state = Arc::new(DispatchState {
        op: op.clone(),
        exec: exec.clone(),
        attrs,
        result_mds,
        results,
        produced_chain: side_effecting.then(|| out_chain.clone()),
    });

    let input_values: Vec<AsyncValueRef<Tensor>> =
        inputs.iter().map(|h| h.value().clone()).collect();

    let countdown = Countdown::new(
        input_values.len() + usize::from(side_effecting),
        exec.clone(),
        {
            let state = Arc::clone(&state);
            let input_values = input_values.clone();
            move || stage_convert(&state, &input_values)
        },
    );
    for value in &input_values {
        let countdown = Arc::clone(&countdown);
        value.and_then(move |_| countdown.signal());
    }
    if side_effecting {
        let countdown = Arc::clone(&countdown);
        in_chain.and_then(move |_| countdown.signal());
    }
    countdown.registered();

    DispatchResult {
        outputs,
        chain: out_chain,
    }
}

struct DispatchState {
    op: RuntimeOp,
    exec: ExecutionContext,
    attrs: OpAttrs,
    result_mds: Vec<TensorMetadata>,
    results: Vec<AsyncValueRef<Tensor>>,
    /// The chain this dispatch produces; `None` for pure ops, which pass
    /// the input chain through without touching it.
    produced_chain: Option<AsyncValueRef<Chain>>,
}

impl DispatchState {
    /// Fails every declared output (and the produced chain) with `err`,
    /// re-propagating the value unchanged.
    fn fail_all(&self, err: &Error) {
        trace!(op = self.op.name(), error = %err, "dispatch short-circuit");
        for result in &self.results {
            result.set_error(err.clone());
        }
        if let Some(chain) = &self.produced_chain {
            chain.set_error(err.clone());
        }
    }
}

/// Stage 2: inputs are terminal; short-circuit errors, then convert any
/// input whose representation differs from the handler's native one.
fn stage_convert(state: &Arc<DispatchState>, input_values: &[AsyncValueRef<Tensor>]) {
    let mut tensors = Vec::with_capacity(input_values.len());
    for value in input_values {
        match value.peek().expect("dispatch input must be terminal") {
            Ok(tensor) => tensors.push(tensor),
            Err(err) => {
                state.fail_all(&err);
                return;
            }
        }
    }

    let native = state.op.handler.native_tensor_type();
    let mut converted: Vec<AsyncValueRef<Tensor>> = Vec::with_capacity(tensors.len());
    for tensor in tensors {
        if tensor.tensor_type() == native {
            converted.push(AsyncValueRef::concrete((*tensor).clone()));
            continue;
        }
        trace!(
            op = state.op.name(),
            from = %tensor.tensor_type(),
            to = %native,
            "converting input tensor"
        );
        converted.push(convert_input(state, &tensor, native));
    }

    let countdown = Countdown::new(converted.len(), state.exec.clone(), {
        let state = Arc::clone(state);
        let converted = converted.clone();
        move || stage_dispatch(&state, &converted)
    });
    for value in &converted {
        let countdown = Arc::clone(&countdown);
        value.and_then(move |_| countdown.signal());
    }
    countdown.registered();
}

/// Converts one input to the executing handler's native representation:
/// device-resident inputs go to the host form through the lookup chain
/// (which knows the producing device's representation), then to the
/// handler's native form if that is not the host one.
fn convert_input(
    state: &Arc<DispatchState>,
    tensor: &Arc<Tensor>,
    native: TensorType,
) -> AsyncValueRef<Tensor> {
    let host_value = if tensor.tensor_type() == TensorType::DenseHost {
        AsyncValueRef::concrete((**tensor).clone())
    } else {
        state.op.chain_head.copy_device_tensor_to_host(tensor)
    };
    if native == TensorType::DenseHost {
        return host_value;
    }
    let converted: AsyncValueRef<Tensor> = AsyncValueRef::unresolved();
    let target = converted.clone();
    let handler = Arc::clone(&state.op.handler);
    host_value.and_then(move |resolved| match resolved {
        Ok(host_tensor) => target.forward_to(&handler.copy_host_tensor_to_device(&host_tensor)),
        Err(err) => target.set_error(err),
    });
    converted
}

/// Stage 3: all inputs are terminal in the handler's native
/// representation; run the dispatch function.
fn stage_dispatch(state: &Arc<DispatchState>, input_values: &[AsyncValueRef<Tensor>]) {
    let mut inputs = Vec::with_capacity(input_values.len());
    for value in input_values {
        match value.peek().expect("converted input must be terminal") {
            Ok(tensor) => inputs.push(tensor),
            Err(err) => {
                state.fail_all(&err);
                return;
            }
        }
    }

    trace!(op = state.op.name(), device = state.op.device().name(), "dispatching op");
    let args = DispatchArgs {
        device: state.op.device(),
        inputs: &inputs,
        attrs: &state.attrs,
        result_mds: &state.result_mds,
        results: &state.results,
        chain: state.produced_chain.as_ref(),
    };
    (state.op.entry.dispatch_fn())(args);
}

/// Fires an action once all registered dependencies have resolved.
///
/// Seeded with one extra count released by [`Countdown::registered`] so
/// dependencies that resolve (and signal) during registration cannot fire
/// the action early. When everything was already terminal, the action runs
/// inline at registration time; otherwise the last resolving dependency
/// triggers it through the execution context (inline in sync mode, a
/// scheduler task in async mode).
struct Countdown {
    remaining: AtomicUsize,
    exec: ExecutionContext,
    action: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Countdown {
    fn new(deps: usize, exec: ExecutionContext, action: impl FnOnce() + Send + 'static) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(deps + 1),
            exec,
            action: Mutex::new(Some(Box::new(action))),
        })
    }

    fn signal(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let action = self
                .action
                .lock()
                .expect("countdown lock poisoned")
                .take()
                .expect("countdown fired twice");
            self.exec.defer(action);
        }
    }

    /// Releases the registration count. If every dependency was already
    /// terminal the action runs inline here.
    fn registered(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let action = self
                .action
                .lock()
                .expect("countdown lock poisoned")
                .take()
                .expect("countdown fired twice");
            action();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceKind};
    use crate::error::ErrorKind;
    use crate::op::handler::{make_op, DeviceOpHandler, OpHandler};
    use crate::op::registry::{OpEntry, OpFlags, OpRegistry};
    use crate::scheduler::Scheduler;
    use crate::value::ready_chain;
    use std::sync::atomic::AtomicBool;

    fn arithmetic_registry() -> OpRegistry {
        let mut registry = OpRegistry::new();
        registry.register(OpEntry::sync("add", OpFlags::pure_op(), |inputs, _| {
            let a = inputs[0].as_scalar_i32()?;
            let b = inputs[1].as_scalar_i32()?;
            Ok(vec![Tensor::scalar_i32(a + b)])
        }));
        registry
    }

    fn sync_exec() -> ExecutionContext {
        let scheduler = Arc::new(Scheduler::new(1, 16, "dispatch-test"));
        ExecutionContext::new(scheduler, crate::op::ExecutionMode::Sync)
    }

    fn host_chain(registry: OpRegistry) -> Arc<dyn OpHandler> {
        DeviceOpHandler::new(Device::host(), TensorType::DenseHost, registry, None)
    }

    fn handle(tensor: Tensor) -> TensorHandle {
        TensorHandle::concrete(tensor, Device::host())
    }

    #[test]
    fn ready_inputs_dispatch_inline_in_sync_mode() {
        let handler = host_chain(arithmetic_registry());
        let op = make_op(&handler, "add").unwrap();
        let exec = sync_exec();
        let result = op.invoke(
            &exec,
            OpInvocation::new(
                vec![handle(Tensor::scalar_i32(2)), handle(Tensor::scalar_i32(3))],
                OpAttrs::new(),
                1,
            ),
        );
        let out = result.outputs[0].value().peek().unwrap().unwrap();
        assert_eq!(out.as_scalar_i32().unwrap(), 5);
    }

    #[test]
    fn pending_inputs_defer_dispatch_until_resolution() {
        let handler = host_chain(arithmetic_registry());
        let op = make_op(&handler, "add").unwrap();
        let exec = sync_exec();

        let pending: AsyncValueRef<Tensor> = AsyncValueRef::unresolved();
        let result = op.invoke(
            &exec,
            OpInvocation::new(
                vec![
                    TensorHandle::new(pending.clone(), Device::host()),
                    handle(Tensor::scalar_i32(3)),
                ],
                OpAttrs::new(),
                1,
            ),
        );
        assert!(!result.outputs[0].value().is_resolved());

        pending.set_value(Tensor::scalar_i32(4));
        let out = result.outputs[0].value().peek().unwrap().unwrap();
        assert_eq!(out.as_scalar_i32().unwrap(), 7);
    }

    #[test]
    fn failed_input_fails_all_outputs_without_running_dispatch() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);
        let mut registry = OpRegistry::new();
        registry.register(OpEntry::sync("observer", OpFlags::pure_op(), move |_, _| {
            ran2.store(true, Ordering::SeqCst);
            Ok(vec![Tensor::scalar_i32(0), Tensor::scalar_i32(0)])
        }));
        let handler = host_chain(registry);
        let op = make_op(&handler, "observer").unwrap();
        let exec = sync_exec();

        let failed: AsyncValueRef<Tensor> =
            AsyncValueRef::failed(Error::new(ErrorKind::InvalidOpInput, "upstream broke"));
        let result = op.invoke(
            &exec,
            OpInvocation::new(
                vec![TensorHandle::new(failed, Device::host())],
                OpAttrs::new(),
                2,
            ),
        );
        for output in &result.outputs {
            let err = output.value().error().unwrap();
            assert_eq!(err.kind(), ErrorKind::InvalidOpInput);
            assert_eq!(err.message(), "upstream broke");
        }
        assert!(!ran.load(Ordering::SeqCst), "dispatch fn must not run");
    }

    #[test]
    fn late_failure_propagates_like_early_failure() {
        let handler = host_chain(arithmetic_registry());
        let op = make_op(&handler, "add").unwrap();
        let exec = sync_exec();

        let pending: AsyncValueRef<Tensor> = AsyncValueRef::unresolved();
        let result = op.invoke(
            &exec,
            OpInvocation::new(
                vec![
                    TensorHandle::new(pending.clone(), Device::host()),
                    handle(Tensor::scalar_i32(1)),
                ],
                OpAttrs::new(),
                1,
            ),
        );
        pending.set_error(Error::new(ErrorKind::Cancelled, "timer won"));
        assert_eq!(
            result.outputs[0].value().error().unwrap().kind(),
            ErrorKind::Cancelled
        );
    }

    #[test]
    fn pure_op_passes_input_chain_through() {
        let handler = host_chain(arithmetic_registry());
        let op = make_op(&handler, "add").unwrap();
        let exec = sync_exec();
        let chain = ready_chain();
        let invocation = OpInvocation::new(
            vec![handle(Tensor::scalar_i32(1)), handle(Tensor::scalar_i32(2))],
            OpAttrs::new(),
            1,
        )
        .with_chain(chain.clone());
        let result = op.invoke(&exec, invocation);
        // Same underlying chain value, not a new token.
        assert!(result.chain.is_resolved());
        assert_eq!(chain.ref_count(), result.chain.ref_count());
    }

    #[test]
    fn side_effecting_op_produces_a_new_chain_after_the_effect() {
        let mut registry = OpRegistry::new();
        let effect_ran = Arc::new(AtomicBool::new(false));
        let effect = Arc::clone(&effect_ran);
        registry.register(OpEntry::sync(
            "write",
            OpFlags::side_effecting(),
            move |_, _| {
                effect.store(true, Ordering::SeqCst);
                Ok(vec![])
            },
        ));
        let handler = host_chain(registry);
        let op = make_op(&handler, "write").unwrap();
        let exec = sync_exec();

        let in_chain: AsyncValueRef<Chain> = AsyncValueRef::unresolved();
        let result = op.invoke(
            &exec,
            OpInvocation::new(vec![], OpAttrs::new(), 0).with_chain(in_chain.clone()),
        );
        // Ordered behind the pending chain: effect has not happened.
        assert!(!effect_ran.load(Ordering::SeqCst));
        assert!(!result.chain.is_resolved());

        in_chain.set_value(Chain);
        assert!(effect_ran.load(Ordering::SeqCst));
        assert!(result.chain.is_resolved());
    }

    #[test]
    fn host_input_converts_for_accelerator_handler() {
        let mut registry = OpRegistry::new();
        registry.register(OpEntry::sync("dev_add", OpFlags::pure_op(), |inputs, _| {
            assert!(inputs
                .iter()
                .all(|t| t.tensor_type() == TensorType::DenseDevice));
            let a = inputs[0].as_scalar_i32()?;
            let b = inputs[1].as_scalar_i32()?;
            Ok(vec![Tensor::scalar_i32(a + b)
                .with_tensor_type(TensorType::DenseDevice)])
        }));
        let gpu = DeviceOpHandler::new(
            Device::new("gpu:0", DeviceKind::Accelerator),
            TensorType::DenseDevice,
            registry,
            Some(host_chain(OpRegistry::new())),
        );
        let gpu_dyn: Arc<dyn OpHandler> = gpu;
        let op = make_op(&gpu_dyn, "dev_add").unwrap();
        let exec = sync_exec();
        let result = op.invoke(
            &exec,
            OpInvocation::new(
                vec![handle(Tensor::scalar_i32(20)), handle(Tensor::scalar_i32(22))],
                OpAttrs::new(),
                1,
            ),
        );
        let out = result.outputs[0].value().peek().unwrap().unwrap();
        assert_eq!(out.as_scalar_i32().unwrap(), 42);
        assert_eq!(result.outputs[0].device().name(), "gpu:0");
    }

    #[test]
    fn inconvertible_input_fails_the_dispatch_not_the_process() {
        // A host-only chain has no handler for device-resident tensors.
        let handler = host_chain(arithmetic_registry());
        let op = make_op(&handler, "add").unwrap();
        let exec = sync_exec();
        let device_tensor = Tensor::scalar_i32(1).with_tensor_type(TensorType::DenseDevice);
        let result = op.invoke(
            &exec,
            OpInvocation::new(
                vec![handle(device_tensor), handle(Tensor::scalar_i32(2))],
                OpAttrs::new(),
                1,
            ),
        );
        assert_eq!(
            result.outputs[0].value().error().unwrap().kind(),
            ErrorKind::TensorConversion
        );
    }

    #[test]
    fn async_mode_completes_after_quiesce() {
        let handler = host_chain(arithmetic_registry());
        let op = make_op(&handler, "add").unwrap();
        let scheduler = Arc::new(Scheduler::new(2, 16, "dispatch-test"));
        let exec = ExecutionContext::new(Arc::clone(&scheduler), crate::op::ExecutionMode::Async);

        let result = op.invoke(
            &exec,
            OpInvocation::new(
                vec![handle(Tensor::scalar_i32(2)), handle(Tensor::scalar_i32(3))],
                OpAttrs::new(),
                1,
            ),
        );
        scheduler.quiesce();
        let out = result.outputs[0].value().peek().unwrap().unwrap();
        assert_eq!(out.as_scalar_i32().unwrap(), 5);
    }
}
