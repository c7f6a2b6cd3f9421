//! Per-device op registries.
//!
//! A registry maps op names to [`OpEntry`]s: a dispatch function plus the
//! flags dispatch needs (currently only whether the op is side-effecting
//! and therefore consumes and produces a chain token).

use crate::device::Device;
use crate::error::{Error, ErrorKind, Result};
use crate::op::attrs::OpAttrs;
use crate::tensor::{Tensor, TensorMetadata};
use crate::value::{AsyncValueRef, Chain};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Per-op dispatch flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpFlags {
    /// Side-effecting ops consume the invocation chain and must resolve a
    /// new one; pure ops pass the input chain through untouched.
    pub side_effecting: bool,
}

impl OpFlags {
    /// Flags for a pure (side-effect-free) op.
    #[must_use]
    pub const fn pure_op() -> Self {
        Self {
            side_effecting: false,
        }
    }

    /// Flags for a side-effecting op.
    #[must_use]
    pub const fn side_effecting() -> Self {
        Self {
            side_effecting: true,
        }
    }
}

/// Everything a dispatch function sees: resolved inputs, attributes,
/// declared result metadata, the unresolved outputs to fill, and (for
/// side-effecting ops) the chain to resolve once the effect is ordered.
pub struct DispatchArgs<'a> {
    /// The device this handler dispatches for.
    pub device: &'a Arc<Device>,
    /// Resolved input payloads, in declaration order.
    pub inputs: &'a [Arc<Tensor>],
    /// Invocation attributes.
    pub attrs: &'a OpAttrs,
    /// Declared result metadata; may be empty when unknown at invoke time.
    pub result_mds: &'a [TensorMetadata],
    /// Unresolved outputs, one per declared result. The dispatch function
    /// (or a device completion it arranges) resolves each exactly once.
    pub results: &'a [AsyncValueRef<Tensor>],
    /// Present iff the op is side-effecting; must be resolved when the
    /// effect is globally ordered. A dispatch failure resolves it to the
    /// same error so downstream ordered ops observe the break.
    pub chain: Option<&'a AsyncValueRef<Chain>>,
}

/// The dispatch function for one op on one device.
///
/// Must not block the calling worker thread: a device-side wait is
/// expressed by leaving outputs unresolved and resolving them from a
/// separate completion signal.
pub type DispatchFn = Arc<dyn Fn(DispatchArgs<'_>) + Send + Sync>;

/// A registered op: name, flags, dispatch function.
#[derive(Clone)]
pub struct OpEntry {
    name: String,
    flags: OpFlags,
    dispatch_fn: DispatchFn,
}

impl OpEntry {
    /// Creates an entry from a raw dispatch function.
    #[must_use]
    pub fn new(name: impl Into<String>, flags: OpFlags, dispatch_fn: DispatchFn) -> Self {
        Self {
            name: name.into(),
            flags,
            dispatch_fn,
        }
    }

    /// Creates an entry from a synchronous compute function.
    ///
    /// The adapter resolves every output (and the chain, when present)
    /// from the function's return value: `Ok` resolves outputs in order,
    /// `Err` fails every output with the same error.
    #[must_use]
    pub fn sync(
        name: impl Into<String>,
        flags: OpFlags,
        f: impl Fn(&[Arc<Tensor>], &OpAttrs) -> Result<Vec<Tensor>> + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        let fn_name = name.clone();
        let dispatch_fn: DispatchFn = Arc::new(move |args: DispatchArgs<'_>| {
            match f(args.inputs, args.attrs) {
                Ok(outputs) if outputs.len() == args.results.len() => {
                    for (result, output) in args.results.iter().zip(outputs) {
                        result.set_value(output);
                    }
                    if let Some(chain) = args.chain {
                        chain.set_value(Chain);
                    }
                }
                Ok(outputs) => {
                    let err = Error::new(
                        ErrorKind::Internal,
                        format!(
                            "op {fn_name} produced {} outputs, {} declared",
                            outputs.len(),
                            args.results.len()
                        ),
                    );
                    fail_outputs(&args, &err);
                }
                Err(err) => fail_outputs(&args, &err),
            }
        });
        Self::new(name, flags, dispatch_fn)
    }

    /// The op name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The dispatch flags.
    #[must_use]
    pub const fn flags(&self) -> OpFlags {
        self.flags
    }

    /// The dispatch function.
    #[must_use]
    pub fn dispatch_fn(&self) -> &DispatchFn {
        &self.dispatch_fn
    }
}

impl fmt::Debug for OpEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpEntry")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Fails every declared output (and the chain) with `err`.
pub(crate) fn fail_outputs(args: &DispatchArgs<'_>, err: &Error) {
    for result in args.results {
        result.set_error(err.clone());
    }
    if let Some(chain) = args.chain {
        chain.set_error(err.clone());
    }
}

/// Name-to-entry registry for one device handler.
#[derive(Debug, Default)]
pub struct OpRegistry {
    entries: HashMap<String, Arc<OpEntry>>,
}

impl OpRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entry, replacing any previous entry of the same name.
    pub fn register(&mut self, entry: OpEntry) {
        self.entries.insert(entry.name().to_string(), Arc::new(entry));
    }

    /// Looks up an entry by op name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<OpEntry>> {
        self.entries.get(name).map(Arc::clone)
    }

    /// Number of registered ops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
