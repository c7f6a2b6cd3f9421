//! Built-in host ops.
//!
//! A small arithmetic set registered on every host handler by default:
//! enough to write end-to-end programs without a custom registry. All
//! operate element-wise on `i32` payloads.

use crate::error::{Error, ErrorKind, Result};
use crate::op::registry::{OpEntry, OpFlags, OpRegistry};
use crate::tensor::{Tensor, TensorType};
use std::sync::Arc;
use tracing::info;

/// Registers the built-in host ops into `registry`.
pub fn register_host_ops(registry: &mut OpRegistry) {
    registry.register(OpEntry::sync("const", OpFlags::pure_op(), |_, attrs| {
        let value = attrs.get_i64("value")?;
        let value = i32::try_from(value).map_err(|_| {
            Error::new(
                ErrorKind::InvalidAttribute,
                format!("const value {value} out of i32 range"),
            )
        })?;
        Ok(vec![Tensor::scalar_i32(value)])
    }));

    registry.register(OpEntry::sync("add", OpFlags::pure_op(), |inputs, _| {
        binary_elementwise("add", inputs, |a, b| a.wrapping_add(b))
    }));

    registry.register(OpEntry::sync("mul", OpFlags::pure_op(), |inputs, _| {
        binary_elementwise("mul", inputs, |a, b| a.wrapping_mul(b))
    }));

    registry.register(OpEntry::sync("log", OpFlags::side_effecting(), |inputs, attrs| {
        let tag = attrs.get_str("tag").unwrap_or("log");
        for tensor in inputs {
            let values = tensor.as_i32s()?;
            info!(tag, ?values, "op output");
        }
        Ok(vec![])
    }));
}

/// A fresh registry holding exactly the built-in host ops.
#[must_use]
pub fn host_registry() -> OpRegistry {
    let mut registry = OpRegistry::new();
    register_host_ops(&mut registry);
    registry
}

fn binary_elementwise(
    op: &str,
    inputs: &[Arc<Tensor>],
    f: impl Fn(i32, i32) -> i32,
) -> Result<Vec<Tensor>> {
    let [lhs, rhs] = inputs else {
        return Err(Error::new(
            ErrorKind::InvalidOpInput,
            format!("op {op} takes 2 inputs, got {}", inputs.len()),
        ));
    };
    if lhs.metadata() != rhs.metadata() {
        return Err(Error::new(
            ErrorKind::InvalidOpInput,
            format!(
                "op {op} shape mismatch: {:?} vs {:?}",
                lhs.metadata().shape,
                rhs.metadata().shape
            ),
        ));
    }
    let data = lhs
        .as_i32s()?
        .into_iter()
        .zip(rhs.as_i32s()?)
        .flat_map(|(a, b)| f(a, b).to_le_bytes())
        .collect();
    // Output shape mirrors the inputs, scalars included.
    Ok(vec![Tensor::new(
        lhs.metadata().clone(),
        TensorType::DenseHost,
        data,
    )])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::attrs::{AttrValue, OpAttrs};

    fn run(
        registry: &OpRegistry,
        name: &str,
        inputs: Vec<Tensor>,
        attrs: OpAttrs,
    ) -> Result<Vec<Tensor>> {
        use crate::device::Device;
        use crate::op::registry::DispatchArgs;
        use crate::value::AsyncValueRef;

        let entry = registry.lookup(name).unwrap();
        let inputs: Vec<Arc<Tensor>> = inputs.into_iter().map(Arc::new).collect();
        let results: Vec<AsyncValueRef<Tensor>> = match name {
            "log" => vec![],
            _ => vec![AsyncValueRef::unresolved()],
        };
        let device = Device::host();
        (entry.dispatch_fn())(DispatchArgs {
            device: &device,
            inputs: &inputs,
            attrs: &attrs,
            result_mds: &[],
            results: &results,
            chain: None,
        });
        results
            .into_iter()
            .map(|r| r.peek().unwrap().map(|t| (*t).clone()))
            .collect()
    }

    #[test]
    fn const_materializes_attr_value() {
        let registry = host_registry();
        let out = run(
            &registry,
            "const",
            vec![],
            OpAttrs::new().with("value", AttrValue::I64(7)),
        )
        .unwrap();
        assert_eq!(out[0].as_scalar_i32().unwrap(), 7);
    }

    #[test]
    fn const_rejects_out_of_range_value() {
        let registry = host_registry();
        let err = run(
            &registry,
            "const",
            vec![],
            OpAttrs::new().with("value", AttrValue::I64(i64::MAX)),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAttribute);
    }

    #[test]
    fn add_is_elementwise() {
        let registry = host_registry();
        let out = run(
            &registry,
            "add",
            vec![Tensor::vec_i32(&[1, 2, 3]), Tensor::vec_i32(&[10, 20, 30])],
            OpAttrs::new(),
        )
        .unwrap();
        assert_eq!(out[0].as_i32s().unwrap(), vec![11, 22, 33]);
    }

    #[test]
    fn mul_scalar() {
        let registry = host_registry();
        let out = run(
            &registry,
            "mul",
            vec![Tensor::scalar_i32(6), Tensor::scalar_i32(7)],
            OpAttrs::new(),
        )
        .unwrap();
        assert_eq!(out[0].as_scalar_i32().unwrap(), 42);
    }

    #[test]
    fn shape_mismatch_is_invalid_input() {
        let registry = host_registry();
        let err = run(
            &registry,
            "add",
            vec![Tensor::vec_i32(&[1, 2]), Tensor::scalar_i32(3)],
            OpAttrs::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOpInput);
    }

    #[test]
    fn wrong_arity_is_invalid_input() {
        let registry = host_registry();
        let err = run(
            &registry,
            "add",
            vec![Tensor::scalar_i32(3)],
            OpAttrs::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOpInput);
    }
}
