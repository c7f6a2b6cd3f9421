//! Opaque tensor payloads moved through the runtime.
//!
//! The runtime does not interpret buffer layouts beyond what dispatch
//! needs: a dtype/shape [`TensorMetadata`], a [`TensorType`] marking which
//! representation the bytes are in (host or device resident), and the raw
//! bytes themselves. Builtin ops read scalars and flat element vectors out
//! of host tensors; everything else treats the payload as opaque.

use crate::device::Device;
use crate::error::{Error, ErrorKind, Result};
use crate::value::AsyncValueRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// 32-bit signed integer.
    I32,
    /// 32-bit IEEE float.
    F32,
    /// Raw byte.
    U8,
}

impl DType {
    /// Size of one element in bytes.
    #[must_use]
    pub const fn size_of(self) -> usize {
        match self {
            Self::I32 | Self::F32 => 4,
            Self::U8 => 1,
        }
    }
}

/// Shape and element type of a tensor, known before the data is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorMetadata {
    /// Element type.
    pub dtype: DType,
    /// Dimension sizes; empty for a scalar.
    pub shape: Vec<usize>,
}

impl TensorMetadata {
    /// Metadata for a scalar of the given dtype.
    #[must_use]
    pub const fn scalar(dtype: DType) -> Self {
        Self {
            dtype,
            shape: Vec::new(),
        }
    }

    /// Total number of elements.
    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Total payload size in bytes.
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.num_elements() * self.dtype.size_of()
    }
}

/// The representation a tensor's bytes are in.
///
/// A handler dispatches only on its native representation; a mismatched
/// input is converted through the handler chain's copy operations or the
/// dispatch fails with a conversion error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TensorType {
    /// Host-resident dense buffer.
    DenseHost,
    /// Device-resident dense buffer.
    DenseDevice,
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DenseHost => f.write_str("DenseHost"),
            Self::DenseDevice => f.write_str("DenseDevice"),
        }
    }
}

/// An opaque dense tensor payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    metadata: TensorMetadata,
    tensor_type: TensorType,
    data: Vec<u8>,
}

impl Tensor {
    /// Creates a tensor from metadata, representation, and raw bytes.
    ///
    /// # Panics
    ///
    /// Panics if the byte length disagrees with the metadata.
    #[must_use]
    pub fn new(metadata: TensorMetadata, tensor_type: TensorType, data: Vec<u8>) -> Self {
        assert_eq!(
            data.len(),
            metadata.size_in_bytes(),
            "tensor byte length does not match metadata"
        );
        Self {
            metadata,
            tensor_type,
            data,
        }
    }

    /// A host scalar i32 tensor.
    #[must_use]
    pub fn scalar_i32(value: i32) -> Self {
        Self::new(
            TensorMetadata::scalar(DType::I32),
            TensorType::DenseHost,
            value.to_le_bytes().to_vec(),
        )
    }

    /// A host rank-1 i32 tensor.
    #[must_use]
    pub fn vec_i32(values: &[i32]) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(
            TensorMetadata {
                dtype: DType::I32,
                shape: vec![values.len()],
            },
            TensorType::DenseHost,
            data,
        )
    }

    /// A host scalar f32 tensor.
    #[must_use]
    pub fn scalar_f32(value: f32) -> Self {
        Self::new(
            TensorMetadata::scalar(DType::F32),
            TensorType::DenseHost,
            value.to_le_bytes().to_vec(),
        )
    }

    /// An empty host tensor, used as the payload of unit-like objects
    /// (e.g. the distributed ready chain).
    #[must_use]
    pub fn unit() -> Self {
        Self::new(
            TensorMetadata {
                dtype: DType::U8,
                shape: vec![0],
            },
            TensorType::DenseHost,
            Vec::new(),
        )
    }

    /// Returns the metadata.
    #[must_use]
    pub const fn metadata(&self) -> &TensorMetadata {
        &self.metadata
    }

    /// Returns the representation of the payload bytes.
    #[must_use]
    pub const fn tensor_type(&self) -> TensorType {
        self.tensor_type
    }

    /// Returns the raw payload bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Reads the elements as i32s.
    pub fn as_i32s(&self) -> Result<Vec<i32>> {
        if self.metadata.dtype != DType::I32 {
            return Err(Error::new(
                ErrorKind::InvalidOpInput,
                format!("expected i32 tensor, got {:?}", self.metadata.dtype),
            ));
        }
        Ok(self
            .data
            .chunks_exact(4)
            .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }

    /// Reads a scalar f32.
    ///
    /// A deserialized tensor may carry fewer bytes than its metadata
    /// claims; a short payload is an error, not a panic.
    pub fn as_scalar_f32(&self) -> Result<f32> {
        if self.metadata.dtype != DType::F32 || self.metadata.num_elements() != 1 {
            return Err(Error::new(
                ErrorKind::InvalidOpInput,
                format!("expected scalar f32 tensor, got {:?}", self.metadata),
            ));
        }
        let bytes: [u8; 4] = self
            .data
            .get(..4)
            .and_then(|chunk| chunk.try_into().ok())
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidOpInput,
                    format!(
                        "tensor payload is {} bytes, metadata claims {}",
                        self.data.len(),
                        self.metadata.size_in_bytes()
                    ),
                )
            })?;
        Ok(f32::from_le_bytes(bytes))
    }

    /// Reads a scalar i32.
    pub fn as_scalar_i32(&self) -> Result<i32> {
        let values = self.as_i32s()?;
        if values.len() != 1 {
            return Err(Error::new(
                ErrorKind::InvalidOpInput,
                format!("expected scalar, got {} elements", values.len()),
            ));
        }
        Ok(values[0])
    }

    /// Returns a copy of this tensor re-tagged with `tensor_type`.
    ///
    /// This is the transfer primitive the copy operations use; the
    /// simulated device memory shares the host byte layout.
    #[must_use]
    pub fn with_tensor_type(&self, tensor_type: TensorType) -> Self {
        Self {
            metadata: self.metadata.clone(),
            tensor_type,
            data: self.data.clone(),
        }
    }
}

/// An async tensor result together with the device that produced it.
///
/// The device attribution lets a later consumer pick the correct handler
/// without re-inspecting the payload.
#[derive(Debug, Clone)]
pub struct TensorHandle {
    value: AsyncValueRef<Tensor>,
    device: Arc<Device>,
}

impl TensorHandle {
    /// Wraps an async tensor with its producing device.
    #[must_use]
    pub fn new(value: AsyncValueRef<Tensor>, device: Arc<Device>) -> Self {
        Self { value, device }
    }

    /// An already-available tensor on `device`.
    #[must_use]
    pub fn concrete(tensor: Tensor, device: Arc<Device>) -> Self {
        Self::new(AsyncValueRef::concrete(tensor), device)
    }

    /// The async tensor value.
    #[must_use]
    pub const fn value(&self) -> &AsyncValueRef<Tensor> {
        &self.value
    }

    /// The device that produced (or will produce) the tensor.
    #[must_use]
    pub const fn device(&self) -> &Arc<Device> {
        &self.device
    }
}
