//! Host-owned values the adapters pass through without inspecting them.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Type-erased payload behind a [`Tensor`].
pub type TensorPayload = Arc<dyn Any + Send + Sync>;

/// Opaque reference to a tensor owned by the host framework.
///
/// Cloning shares the same payload; the core never allocates, copies or frees tensor storage.
#[derive(Clone)]
pub struct Tensor {
    payload: TensorPayload,
}

impl Tensor {
    /// Wraps a host value into a handle.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            payload: Arc::new(value),
        }
    }

    /// Wraps an already shared host value.
    pub fn from_payload(payload: TensorPayload) -> Self {
        Self { payload }
    }

    pub fn payload(&self) -> &TensorPayload {
        &self.payload
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.payload.is::<T>()
    }

    /// Returns `true` when both handles refer to the same host value.
    pub fn ptr_eq(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor({:p})", Arc::as_ptr(&self.payload))
    }
}

/// Dimension sizes of a tensor. An empty shape denotes a scalar.
pub type Shape = Vec<i64>;

/// Element types understood by the host framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    Int8,
    UInt8,
    Int16,
    Int32,
    Int64,
    Float16,
    Float32,
    Float64,
    Complex64,
    Complex128,
}

impl DataType {
    /// Returns the size in bytes of one element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DataType::Bool | DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::Float16 => 2,
            DataType::Int32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::Float64 | DataType::Complex64 => 8,
            DataType::Complex128 => 16,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            DataType::Float16 | DataType::Float32 | DataType::Float64
        )
    }

    pub fn is_complex(self) -> bool {
        matches!(self, DataType::Complex64 | DataType::Complex128)
    }
}
