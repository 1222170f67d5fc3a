//! Registration and call adaptation for externally compiled operators.
//!
//! Operator authors write plain functions over tensors, shapes or data types, wrap them in
//! adapters and describe them with an [`OpMetaInfoBuilder`]. The host merges the resulting
//! registry into an [`OperatorTable`] and drives every operator through the uniform adapter
//! calling convention: a slice of inputs plus an ordered slice of attributes.
//!
//! Inputs must precede attributes in an operator function. The attribute macros reject a
//! misordered signature at compile time:
//!
//! ```compile_fail
//! use custom_ops::{kernel, Tensor};
//!
//! #[kernel]
//! fn scale(factor: f32, x: Tensor) -> Vec<Tensor> {
//!     vec![x]
//! }
//! ```

extern crate self as custom_ops;

pub use linkme;

pub mod adapter;
pub mod attr;
pub mod binder;
pub mod builder;
mod env;
pub mod error;
pub mod host;
pub mod meta;
pub mod registry;
pub mod tensor;

pub use adapter::{
    infer_dtype_fn, infer_shape_fn, kernel_fn, Adapter, InferDtypeFn, InferShapeFn, KernelFn,
};
pub use attr::{AttrKind, AttrSpec, Attribute, FromAttribute};
pub use builder::{BuilderState, OpMetaInfoBuilder};
pub use custom_ops_macros::{infer_dtype, infer_shape, kernel};
pub use error::{AdapterKind, ArgSequence, OpError, OpResult};
pub use host::{DuplicatePolicy, HostConfig, HostOp, OpRole, OperatorTable};
pub use meta::{grad_var_name, OpMetaInfo, GRAD_SUFFIX};
pub use registry::{
    flush_registrations, global_registry, register_ops, OpMetaInfoMap, OpMetaInfoSnapshot,
    OpRegistrar, OP_REGISTRARS,
};
pub use tensor::{DataType, Shape, Tensor};
