//! Fluent construction of forward and backward operator descriptors.

use crate::adapter::{InferDtypeFn, InferShapeFn, KernelFn};
use crate::meta::OpMetaInfo;
use crate::registry::OpMetaInfoMap;

/// Which descriptor the builder is configuring. `ConfiguringBackward` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    ConfiguringForward,
    ConfiguringBackward,
}

/// Chains descriptor configuration under one forward operator name.
///
/// The builder appends a fresh forward descriptor on construction. Every configuration call
/// applies to the descriptor under the cursor; [`set_backward_op`](Self::set_backward_op)
/// appends a backward descriptor to the forward name's sequence and moves the cursor onto it.
///
/// ```
/// use custom_ops::{kernel_fn, OpMetaInfoBuilder, OpMetaInfoMap, Tensor};
///
/// fn relu(x: Tensor) -> Vec<Tensor> {
///     vec![x]
/// }
///
/// fn relu_grad(_x: Tensor, out_grad: Tensor) -> Vec<Tensor> {
///     vec![out_grad]
/// }
///
/// # fn main() -> custom_ops::OpResult<()> {
/// let mut registry = OpMetaInfoMap::new();
/// OpMetaInfoBuilder::new(&mut registry, "relu")
///     .inputs(["X"])
///     .outputs(["Out"])
///     .set_kernel_fn(kernel_fn(relu)?)
///     .set_backward_op("relu_grad")
///     .inputs(["X", "Out@GRAD"])
///     .outputs(["X@GRAD"])
///     .set_kernel_fn(kernel_fn(relu_grad)?);
///
/// assert_eq!(registry.get("relu").map(|infos| infos.len()), Some(2));
/// # Ok(())
/// # }
/// ```
pub struct OpMetaInfoBuilder<'r> {
    registry: &'r mut OpMetaInfoMap,
    // forward op name, also the registry key of every descriptor this builder creates
    name: String,
    state: BuilderState,
    // position returned by `OpMetaInfoMap::push` under `name`, so always in bounds
    cursor: usize,
}

impl<'r> OpMetaInfoBuilder<'r> {
    pub fn new(registry: &'r mut OpMetaInfoMap, name: impl Into<String>) -> Self {
        let name = name.into();
        let cursor = registry.push(&name, OpMetaInfo::new(name.clone()));
        Self {
            registry,
            name,
            state: BuilderState::ConfiguringForward,
            cursor,
        }
    }

    pub fn state(&self) -> BuilderState {
        self.state
    }

    pub fn forward_name(&self) -> &str {
        &self.name
    }

    /// Position of the descriptor under the cursor within the forward name's sequence.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Descriptor under the cursor.
    pub fn current(&self) -> &OpMetaInfo {
        self.registry.descriptor(&self.name, self.cursor)
    }

    fn target(&mut self) -> &mut OpMetaInfo {
        self.registry.descriptor_mut(&self.name, self.cursor)
    }

    pub fn inputs<S: Into<String>>(mut self, inputs: impl IntoIterator<Item = S>) -> Self {
        self.target().inputs(inputs);
        self
    }

    pub fn outputs<S: Into<String>>(mut self, outputs: impl IntoIterator<Item = S>) -> Self {
        self.target().outputs(outputs);
        self
    }

    pub fn attrs<S: Into<String>>(mut self, attrs: impl IntoIterator<Item = S>) -> Self {
        self.target().attrs(attrs);
        self
    }

    pub fn set_kernel_fn(mut self, func: KernelFn) -> Self {
        self.target().set_kernel_fn(func);
        self
    }

    pub fn set_infer_shape_fn(mut self, func: InferShapeFn) -> Self {
        self.target().set_infer_shape_fn(func);
        self
    }

    pub fn set_infer_dtype_fn(mut self, func: InferDtypeFn) -> Self {
        self.target().set_infer_dtype_fn(func);
        self
    }

    /// Appends a backward descriptor named `bwd_op_name` under the forward name and makes it
    /// the configuration target.
    pub fn set_backward_op(mut self, bwd_op_name: impl Into<String>) -> Self {
        let bwd_op_name = bwd_op_name.into();
        log::debug!(
            "chaining backward operator {bwd_op_name} onto {}",
            self.name
        );
        self.cursor = self.registry.push(&self.name, OpMetaInfo::new(bwd_op_name));
        self.state = BuilderState::ConfiguringBackward;
        self
    }
}

/// Declares a link-time registrar that builds an operator when the host flushes registrations.
///
/// ```
/// use custom_ops::{build_op, infer_shape_fn, kernel_fn, Shape, Tensor};
///
/// fn scale(x: Tensor, factor: f32) -> Vec<Tensor> {
///     let _ = factor;
///     vec![x]
/// }
///
/// build_op!(REGISTER_SCALE, "scale", |op| op
///     .inputs(["X"])
///     .outputs(["Out"])
///     .attrs(["factor:float"])
///     .set_kernel_fn(kernel_fn(scale)?)
///     .set_infer_shape_fn(infer_shape_fn(|x: Shape| vec![x])?));
/// # fn main() {}
/// ```
#[macro_export]
macro_rules! build_op {
    ($registrar:ident, $name:expr, |$op:ident| $body:expr $(,)?) => {
        #[$crate::linkme::distributed_slice($crate::registry::OP_REGISTRARS)]
        #[linkme(crate = $crate::linkme)]
        static $registrar: $crate::registry::OpRegistrar = $crate::registry::OpRegistrar {
            name: $name,
            register: {
                fn register(
                    registry: &mut $crate::registry::OpMetaInfoMap,
                ) -> $crate::error::OpResult<()> {
                    let $op = $crate::builder::OpMetaInfoBuilder::new(registry, $name);
                    let _ = $body;
                    Ok(())
                }
                register
            },
        };
    };
}
