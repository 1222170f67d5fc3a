//! Uniform call surface over author functions: kernels, shape inference and dtype inference.

use std::fmt;
use std::sync::Arc;

use crate::attr::Attribute;
use crate::binder::{Binder, OpFunction, Signature};
use crate::error::OpResult;
use crate::tensor::{DataType, Shape, Tensor};

type Thunk<I, O> = dyn for<'a> Fn(&mut Binder<'a, I>) -> OpResult<O> + Send + Sync;

/// A type-erased operator function together with its validated signature.
pub struct Adapter<I, O> {
    signature: Arc<Signature>,
    thunk: Arc<Thunk<I, O>>,
}

/// Tensors and attributes in, tensors out.
pub type KernelFn = Adapter<Tensor, Vec<Tensor>>;
/// Input shapes in, output shapes out.
pub type InferShapeFn = Adapter<Shape, Vec<Shape>>;
/// Input dtypes in, output dtypes out.
pub type InferDtypeFn = Adapter<DataType, Vec<DataType>>;

impl<I: 'static, O: 'static> Adapter<I, O> {
    /// Wraps `func`, rejecting signatures that declare an input after an attribute.
    pub fn new<F, M>(func: F) -> OpResult<Self>
    where
        F: OpFunction<I, O, M>,
    {
        let signature = Signature::new(F::params())?;
        let thunk: Arc<Thunk<I, O>> =
            Arc::new(move |binder: &mut Binder<'_, I>| func.invoke(binder));
        Ok(Self {
            signature: Arc::new(signature),
            thunk,
        })
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Binds `inputs` and `attrs` positionally and calls the wrapped function once.
    pub fn call(&self, inputs: &[I], attrs: &[Attribute]) -> OpResult<O> {
        self.signature.check_arity(inputs.len(), attrs.len())?;
        let mut binder = Binder::new(inputs, attrs);
        (self.thunk)(&mut binder)
    }
}

impl Adapter<Tensor, Vec<Tensor>> {
    pub fn compute(&self, inputs: &[Tensor], attrs: &[Attribute]) -> OpResult<Vec<Tensor>> {
        self.call(inputs, attrs)
    }
}

impl Adapter<Shape, Vec<Shape>> {
    pub fn infer(&self, input_shapes: &[Shape]) -> OpResult<Vec<Shape>> {
        self.call(input_shapes, &[])
    }
}

impl Adapter<DataType, Vec<DataType>> {
    pub fn infer(&self, input_dtypes: &[DataType]) -> OpResult<Vec<DataType>> {
        self.call(input_dtypes, &[])
    }
}

impl<I, O> Clone for Adapter<I, O> {
    fn clone(&self) -> Self {
        Self {
            signature: Arc::clone(&self.signature),
            thunk: Arc::clone(&self.thunk),
        }
    }
}

impl<I, O> fmt::Debug for Adapter<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("params", &self.signature.params())
            .finish_non_exhaustive()
    }
}

/// Wraps a kernel function such as `fn(Tensor, Tensor, i32) -> Vec<Tensor>`.
pub fn kernel_fn<F, M>(func: F) -> OpResult<KernelFn>
where
    F: OpFunction<Tensor, Vec<Tensor>, M>,
{
    Adapter::new(func)
}

/// Wraps a shape inference function such as `fn(Shape, Shape) -> Vec<Shape>`.
pub fn infer_shape_fn<F, M>(func: F) -> OpResult<InferShapeFn>
where
    F: OpFunction<Shape, Vec<Shape>, M>,
{
    Adapter::new(func)
}

/// Wraps a dtype inference function such as `fn(DataType) -> Vec<DataType>`.
pub fn infer_dtype_fn<F, M>(func: F) -> OpResult<InferDtypeFn>
where
    F: OpFunction<DataType, Vec<DataType>, M>,
{
    Adapter::new(func)
}
