//! The registered record of one operator: names plus its three adapters.

use std::fmt;

use crate::adapter::{InferDtypeFn, InferShapeFn, KernelFn};
use crate::attr::{AttrSpec, Attribute};
use crate::error::{AdapterKind, OpError, OpResult};
use crate::tensor::{DataType, Shape, Tensor};

/// Suffix appended to a variable name to form the name of its gradient.
pub const GRAD_SUFFIX: &str = "@GRAD";

/// Returns the gradient variable name for `var_name` (`x` -> `x@GRAD`).
pub fn grad_var_name(var_name: &str) -> String {
    let mut result = String::with_capacity(var_name.len() + GRAD_SUFFIX.len());
    result.push_str(var_name);
    result.push_str(GRAD_SUFFIX);
    result
}

/// Operator descriptor.
///
/// Setters overwrite the previous value wholesale and return `&mut Self` for chaining. Names are
/// not checked against the adapters' signatures.
#[derive(Clone)]
pub struct OpMetaInfo {
    name: String,
    inputs: Vec<String>,
    outputs: Vec<String>,
    attrs: Vec<String>,
    kernel_fn: Option<KernelFn>,
    infer_shape_fn: Option<InferShapeFn>,
    infer_dtype_fn: Option<InferDtypeFn>,
}

impl OpMetaInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attrs: Vec::new(),
            kernel_fn: None,
            infer_shape_fn: None,
            infer_dtype_fn: None,
        }
    }

    /// Format: `["<name1>", "<name2>", ...]`.
    pub fn inputs<S: Into<String>>(&mut self, inputs: impl IntoIterator<Item = S>) -> &mut Self {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    /// Format: `["<name1>", "<name2>", ...]`.
    pub fn outputs<S: Into<String>>(&mut self, outputs: impl IntoIterator<Item = S>) -> &mut Self {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    /// Format: `["<name1>:<type1>", "<name2>:<type2>", ...]`.
    pub fn attrs<S: Into<String>>(&mut self, attrs: impl IntoIterator<Item = S>) -> &mut Self {
        self.attrs = attrs.into_iter().map(Into::into).collect();
        self
    }

    pub fn set_kernel_fn(&mut self, func: KernelFn) -> &mut Self {
        self.kernel_fn = Some(func);
        self
    }

    pub fn set_infer_shape_fn(&mut self, func: InferShapeFn) -> &mut Self {
        self.infer_shape_fn = Some(func);
        self
    }

    pub fn set_infer_dtype_fn(&mut self, func: InferDtypeFn) -> &mut Self {
        self.infer_dtype_fn = Some(func);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_names(&self) -> &[String] {
        &self.inputs
    }

    pub fn output_names(&self) -> &[String] {
        &self.outputs
    }

    /// Raw `"name:type"` declarations, in declaration order.
    pub fn attr_decls(&self) -> &[String] {
        &self.attrs
    }

    pub fn attr_specs(&self) -> OpResult<Vec<AttrSpec>> {
        self.attrs.iter().map(|decl| AttrSpec::parse(decl)).collect()
    }

    pub fn kernel_fn(&self) -> Option<&KernelFn> {
        self.kernel_fn.as_ref()
    }

    pub fn infer_shape_fn(&self) -> Option<&InferShapeFn> {
        self.infer_shape_fn.as_ref()
    }

    pub fn infer_dtype_fn(&self) -> Option<&InferDtypeFn> {
        self.infer_dtype_fn.as_ref()
    }

    /// Runs the kernel, failing with [`OpError::UnregisteredAdapter`] when none was set.
    pub fn compute(&self, inputs: &[Tensor], attrs: &[Attribute]) -> OpResult<Vec<Tensor>> {
        self.kernel_fn
            .as_ref()
            .ok_or_else(|| OpError::unregistered(&self.name, AdapterKind::Kernel))?
            .compute(inputs, attrs)
    }

    pub fn infer_shape(&self, input_shapes: &[Shape]) -> OpResult<Vec<Shape>> {
        self.infer_shape_fn
            .as_ref()
            .ok_or_else(|| OpError::unregistered(&self.name, AdapterKind::InferShape))?
            .infer(input_shapes)
    }

    pub fn infer_dtype(&self, input_dtypes: &[DataType]) -> OpResult<Vec<DataType>> {
        self.infer_dtype_fn
            .as_ref()
            .ok_or_else(|| OpError::unregistered(&self.name, AdapterKind::InferDtype))?
            .infer(input_dtypes)
    }
}

impl fmt::Debug for OpMetaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpMetaInfo")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("attrs", &self.attrs)
            .field("kernel_fn", &self.kernel_fn.is_some())
            .field("infer_shape_fn", &self.infer_shape_fn.is_some())
            .field("infer_dtype_fn", &self.infer_dtype_fn.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{infer_shape_fn, kernel_fn};

    fn identity(x: Tensor) -> Vec<Tensor> {
        vec![x]
    }

    fn empty(x: Tensor) -> Vec<Tensor> {
        let _ = x;
        Vec::new()
    }

    #[test]
    fn grad_names_append_suffix() {
        assert_eq!(grad_var_name("x"), "x@GRAD");
        assert_eq!(grad_var_name(""), "@GRAD");
    }

    #[test]
    fn setters_overwrite_instead_of_appending() {
        let mut info = OpMetaInfo::new("relu");
        info.inputs(["x"]).inputs(["a", "b"]).attrs(["alpha:float"]);
        info.set_kernel_fn(kernel_fn(empty).unwrap())
            .set_kernel_fn(kernel_fn(identity).unwrap());

        assert_eq!(info.input_names(), ["a", "b"]);
        assert_eq!(info.attr_decls(), ["alpha:float"]);

        let x = Tensor::new(1u8);
        let out = info.compute(&[x.clone()], &[]).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].ptr_eq(&x));
    }

    #[test]
    fn unset_adapters_are_reported() {
        let mut info = OpMetaInfo::new("relu");
        info.set_infer_shape_fn(infer_shape_fn(|x: Shape| vec![x]).unwrap());

        assert!(matches!(
            info.compute(&[], &[]),
            Err(OpError::UnregisteredAdapter {
                adapter: AdapterKind::Kernel,
                ..
            })
        ));
        assert!(matches!(
            info.infer_dtype(&[DataType::Float32]),
            Err(OpError::UnregisteredAdapter {
                adapter: AdapterKind::InferDtype,
                ..
            })
        ));
        assert_eq!(info.infer_shape(&[vec![3]]).unwrap(), vec![vec![3]]);
    }
}
