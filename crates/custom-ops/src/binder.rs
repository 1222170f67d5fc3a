//! Positional binding of flat runtime sequences onto typed function parameters.
//!
//! An operator author writes an ordinary function such as
//! `fn add(x: Tensor, y: Tensor, scale: i32) -> Vec<Tensor>`. The host only ever holds two
//! flat sequences: input elements (tensors, shapes or dtypes depending on the adapter) and
//! dynamically typed [`Attribute`]s. The binder walks the declared parameter list left to
//! right with one cursor per sequence, type-checks every attribute against the declared
//! parameter type and calls the function once everything has been bound.
//!
//! Input parameters must all be declared before the first attribute parameter. A signature
//! that breaks this rule is rejected when the [`Signature`] is built, long before any call.

use std::fmt;

use crate::attr::{Attribute, FromAttribute};
use crate::error::{ArgSequence, OpError, OpResult};
use crate::tensor::{DataType, Shape, Tensor};

/// What a declared parameter consumes from the runtime sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Input,
    Attr(crate::attr::AttrKind),
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Input => f.write_str("input"),
            ParamKind::Attr(kind) => write!(f, "attr<{kind}>"),
        }
    }
}

/// Validated parameter list of an operator function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    params: Vec<ParamKind>,
    num_inputs: usize,
}

impl Signature {
    /// Validates that every input parameter precedes every attribute parameter.
    pub fn new(params: Vec<ParamKind>) -> OpResult<Self> {
        let mut seen_attr = false;
        for (position, param) in params.iter().enumerate() {
            match param {
                ParamKind::Input if seen_attr => {
                    return Err(OpError::Structural { position });
                }
                ParamKind::Input => {}
                ParamKind::Attr(_) => seen_attr = true,
            }
        }
        let num_inputs = params
            .iter()
            .take_while(|param| matches!(param, ParamKind::Input))
            .count();
        Ok(Self { params, num_inputs })
    }

    pub fn params(&self) -> &[ParamKind] {
        &self.params
    }

    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    pub fn num_attrs(&self) -> usize {
        self.params.len() - self.num_inputs
    }

    /// Fails unless the runtime sequence lengths match the declared parameter counts.
    pub fn check_arity(&self, inputs: usize, attrs: usize) -> OpResult<()> {
        if inputs != self.num_inputs {
            return Err(OpError::ArityMismatch {
                sequence: ArgSequence::Inputs,
                expected: self.num_inputs,
                actual: inputs,
            });
        }
        if attrs != self.num_attrs() {
            return Err(OpError::ArityMismatch {
                sequence: ArgSequence::Attrs,
                expected: self.num_attrs(),
                actual: attrs,
            });
        }
        Ok(())
    }
}

/// Cursor state over one call's runtime sequences.
///
/// Binding only advances the cursors; nothing is observable until the target function runs.
pub struct Binder<'a, I> {
    inputs: &'a [I],
    attrs: &'a [Attribute],
    input_cursor: usize,
    attr_cursor: usize,
}

impl<'a, I> Binder<'a, I> {
    pub fn new(inputs: &'a [I], attrs: &'a [Attribute]) -> Self {
        Self {
            inputs,
            attrs,
            input_cursor: 0,
            attr_cursor: 0,
        }
    }

    pub fn input_cursor(&self) -> usize {
        self.input_cursor
    }

    pub fn attr_cursor(&self) -> usize {
        self.attr_cursor
    }

    /// Takes the next input element.
    pub fn next_input(&mut self) -> OpResult<I>
    where
        I: Clone,
    {
        debug_assert_eq!(self.attr_cursor, 0, "input bound after an attribute");
        let value = self
            .inputs
            .get(self.input_cursor)
            .ok_or(OpError::ArityMismatch {
                sequence: ArgSequence::Inputs,
                expected: self.input_cursor + 1,
                actual: self.inputs.len(),
            })?;
        self.input_cursor += 1;
        Ok(value.clone())
    }

    /// Takes the next attribute and extracts a `T` from it.
    pub fn next_attr<T: FromAttribute>(&mut self) -> OpResult<T> {
        let position = self.attr_cursor;
        let attr = self.attrs.get(position).ok_or(OpError::ArityMismatch {
            sequence: ArgSequence::Attrs,
            expected: position + 1,
            actual: self.attrs.len(),
        })?;
        self.attr_cursor += 1;
        T::from_attribute(attr).ok_or(OpError::TypeMismatch {
            expected: T::KIND,
            actual: attr.kind(),
            position,
        })
    }
}

/// A parameter type an adapter with input element `I` knows how to bind.
pub trait Param<I>: Sized {
    const KIND: ParamKind;

    fn bind(binder: &mut Binder<'_, I>) -> OpResult<Self>;
}

impl Param<Tensor> for Tensor {
    const KIND: ParamKind = ParamKind::Input;

    fn bind(binder: &mut Binder<'_, Tensor>) -> OpResult<Self> {
        binder.next_input()
    }
}

impl Param<Shape> for Shape {
    const KIND: ParamKind = ParamKind::Input;

    fn bind(binder: &mut Binder<'_, Shape>) -> OpResult<Self> {
        binder.next_input()
    }
}

impl Param<DataType> for DataType {
    const KIND: ParamKind = ParamKind::Input;

    fn bind(binder: &mut Binder<'_, DataType>) -> OpResult<Self> {
        binder.next_input()
    }
}

// Attribute parameters exist for kernels only.
macro_rules! kernel_attr_params {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Param<Tensor> for $ty {
                const KIND: ParamKind = ParamKind::Attr(<$ty as FromAttribute>::KIND);

                fn bind(binder: &mut Binder<'_, Tensor>) -> OpResult<Self> {
                    binder.next_attr::<$ty>()
                }
            }
        )*
    };
}

kernel_attr_params!(
    bool,
    i32,
    f32,
    i64,
    String,
    Vec<i32>,
    Vec<f32>,
    Vec<i64>,
    Vec<String>,
);

/// Return values an operator function may produce for output type `O`.
pub trait IntoOutput<O> {
    fn into_output(self) -> OpResult<O>;
}

impl<T> IntoOutput<Vec<T>> for Vec<T> {
    fn into_output(self) -> OpResult<Vec<T>> {
        Ok(self)
    }
}

impl<T, E> IntoOutput<Vec<T>> for Result<Vec<T>, E>
where
    E: Into<anyhow::Error>,
{
    fn into_output(self) -> OpResult<Vec<T>> {
        self.map_err(|err| OpError::Function(err.into()))
    }
}

/// Functions that can be driven by a [`Binder`] over input element `I`, producing `O`.
///
/// `Marker` only disambiguates the per-arity implementations and is inferred at the call site.
pub trait OpFunction<I, O, Marker>: Send + Sync + 'static {
    /// Declared parameter kinds, in order.
    fn params() -> Vec<ParamKind>;

    /// Binds every parameter and calls the function once all of them succeeded.
    fn invoke(&self, binder: &mut Binder<'_, I>) -> OpResult<O>;
}

macro_rules! impl_op_function {
    ($($param:ident),*) => {
        impl<Func, I, O, R, $($param,)*> OpFunction<I, O, (R, $($param,)*)> for Func
        where
            Func: Fn($($param),*) -> R + Send + Sync + 'static,
            R: IntoOutput<O>,
            $($param: Param<I>,)*
        {
            fn params() -> Vec<ParamKind> {
                vec![$(<$param as Param<I>>::KIND),*]
            }

            #[allow(non_snake_case, unused_variables)]
            fn invoke(&self, binder: &mut Binder<'_, I>) -> OpResult<O> {
                $(let $param = <$param as Param<I>>::bind(binder)?;)*
                (self)($($param),*).into_output()
            }
        }
    };
}

impl_op_function!();
impl_op_function!(A1);
impl_op_function!(A1, A2);
impl_op_function!(A1, A2, A3);
impl_op_function!(A1, A2, A3, A4);
impl_op_function!(A1, A2, A3, A4, A5);
impl_op_function!(A1, A2, A3, A4, A5, A6);
impl_op_function!(A1, A2, A3, A4, A5, A6, A7);
impl_op_function!(A1, A2, A3, A4, A5, A6, A7, A8);
impl_op_function!(A1, A2, A3, A4, A5, A6, A7, A8, A9);
impl_op_function!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10);
impl_op_function!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11);
impl_op_function!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11, A12);
impl_op_function!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11, A12, A13);
impl_op_function!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11, A12, A13, A14);
impl_op_function!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11, A12, A13, A14, A15);
impl_op_function!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11, A12, A13, A14, A15, A16);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::AttrKind;

    #[test]
    fn signature_counts_inputs_then_attrs() {
        let signature = Signature::new(vec![
            ParamKind::Input,
            ParamKind::Input,
            ParamKind::Attr(AttrKind::Int32),
            ParamKind::Attr(AttrKind::Strings),
        ])
        .unwrap();
        assert_eq!(signature.num_inputs(), 2);
        assert_eq!(signature.num_attrs(), 2);
        assert!(signature.check_arity(2, 2).is_ok());
    }

    #[test]
    fn signature_rejects_input_after_attr() {
        let err = Signature::new(vec![
            ParamKind::Input,
            ParamKind::Attr(AttrKind::Bool),
            ParamKind::Input,
        ])
        .unwrap_err();
        assert!(matches!(err, OpError::Structural { position: 2 }));
    }

    #[test]
    fn arity_is_checked_per_sequence() {
        let signature =
            Signature::new(vec![ParamKind::Input, ParamKind::Attr(AttrKind::Float32)]).unwrap();
        assert!(matches!(
            signature.check_arity(3, 1),
            Err(OpError::ArityMismatch {
                sequence: ArgSequence::Inputs,
                expected: 1,
                actual: 3,
            })
        ));
        assert!(matches!(
            signature.check_arity(1, 0),
            Err(OpError::ArityMismatch {
                sequence: ArgSequence::Attrs,
                expected: 1,
                actual: 0,
            })
        ));
    }

    #[test]
    fn binder_advances_independent_cursors() {
        let inputs = [Shape::from([2, 3]), Shape::from([4])];
        let attrs = [Attribute::Int64(7), Attribute::Bool(true)];
        let mut binder = Binder::new(&inputs, &attrs);

        assert_eq!(binder.next_input().unwrap(), vec![2, 3]);
        assert_eq!(binder.next_input().unwrap(), vec![4]);
        assert_eq!(binder.next_attr::<i64>().unwrap(), 7);
        assert_eq!(binder.input_cursor(), 2);
        assert_eq!(binder.attr_cursor(), 1);

        let err = binder.next_attr::<i32>().unwrap_err();
        assert!(matches!(
            err,
            OpError::TypeMismatch {
                expected: AttrKind::Int32,
                actual: AttrKind::Bool,
                position: 1,
            }
        ));
    }

    #[test]
    fn declared_kinds_follow_parameter_types() {
        fn scaled(_x: Tensor, _axes: Vec<i64>, _name: String) -> Vec<Tensor> {
            Vec::new()
        }

        fn params_of<F, M>(_f: &F) -> Vec<ParamKind>
        where
            F: OpFunction<Tensor, Vec<Tensor>, M>,
        {
            F::params()
        }

        assert_eq!(
            params_of(&scaled),
            vec![
                ParamKind::Input,
                ParamKind::Attr(AttrKind::Int64s),
                ParamKind::Attr(AttrKind::String),
            ]
        );
    }
}
