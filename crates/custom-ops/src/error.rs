//! Error taxonomy shared by the binder, the registry and the host table.

use std::fmt;

use thiserror::Error;

use crate::attr::AttrKind;

/// Which runtime sequence an arity error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgSequence {
    Inputs,
    Attrs,
}

impl fmt::Display for ArgSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgSequence::Inputs => f.write_str("inputs"),
            ArgSequence::Attrs => f.write_str("attributes"),
        }
    }
}

/// The three behaviour functions a descriptor can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    Kernel,
    InferShape,
    InferDtype,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterKind::Kernel => f.write_str("kernel"),
            AdapterKind::InferShape => f.write_str("infer_shape"),
            AdapterKind::InferDtype => f.write_str("infer_dtype"),
        }
    }
}

#[derive(Debug, Error)]
pub enum OpError {
    /// An input parameter follows an attribute parameter in the function signature.
    #[error("input parameter {position} is declared after an attribute parameter; inputs must come first")]
    Structural { position: usize },

    #[error("attribute cast error at attribute {position}: expected {expected} value, got {actual}")]
    TypeMismatch {
        expected: AttrKind,
        actual: AttrKind,
        position: usize,
    },

    #[error("expected {expected} {sequence}, got {actual}")]
    ArityMismatch {
        sequence: ArgSequence,
        expected: usize,
        actual: usize,
    },

    #[error("operator `{op}` has no {adapter} function")]
    UnregisteredAdapter { op: String, adapter: AdapterKind },

    #[error("invalid attribute declaration `{decl}`: {reason}")]
    InvalidAttr { decl: String, reason: String },

    #[error("operator `{0}` is not registered")]
    UnknownOperator(String),

    #[error("operator `{op}` requires attribute `{attr}`")]
    MissingAttr { op: String, attr: String },

    #[error("operator `{0}` is already registered")]
    DuplicateOperator(String),

    #[error("backward operator `{op}` has invalid variable `{var}`: {reason}")]
    InvalidGradOp {
        op: String,
        var: String,
        reason: String,
    },

    #[error("invalid value `{value}` for {key}")]
    InvalidConfig { key: String, value: String },

    #[error("operator registrar `{registrar}` failed: {message}")]
    RegistrarFailed { registrar: String, message: String },

    #[error("operator function failed")]
    Function(#[source] anyhow::Error),
}

impl OpError {
    pub fn invalid_attr(decl: impl Into<String>, reason: impl Into<String>) -> Self {
        OpError::InvalidAttr {
            decl: decl.into(),
            reason: reason.into(),
        }
    }

    pub fn unregistered(op: impl Into<String>, adapter: AdapterKind) -> Self {
        OpError::UnregisteredAdapter {
            op: op.into(),
            adapter,
        }
    }
}

/// Convenience alias for results returned across the crate.
pub type OpResult<T> = Result<T, OpError>;
