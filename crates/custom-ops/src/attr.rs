//! Dynamically typed attribute values and their `"name:type"` declarations.
//!
//! The set of kinds is closed. Every kind has exactly one Rust type it binds to and one
//! declaration tag used in descriptor attribute lists.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{OpError, OpResult};

/// Runtime attribute value handed to a kernel adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Attribute {
    Bool(bool),
    Int32(i32),
    Float32(f32),
    Int64(i64),
    String(String),
    Int32s(Vec<i32>),
    Float32s(Vec<f32>),
    Int64s(Vec<i64>),
    Strings(Vec<String>),
}

impl Attribute {
    pub fn kind(&self) -> AttrKind {
        match self {
            Attribute::Bool(_) => AttrKind::Bool,
            Attribute::Int32(_) => AttrKind::Int32,
            Attribute::Float32(_) => AttrKind::Float32,
            Attribute::Int64(_) => AttrKind::Int64,
            Attribute::String(_) => AttrKind::String,
            Attribute::Int32s(_) => AttrKind::Int32s,
            Attribute::Float32s(_) => AttrKind::Float32s,
            Attribute::Int64s(_) => AttrKind::Int64s,
            Attribute::Strings(_) => AttrKind::Strings,
        }
    }
}

/// Tag of an [`Attribute`] case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttrKind {
    Bool,
    Int32,
    Float32,
    Int64,
    String,
    Int32s,
    Float32s,
    Int64s,
    Strings,
}

impl AttrKind {
    pub const ALL: [AttrKind; 9] = [
        AttrKind::Bool,
        AttrKind::Int32,
        AttrKind::Float32,
        AttrKind::Int64,
        AttrKind::String,
        AttrKind::Int32s,
        AttrKind::Float32s,
        AttrKind::Int64s,
        AttrKind::Strings,
    ];

    /// Declaration tag as written after the colon in `"name:type"`.
    pub fn tag(self) -> &'static str {
        match self {
            AttrKind::Bool => "bool",
            AttrKind::Int32 => "int",
            AttrKind::Float32 => "float",
            AttrKind::Int64 => "int64",
            AttrKind::String => "string",
            AttrKind::Int32s => "vector<int>",
            AttrKind::Float32s => "vector<float>",
            AttrKind::Int64s => "vector<int64>",
            AttrKind::Strings => "vector<string>",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        AttrKind::ALL.into_iter().find(|kind| kind.tag() == tag)
    }
}

impl fmt::Display for AttrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Checked extraction of a statically typed value from an [`Attribute`].
pub trait FromAttribute: Sized {
    const KIND: AttrKind;

    /// Returns `None` when the dynamic tag does not match [`Self::KIND`].
    fn from_attribute(attr: &Attribute) -> Option<Self>;
}

macro_rules! attribute_kinds {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl FromAttribute for $ty {
                const KIND: AttrKind = AttrKind::$variant;

                fn from_attribute(attr: &Attribute) -> Option<Self> {
                    match attr {
                        Attribute::$variant(value) => Some(value.clone()),
                        _ => None,
                    }
                }
            }

            impl From<$ty> for Attribute {
                fn from(value: $ty) -> Self {
                    Attribute::$variant(value)
                }
            }
        )*
    };
}

attribute_kinds! {
    bool => Bool,
    i32 => Int32,
    f32 => Float32,
    i64 => Int64,
    String => String,
    Vec<i32> => Int32s,
    Vec<f32> => Float32s,
    Vec<i64> => Int64s,
    Vec<String> => Strings,
}

impl From<&str> for Attribute {
    fn from(value: &str) -> Self {
        Attribute::String(value.to_string())
    }
}

/// Parsed attribute declaration (`"scale:int"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttrSpec {
    pub name: String,
    pub kind: AttrKind,
}

impl AttrSpec {
    pub fn parse(decl: &str) -> OpResult<Self> {
        let (name, tag) = decl
            .split_once(':')
            .ok_or_else(|| OpError::invalid_attr(decl, "expected `name:type`"))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(OpError::invalid_attr(decl, "attribute name is empty"));
        }
        let tag = tag.trim();
        let kind = AttrKind::from_tag(tag)
            .ok_or_else(|| OpError::invalid_attr(decl, format!("unsupported type `{tag}`")))?;
        Ok(AttrSpec {
            name: name.to_string(),
            kind,
        })
    }
}

impl FromStr for AttrSpec {
    type Err = OpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AttrSpec::parse(s)
    }
}

impl fmt::Display for AttrSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.kind.tag())
    }
}
