//! Host-side operator table.
//!
//! The host merges registry snapshots into its own table after every library load. Position 0
//! of each registry sequence becomes a forward operator; later positions become backward
//! operators addressable under their own names and linked to their forward operator.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::attr::{AttrSpec, Attribute};
use crate::env;
use crate::error::{OpError, OpResult};
use crate::meta::{OpMetaInfo, GRAD_SUFFIX};
use crate::registry::{flush_registrations, OpMetaInfoSnapshot};
use crate::tensor::{DataType, Shape, Tensor};

/// What to do when a merged operator name is already present in the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    #[default]
    Error,
    Skip,
    Replace,
}

impl FromStr for DuplicatePolicy {
    type Err = OpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(DuplicatePolicy::Error),
            "skip" => Ok(DuplicatePolicy::Skip),
            "replace" => Ok(DuplicatePolicy::Replace),
            _ => Err(OpError::InvalidConfig {
                key: env::ON_DUPLICATE_VAR.to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Merge behaviour of an [`OperatorTable`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub on_duplicate: DuplicatePolicy,
    /// Require backward variable names to follow the `@GRAD` convention.
    pub check_grad_names: bool,
}

impl HostConfig {
    /// Reads `CUSTOM_OPS_ON_DUPLICATE` and `CUSTOM_OPS_CHECK_GRAD_NAMES`, keeping defaults for
    /// unset variables.
    pub fn from_env() -> OpResult<Self> {
        let mut config = HostConfig::default();
        if let Some(value) = env::non_empty_var(env::ON_DUPLICATE_VAR) {
            config.on_duplicate = value.parse()?;
        }
        if let Some(value) = env::non_empty_var(env::CHECK_GRAD_NAMES_VAR) {
            config.check_grad_names = env::parse_bool(&value);
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpRole {
    Forward { backward: Vec<String> },
    Backward { forward: String },
}

/// An operator as the host sees it: descriptor, parsed attributes and gradient linkage.
#[derive(Debug, Clone)]
pub struct HostOp {
    meta: OpMetaInfo,
    attrs: Vec<AttrSpec>,
    role: OpRole,
}

impl HostOp {
    fn new(meta: &OpMetaInfo, role: OpRole) -> OpResult<Self> {
        Ok(Self {
            attrs: meta.attr_specs()?,
            meta: meta.clone(),
            role,
        })
    }

    pub fn name(&self) -> &str {
        self.meta.name()
    }

    pub fn meta(&self) -> &OpMetaInfo {
        &self.meta
    }

    pub fn attrs(&self) -> &[AttrSpec] {
        &self.attrs
    }

    pub fn role(&self) -> &OpRole {
        &self.role
    }

    /// Backward operators chained onto this forward operator, in registration order.
    pub fn backward_ops(&self) -> &[String] {
        match &self.role {
            OpRole::Forward { backward } => backward,
            OpRole::Backward { .. } => &[],
        }
    }

    pub fn forward_op(&self) -> Option<&str> {
        match &self.role {
            OpRole::Forward { .. } => None,
            OpRole::Backward { forward } => Some(forward),
        }
    }

    /// Orders named attribute values by the declaration list, checking each declared kind.
    pub fn ordered_attrs(&self, values: &HashMap<String, Attribute>) -> OpResult<Vec<Attribute>> {
        self.attrs
            .iter()
            .enumerate()
            .map(|(position, spec)| {
                let value = values.get(&spec.name).ok_or_else(|| OpError::MissingAttr {
                    op: self.name().to_string(),
                    attr: spec.name.clone(),
                })?;
                if value.kind() != spec.kind {
                    return Err(OpError::TypeMismatch {
                        expected: spec.kind,
                        actual: value.kind(),
                        position,
                    });
                }
                Ok(value.clone())
            })
            .collect()
    }
}

/// The host framework's table of custom operators.
#[derive(Default)]
pub struct OperatorTable {
    config: HostConfig,
    ops: HashMap<String, HostOp>,
}

impl OperatorTable {
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            ops: HashMap::new(),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn get(&self, name: &str) -> Option<&HostOp> {
        self.ops.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Operator names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.ops.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Flushes pending registrations and merges the process-wide registry.
    ///
    /// The snapshot always contains every operator registered so far, so a second call only
    /// succeeds under [`DuplicatePolicy::Skip`] or [`DuplicatePolicy::Replace`].
    pub fn load_registered(&mut self) -> OpResult<usize> {
        let snapshot = flush_registrations()?;
        self.merge(&snapshot)
    }

    /// Merges a registry snapshot and returns the number of operators added or replaced.
    ///
    /// The whole snapshot is validated before the table changes.
    pub fn merge(&mut self, snapshot: &OpMetaInfoSnapshot) -> OpResult<usize> {
        let mut keys: Vec<&String> = snapshot.keys().collect();
        keys.sort();

        let mut staged: Vec<HostOp> = Vec::new();
        let mut staged_names: HashSet<String> = HashSet::new();
        for key in keys {
            let Some((forward, backward)) = snapshot[key].split_first() else {
                log::debug!("skipping empty registry slot {key}");
                continue;
            };
            let group = self.stage_group(key, forward, backward)?;

            let collision = group
                .iter()
                .map(HostOp::name)
                .find(|name| self.ops.contains_key(*name) || staged_names.contains(*name))
                .map(str::to_string);
            if let Some(name) = collision {
                match self.config.on_duplicate {
                    DuplicatePolicy::Error => return Err(OpError::DuplicateOperator(name)),
                    DuplicatePolicy::Skip => {
                        log::warn!("skipping operator group {key}: `{name}` is already registered");
                        continue;
                    }
                    DuplicatePolicy::Replace => {
                        log::warn!("replacing registered operator `{name}` from group {key}");
                    }
                }
            }

            for op in group {
                log::debug!("staged custom operator {} ({})", op.name(), op.role);
                staged_names.insert(op.name().to_string());
                staged.push(op);
            }
        }

        let merged = staged.len();
        for op in staged {
            self.evict(op.name());
            self.ops.insert(op.name().to_string(), op);
        }
        log::info!("merged {merged} custom operators");
        Ok(merged)
    }

    fn stage_group(
        &self,
        key: &str,
        forward: &OpMetaInfo,
        backward: &[OpMetaInfo],
    ) -> OpResult<Vec<HostOp>> {
        // a name registered twice under one key resolves to a single slot at its first position
        let mut resolved: Vec<&OpMetaInfo> = vec![forward];
        for info in backward {
            let Some(index) = resolved.iter().position(|seen| seen.name() == info.name()) else {
                resolved.push(info);
                continue;
            };
            match self.config.on_duplicate {
                DuplicatePolicy::Error => {
                    return Err(OpError::DuplicateOperator(info.name().to_string()))
                }
                DuplicatePolicy::Skip => {
                    log::warn!("skipping repeated descriptor `{}` in group {key}", info.name());
                }
                DuplicatePolicy::Replace => {
                    log::warn!("replacing repeated descriptor `{}` in group {key}", info.name());
                    resolved[index] = info;
                }
            }
        }

        let forward = resolved[0];
        let backward = &resolved[1..];
        let mut group = Vec::with_capacity(resolved.len());
        group.push(HostOp::new(
            forward,
            OpRole::Forward {
                backward: backward.iter().map(|info| info.name().to_string()).collect(),
            },
        )?);
        for info in backward {
            if self.config.check_grad_names {
                check_grad_op(forward, info)?;
            }
            group.push(HostOp::new(
                info,
                OpRole::Backward {
                    forward: forward.name().to_string(),
                },
            )?);
        }
        Ok(group)
    }

    // Removes `name` and unlinks it: a forward op takes its backward ops with it, a backward op
    // leaves its forward op's list.
    fn evict(&mut self, name: &str) {
        let Some(old) = self.ops.remove(name) else {
            return;
        };
        match old.role {
            OpRole::Forward { backward } => {
                for bwd in backward {
                    if self.ops.get(&bwd).and_then(HostOp::forward_op) == Some(name) {
                        self.ops.remove(&bwd);
                    }
                }
            }
            OpRole::Backward { forward } => {
                if let Some(OpRole::Forward { backward }) =
                    self.ops.get_mut(&forward).map(|op| &mut op.role)
                {
                    backward.retain(|bwd| bwd != name);
                }
            }
        }
    }

    fn op(&self, name: &str) -> OpResult<&HostOp> {
        self.ops
            .get(name)
            .ok_or_else(|| OpError::UnknownOperator(name.to_string()))
    }

    /// Runs the kernel of `name` with named attribute values.
    pub fn run_kernel(
        &self,
        name: &str,
        inputs: &[Tensor],
        attrs: &HashMap<String, Attribute>,
    ) -> OpResult<Vec<Tensor>> {
        let op = self.op(name)?;
        let attrs = op.ordered_attrs(attrs)?;
        op.meta.compute(inputs, &attrs)
    }

    pub fn infer_shapes(&self, name: &str, input_shapes: &[Shape]) -> OpResult<Vec<Shape>> {
        self.op(name)?.meta.infer_shape(input_shapes)
    }

    pub fn infer_dtypes(&self, name: &str, input_dtypes: &[DataType]) -> OpResult<Vec<DataType>> {
        self.op(name)?.meta.infer_dtype(input_dtypes)
    }
}

impl fmt::Display for OpRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpRole::Forward { backward } if backward.is_empty() => f.write_str("forward"),
            OpRole::Forward { backward } => write!(f, "forward, grad {}", backward.join(", ")),
            OpRole::Backward { forward } => write!(f, "backward of {forward}"),
        }
    }
}

fn check_grad_op(forward: &OpMetaInfo, backward: &OpMetaInfo) -> OpResult<()> {
    let fwd_inputs: HashSet<&str> = forward.input_names().iter().map(String::as_str).collect();
    let fwd_outputs: HashSet<&str> = forward.output_names().iter().map(String::as_str).collect();
    let invalid = |var: &str, reason: &str| OpError::InvalidGradOp {
        op: backward.name().to_string(),
        var: var.to_string(),
        reason: reason.to_string(),
    };

    for var in backward.input_names() {
        let known = fwd_inputs.contains(var.as_str())
            || fwd_outputs.contains(var.as_str())
            || var
                .strip_suffix(GRAD_SUFFIX)
                .is_some_and(|base| fwd_outputs.contains(base));
        if !known {
            return Err(invalid(
                var,
                "expected a forward input, a forward output or the gradient of a forward output",
            ));
        }
    }
    for var in backward.output_names() {
        let known = var
            .strip_suffix(GRAD_SUFFIX)
            .is_some_and(|base| fwd_inputs.contains(base));
        if !known {
            return Err(invalid(var, "expected the gradient of a forward input"));
        }
    }

    let fwd_attrs = forward.attr_specs()?;
    for spec in backward.attr_specs()? {
        if !fwd_attrs.contains(&spec) {
            return Err(invalid(
                &spec.name,
                "backward attributes must be declared by the forward operator",
            ));
        }
    }
    Ok(())
}
