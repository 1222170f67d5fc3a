//! Registry of operator descriptors keyed by forward operator name.
//!
//! Every name maps to an ordered sequence. Position 0 holds the forward operator; later
//! positions hold the backward operators chained with
//! [`OpMetaInfoBuilder::set_backward_op`](crate::builder::OpMetaInfoBuilder::set_backward_op).
//! Backward descriptors are only reachable by walking their forward operator's sequence.
//!
//! Libraries register operators through registrars collected at link time in
//! [`OP_REGISTRARS`] (see [`build_op!`](crate::build_op)). The host calls
//! [`flush_registrations`] after loading a library; it applies pending registrars once and
//! returns the complete mapping.

use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

use crate::error::{OpError, OpResult};
use crate::meta::OpMetaInfo;

/// Owned copy of the registry contents handed to the host.
pub type OpMetaInfoSnapshot = HashMap<String, Vec<OpMetaInfo>>;

#[derive(Debug, Clone, Default)]
pub struct OpMetaInfoMap {
    map: HashMap<String, Vec<OpMetaInfo>>,
}

impl OpMetaInfoMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the sequence registered under `name`, creating an empty one if necessary.
    pub fn get_or_create_slot(&mut self, name: &str) -> &mut Vec<OpMetaInfo> {
        self.map.entry(name.to_string()).or_default()
    }

    /// Returns the sequence registered under `name` without creating it.
    pub fn get(&self, name: &str) -> Option<&[OpMetaInfo]> {
        self.map.get(name).map(Vec::as_slice)
    }

    /// Returns the forward descriptor (position 0) for `name`.
    pub fn forward(&self, name: &str) -> Option<&OpMetaInfo> {
        self.get(name).and_then(|infos| infos.first())
    }

    /// Returns the backward descriptors chained onto `name`, in registration order.
    pub fn backward_ops(&self, name: &str) -> &[OpMetaInfo] {
        match self.get(name) {
            Some(infos) if infos.len() > 1 => &infos[1..],
            _ => &[],
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn as_map(&self) -> &HashMap<String, Vec<OpMetaInfo>> {
        &self.map
    }

    pub fn snapshot(&self) -> OpMetaInfoSnapshot {
        self.map.clone()
    }

    /// Appends `info` to the sequence for `name` and returns its position.
    pub(crate) fn push(&mut self, name: &str, info: OpMetaInfo) -> usize {
        let slot = self.get_or_create_slot(name);
        slot.push(info);
        slot.len() - 1
    }

    // Callers hold a position returned by `push` for the same name; slots never shrink.
    pub(crate) fn descriptor(&self, name: &str, position: usize) -> &OpMetaInfo {
        &self.map[name][position]
    }

    pub(crate) fn descriptor_mut(&mut self, name: &str, position: usize) -> &mut OpMetaInfo {
        &mut self.get_or_create_slot(name)[position]
    }

    /// Runs `registrar` against a staging map and appends its descriptors only on success.
    pub fn register_with<F>(&mut self, registrar: F) -> OpResult<()>
    where
        F: FnOnce(&mut OpMetaInfoMap) -> OpResult<()>,
    {
        let mut staging = OpMetaInfoMap::new();
        registrar(&mut staging)?;
        self.absorb(staging);
        Ok(())
    }

    fn absorb(&mut self, other: OpMetaInfoMap) {
        for (name, infos) in other.map {
            self.map.entry(name).or_default().extend(infos);
        }
    }
}

/// A link-time registered function that populates descriptors.
pub struct OpRegistrar {
    /// Identifier used in logs and errors.
    pub name: &'static str,
    pub register: fn(&mut OpMetaInfoMap) -> OpResult<()>,
}

#[linkme::distributed_slice]
pub static OP_REGISTRARS: [OpRegistrar] = [..];

static GLOBAL_REGISTRY: OnceLock<RwLock<OpMetaInfoMap>> = OnceLock::new();

/// Process-wide registry, created on first access.
///
/// Registration is expected to finish (library load is serialized by the host) before the host
/// merges the contents.
pub fn global_registry() -> &'static RwLock<OpMetaInfoMap> {
    GLOBAL_REGISTRY.get_or_init(|| RwLock::new(OpMetaInfoMap::new()))
}

/// Registers operators into the process-wide registry without going through [`OP_REGISTRARS`].
pub fn register_ops<F>(registrar: F) -> OpResult<()>
where
    F: FnOnce(&mut OpMetaInfoMap) -> OpResult<()>,
{
    global_registry()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .register_with(registrar)
}

struct RegistrarFailure {
    registrar: &'static str,
    message: String,
}

static FLUSHED: OnceLock<Vec<RegistrarFailure>> = OnceLock::new();

fn apply_registrars() -> Vec<RegistrarFailure> {
    let mut registry = global_registry()
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    let mut failures = Vec::new();
    for registrar in OP_REGISTRARS.iter() {
        match registry.register_with(registrar.register) {
            Ok(()) => log::debug!("applied operator registrar {}", registrar.name),
            Err(err) => {
                log::error!("operator registrar {} failed: {err}", registrar.name);
                failures.push(RegistrarFailure {
                    registrar: registrar.name,
                    message: err.to_string(),
                });
            }
        }
    }
    failures
}

/// Applies every pending registrar once and returns the process-wide registry contents.
pub fn flush_registrations() -> OpResult<OpMetaInfoSnapshot> {
    let failures = FLUSHED.get_or_init(apply_registrars);
    if let Some(failure) = failures.first() {
        return Err(OpError::RegistrarFailed {
            registrar: failure.registrar.to_string(),
            message: failure.message.clone(),
        });
    }
    Ok(global_registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .snapshot())
}
