//! Deterministic names for every field a boosting run derives.
//!
//! All generated names share [`GENERATED_PREFIX`], so a field is "generated"
//! exactly when its name starts with the prefix. Per-class names follow
//! `<prefix>_<role>_<class>_iter_<i>`; ground truth is computed once and
//! drops the iteration suffix.
use std::fmt;
use std::marker::PhantomData;

use crate::engine::{DatasetId, DatasetMeta, FieldId, FieldMeta};
use crate::error::{BoostError, Result};

pub const GENERATED_PREFIX: &str = "__fb";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Truth,
    Sum,
    Prediction,
    Softmax,
    Gradient,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Truth,
        Role::Sum,
        Role::Prediction,
        Role::Softmax,
        Role::Gradient,
    ];

    fn tag(self) -> &'static str {
        match self {
            Role::Truth => "truth",
            Role::Sum => "sum",
            Role::Prediction => "prediction",
            Role::Softmax => "softmax",
            Role::Gradient => "gradient",
        }
    }
}

/// A name minted by [`FieldNaming`]. Cannot be built from arbitrary strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeneratedName(String);

impl GeneratedName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeneratedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Marker for fields present in the dataset the run started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Original;

/// Marker for fields derived by the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generated;

/// A field id resolved against a specific dataset.
///
/// Engines keep field ids stable across derivations, so a reference resolved
/// on a dataset stays valid on all of its descendants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef<K> {
    pub id: FieldId,
    pub dataset: DatasetId,
    _kind: PhantomData<K>,
}

impl<K> FieldRef<K> {
    fn new(id: FieldId, dataset: DatasetId) -> Self {
        FieldRef {
            id,
            dataset,
            _kind: PhantomData,
        }
    }
}

impl FieldRef<Original> {
    pub fn original(meta: &DatasetMeta, field: &FieldMeta) -> Self {
        FieldRef::new(field.id.clone(), meta.id.clone())
    }
}

pub fn ids<K>(refs: &[FieldRef<K>]) -> Vec<FieldId> {
    refs.iter().map(|r| r.id.clone()).collect()
}

/// Naming registry for a run with a fixed class count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldNaming {
    classes: usize,
}

impl FieldNaming {
    pub fn new(classes: usize) -> Self {
        FieldNaming { classes }
    }

    pub fn classes(&self) -> usize {
        self.classes
    }

    pub fn name(&self, role: Role, class: usize, iteration: usize) -> GeneratedName {
        match role {
            Role::Truth => GeneratedName(format!("{}_{}_{}", GENERATED_PREFIX, role.tag(), class)),
            _ => GeneratedName(format!(
                "{}_{}_{}_iter_{}",
                GENERATED_PREFIX,
                role.tag(),
                class,
                iteration
            )),
        }
    }

    /// One name per class, in class-index order.
    pub fn names(&self, role: Role, iteration: usize) -> Vec<GeneratedName> {
        (0..self.classes)
            .map(|class| self.name(role, class, iteration))
            .collect()
    }

    pub fn predicted_class(&self) -> GeneratedName {
        GeneratedName(format!("{}_predicted_class", GENERATED_PREFIX))
    }

    pub fn is_generated(name: &str) -> bool {
        name.starts_with(GENERATED_PREFIX)
    }

    /// Exact-name lookup of a generated field.
    pub fn resolve(meta: &DatasetMeta, name: &GeneratedName) -> Result<FieldRef<Generated>> {
        meta.field_by_name(name.as_str())
            .map(|f| FieldRef::new(f.id.clone(), meta.id.clone()))
            .ok_or_else(|| BoostError::Lookup {
                name: name.to_string(),
                dataset: meta.id.clone(),
            })
    }

    /// Resolve all K fields of a role, in class-index order.
    pub fn resolve_role(
        &self,
        meta: &DatasetMeta,
        role: Role,
        iteration: usize,
    ) -> Result<Vec<FieldRef<Generated>>> {
        let refs = self
            .names(role, iteration)
            .iter()
            .map(|name| Self::resolve(meta, name))
            .collect::<Result<Vec<_>>>()?;
        log::trace!("Resolved {:?} fields of iteration {} on {}", role, iteration, meta.id);
        Ok(refs)
    }
}
