//! The Data/Model Engine boundary.
//!
//! Every dataset, field and model the booster touches lives behind a
//! [`DataEngine`]. The booster only ever holds opaque handles and reads the
//! summary statistics the engine reports at creation time; it never sees rows.
//! Each operation blocks until the engine reports the resource as finished.
pub mod memory;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::expr::Expr;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

handle!(
    /// Handle of an immutable dataset, e.g. `dataset/3`.
    DatasetId
);
handle!(
    /// Handle of a fitted tree, e.g. `model/12`.
    ModelId
);
handle!(
    /// Engine-assigned field id, e.g. `000004`. Stable across derivations.
    FieldId
);

/// Any resource that can be renamed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceId {
    Dataset(DatasetId),
    Model(ModelId),
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Dataset(id) => id.fmt(f),
            ResourceId::Model(id) => id.fmt(f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Optype {
    Numeric,
    Categorical,
}

impl fmt::Display for Optype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Optype::Numeric => f.write_str("numeric"),
            Optype::Categorical => f.write_str("categorical"),
        }
    }
}

/// Summary statistics computed by the engine when a field is created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary {
    pub sum: f64,
    pub sum_squares: f64,
    /// Number of non-missing values.
    pub population: u64,
    /// `(category, count)` pairs; empty for numeric fields.
    pub categories: Vec<(String, u64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub id: FieldId,
    pub name: String,
    pub optype: Optype,
    pub preferred: bool,
    pub summary: FieldSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMeta {
    pub id: DatasetId,
    pub name: String,
    pub rows: u64,
    pub tags: Vec<String>,
    /// Fields in column order.
    pub fields: Vec<FieldMeta>,
}

impl DatasetMeta {
    pub fn field(&self, id: &FieldId) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| &f.id == id)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A new field computed row-wise from an expression.
#[derive(Debug, Clone, PartialEq)]
pub struct NewField {
    pub name: String,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeriveRequest {
    pub new_fields: Vec<NewField>,
    /// When set, only these origin fields (plus the new ones) survive.
    pub input_fields: Option<Vec<FieldId>>,
    pub excluded_fields: Vec<FieldId>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleRequest {
    pub rate: f64,
    pub replacement: bool,
    pub out_of_bag: bool,
    pub seed: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitRequest {
    pub dataset: DatasetId,
    pub objective: FieldId,
    pub inputs: Vec<FieldId>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRequest {
    pub model: ModelId,
    pub dataset: DatasetId,
    pub prediction_name: String,
    /// Keep all fields of `dataset` next to the prediction.
    pub all_fields: bool,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{operation} failed for {resource}: {message}")]
pub struct EngineError {
    pub operation: &'static str,
    pub resource: String,
    pub message: String,
}

impl EngineError {
    pub fn new(
        operation: &'static str,
        resource: impl fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        EngineError {
            operation,
            resource: resource.to_string(),
            message: message.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Synchronous, idempotent-by-name operations of a tabular data/model engine.
///
/// Implementations are shared by reference across the sampler and trainer
/// fan-outs and therefore must be `Sync`.
pub trait DataEngine: Sync {
    fn fetch_metadata(&self, dataset: &DatasetId) -> EngineResult<DatasetMeta>;

    fn derive_dataset(
        &self,
        origin: &DatasetId,
        request: &DeriveRequest,
    ) -> EngineResult<DatasetId>;

    fn sample_dataset(
        &self,
        origin: &DatasetId,
        request: &SampleRequest,
    ) -> EngineResult<DatasetId>;

    fn fit_tree(&self, request: &FitRequest) -> EngineResult<ModelId>;

    fn score_batch(&self, request: &ScoreRequest) -> EngineResult<DatasetId>;

    fn set_resource_name(&self, resource: &ResourceId, name: &str) -> EngineResult<()>;
}

impl<E: DataEngine + ?Sized> DataEngine for &E {
    fn fetch_metadata(&self, dataset: &DatasetId) -> EngineResult<DatasetMeta> {
        (**self).fetch_metadata(dataset)
    }

    fn derive_dataset(
        &self,
        origin: &DatasetId,
        request: &DeriveRequest,
    ) -> EngineResult<DatasetId> {
        (**self).derive_dataset(origin, request)
    }

    fn sample_dataset(
        &self,
        origin: &DatasetId,
        request: &SampleRequest,
    ) -> EngineResult<DatasetId> {
        (**self).sample_dataset(origin, request)
    }

    fn fit_tree(&self, request: &FitRequest) -> EngineResult<ModelId> {
        (**self).fit_tree(request)
    }

    fn score_batch(&self, request: &ScoreRequest) -> EngineResult<DatasetId> {
        (**self).score_batch(request)
    }

    fn set_resource_name(&self, resource: &ResourceId, name: &str) -> EngineResult<()> {
        (**self).set_resource_name(resource, name)
    }
}
