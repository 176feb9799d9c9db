use thiserror::Error;

use crate::engine::{DatasetId, EngineError, Optype};

/// Failures of a boosting run. None of them are recoverable at this layer.
#[derive(Debug, Error)]
pub enum BoostError {
    #[error("objective field `{field}` is {optype}, boosting needs a categorical objective")]
    NonCategoricalObjective { field: String, optype: Optype },

    #[error("objective field `{field}` has {found} categories, at least 2 are required")]
    TooFewClasses { field: String, found: usize },

    #[error("objective field `{0}` not found")]
    MissingObjective(String),

    #[error("dataset {0} has no input fields left after excluding the objective")]
    NoInputFields(DatasetId),

    #[error(transparent)]
    Remote(#[from] EngineError),

    /// A generated field expected to exist is absent; the lineage is broken.
    #[error("generated field `{name}` not found in {dataset}")]
    Lookup { name: String, dataset: DatasetId },
}

impl BoostError {
    /// Errors raised while validating inputs, before any derivation is issued.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BoostError::NonCategoricalObjective { .. }
                | BoostError::TooFewClasses { .. }
                | BoostError::MissingObjective(_)
                | BoostError::NoInputFields(_)
        )
    }

    pub(crate) fn non_categorical(field: &str, optype: Optype) -> Self {
        BoostError::NonCategoricalObjective {
            field: field.to_string(),
            optype,
        }
    }
}

pub type Result<T> = std::result::Result<T, BoostError>;
