//! One regression tree per class, fit concurrently.
use log::debug;
use rayon::prelude::*;

use crate::engine::{DataEngine, DatasetId, FitRequest, ModelId};
use crate::error::Result;
use crate::naming::{ids, FieldRef, Generated, Original};

/// Fit K trees on `train`, tree `c` predicting `objectives[c]` from the
/// fixed `inputs`.
///
/// The fits are independent and run in parallel; the call returns once all
/// of them have finished. A single failed fit fails the whole call and no
/// models are returned.
pub fn fit_class_trees<E: DataEngine>(
    engine: &E,
    train: &DatasetId,
    inputs: &[FieldRef<Original>],
    objectives: &[FieldRef<Generated>],
    iteration: usize,
    name: &str,
) -> Result<Vec<ModelId>> {
    let input_ids = ids(inputs);
    let models = objectives
        .par_iter()
        .enumerate()
        .map(|(class, objective)| {
            let request = FitRequest {
                dataset: train.clone(),
                objective: objective.id.clone(),
                inputs: input_ids.clone(),
                name: format!("{} - iteration {} class {}", name, iteration, class),
            };
            engine.fit_tree(&request)
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    debug!("Fit {} trees for iteration {} on {}", models.len(), iteration, train);
    Ok(models)
}
