//! Turns freshly fit trees into the next iteration's fields.
//!
//! Scoring is chained: class `c`'s tree scores the output of class `c - 1`'s
//! scoring, so the last dataset carries every prediction next to the
//! original columns without a join. Sums, probabilities and gradients are
//! then derived in that order.
use log::debug;

use crate::engine::{
    DataEngine, DatasetId, DatasetMeta, DeriveRequest, ModelId, NewField, ScoreRequest,
};
use crate::ensemble::Ensemble;
use crate::error::{BoostError, Result};
use crate::expr::Expr;
use crate::lineage::LineageBuilder;
use crate::naming::{FieldNaming, FieldRef, Generated, Role};

/// The fields one iteration adds, in class order.
#[derive(Debug, Clone)]
pub struct IterationFields {
    pub predictions: Vec<FieldRef<Generated>>,
    pub sums: Vec<FieldRef<Generated>>,
    pub probabilities: Vec<FieldRef<Generated>>,
    pub gradients: Vec<FieldRef<Generated>>,
}

#[derive(Debug, Clone)]
pub struct Advanced {
    pub dataset: DatasetId,
    pub meta: DatasetMeta,
    pub fields: IterationFields,
}

/// Score `dataset` with each class's model in turn, every step consuming the
/// previous step's output.
pub fn score_chain<E: DataEngine>(
    engine: &E,
    naming: FieldNaming,
    dataset: &DatasetId,
    models: &[ModelId],
    iteration: usize,
) -> Result<(DatasetId, Vec<FieldRef<Generated>>)> {
    let names = naming.names(Role::Prediction, iteration);
    let mut current = dataset.clone();
    for (model, name) in models.iter().zip(&names) {
        current = engine.score_batch(&ScoreRequest {
            model: model.clone(),
            dataset: current,
            prediction_name: name.to_string(),
            all_fields: true,
        })?;
    }
    let meta = engine.fetch_metadata(&current)?;
    let predictions = naming.resolve_role(&meta, Role::Prediction, iteration)?;
    Ok((current, predictions))
}

/// Add iteration `iteration`'s predictions, sums, probabilities and
/// gradients to `dataset`.
pub fn advance<E: DataEngine>(
    lineage: &LineageBuilder<'_, E>,
    engine: &E,
    dataset: &DatasetId,
    models: &[ModelId],
    iteration: usize,
    truth: &[FieldRef<Generated>],
    last_sums: Option<&[FieldRef<Generated>]>,
) -> Result<Advanced> {
    let (scored, predictions) = score_chain(engine, lineage.naming(), dataset, models, iteration)?;
    let sums = lineage.sums(&scored, iteration, &predictions, last_sums)?;
    let probabilities = lineage.softmax(&sums.dataset, iteration, Some(&sums.fields))?;
    let gradients = lineage.gradients(
        &probabilities.dataset,
        iteration,
        truth,
        Some(&probabilities.fields),
    )?;
    debug!("Advanced {} to iteration {} as {}", dataset, iteration, gradients.dataset);
    Ok(Advanced {
        dataset: gradients.dataset,
        meta: gradients.meta,
        fields: IterationFields {
            predictions,
            sums: sums.fields,
            probabilities: probabilities.fields,
            gradients: gradients.fields,
        },
    })
}

/// Output of applying a whole ensemble to a dataset.
#[derive(Debug, Clone)]
pub struct ScoredDataset {
    pub dataset: DatasetId,
    pub probabilities: Vec<FieldRef<Generated>>,
    pub predicted_class: FieldRef<Generated>,
}

/// Apply `ensemble` to a dataset holding the original input fields: chained
/// predictions and running sums per iteration, one softmax at the end and a
/// categorical field with the most probable class label.
pub fn score_ensemble<E: DataEngine>(
    engine: &E,
    dataset: &DatasetId,
    ensemble: &Ensemble,
    name: &str,
) -> Result<ScoredDataset> {
    if ensemble.num_classes() < 2 {
        return Err(BoostError::TooFewClasses {
            field: name.to_string(),
            found: ensemble.num_classes(),
        });
    }
    let naming = FieldNaming::new(ensemble.num_classes());
    let lineage = LineageBuilder::new(engine, naming, name);

    let mut current = dataset.clone();
    let mut sums: Option<Vec<FieldRef<Generated>>> = None;
    for (index, models) in ensemble.iterations.iter().enumerate() {
        let iteration = index + 1;
        let (scored, predictions) = score_chain(engine, naming, &current, models, iteration)?;
        let derived = lineage.sums(&scored, iteration, &predictions, sums.as_deref())?;
        current = derived.dataset;
        sums = Some(derived.fields);
    }
    let probabilities = lineage.softmax(&current, ensemble.len(), sums.as_deref())?;

    let label_expr = argmax_label(&probabilities.fields, &ensemble.classes);
    let predicted_name = naming.predicted_class();
    let request = DeriveRequest {
        new_fields: vec![NewField {
            name: predicted_name.to_string(),
            expr: label_expr,
        }],
        name: format!("{} - scored", name),
        ..Default::default()
    };
    let dataset = engine.derive_dataset(&probabilities.dataset, &request)?;
    let meta = engine.fetch_metadata(&dataset)?;
    let predicted_class = FieldNaming::resolve(&meta, &predicted_name)?;
    Ok(ScoredDataset {
        dataset,
        probabilities: probabilities.fields,
        predicted_class,
    })
}

/// Nested `if` picking the first class whose probability is at least every
/// later one's; ties go to the lower class index.
fn argmax_label(probabilities: &[FieldRef<Generated>], classes: &[String]) -> Expr {
    let last = classes.len() - 1;
    let mut expr = Expr::text(classes[last].clone());
    for class in (0..last).rev() {
        let wins = Expr::all(
            probabilities[class + 1..]
                .iter()
                .map(|other| {
                    Expr::field(&probabilities[class].id).at_least(Expr::field(&other.id))
                }),
        );
        expr = Expr::if_else(wins, Expr::text(classes[class].clone()), expr);
    }
    expr
}
