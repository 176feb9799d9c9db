//! Translates the boosting algebra into field-derivation requests.
//!
//! Each derivation adds the K fields of one role, resolves them by name on
//! the new dataset and hands back typed references for the next step.
use log::debug;

use crate::engine::{DataEngine, DatasetId, DatasetMeta, DeriveRequest, FieldMeta, NewField, Optype};
use crate::error::{BoostError, Result};
use crate::expr::Expr;
use crate::naming::{FieldNaming, FieldRef, Generated, Role};

/// A dataset produced by one derivation, with the fields it added.
#[derive(Debug, Clone)]
pub struct Derived {
    pub dataset: DatasetId,
    pub meta: DatasetMeta,
    pub fields: Vec<FieldRef<Generated>>,
}

/// Class labels of a categorical objective, in histogram order.
pub fn objective_classes(objective: &FieldMeta) -> Result<Vec<String>> {
    if objective.optype != Optype::Categorical {
        return Err(BoostError::non_categorical(&objective.name, objective.optype));
    }
    let classes: Vec<String> = objective
        .summary
        .categories
        .iter()
        .map(|(label, _)| label.clone())
        .collect();
    if classes.len() < 2 {
        return Err(BoostError::TooFewClasses {
            field: objective.name.clone(),
            found: classes.len(),
        });
    }
    Ok(classes)
}

pub struct LineageBuilder<'a, E: DataEngine> {
    engine: &'a E,
    naming: FieldNaming,
    run_name: &'a str,
}

impl<'a, E: DataEngine> LineageBuilder<'a, E> {
    pub fn new(engine: &'a E, naming: FieldNaming, run_name: &'a str) -> Self {
        LineageBuilder {
            engine,
            naming,
            run_name,
        }
    }

    pub fn naming(&self) -> FieldNaming {
        self.naming
    }

    fn derive_role(
        &self,
        origin: &DatasetId,
        role: Role,
        iteration: usize,
        exprs: Vec<Expr>,
    ) -> Result<Derived> {
        let names = self.naming.names(role, iteration);
        debug_assert_eq!(names.len(), exprs.len());
        let request = DeriveRequest {
            new_fields: names
                .iter()
                .zip(exprs)
                .map(|(name, expr)| NewField {
                    name: name.to_string(),
                    expr,
                })
                .collect(),
            name: format!("{} - {:?} iteration {}", self.run_name, role, iteration),
            ..Default::default()
        };
        if let Some(first) = request.new_fields.first() {
            log::trace!("{} = {}", first.name, first.expr);
        }
        let dataset = self.engine.derive_dataset(origin, &request)?;
        let meta = self.engine.fetch_metadata(&dataset)?;
        let fields = self.naming.resolve_role(&meta, role, iteration)?;
        debug!("Derived {:?} fields of iteration {} into {}", role, iteration, dataset);
        Ok(Derived {
            dataset,
            meta,
            fields,
        })
    }

    /// One 0/1 indicator per class, then a copy without the objective field so
    /// it cannot leak into training.
    pub fn ground_truth(
        &self,
        origin: &DatasetId,
        objective: &FieldMeta,
        classes: &[String],
    ) -> Result<Derived> {
        let exprs = classes
            .iter()
            .map(|label| Expr::indicator(&objective.id, label))
            .collect();
        let with_truth = self.derive_role(origin, Role::Truth, 0, exprs)?;

        let request = DeriveRequest {
            excluded_fields: vec![objective.id.clone()],
            name: format!("{} - ground truth", self.run_name),
            ..Default::default()
        };
        let dataset = self.engine.derive_dataset(&with_truth.dataset, &request)?;
        let meta = self.engine.fetch_metadata(&dataset)?;
        let fields = self.naming.resolve_role(&meta, Role::Truth, 0)?;
        Ok(Derived {
            dataset,
            meta,
            fields,
        })
    }

    /// gradient[c] = truth[c] - p[c]; without probabilities p[c] is 1/K.
    pub fn gradients(
        &self,
        origin: &DatasetId,
        iteration: usize,
        truth: &[FieldRef<Generated>],
        probabilities: Option<&[FieldRef<Generated>]>,
    ) -> Result<Derived> {
        let uniform = 1.0 / self.naming.classes() as f64;
        let exprs = truth
            .iter()
            .enumerate()
            .map(|(class, t)| {
                let p = match probabilities {
                    Some(probs) => Expr::field(&probs[class].id),
                    None => Expr::number(uniform),
                };
                Expr::field(&t.id) - p
            })
            .collect();
        self.derive_role(origin, Role::Gradient, iteration, exprs)
    }

    /// sum[c] = prediction[c] + last_sum[c], or just prediction[c] when there
    /// is no earlier sum.
    pub fn sums(
        &self,
        origin: &DatasetId,
        iteration: usize,
        predictions: &[FieldRef<Generated>],
        last_sums: Option<&[FieldRef<Generated>]>,
    ) -> Result<Derived> {
        let exprs = predictions
            .iter()
            .enumerate()
            .map(|(class, pred)| match last_sums {
                Some(last) => Expr::field(&pred.id) + Expr::field(&last[class].id),
                None => Expr::field(&pred.id),
            })
            .collect();
        self.derive_role(origin, Role::Sum, iteration, exprs)
    }

    /// p[c] = exp(sum[c]) / sum_j exp(sum[j]); uniform without sums.
    pub fn softmax(
        &self,
        origin: &DatasetId,
        iteration: usize,
        sums: Option<&[FieldRef<Generated>]>,
    ) -> Result<Derived> {
        let k = self.naming.classes();
        let exprs = match sums {
            Some(sums) => {
                let denominator = Expr::sum(sums.iter().map(|s| Expr::field(&s.id).exp()));
                sums.iter()
                    .map(|s| Expr::field(&s.id).exp() / denominator.clone())
                    .collect()
            }
            None => vec![Expr::number(1.0 / k as f64); k],
        };
        self.derive_role(origin, Role::Softmax, iteration, exprs)
    }
}
