//! Holdout scoring and the smoothed stopping rule.
use crate::engine::DatasetMeta;
use crate::error::{BoostError, Result};
use crate::naming::{FieldRef, Generated};

/// Brier-like impurity of a dataset: the squared gradients summed over
/// classes, averaged over rows. Lower is better.
///
/// Each class's sum of squares is divided by its population so that scores
/// of bootstrap holdouts with different row counts stay comparable. Read
/// straight from the engine's field summaries; an empty dataset scores 0.
pub fn holdout_impurity(meta: &DatasetMeta, gradients: &[FieldRef<Generated>]) -> Result<f64> {
    let mut impurity = 0.0;
    for gradient in gradients {
        let field = meta.field(&gradient.id).ok_or_else(|| BoostError::Lookup {
            name: gradient.id.to_string(),
            dataset: meta.id.clone(),
        })?;
        if field.summary.population > 0 {
            impurity += field.summary.sum_squares / field.summary.population as f64;
        }
    }
    Ok(impurity)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Converged,
}

/// Improvements seen so far: the running total through the last accepted
/// iteration and the two most recent values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConvergenceWindow {
    pub total: f64,
    pub previous: f64,
    pub before_previous: f64,
}

impl ConvergenceWindow {
    /// `100 * (imp + imp[-1] + imp[-2]) / (imp + total)`, where `total`
    /// already includes `imp`.
    ///
    /// On the first iteration this is `imp / (2 * imp)`, i.e. 50%. A zero or
    /// NaN denominator reads as 0.
    pub fn smoothed_percentage(&self, improvement: f64) -> f64 {
        let total = self.total + improvement;
        let denominator = improvement + total;
        if denominator.is_nan() || denominator == 0.0 {
            return 0.0;
        }
        100.0 * (improvement + self.previous + self.before_previous) / denominator
    }

    pub fn decide(&self, improvement: f64, threshold_pct: f64) -> Decision {
        if self.smoothed_percentage(improvement) > threshold_pct {
            Decision::Continue
        } else {
            Decision::Converged
        }
    }

    /// Window after accepting an iteration with `improvement`.
    pub fn advance(self, improvement: f64) -> Self {
        ConvergenceWindow {
            total: self.total + improvement,
            previous: improvement,
            before_previous: self.previous,
        }
    }
}
