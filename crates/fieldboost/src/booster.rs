//! The boosting loop.
//!
//! A run initializes once (validate the objective, pick the input fields,
//! derive ground truth and the uniform-prior gradient) and then iterates:
//! split, score the holdout, fit one tree per class, advance the holdout,
//! score it again and let the stopping rule decide. Accepted iterations are
//! replayed on the full working dataset before the next one starts.
use log::{debug, info};
use serde::Serialize;

use crate::config::BoostConfig;
use crate::convergence::{holdout_impurity, ConvergenceWindow, Decision};
use crate::engine::{DataEngine, DatasetId, FieldId, ModelId, ResourceId};
use crate::ensemble::Ensemble;
use crate::error::{BoostError, Result};
use crate::lineage::{objective_classes, LineageBuilder};
use crate::naming::{ids, FieldNaming, FieldRef, Generated, Original};
use crate::pipeline::advance;
use crate::sampler::bootstrap;
use crate::trainer::fit_class_trees;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The stopping rule rejected the last iteration's trees.
    Converged,
    /// `max_iterations` iterations were accepted.
    MaxIterations,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationReport {
    pub iteration: usize,
    pub pre_score: f64,
    pub post_score: f64,
    pub improvement: f64,
    pub smoothed_pct: f64,
    pub accepted: bool,
}

#[derive(Debug, Clone)]
pub struct BoostOutcome {
    pub ensemble: Ensemble,
    /// Working dataset holding every accepted iteration's fields.
    pub dataset: DatasetId,
    pub objective: String,
    pub inputs: Vec<FieldId>,
    pub iterations: Vec<IterationReport>,
    pub termination: Termination,
}

/// Per-run constants fixed during initialization.
struct Setup {
    naming: FieldNaming,
    objective: String,
    truth: Vec<FieldRef<Generated>>,
    inputs: Vec<FieldRef<Original>>,
}

/// Everything carried from one iteration to the next.
struct IterationState {
    dataset: DatasetId,
    iteration: usize,
    window: ConvergenceWindow,
    ensemble: Ensemble,
    gradients: Vec<FieldRef<Generated>>,
    sums: Option<Vec<FieldRef<Generated>>>,
    reports: Vec<IterationReport>,
}

enum Step {
    Continue(IterationState),
    Converged(IterationState),
}

pub struct Booster<'a, E: DataEngine> {
    engine: &'a E,
    config: BoostConfig,
}

impl<'a, E: DataEngine> Booster<'a, E> {
    pub fn new(engine: &'a E, config: BoostConfig) -> Self {
        Booster { engine, config }
    }

    /// Boost on `dataset` until the stopping rule (or `max_iterations`) ends
    /// the run.
    pub fn run(&self, dataset: &DatasetId) -> Result<BoostOutcome> {
        let (setup, mut state) = self.initialize(dataset)?;
        loop {
            if let Some(max) = self.config.max_iterations {
                if state.iteration >= max {
                    info!("Reached max_iterations ({}), stopping", max);
                    return self.finish(setup, state, Termination::MaxIterations);
                }
            }
            state = match self.iterate(&setup, state)? {
                Step::Continue(next) => next,
                Step::Converged(last) => return self.finish(setup, last, Termination::Converged),
            };
        }
    }

    fn lineage(&self, naming: FieldNaming) -> LineageBuilder<'_, E> {
        LineageBuilder::new(self.engine, naming, &self.config.name)
    }

    fn initialize(&self, dataset: &DatasetId) -> Result<(Setup, IterationState)> {
        let meta = self.engine.fetch_metadata(dataset)?;
        let objective = match &self.config.objective_field {
            Some(name) => meta
                .field_by_name(name)
                .ok_or_else(|| BoostError::MissingObjective(name.clone()))?,
            None => meta
                .fields
                .last()
                .ok_or_else(|| {
                    BoostError::MissingObjective(format!("<last field of {}>", dataset))
                })?,
        };
        let classes = objective_classes(objective)?;

        let inputs: Vec<FieldRef<Original>> = meta
            .fields
            .iter()
            .filter(|f| f.preferred && f.id != objective.id && !FieldNaming::is_generated(&f.name))
            .map(|f| FieldRef::original(&meta, f))
            .collect();
        if inputs.is_empty() {
            return Err(BoostError::NoInputFields(dataset.clone()));
        }
        info!(
            "Boosting {} on objective `{}` with {} classes and {} input fields",
            dataset,
            objective.name,
            classes.len(),
            inputs.len()
        );

        let naming = FieldNaming::new(classes.len());
        let lineage = self.lineage(naming);
        let truth = lineage.ground_truth(dataset, objective, &classes)?;
        let initial = lineage.gradients(&truth.dataset, 0, &truth.fields, None)?;

        let setup = Setup {
            naming,
            objective: objective.name.clone(),
            truth: truth.fields,
            inputs,
        };
        let state = IterationState {
            dataset: initial.dataset,
            iteration: 0,
            window: ConvergenceWindow::default(),
            ensemble: Ensemble::new(classes),
            gradients: initial.fields,
            sums: None,
            reports: Vec::new(),
        };
        Ok((setup, state))
    }

    fn iterate(&self, setup: &Setup, state: IterationState) -> Result<Step> {
        let iteration = state.iteration + 1;
        let engine = self.engine;
        let lineage = self.lineage(setup.naming);

        let split = bootstrap(
            engine,
            &state.dataset,
            self.config.sample_rate,
            &self.config.sample_seed(iteration),
            &format!("{} - iteration {}", self.config.name, iteration),
        )?;
        let holdout_meta = engine.fetch_metadata(&split.out_of_bag)?;
        let pre_score = holdout_impurity(&holdout_meta, &state.gradients)?;

        let models = fit_class_trees(
            engine,
            &split.in_bag,
            &setup.inputs,
            &state.gradients,
            iteration,
            &self.config.name,
        )?;

        let holdout = advance(
            &lineage,
            engine,
            &split.out_of_bag,
            &models,
            iteration,
            &setup.truth,
            state.sums.as_deref(),
        )?;
        let post_score = holdout_impurity(&holdout.meta, &holdout.fields.gradients)?;

        let improvement = pre_score - post_score;
        let smoothed_pct = state.window.smoothed_percentage(improvement);
        let decision = state.window.decide(improvement, self.config.stop_threshold_pct);
        info!(
            "Iteration {}: holdout impurity {:.6} -> {:.6}, improvement {:.6} ({:.3}% smoothed)",
            iteration, pre_score, post_score, improvement, smoothed_pct
        );

        let mut reports = state.reports;
        reports.push(IterationReport {
            iteration,
            pre_score,
            post_score,
            improvement,
            smoothed_pct,
            accepted: decision == Decision::Continue,
        });

        match decision {
            Decision::Converged => {
                debug!("Discarding the {} trees of iteration {}", models.len(), iteration);
                Ok(Step::Converged(IterationState {
                    dataset: state.dataset,
                    iteration: state.iteration,
                    window: state.window,
                    ensemble: state.ensemble,
                    gradients: state.gradients,
                    sums: state.sums,
                    reports,
                }))
            }
            Decision::Continue => {
                let full = advance(
                    &lineage,
                    engine,
                    &state.dataset,
                    &models,
                    iteration,
                    &setup.truth,
                    state.sums.as_deref(),
                )?;
                self.label_models(&state.ensemble, &models, iteration)?;
                let mut ensemble = state.ensemble;
                ensemble.push(models);
                Ok(Step::Continue(IterationState {
                    dataset: full.dataset,
                    iteration,
                    window: state.window.advance(improvement),
                    ensemble,
                    gradients: full.fields.gradients,
                    sums: Some(full.fields.sums),
                    reports,
                }))
            }
        }
    }

    fn label_models(
        &self,
        ensemble: &Ensemble,
        models: &[ModelId],
        iteration: usize,
    ) -> Result<()> {
        for (model, label) in models.iter().zip(&ensemble.classes) {
            let name = format!("{} - iteration {} - {}", self.config.name, iteration, label);
            self.engine.set_resource_name(&ResourceId::Model(model.clone()), &name)?;
        }
        Ok(())
    }

    fn finish(
        &self,
        setup: Setup,
        state: IterationState,
        termination: Termination,
    ) -> Result<BoostOutcome> {
        self.engine.set_resource_name(
            &ResourceId::Dataset(state.dataset.clone()),
            &format!("{} - final", self.config.name),
        )?;
        info!(
            "Finished after {} iterations with {} accepted ({:?})",
            state.reports.len(),
            state.ensemble.len(),
            termination
        );
        Ok(BoostOutcome {
            ensemble: state.ensemble,
            dataset: state.dataset,
            objective: setup.objective,
            inputs: ids(&setup.inputs),
            iterations: state.reports,
            termination,
        })
    }
}
