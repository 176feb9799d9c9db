mod common;

use common::{FailingFits, Recording, ScriptedEngine};
use fieldboost::engine::{DataEngine, ResourceId};
use fieldboost::{BoostConfig, BoostError, Booster, Termination};

const CLASSES: [&str; 3] = ["setosa", "versicolor", "virginica"];

#[test]
fn halts_where_the_smoothed_improvement_drops_below_threshold() {
    let engine = ScriptedEngine::with_improvements(&CLASSES, &[10.0, 0.03, 0.03, 0.03, 0.03, 0.03]);
    let source = engine.source();

    let outcome = Booster::new(&engine, BoostConfig::default()).run(&source).unwrap();

    assert_eq!(outcome.termination, Termination::Converged);
    assert_eq!(outcome.ensemble.len(), 3);
    assert_eq!(outcome.iterations.len(), 4);
    assert!(outcome.iterations[..3].iter().all(|r| r.accepted));
    assert!(!outcome.iterations[3].accepted);
    assert!((outcome.iterations[0].improvement - 10.0).abs() < 1e-9);
    assert!(outcome.iterations[3].smoothed_pct < 1.0);
    // The rejected iteration's trees were fit, then discarded.
    assert_eq!(engine.fitted_models(), 12);
    assert!(outcome.ensemble.iterations.iter().all(|models| models.len() == 3));
}

#[test]
fn working_dataset_stops_at_the_last_accepted_iteration() {
    let engine = ScriptedEngine::with_improvements(&CLASSES, &[10.0, 0.03, 0.03, 0.03]);
    let source = engine.source();
    let outcome = Booster::new(&engine, BoostConfig::default()).run(&source).unwrap();

    let meta = engine.fetch_metadata(&outcome.dataset).unwrap();
    assert!(meta.field_by_name("label").is_none());
    assert!(meta.field_by_name("__fb_truth_2").is_some());
    assert!(meta.field_by_name("__fb_sum_0_iter_3").is_some());
    assert!(meta.field_by_name("__fb_gradient_2_iter_3").is_some());
    assert!(meta.field_by_name("__fb_sum_0_iter_4").is_none());
    assert_eq!(outcome.objective, "label");
    assert_eq!(outcome.inputs.len(), 2);
}

#[test]
fn accepted_models_and_the_final_dataset_are_renamed() {
    let engine = ScriptedEngine::with_improvements(&CLASSES, &[10.0, 0.03, 0.03, 0.03]);
    let source = engine.source();
    let config = BoostConfig {
        name: "iris".to_string(),
        ..Default::default()
    };
    let outcome = Booster::new(&engine, config).run(&source).unwrap();

    let renamed = engine.renamed();
    assert_eq!(renamed.len(), outcome.ensemble.models().count() + 1);
    assert!(renamed.contains(&(
        ResourceId::Model(outcome.ensemble.iterations[1][2].clone()),
        "iris - iteration 2 - virginica".to_string()
    )));
    assert_eq!(
        renamed.last().unwrap(),
        &(ResourceId::Dataset(outcome.dataset.clone()), "iris - final".to_string())
    );
}

#[test]
fn a_first_iteration_without_change_returns_an_empty_ensemble() {
    let engine = ScriptedEngine::with_improvements(&CLASSES, &[0.0]);
    let source = engine.source();
    let outcome = Booster::new(&engine, BoostConfig::default()).run(&source).unwrap();
    assert_eq!(outcome.termination, Termination::Converged);
    assert!(outcome.ensemble.is_empty());
    assert_eq!(outcome.iterations.len(), 1);
    assert_eq!(outcome.iterations[0].smoothed_pct, 0.0);
}

#[test]
fn a_first_iteration_loss_is_still_accepted() {
    let engine = ScriptedEngine::with_improvements(&CLASSES, &[-1.0]);
    let source = engine.source();
    let config = BoostConfig::default().with_max_iterations(1);
    let outcome = Booster::new(&engine, config).run(&source).unwrap();
    assert_eq!(outcome.termination, Termination::MaxIterations);
    assert_eq!(outcome.ensemble.len(), 1);
    assert!((outcome.iterations[0].improvement + 1.0).abs() < 1e-9);
    assert!((outcome.iterations[0].smoothed_pct - 50.0).abs() < 1e-9);
}

#[test]
fn max_iterations_caps_the_run() {
    let engine = ScriptedEngine::with_improvements(&CLASSES, &[10.0; 8]);
    let source = engine.source();
    let config = BoostConfig::default().with_max_iterations(2);
    let outcome = Booster::new(&engine, config).run(&source).unwrap();

    assert_eq!(outcome.termination, Termination::MaxIterations);
    assert_eq!(outcome.ensemble.len(), 2);
    assert_eq!(outcome.iterations.len(), 2);
    assert_eq!(engine.fitted_models(), 6);
}

#[test]
fn numeric_objective_fails_before_any_derivation() {
    let engine = Recording::new(ScriptedEngine::with_improvements(&CLASSES, &[10.0]));
    let source = engine.inner.source();
    let config = BoostConfig::default().with_objective("x");

    let err = Booster::new(&engine, config).run(&source).unwrap_err();
    assert!(matches!(err, BoostError::NonCategoricalObjective { .. }));
    assert!(err.is_validation());
    assert_eq!(engine.derives(), 0);
}

#[test]
fn unknown_objective_is_a_validation_error() {
    let engine = ScriptedEngine::with_improvements(&CLASSES, &[10.0]);
    let source = engine.source();
    let err = Booster::new(&engine, BoostConfig::default().with_objective("petal"))
        .run(&source)
        .unwrap_err();
    assert!(matches!(err, BoostError::MissingObjective(ref name) if name == "petal"));
}

#[test]
fn single_class_objective_is_rejected() {
    let engine = ScriptedEngine::with_improvements(&["only"], &[10.0]);
    let source = engine.source();
    let err = Booster::new(&engine, BoostConfig::default()).run(&source).unwrap_err();
    assert!(matches!(err, BoostError::TooFewClasses { found: 1, .. }));
}

#[test]
fn a_failed_fit_aborts_the_run() {
    let engine = FailingFits::new(ScriptedEngine::with_improvements(&CLASSES, &[10.0; 4]), 5);
    let source = engine.inner.source();
    let err = Booster::new(&engine, BoostConfig::default()).run(&source).unwrap_err();
    match err {
        BoostError::Remote(e) => {
            assert_eq!(e.operation, "fit_tree");
            assert_eq!(e.message, "injected failure");
        }
        other => panic!("unexpected error: {}", other),
    }
}
