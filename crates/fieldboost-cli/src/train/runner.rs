//! Runs a boosting job on a local table and writes its artifacts.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;

use fieldboost::engine::memory::InMemoryEngine;
use fieldboost::engine::{DataEngine, DatasetId};
use fieldboost::io::{read_csv, write_csv};
use fieldboost::pipeline::score_ensemble;
use fieldboost::{Booster, Ensemble, IterationReport, Termination};

use super::input::TrainConfig;

/// JSON summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct TrainReport {
    pub created: DateTime<Utc>,
    pub data: PathBuf,
    pub objective: String,
    pub inputs: Vec<String>,
    pub termination: Termination,
    pub ensemble: Ensemble,
    pub iterations: Vec<IterationReport>,
    pub final_dataset: DatasetId,
}

pub fn run_training(config: &TrainConfig) -> Result<TrainReport> {
    let engine = InMemoryEngine::new(config.tree.clone());
    let source = read_csv(&engine, &config.data, &config.table)?;

    let outcome = Booster::new(&engine, config.boost.clone())
        .run(&source)
        .context("Boosting failed")?;

    let source_meta = engine.fetch_metadata(&source)?;
    let inputs = outcome
        .inputs
        .iter()
        .filter_map(|id| source_meta.field(id).map(|f| f.name.clone()))
        .collect();

    let report = TrainReport {
        created: Utc::now(),
        data: config.data.clone(),
        objective: outcome.objective.clone(),
        inputs,
        termination: outcome.termination,
        ensemble: outcome.ensemble.clone(),
        iterations: outcome.iterations.clone(),
        final_dataset: outcome.dataset.clone(),
    };
    write_report(&report, &config.output_file)?;

    if let Some(path) = &config.scored_file {
        write_scored(&engine, &source, &outcome.ensemble, &config.boost.name, path)?;
    }
    Ok(report)
}

pub fn write_report(report: &TrainReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;
    info!("Report written to {}", path.display());
    Ok(())
}

/// Source columns followed by one probability per class and the predicted label.
fn write_scored(
    engine: &InMemoryEngine,
    source: &DatasetId,
    ensemble: &Ensemble,
    name: &str,
    path: &Path,
) -> Result<()> {
    let scored = score_ensemble(engine, source, ensemble, name)?;
    let meta = engine.fetch_metadata(&scored.dataset)?;
    let source_meta = engine.fetch_metadata(source)?;

    let mut columns: Vec<String> = source_meta.fields.iter().map(|f| f.name.clone()).collect();
    for field in scored.probabilities.iter().chain(std::iter::once(&scored.predicted_class)) {
        let meta_field = meta
            .field(&field.id)
            .with_context(|| format!("Scored dataset lost field {}", field.id))?;
        columns.push(meta_field.name.clone());
    }
    write_csv(engine, &scored.dataset, path, Some(&columns))?;
    info!("Scored rows written to {}", path.display());
    Ok(())
}
