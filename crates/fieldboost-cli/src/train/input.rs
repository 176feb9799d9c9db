use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ArgMatches;
use serde::{Deserialize, Serialize};

use fieldboost::io::CsvTableConfig;
use fieldboost::{BoostConfig, TreeParams};

/// Everything `fieldboost train` needs, as read from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// CSV/TSV training table.
    pub data: PathBuf,
    /// Where the JSON run report is written.
    pub output_file: PathBuf,
    /// Optional CSV with class probabilities and the predicted class of
    /// every training row.
    pub scored_file: Option<PathBuf>,
    pub table: CsvTableConfig,
    pub boost: BoostConfig,
    pub tree: TreeParams,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            data: PathBuf::new(),
            output_file: PathBuf::from("fieldboost_report.json"),
            scored_file: None,
            table: CsvTableConfig::default(),
            boost: BoostConfig::default(),
            tree: TreeParams::default(),
        }
    }
}

impl TrainConfig {
    /// Load a configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: TrainConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    /// Load the file and apply command line overrides.
    pub fn from_arguments(config_path: &Path, matches: &ArgMatches) -> Result<Self> {
        let mut config = Self::load(config_path)?;

        if let Some(data) = matches.get_one::<PathBuf>("data") {
            config.data = data.clone();
        }
        if let Some(output) = matches.get_one::<PathBuf>("output_file") {
            config.output_file = output.clone();
        }
        if let Some(scored) = matches.get_one::<PathBuf>("scored_file") {
            config.scored_file = Some(scored.clone());
        }
        if let Some(objective) = matches.get_one::<String>("objective") {
            config.boost.objective_field = Some(objective.clone());
        }
        if let Some(max) = matches.get_one::<usize>("max_iterations") {
            config.boost.max_iterations = Some(*max);
        }
        if let Some(threshold) = matches.get_one::<f64>("threshold") {
            config.boost.stop_threshold_pct = *threshold;
        }

        if config.data.as_os_str().is_empty() {
            anyhow::bail!("No training data given: set `data` in the config or pass --data");
        }
        Ok(config)
    }
}
