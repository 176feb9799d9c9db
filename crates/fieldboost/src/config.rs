use serde::{Deserialize, Serialize};

/// Parameters of a boosting run.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct BoostConfig {
    /// Name of the categorical objective field. Defaults to the last field.
    pub objective_field: Option<String>,

    /// Prefix used when naming datasets and models created by the run.
    pub name: String,

    /// The run stops once the smoothed improvement drops to this percentage.
    pub stop_threshold_pct: f64,

    /// Upper bound on accepted iterations. `None` runs until convergence.
    pub max_iterations: Option<usize>,

    /// Bootstrap sampling rate.
    pub sample_rate: f64,

    /// Seed prefix; iteration `i` samples with seed `"{seed}-{i}"`.
    pub seed: String,
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            objective_field: None,
            name: "fieldboost".to_string(),
            stop_threshold_pct: 1.0,
            max_iterations: None,
            sample_rate: 1.0,
            seed: "fieldboost".to_string(),
        }
    }
}

impl BoostConfig {
    pub fn with_objective(mut self, field: impl Into<String>) -> Self {
        self.objective_field = Some(field.into());
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn sample_seed(&self, iteration: usize) -> String {
        format!("{}-{}", self.seed, iteration)
    }
}

/// Hyper-parameters of the regression trees fit by the in-memory engine.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TreeParams {
    pub max_depth: u32,
    pub training_optimization_level: u8,
    pub debug: bool,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 4,
            training_optimization_level: 2,
            debug: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_run_until_convergence() {
        let cfg = BoostConfig::default();
        assert!(cfg.max_iterations.is_none());
        assert_eq!(cfg.stop_threshold_pct, 1.0);
        assert_eq!(cfg.sample_rate, 1.0);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg: BoostConfig = serde_json::from_str(r#"{"objective_field": "species"}"#).unwrap();
        assert_eq!(cfg.objective_field.as_deref(), Some("species"));
        assert_eq!(cfg.name, "fieldboost");
    }

    #[test]
    fn seed_depends_only_on_iteration() {
        let cfg = BoostConfig::default();
        assert_eq!(cfg.sample_seed(3), cfg.sample_seed(3));
        assert_ne!(cfg.sample_seed(3), cfg.sample_seed(4));
    }
}
