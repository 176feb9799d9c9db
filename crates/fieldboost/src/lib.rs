//! fieldboost: multiclass gradient tree boosting over engine-managed datasets.
//!
//! Data never enters the process as arrays. Every step of the algorithm is
//! a request to a [`engine::DataEngine`]: derive new fields from
//! expressions, draw bootstrap samples, fit regression trees, batch-score.
//! The crate owns the bookkeeping on top of that: deterministic field
//! names, the per-class gradient/sum/softmax lineage across iterations and a
//! smoothed stopping rule.
//!
//! [`engine::memory::InMemoryEngine`] runs everything locally, fitting trees
//! with `gbdt`.
pub mod booster;
pub mod config;
pub mod convergence;
pub mod engine;
pub mod ensemble;
pub mod error;
pub mod expr;
pub mod io;
pub mod lineage;
pub mod naming;
pub mod pipeline;
pub mod sampler;
pub mod trainer;

pub use booster::{BoostOutcome, Booster, IterationReport, Termination};
pub use config::{BoostConfig, TreeParams};
pub use ensemble::Ensemble;
pub use error::BoostError;
