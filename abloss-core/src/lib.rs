//! A/B Loss Lab
//!
//! Simulates two-variant conversion experiments, estimates Bayesian expected
//! loss from Beta posteriors at each checkpoint, and measures how an
//! expected-loss stopping rule trades decision accuracy against experiment
//! duration. The crate produces tables only; rendering and persistence are
//! left to callers.

pub mod config;
pub mod constants;
pub mod error;
pub mod experiment;
pub mod loss;
pub mod numbers;
pub mod seed;
pub mod simulator;
pub mod stats;
pub mod stopping;
pub mod sweep;

// Re-export commonly used types
pub use config::{PriorConfig, SimulationConfig, SweepConfig, validate_threshold};
pub use error::{ConfigError, InvariantViolation, LabError, UnitBatch, UnitFailure};
pub use experiment::{ExperimentRun, run_experiment, run_experiment_at_effect};
pub use loss::{LossRecord, Posterior, augment, estimate_loss, mean_loss_by_time};
pub use seed::{derive_stream_seed, resolve_run_seed};
pub use simulator::{Checkpoint, group_by_simulation, simulate};
pub use stats::{EcdfPoint, ecdf, mean, percentile};
pub use stopping::{GroundTruth, Outcome, Variant, evaluate, select_variant};
pub use sweep::{SelectionFrequency, SweepFailure, SweepReport, SweepResult, summarize, sweep};
