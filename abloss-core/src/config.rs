//! Run configuration for the simulator, the loss estimator and the sweep.
//!
//! Every field has a serde default so partial JSON documents load, and every
//! config exposes `validate()` so invalid parameters are rejected before any
//! simulation work starts.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BASE_RATE, DEFAULT_CHECKPOINT_INCREMENT, DEFAULT_DURATION_PERCENTILE,
    DEFAULT_EFFECT_SIZE, DEFAULT_EFFECT_SIZE_GRID, DEFAULT_MAX_OBSERVATIONS,
    DEFAULT_NUM_SIMULATIONS, DEFAULT_POSTERIOR_SAMPLES, DEFAULT_PRIOR_ALPHA, DEFAULT_PRIOR_BETA,
    DEFAULT_THRESHOLD_GRID,
};
use crate::error::{
    ConfigError, ensure_count, ensure_finite, ensure_positive, ensure_probability,
};

/// Parameters of one batch of simulated experiments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "SimulationConfig::default_rate_a")]
    pub rate_a: f64,
    #[serde(default = "SimulationConfig::default_rate_b")]
    pub rate_b: f64,
    /// Per-variant observation budget.
    #[serde(default = "SimulationConfig::default_max_observations")]
    pub max_observations: u32,
    #[serde(default = "SimulationConfig::default_checkpoint_increment")]
    pub checkpoint_increment: u32,
    #[serde(default = "SimulationConfig::default_num_simulations")]
    pub num_simulations: u32,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SimulationConfig {
    const fn default_rate_a() -> f64 {
        DEFAULT_BASE_RATE
    }

    fn default_rate_b() -> f64 {
        DEFAULT_BASE_RATE * (1.0 + DEFAULT_EFFECT_SIZE)
    }

    const fn default_max_observations() -> u32 {
        DEFAULT_MAX_OBSERVATIONS
    }

    const fn default_checkpoint_increment() -> u32 {
        DEFAULT_CHECKPOINT_INCREMENT
    }

    const fn default_num_simulations() -> u32 {
        DEFAULT_NUM_SIMULATIONS
    }

    /// Configuration comparing `rate_a` against `rate_b` with default budgets.
    #[must_use]
    pub fn new(rate_a: f64, rate_b: f64) -> Self {
        Self {
            rate_a,
            rate_b,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_budget(mut self, max_observations: u32, checkpoint_increment: u32) -> Self {
        self.max_observations = max_observations;
        self.checkpoint_increment = checkpoint_increment;
        self
    }

    #[must_use]
    pub const fn with_simulations(mut self, num_simulations: u32) -> Self {
        self.num_simulations = num_simulations;
        self
    }

    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Number of checkpoints each simulation produces.
    #[must_use]
    pub const fn checkpoints_per_simulation(&self) -> u32 {
        if self.checkpoint_increment == 0 {
            return 0;
        }
        self.max_observations / self.checkpoint_increment
    }

    /// Validate rates, counts and the checkpoint grid.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] describing the first invalid parameter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_probability("rate_a", self.rate_a)?;
        ensure_probability("rate_b", self.rate_b)?;
        ensure_count("max_observations", self.max_observations)?;
        ensure_count("checkpoint_increment", self.checkpoint_increment)?;
        ensure_count("num_simulations", self.num_simulations)?;
        validate_checkpoint_grid(self.max_observations, self.checkpoint_increment)
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            rate_a: Self::default_rate_a(),
            rate_b: Self::default_rate_b(),
            max_observations: Self::default_max_observations(),
            checkpoint_increment: Self::default_checkpoint_increment(),
            num_simulations: Self::default_num_simulations(),
            seed: None,
        }
    }
}

fn validate_checkpoint_grid(max_observations: u32, increment: u32) -> Result<(), ConfigError> {
    if increment > max_observations || max_observations % increment != 0 {
        return Err(ConfigError::IncrementDoesNotDivide {
            increment,
            max_observations,
        });
    }
    Ok(())
}

/// Beta prior and Monte Carlo settings for the loss estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorConfig {
    #[serde(default = "PriorConfig::default_alpha")]
    pub alpha: f64,
    #[serde(default = "PriorConfig::default_beta")]
    pub beta: f64,
    /// Paired posterior draws per checkpoint.
    #[serde(default = "PriorConfig::default_posterior_samples")]
    pub posterior_samples: u32,
    /// Seed for posterior sampling; the simulation seed is used when absent.
    #[serde(default)]
    pub sampling_seed: Option<u64>,
}

impl PriorConfig {
    const fn default_alpha() -> f64 {
        DEFAULT_PRIOR_ALPHA
    }

    const fn default_beta() -> f64 {
        DEFAULT_PRIOR_BETA
    }

    const fn default_posterior_samples() -> u32 {
        DEFAULT_POSTERIOR_SAMPLES
    }

    #[must_use]
    pub const fn with_posterior_samples(mut self, posterior_samples: u32) -> Self {
        self.posterior_samples = posterior_samples;
        self
    }

    #[must_use]
    pub const fn with_sampling_seed(mut self, seed: u64) -> Self {
        self.sampling_seed = Some(seed);
        self
    }

    /// # Errors
    ///
    /// Returns a [`ConfigError`] when a hyperparameter is not positive or no
    /// posterior samples are requested.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_positive("prior_alpha", self.alpha)?;
        ensure_positive("prior_beta", self.beta)?;
        ensure_count("posterior_samples", self.posterior_samples)
    }
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            alpha: Self::default_alpha(),
            beta: Self::default_beta(),
            posterior_samples: Self::default_posterior_samples(),
            sampling_seed: None,
        }
    }
}

/// Grid of effect sizes and loss thresholds evaluated against one baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "SweepConfig::default_base_rate")]
    pub base_rate: f64,
    /// Relative lifts; variant B converts at `base_rate * (1 + effect_size)`.
    #[serde(default = "SweepConfig::default_effect_sizes")]
    pub effect_sizes: Vec<f64>,
    #[serde(default = "SweepConfig::default_thresholds")]
    pub thresholds: Vec<f64>,
    #[serde(default = "SweepConfig::default_simulations")]
    pub simulations_per_effect_size: u32,
    #[serde(default = "SweepConfig::default_max_observations")]
    pub max_observations: u32,
    #[serde(default = "SweepConfig::default_checkpoint_increment")]
    pub checkpoint_increment: u32,
    #[serde(default)]
    pub prior: PriorConfig,
    /// Percentile (0-100] of total duration reported per cell.
    #[serde(default = "SweepConfig::default_duration_percentile")]
    pub duration_percentile: f64,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SweepConfig {
    const fn default_base_rate() -> f64 {
        DEFAULT_BASE_RATE
    }

    fn default_effect_sizes() -> Vec<f64> {
        DEFAULT_EFFECT_SIZE_GRID.to_vec()
    }

    fn default_thresholds() -> Vec<f64> {
        DEFAULT_THRESHOLD_GRID.to_vec()
    }

    const fn default_simulations() -> u32 {
        DEFAULT_NUM_SIMULATIONS
    }

    const fn default_max_observations() -> u32 {
        DEFAULT_MAX_OBSERVATIONS
    }

    const fn default_checkpoint_increment() -> u32 {
        DEFAULT_CHECKPOINT_INCREMENT
    }

    const fn default_duration_percentile() -> f64 {
        DEFAULT_DURATION_PERCENTILE
    }

    /// Load a sweep configuration from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the document is malformed and any
    /// validation error for parameters it contains.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every parameter, including each grid entry.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] describing the first invalid parameter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_probability("base_rate", self.base_rate)?;
        if self.effect_sizes.is_empty() {
            return Err(ConfigError::EmptyGrid {
                field: "effect_sizes",
            });
        }
        for &effect_size in &self.effect_sizes {
            ensure_finite("effect_size", effect_size)?;
            let rate_b = self.rate_b_for(effect_size);
            if !(rate_b > 0.0 && rate_b < 1.0) {
                return Err(ConfigError::EffectOutOfRange {
                    effect_size,
                    rate_b,
                });
            }
        }
        validate_thresholds(&self.thresholds)?;
        ensure_count(
            "simulations_per_effect_size",
            self.simulations_per_effect_size,
        )?;
        ensure_count("max_observations", self.max_observations)?;
        ensure_count("checkpoint_increment", self.checkpoint_increment)?;
        validate_checkpoint_grid(self.max_observations, self.checkpoint_increment)?;
        validate_percentile(self.duration_percentile)?;
        self.prior.validate()
    }

    /// Conversion rate of variant B for `effect_size`.
    #[must_use]
    pub fn rate_b_for(&self, effect_size: f64) -> f64 {
        self.base_rate * (1.0 + effect_size)
    }

    /// Simulation parameters for one effect size, seeded with `seed`.
    #[must_use]
    pub fn simulation_config_for(&self, effect_size: f64, seed: u64) -> SimulationConfig {
        SimulationConfig {
            rate_a: self.base_rate,
            rate_b: self.rate_b_for(effect_size),
            max_observations: self.max_observations,
            checkpoint_increment: self.checkpoint_increment,
            num_simulations: self.simulations_per_effect_size,
            seed: Some(seed),
        }
    }

    #[must_use]
    pub fn with_grid(mut self, effect_sizes: Vec<f64>, thresholds: Vec<f64>) -> Self {
        self.effect_sizes = effect_sizes;
        self.thresholds = thresholds;
        self
    }

    #[must_use]
    pub fn with_simulations(mut self, simulations: u32) -> Self {
        self.simulations_per_effect_size = simulations;
        self
    }

    #[must_use]
    pub fn with_budget(mut self, max_observations: u32, checkpoint_increment: u32) -> Self {
        self.max_observations = max_observations;
        self.checkpoint_increment = checkpoint_increment;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            base_rate: Self::default_base_rate(),
            effect_sizes: Self::default_effect_sizes(),
            thresholds: Self::default_thresholds(),
            simulations_per_effect_size: Self::default_simulations(),
            max_observations: Self::default_max_observations(),
            checkpoint_increment: Self::default_checkpoint_increment(),
            prior: PriorConfig::default(),
            duration_percentile: Self::default_duration_percentile(),
            seed: None,
        }
    }
}

/// A loss threshold must be a positive finite number.
///
/// # Errors
///
/// Returns a [`ConfigError`] for zero, negative or non-finite thresholds.
pub fn validate_threshold(threshold: f64) -> Result<(), ConfigError> {
    ensure_positive("threshold", threshold)
}

fn validate_thresholds(thresholds: &[f64]) -> Result<(), ConfigError> {
    if thresholds.is_empty() {
        return Err(ConfigError::EmptyGrid {
            field: "thresholds",
        });
    }
    thresholds.iter().copied().try_for_each(validate_threshold)
}

fn validate_percentile(percentile: f64) -> Result<(), ConfigError> {
    ensure_finite("duration_percentile", percentile)?;
    if percentile > 0.0 && percentile <= 100.0 {
        Ok(())
    } else {
        Err(ConfigError::RangeViolation {
            field: "duration_percentile",
            min: 0.0,
            max: 100.0,
            value: percentile,
        })
    }
}
