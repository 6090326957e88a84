//! Centralized defaults for the simulation pipeline.
//!
//! The reference experiment compares a 0.20% baseline conversion rate against
//! a 25% relative lift, observed in 2,000-visitor increments up to a budget of
//! 100,000 visitors per variant.

// Simulation defaults ------------------------------------------------------
pub const DEFAULT_BASE_RATE: f64 = 0.002;
pub const DEFAULT_EFFECT_SIZE: f64 = 0.25;
pub const DEFAULT_MAX_OBSERVATIONS: u32 = 100_000;
pub const DEFAULT_CHECKPOINT_INCREMENT: u32 = 2_000;
pub const DEFAULT_NUM_SIMULATIONS: u32 = 500;

// Prior defaults -----------------------------------------------------------
/// Uniform Beta(1, 1) prior.
pub const DEFAULT_PRIOR_ALPHA: f64 = 1.0;
pub const DEFAULT_PRIOR_BETA: f64 = 1.0;
pub const DEFAULT_POSTERIOR_SAMPLES: u32 = 1_000;

// Stopping rule defaults ---------------------------------------------------
pub const DEFAULT_THRESHOLD_GRID: [f64; 5] = [0.000_01, 0.000_02, 0.000_04, 0.000_08, 0.000_16];
pub const DEFAULT_EFFECT_SIZE_GRID: [f64; 4] = [0.1, 0.25, 0.5, 1.0];
pub const DEFAULT_DURATION_PERCENTILE: f64 = 75.0;

// Seed stream domains ------------------------------------------------------
pub(crate) const STREAM_SIMULATE_A: &[u8] = b"simulate/a";
pub(crate) const STREAM_SIMULATE_B: &[u8] = b"simulate/b";
pub(crate) const STREAM_POSTERIOR: &[u8] = b"posterior";
pub(crate) const STREAM_EFFECT_SIZE: &[u8] = b"sweep/effect";

/// Both variants accrue observations in lockstep.
pub const VARIANTS_PER_EXPERIMENT: u64 = 2;
