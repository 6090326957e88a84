//! Error kinds raised by the pipeline.
//!
//! Configuration errors abort a run before any work starts. Invariant
//! violations are programming-logic faults scoped to a single simulation
//! unit; they are collected as [`UnitFailure`]s so sibling units still
//! aggregate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stopping::Variant;

/// Invalid or inconsistent user-supplied parameters.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be strictly between {min} and {max} (got {value})")]
    RangeViolation {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },
    #[error("{field} must be positive (got {value})")]
    NotPositive { field: &'static str, value: f64 },
    #[error("{field} must be a finite number (got {value})")]
    NotFinite { field: &'static str, value: f64 },
    #[error(
        "checkpoint increment {increment} does not evenly divide max observations {max_observations}"
    )]
    IncrementDoesNotDivide {
        increment: u32,
        max_observations: u32,
    },
    #[error("{field} grid must not be empty")]
    EmptyGrid { field: &'static str },
    #[error("effect size {effect_size} pushes rate_b to {rate_b}, outside (0, 1)")]
    EffectOutOfRange { effect_size: f64, rate_b: f64 },
    #[error("invalid configuration document: {0}")]
    Parse(String),
}

/// Internal consistency failure detected while processing one simulation unit.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum InvariantViolation {
    #[error("{conversions} conversions exceed {time} observations for variant {variant}")]
    ConversionsExceedObservations {
        variant: Variant,
        time: u32,
        conversions: u32,
    },
    #[error("posterior shape for variant {variant} is not positive (alpha {alpha}, beta {beta})")]
    InvalidPosterior {
        variant: Variant,
        alpha: f64,
        beta: f64,
    },
    #[error("checkpoint times are not strictly increasing ({previous} then {current})")]
    UnorderedCheckpoints { previous: u32, current: u32 },
    #[error("cumulative conversions for variant {variant} decreased ({previous} then {current})")]
    DecreasingConversions {
        variant: Variant,
        previous: u32,
        current: u32,
    },
    #[error("simulation unit has no records")]
    EmptyUnit,
    #[error("records are split across {groups} non-contiguous groups")]
    NotGrouped { groups: usize },
}

/// A failed simulation unit, identified by its `simulation_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("simulation {simulation_id}: {violation}")]
pub struct UnitFailure {
    pub simulation_id: u32,
    pub violation: InvariantViolation,
}

/// Top-level error for pipeline entry points.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LabError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("invariant violation: {0}")]
    Invariant(#[from] UnitFailure),
}

/// Rows produced by independent simulation units plus the units that failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitBatch<T> {
    pub rows: Vec<T>,
    pub failures: Vec<UnitFailure>,
}

impl<T> UnitBatch<T> {
    /// Merge per-unit results, preserving unit order.
    #[must_use]
    pub fn from_units(units: Vec<Result<Vec<T>, UnitFailure>>) -> Self {
        let capacity = units
            .iter()
            .map(|unit| unit.as_ref().map_or(0, Vec::len))
            .sum();
        let mut rows = Vec::with_capacity(capacity);
        let mut failures = Vec::new();
        for unit in units {
            match unit {
                Ok(unit_rows) => rows.extend(unit_rows),
                Err(failure) => {
                    log::warn!("{failure}");
                    failures.push(failure);
                }
            }
        }
        Self { rows, failures }
    }

    /// Whether every unit completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Convert to the rows, failing on the first unit failure.
    ///
    /// # Errors
    ///
    /// Returns the first recorded [`UnitFailure`] if any unit failed.
    pub fn into_complete(self) -> Result<Vec<T>, LabError> {
        match self.failures.into_iter().next() {
            Some(failure) => Err(failure.into()),
            None => Ok(self.rows),
        }
    }
}

/// Rejects NaN and infinities.
pub(crate) fn ensure_finite(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotFinite { field, value })
    }
}

pub(crate) fn ensure_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    ensure_finite(field, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

pub(crate) fn ensure_probability(field: &'static str, value: f64) -> Result<(), ConfigError> {
    ensure_finite(field, value)?;
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(ConfigError::RangeViolation {
            field,
            min: 0.0,
            max: 1.0,
            value,
        })
    }
}

pub(crate) fn ensure_count(field: &'static str, value: u32) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::NotPositive {
            field,
            value: f64::from(value),
        })
    } else {
        Ok(())
    }
}
