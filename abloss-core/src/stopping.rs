//! Expected-loss stopping rule.
//!
//! An experiment stops at the first checkpoint where either variant's
//! expected loss falls below the threshold, and ships the variant with the
//! smaller loss. Experiments that never cross the threshold are force-stopped
//! at the observation budget.

use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{SimulationConfig, validate_threshold};
use crate::constants::VARIANTS_PER_EXPERIMENT;
use crate::error::{InvariantViolation, LabError, UnitBatch, UnitFailure};
use crate::loss::LossRecord;
use crate::simulator::group_units;

/// One arm of an A/B experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Variant {
    A,
    B,
}

impl Variant {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// True configured rates, used to score selections.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroundTruth {
    pub rate_a: f64,
    pub rate_b: f64,
    /// Relative lift of B over A.
    pub effect_size: f64,
}

impl GroundTruth {
    #[must_use]
    pub const fn new(rate_a: f64, rate_b: f64, effect_size: f64) -> Self {
        Self {
            rate_a,
            rate_b,
            effect_size,
        }
    }

    /// Ground truth of a simulation configuration, deriving the effect size.
    #[must_use]
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(
            config.rate_a,
            config.rate_b,
            config.rate_b / config.rate_a - 1.0,
        )
    }

    /// The variant with the higher configured rate; `None` when they are equal.
    #[must_use]
    pub fn better(&self) -> Option<Variant> {
        if self.rate_b > self.rate_a {
            Some(Variant::B)
        } else if self.rate_a > self.rate_b {
            Some(Variant::A)
        } else {
            None
        }
    }

    /// Score a selection. Not applicable (`None`) when the rates are equal
    /// or nothing was selected.
    #[must_use]
    pub fn score(&self, selected: Option<Variant>) -> Option<bool> {
        let selected = selected?;
        self.better().map(|better| selected == better)
    }
}

/// Stopping decision for one simulated experiment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub simulation_id: u32,
    pub effect_size: f64,
    pub threshold_used: f64,
    /// Per-variant observations at the stopping record.
    pub stopping_checkpoint: u32,
    /// Observations across both variants.
    pub total_duration: u64,
    /// `None` when the losses tie exactly.
    pub selected_variant: Option<Variant>,
    pub is_correct: Option<bool>,
    /// No checkpoint crossed the threshold before the budget ran out.
    pub forced_stop: bool,
    pub loss_a: f64,
    pub loss_b: f64,
}

/// Pick the variant with the smaller expected loss.
#[must_use]
pub fn select_variant(record: &LossRecord) -> Option<Variant> {
    if record.loss_a < record.loss_b {
        Some(Variant::A)
    } else if record.loss_b < record.loss_a {
        Some(Variant::B)
    } else {
        None
    }
}

/// Whether a record satisfies the stopping condition.
#[must_use]
pub fn crosses_threshold(record: &LossRecord, threshold: f64) -> bool {
    record.loss_a < threshold || record.loss_b < threshold
}

/// Apply the stopping rule to every simulation in a grouped loss table.
///
/// # Errors
///
/// Returns [`LabError::Configuration`] if `threshold` is not a positive
/// finite number. Malformed simulation units are reported in
/// [`UnitBatch::failures`].
pub fn evaluate(
    records: &[LossRecord],
    threshold: f64,
    truth: &GroundTruth,
) -> Result<UnitBatch<Outcome>, LabError> {
    validate_threshold(threshold)?;
    let units = group_units(records, LossRecord::simulation_id);
    let results: Vec<Result<Vec<Outcome>, UnitFailure>> = units
        .into_par_iter()
        .map(|unit| {
            let unit = unit?;
            evaluate_unit(unit, threshold, truth)
                .map(|outcome| vec![outcome])
                .map_err(|violation| UnitFailure {
                    simulation_id: unit.first().map_or(0, LossRecord::simulation_id),
                    violation,
                })
        })
        .collect();
    Ok(UnitBatch::from_units(results))
}

fn evaluate_unit(
    unit: &[LossRecord],
    threshold: f64,
    truth: &GroundTruth,
) -> Result<Outcome, InvariantViolation> {
    check_unit_order(unit)?;
    let (record, forced_stop) = match unit.iter().find(|r| crosses_threshold(r, threshold)) {
        Some(record) => (record, false),
        None => (unit.last().ok_or(InvariantViolation::EmptyUnit)?, true),
    };
    let selected_variant = select_variant(record);
    let stopping_checkpoint = record.checkpoint_time();
    Ok(Outcome {
        simulation_id: record.simulation_id(),
        effect_size: truth.effect_size,
        threshold_used: threshold,
        stopping_checkpoint,
        total_duration: u64::from(stopping_checkpoint) * VARIANTS_PER_EXPERIMENT,
        selected_variant,
        is_correct: truth.score(selected_variant),
        forced_stop,
        loss_a: record.loss_a,
        loss_b: record.loss_b,
    })
}

fn check_unit_order(unit: &[LossRecord]) -> Result<(), InvariantViolation> {
    for pair in unit.windows(2) {
        let (previous, current) = (&pair[0].checkpoint, &pair[1].checkpoint);
        if current.checkpoint_time <= previous.checkpoint_time {
            return Err(InvariantViolation::UnorderedCheckpoints {
                previous: previous.checkpoint_time,
                current: current.checkpoint_time,
            });
        }
        let decreasing = [
            (
                Variant::A,
                previous.cumulative_conversions_a,
                current.cumulative_conversions_a,
            ),
            (
                Variant::B,
                previous.cumulative_conversions_b,
                current.cumulative_conversions_b,
            ),
        ]
        .into_iter()
        .find(|(_, before, after)| after < before);
        if let Some((variant, previous, current)) = decreasing {
            return Err(InvariantViolation::DecreasingConversions {
                variant,
                previous,
                current,
            });
        }
    }
    Ok(())
}
