//! Sweep over effect sizes and loss thresholds.
//!
//! Simulation and loss estimation run once per effect size; every threshold
//! in the grid is then evaluated against the cached loss table. Cells share
//! no state, so the grid is processed in parallel per effect size.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{PriorConfig, SweepConfig};
use crate::constants::STREAM_EFFECT_SIZE;
use crate::error::{LabError, UnitFailure};
use crate::loss::augment;
use crate::numbers::{ratio, u64_to_f64};
use crate::seed::{derive_stream_seed, resolve_run_seed};
use crate::simulator::simulate;
use crate::stats::{mean, percentile};
use crate::stopping::{GroundTruth, Outcome, Variant, evaluate};

/// Share of simulations that ended on each selection.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectionFrequency {
    pub a: f64,
    pub b: f64,
    /// Exact ties between the two losses.
    pub none: f64,
}

/// Aggregated statistics for one `(effect_size, threshold_used)` cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    pub effect_size: f64,
    pub threshold_used: f64,
    /// Configured simulations; the denominator of every frequency.
    pub simulations: u32,
    pub failed_units: usize,
    pub selection_frequency_by_variant: SelectionFrequency,
    /// Fraction of scored outcomes that picked the better variant. `None`
    /// when no outcome could be scored.
    pub accuracy: Option<f64>,
    /// Requested percentile of total duration, in percent.
    pub percentile_level: f64,
    /// Total duration at `percentile_level`.
    pub duration_percentile: Option<f64>,
    pub median_duration: Option<f64>,
    pub mean_duration: Option<f64>,
    pub forced_stop_rate: f64,
}

impl SweepResult {
    /// Selection frequency for one variant, or for ties when `variant` is `None`.
    #[must_use]
    pub const fn frequency(&self, variant: Option<Variant>) -> f64 {
        match variant {
            Some(Variant::A) => self.selection_frequency_by_variant.a,
            Some(Variant::B) => self.selection_frequency_by_variant.b,
            None => self.selection_frequency_by_variant.none,
        }
    }
}

/// A unit that failed while sweeping one effect size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepFailure {
    pub effect_size: f64,
    /// Set when the unit failed during stopping evaluation.
    pub threshold: Option<f64>,
    pub failure: UnitFailure,
}

/// Every cell of a sweep plus the outcomes they were aggregated from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Run seed; replaying it reproduces the report.
    pub seed: u64,
    pub cells: Vec<SweepResult>,
    pub outcomes: Vec<Outcome>,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    /// Look up the cell for an exact grid point.
    #[must_use]
    pub fn cell(&self, effect_size: f64, threshold: f64) -> Option<&SweepResult> {
        self.cells.iter().find(|cell| {
            cell.effect_size.total_cmp(&effect_size).is_eq()
                && cell.threshold_used.total_cmp(&threshold).is_eq()
        })
    }

    /// Cells for one threshold, in effect-size grid order.
    pub fn cells_for_threshold(&self, threshold: f64) -> impl Iterator<Item = &SweepResult> {
        self.cells
            .iter()
            .filter(move |cell| cell.threshold_used.total_cmp(&threshold).is_eq())
    }

    /// Cells for one effect size, in threshold grid order.
    pub fn cells_for_effect_size(&self, effect_size: f64) -> impl Iterator<Item = &SweepResult> {
        self.cells
            .iter()
            .filter(move |cell| cell.effect_size.total_cmp(&effect_size).is_eq())
    }
}

#[derive(Default)]
struct EffectSweep {
    cells: Vec<SweepResult>,
    outcomes: Vec<Outcome>,
    failures: Vec<SweepFailure>,
}

/// Run the full effect-size by threshold grid.
///
/// Cells are returned effect-size major, in grid order.
///
/// # Errors
///
/// Returns [`LabError::Configuration`] if the sweep configuration is invalid.
/// Failed simulation units are reported in [`SweepReport::failures`] and
/// counted per cell.
pub fn sweep(config: &SweepConfig) -> Result<SweepReport, LabError> {
    config.validate()?;
    let seed = resolve_run_seed(config.seed);
    log::info!(
        "sweeping {} effect sizes x {} thresholds, {} simulations each (seed {seed})",
        config.effect_sizes.len(),
        config.thresholds.len(),
        config.simulations_per_effect_size,
    );

    let per_effect: Vec<Result<EffectSweep, LabError>> = config
        .effect_sizes
        .par_iter()
        .map(|&effect_size| sweep_effect_size(config, effect_size, seed))
        .collect();

    let mut report = SweepReport {
        seed,
        cells: Vec::with_capacity(config.effect_sizes.len() * config.thresholds.len()),
        outcomes: Vec::new(),
        failures: Vec::new(),
    };
    for effect in per_effect {
        let effect = effect?;
        report.cells.extend(effect.cells);
        report.outcomes.extend(effect.outcomes);
        report.failures.extend(effect.failures);
    }
    log::info!(
        "sweep finished: {} cells, {} outcomes, {} failed units",
        report.cells.len(),
        report.outcomes.len(),
        report.failures.len(),
    );
    Ok(report)
}

fn sweep_effect_size(
    config: &SweepConfig,
    effect_size: f64,
    run_seed: u64,
) -> Result<EffectSweep, LabError> {
    let effect_index = effect_size.to_bits();
    let simulation_seed = derive_stream_seed(run_seed, STREAM_EFFECT_SIZE, effect_index);
    let sampling_seed = derive_stream_seed(
        config.prior.sampling_seed.unwrap_or(run_seed),
        STREAM_EFFECT_SIZE,
        effect_index,
    );
    let simulation = config.simulation_config_for(effect_size, simulation_seed);
    let prior = PriorConfig {
        sampling_seed: Some(sampling_seed),
        ..config.prior.clone()
    };
    log::debug!(
        "effect size {effect_size}: rate_b {} (simulation seed {simulation_seed})",
        simulation.rate_b,
    );

    let checkpoints = simulate(&simulation)?;
    let losses = augment(&checkpoints, &prior)?;
    let truth = GroundTruth::new(simulation.rate_a, simulation.rate_b, effect_size);

    let mut effect = EffectSweep {
        failures: losses
            .failures
            .iter()
            .map(|failure| SweepFailure {
                effect_size,
                threshold: None,
                failure: failure.clone(),
            })
            .collect(),
        ..EffectSweep::default()
    };
    for &threshold in &config.thresholds {
        let batch = evaluate(&losses.rows, threshold, &truth)?;
        let cell = summarize(
            effect_size,
            threshold,
            config.simulations_per_effect_size,
            &batch.rows,
            losses.failures.len() + batch.failures.len(),
            config.duration_percentile,
        );
        log::debug!(
            "cell ({effect_size}, {threshold}): accuracy {:?}, p{} duration {:?}",
            cell.accuracy,
            config.duration_percentile,
            cell.duration_percentile,
        );
        effect.cells.push(cell);
        effect.outcomes.extend(batch.rows);
        effect
            .failures
            .extend(batch.failures.into_iter().map(|failure| SweepFailure {
                effect_size,
                threshold: Some(threshold),
                failure,
            }));
    }
    Ok(effect)
}

/// Aggregate the outcomes of one cell.
///
/// Selection frequencies and the forced-stop rate divide by `simulations`;
/// accuracy divides by the outcomes whose correctness is defined.
#[must_use]
pub fn summarize(
    effect_size: f64,
    threshold: f64,
    simulations: u32,
    outcomes: &[Outcome],
    failed_units: usize,
    percentile_level: f64,
) -> SweepResult {
    let denominator = usize::try_from(simulations).unwrap_or(0);
    let selection_frequency_by_variant = SelectionFrequency {
        a: ratio(count(outcomes, |o| o.selected_variant == Some(Variant::A)), denominator),
        b: ratio(count(outcomes, |o| o.selected_variant == Some(Variant::B)), denominator),
        none: ratio(count(outcomes, |o| o.selected_variant.is_none()), denominator),
    };
    let scored = count(outcomes, |o| o.is_correct.is_some());
    let accuracy =
        (scored > 0).then(|| ratio(count(outcomes, |o| o.is_correct == Some(true)), scored));

    let durations: Vec<f64> = outcomes
        .iter()
        .map(|o| u64_to_f64(o.total_duration))
        .collect();

    SweepResult {
        effect_size,
        threshold_used: threshold,
        simulations,
        failed_units,
        selection_frequency_by_variant,
        accuracy,
        percentile_level,
        duration_percentile: percentile(&durations, percentile_level),
        median_duration: percentile(&durations, 50.0),
        mean_duration: mean(&durations),
        forced_stop_rate: ratio(count(outcomes, |o| o.forced_stop), denominator),
    }
}

fn count(outcomes: &[Outcome], pred: impl Fn(&Outcome) -> bool) -> usize {
    outcomes.iter().filter(|&o| pred(o)).count()
}
