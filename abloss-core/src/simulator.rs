//! Bernoulli experiment simulator producing cumulative checkpoint counts.

use std::collections::{HashMap, HashSet};

use rand::distributions::{Bernoulli, Distribution};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::SimulationConfig;
use crate::constants::{STREAM_SIMULATE_A, STREAM_SIMULATE_B};
use crate::error::{ConfigError, InvariantViolation, LabError, UnitFailure};
use crate::seed::{StreamRng, resolve_run_seed, stream_rng};

/// Cumulative conversion counts for both variants at one checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checkpoint {
    /// 1-based simulation index.
    pub simulation_id: u32,
    /// Observations per variant so far.
    pub checkpoint_time: u32,
    pub cumulative_conversions_a: u32,
    pub cumulative_conversions_b: u32,
}

/// Independent outcome streams for the two variants of one simulation.
struct VariantStreams {
    a: StreamRng,
    b: StreamRng,
}

impl VariantStreams {
    fn for_unit(run_seed: u64, simulation_id: u32) -> Self {
        let index = u64::from(simulation_id);
        Self {
            a: stream_rng(run_seed, STREAM_SIMULATE_A, index),
            b: stream_rng(run_seed, STREAM_SIMULATE_B, index),
        }
    }
}

/// Simulate `num_simulations` experiments.
///
/// Output is grouped by `simulation_id`, with checkpoints in increasing time
/// order. Identical seed and configuration reproduce a bit-identical sequence.
///
/// # Errors
///
/// Returns [`LabError::Configuration`] if the configuration is invalid.
pub fn simulate(config: &SimulationConfig) -> Result<Vec<Checkpoint>, LabError> {
    config.validate()?;
    let (bernoulli_a, bernoulli_b) = outcome_distributions(config)?;
    let run_seed = resolve_run_seed(config.seed);
    log::debug!(
        "simulating {} experiments (rate_a {}, rate_b {}, budget {}, increment {}, seed {run_seed})",
        config.num_simulations,
        config.rate_a,
        config.rate_b,
        config.max_observations,
        config.checkpoint_increment,
    );

    let units: Vec<Vec<Checkpoint>> = (1..=config.num_simulations)
        .into_par_iter()
        .map(|simulation_id| {
            let mut streams = VariantStreams::for_unit(run_seed, simulation_id);
            simulate_unit(config, simulation_id, &mut streams, bernoulli_a, bernoulli_b)
        })
        .collect();

    let mut checkpoints = Vec::with_capacity(units.iter().map(Vec::len).sum());
    for unit in units {
        checkpoints.extend(unit);
    }
    Ok(checkpoints)
}

fn outcome_distributions(config: &SimulationConfig) -> Result<(Bernoulli, Bernoulli), ConfigError> {
    let bernoulli = |field: &'static str, p: f64| {
        Bernoulli::new(p).map_err(|_| ConfigError::RangeViolation {
            field,
            min: 0.0,
            max: 1.0,
            value: p,
        })
    };
    Ok((
        bernoulli("rate_a", config.rate_a)?,
        bernoulli("rate_b", config.rate_b)?,
    ))
}

fn simulate_unit(
    config: &SimulationConfig,
    simulation_id: u32,
    streams: &mut VariantStreams,
    bernoulli_a: Bernoulli,
    bernoulli_b: Bernoulli,
) -> Vec<Checkpoint> {
    let buckets = config.checkpoints_per_simulation();
    let mut checkpoints = Vec::with_capacity(usize::try_from(buckets).unwrap_or(0));
    let mut cumulative_a = 0u32;
    let mut cumulative_b = 0u32;

    for bucket in 1..=buckets {
        cumulative_a += count_conversions(&mut streams.a, bernoulli_a, config.checkpoint_increment);
        cumulative_b += count_conversions(&mut streams.b, bernoulli_b, config.checkpoint_increment);
        checkpoints.push(Checkpoint {
            simulation_id,
            checkpoint_time: bucket * config.checkpoint_increment,
            cumulative_conversions_a: cumulative_a,
            cumulative_conversions_b: cumulative_b,
        });
    }
    checkpoints
}

fn count_conversions(rng: &mut StreamRng, outcome: Bernoulli, observations: u32) -> u32 {
    let mut conversions = 0u32;
    for _ in 0..observations {
        conversions += u32::from(outcome.sample(rng));
    }
    conversions
}

/// Split a grouped checkpoint table into per-simulation slices.
pub fn group_by_simulation<T, F>(rows: &[T], simulation_id: F) -> Vec<&[T]>
where
    F: Fn(&T) -> u32,
{
    rows.chunk_by(|left, right| simulation_id(left) == simulation_id(right))
        .collect()
}

/// Group a table into units, failing ids whose rows are not contiguous.
///
/// A scattered id is reported once, in place of its first group; its later
/// groups are dropped.
pub(crate) fn group_units<T, F>(rows: &[T], simulation_id: F) -> Vec<Result<&[T], UnitFailure>>
where
    F: Fn(&T) -> u32,
{
    let groups = group_by_simulation(rows, &simulation_id);
    let mut group_counts: HashMap<u32, usize> = HashMap::new();
    for group in &groups {
        if let Some(first) = group.first() {
            *group_counts.entry(simulation_id(first)).or_default() += 1;
        }
    }
    let mut reported = HashSet::new();
    groups
        .into_iter()
        .filter_map(|group| {
            let id = group.first().map_or(0, &simulation_id);
            let count = group_counts.get(&id).copied().unwrap_or(0);
            if count <= 1 {
                return Some(Ok(group));
            }
            reported.insert(id).then(|| {
                Err(UnitFailure {
                    simulation_id: id,
                    violation: InvariantViolation::NotGrouped { groups: count },
                })
            })
        })
        .collect()
}
