//! Monte Carlo estimation of Bayesian expected loss under a Beta-Bernoulli model.
//!
//! Each checkpoint is mapped independently: posterior samples for both
//! variants are drawn from a stream seeded by `(simulation_id, checkpoint_time)`,
//! so a record's estimate does not depend on its neighbours, on thread
//! scheduling, or on how the table was partitioned.

use std::collections::BTreeMap;

use rand_distr::{Beta, Distribution};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::PriorConfig;
use crate::constants::STREAM_POSTERIOR;
use crate::error::{InvariantViolation, LabError, UnitBatch, UnitFailure};
use crate::numbers::{u64_to_f64, usize_to_f64};
use crate::seed::{StreamRng, resolve_run_seed, stream_rng};
use crate::simulator::{Checkpoint, group_units};
use crate::stopping::Variant;

/// A checkpoint augmented with expected-loss estimates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossRecord {
    #[serde(flatten)]
    pub checkpoint: Checkpoint,
    /// Expected loss of shipping A: `E[max(0, rate_b - rate_a)]`.
    pub loss_a: f64,
    /// Expected loss of shipping B: `E[max(0, rate_a - rate_b)]`.
    pub loss_b: f64,
    /// Fraction of paired draws where B's sampled rate exceeded A's.
    pub prob_b_beats_a: f64,
}

impl LossRecord {
    #[must_use]
    pub const fn simulation_id(&self) -> u32 {
        self.checkpoint.simulation_id
    }

    #[must_use]
    pub const fn checkpoint_time(&self) -> u32 {
        self.checkpoint.checkpoint_time
    }
}

/// Posterior distribution for one variant at one checkpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Posterior {
    pub alpha: f64,
    pub beta: f64,
}

impl Posterior {
    /// Conjugate update of `prior` with `conversions` out of `observations`.
    ///
    /// # Errors
    ///
    /// Returns an [`InvariantViolation`] when conversions exceed observations
    /// or the resulting shape parameters are not strictly positive.
    pub fn update(
        prior: &PriorConfig,
        variant: Variant,
        observations: u32,
        conversions: u32,
    ) -> Result<Self, InvariantViolation> {
        let failures = observations.checked_sub(conversions).ok_or(
            InvariantViolation::ConversionsExceedObservations {
                variant,
                time: observations,
                conversions,
            },
        )?;
        let posterior = Self {
            alpha: prior.alpha + f64::from(conversions),
            beta: prior.beta + f64::from(failures),
        };
        let valid = |shape: f64| shape.is_finite() && shape > 0.0;
        if valid(posterior.alpha) && valid(posterior.beta) {
            Ok(posterior)
        } else {
            Err(InvariantViolation::InvalidPosterior {
                variant,
                alpha: posterior.alpha,
                beta: posterior.beta,
            })
        }
    }

    /// Posterior mean conversion rate.
    #[must_use]
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    fn distribution(&self, variant: Variant) -> Result<Beta<f64>, InvariantViolation> {
        Beta::new(self.alpha, self.beta).map_err(|_| InvariantViolation::InvalidPosterior {
            variant,
            alpha: self.alpha,
            beta: self.beta,
        })
    }
}

/// Augment every checkpoint with Monte Carlo loss estimates.
///
/// Units whose checkpoints are malformed are reported in
/// [`UnitBatch::failures`]; the remaining units are returned in input order.
///
/// # Errors
///
/// Returns [`LabError::Configuration`] if the prior is invalid.
pub fn augment(
    checkpoints: &[Checkpoint],
    prior: &PriorConfig,
) -> Result<UnitBatch<LossRecord>, LabError> {
    prior.validate()?;
    let sampling_seed = resolve_run_seed(prior.sampling_seed);
    let units = group_units(checkpoints, |c| c.simulation_id);
    log::debug!(
        "estimating losses for {} checkpoints across {} simulations ({} posterior samples)",
        checkpoints.len(),
        units.len(),
        prior.posterior_samples,
    );

    let results: Vec<Result<Vec<LossRecord>, UnitFailure>> = units
        .into_par_iter()
        .map(|unit| augment_unit(unit?, prior, sampling_seed))
        .collect();
    Ok(UnitBatch::from_units(results))
}

fn augment_unit(
    unit: &[Checkpoint],
    prior: &PriorConfig,
    sampling_seed: u64,
) -> Result<Vec<LossRecord>, UnitFailure> {
    unit.iter()
        .map(|checkpoint| {
            let mut rng = checkpoint_rng(sampling_seed, checkpoint);
            estimate_loss(checkpoint, prior, &mut rng).map_err(|violation| UnitFailure {
                simulation_id: checkpoint.simulation_id,
                violation,
            })
        })
        .collect()
}

fn checkpoint_rng(sampling_seed: u64, checkpoint: &Checkpoint) -> StreamRng {
    let index = (u64::from(checkpoint.simulation_id) << 32) | u64::from(checkpoint.checkpoint_time);
    stream_rng(sampling_seed, STREAM_POSTERIOR, index)
}

/// Estimate the expected loss of each variant at a single checkpoint.
///
/// # Errors
///
/// Returns an [`InvariantViolation`] if the checkpoint cannot define valid
/// Beta posteriors.
pub fn estimate_loss<R: rand::Rng + ?Sized>(
    checkpoint: &Checkpoint,
    prior: &PriorConfig,
    rng: &mut R,
) -> Result<LossRecord, InvariantViolation> {
    let time = checkpoint.checkpoint_time;
    let posterior_a =
        Posterior::update(prior, Variant::A, time, checkpoint.cumulative_conversions_a)?;
    let posterior_b =
        Posterior::update(prior, Variant::B, time, checkpoint.cumulative_conversions_b)?;
    let dist_a = posterior_a.distribution(Variant::A)?;
    let dist_b = posterior_b.distribution(Variant::B)?;

    let mut regret_a = 0.0;
    let mut regret_b = 0.0;
    let mut b_wins = 0u64;
    for _ in 0..prior.posterior_samples {
        let a = dist_a.sample(rng);
        let b = dist_b.sample(rng);
        let diff = b - a;
        if diff > 0.0 {
            regret_a += diff;
            b_wins += 1;
        } else {
            regret_b -= diff;
        }
    }

    let samples = f64::from(prior.posterior_samples);
    Ok(LossRecord {
        checkpoint: *checkpoint,
        loss_a: regret_a / samples,
        loss_b: regret_b / samples,
        prob_b_beats_a: u64_to_f64(b_wins) / samples,
    })
}

/// Mean `(checkpoint_time, loss_a, loss_b)` across simulations, in time order.
#[must_use]
pub fn mean_loss_by_time(records: &[LossRecord]) -> Vec<(u32, f64, f64)> {
    let mut by_time: BTreeMap<u32, (f64, f64, usize)> = BTreeMap::new();
    for record in records {
        let entry = by_time.entry(record.checkpoint_time()).or_insert((0.0, 0.0, 0));
        entry.0 += record.loss_a;
        entry.1 += record.loss_b;
        entry.2 += 1;
    }
    by_time
        .into_iter()
        .map(|(time, (loss_a, loss_b, count))| {
            let count = usize_to_f64(count);
            (time, loss_a / count, loss_b / count)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn checkpoint(simulation_id: u32, time: u32, conv_a: u32, conv_b: u32) -> Checkpoint {
        Checkpoint {
            simulation_id,
            checkpoint_time: time,
            cumulative_conversions_a: conv_a,
            cumulative_conversions_b: conv_b,
        }
    }

    fn prior(samples: u32) -> PriorConfig {
        PriorConfig::default()
            .with_posterior_samples(samples)
            .with_sampling_seed(1234)
    }

    #[test]
    fn posterior_update_is_conjugate() {
        let posterior = Posterior::update(&PriorConfig::default(), Variant::A, 100, 20).unwrap();
        assert!((posterior.alpha - 21.0).abs() < f64::EPSILON);
        assert!((posterior.beta - 81.0).abs() < f64::EPSILON);
        assert!((posterior.mean() - 21.0 / 102.0).abs() < 1e-12);
    }

    #[test]
    fn malformed_checkpoint_is_an_invariant_violation() {
        let bad = checkpoint(1, 10, 11, 0);
        let mut rng = StreamRng::seed_from_u64(1);
        assert_eq!(
            estimate_loss(&bad, &prior(10), &mut rng),
            Err(InvariantViolation::ConversionsExceedObservations {
                variant: Variant::A,
                time: 10,
                conversions: 11,
            })
        );
    }

    #[test]
    fn losses_are_non_negative_and_favour_the_leader() {
        let mut rng = StreamRng::seed_from_u64(9);
        let record = estimate_loss(&checkpoint(1, 1_000, 50, 120), &prior(2_000), &mut rng).unwrap();
        assert!(record.loss_a >= 0.0 && record.loss_b >= 0.0);
        assert!(record.loss_b < record.loss_a);
        assert!(record.prob_b_beats_a > 0.99);
        // Expected loss of the laggard approaches the gap in posterior means.
        assert!((record.loss_a - 0.07).abs() < 0.01, "loss_a {}", record.loss_a);
    }

    #[test]
    fn symmetric_evidence_gives_similar_losses() {
        let mut rng = StreamRng::seed_from_u64(5);
        let record = estimate_loss(&checkpoint(1, 500, 40, 40), &prior(20_000), &mut rng).unwrap();
        // Monte Carlo noise: both estimates target the same value.
        let relative = (record.loss_a - record.loss_b).abs() / record.loss_a.max(record.loss_b);
        assert!(relative < 0.1, "relative gap {relative}");
        assert!((record.prob_b_beats_a - 0.5).abs() < 0.02);
    }

    #[test]
    fn augment_is_deterministic_with_fixed_sampling_seed() {
        let table = vec![
            checkpoint(1, 100, 5, 9),
            checkpoint(1, 200, 11, 20),
            checkpoint(2, 100, 7, 6),
            checkpoint(2, 200, 15, 12),
        ];
        let first = augment(&table, &prior(300)).unwrap();
        let second = augment(&table, &prior(300)).unwrap();
        assert!(first.is_complete());
        assert_eq!(first, second);
        assert_eq!(first.rows.len(), 4);

        // Per-checkpoint streams: a record's estimate ignores its neighbours.
        let alone = augment(&table[2..3], &prior(300)).unwrap();
        assert_eq!(alone.rows[0], first.rows[2]);
    }

    #[test]
    fn failed_unit_does_not_affect_siblings() {
        let table = vec![
            checkpoint(1, 100, 5, 9),
            checkpoint(2, 100, 101, 6),
            checkpoint(3, 100, 4, 4),
        ];
        let batch = augment(&table, &prior(100)).unwrap();
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].simulation_id, 2);
        let ids: Vec<u32> = batch.rows.iter().map(LossRecord::simulation_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn scattered_simulation_is_reported_once() {
        let table = vec![
            checkpoint(1, 100, 5, 9),
            checkpoint(2, 100, 4, 4),
            checkpoint(1, 200, 9, 15),
        ];
        let batch = augment(&table, &prior(100)).unwrap();
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].simulation_id, 1);
        assert_eq!(
            batch.failures[0].violation,
            InvariantViolation::NotGrouped { groups: 2 }
        );
        let ids: Vec<u32> = batch.rows.iter().map(LossRecord::simulation_id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn augment_rejects_invalid_prior() {
        let invalid = PriorConfig {
            beta: -1.0,
            ..PriorConfig::default()
        };
        assert!(matches!(
            augment(&[checkpoint(1, 10, 1, 1)], &invalid),
            Err(LabError::Configuration(_))
        ));
    }

    #[test]
    fn mean_loss_by_time_averages_across_simulations() {
        let record = |sim, time, loss_b| LossRecord {
            checkpoint: checkpoint(sim, time, 0, 0),
            loss_a: 0.0,
            loss_b,
            prob_b_beats_a: 0.5,
        };
        let rows = vec![
            record(1, 100, 0.2),
            record(1, 200, 0.1),
            record(2, 100, 0.4),
            record(2, 200, 0.3),
        ];
        let means = mean_loss_by_time(&rows);
        assert_eq!(means.len(), 2);
        assert_eq!(means[0].0, 100);
        assert!((means[0].2 - 0.3).abs() < 1e-12);
        assert!((means[1].2 - 0.2).abs() < 1e-12);
    }
}
