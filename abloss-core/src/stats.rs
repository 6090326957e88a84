//! Summary statistics over duration samples.
//!
//! Percentiles use linear interpolation between order statistics
//! (Hyndman & Fan type 7):
//! ```text
//! h = (n - 1) * p
//! q = x[floor(h)] + (h - floor(h)) * (x[floor(h) + 1] - x[floor(h)])
//! ```

use serde::{Deserialize, Serialize};

use crate::numbers::{floor_to_index, usize_to_f64};

/// Percentile `p` (in percent, `0..=100`) of `values`.
///
/// Returns `None` for an empty sample or a percentile outside `0..=100`.
#[must_use]
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() || !(0.0..=100.0).contains(&p) {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(percentile_sorted(&sorted, p))
}

fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let last = sorted.len() - 1;
    if last == 0 {
        return sorted[0];
    }
    let h = usize_to_f64(last) * p / 100.0;
    let lower = floor_to_index(h, last);
    let upper = (lower + 1).min(last);
    let weight = h - usize_to_f64(lower);
    sorted[lower] + weight * (sorted[upper] - sorted[lower])
}

/// Arithmetic mean, `None` for an empty sample.
#[must_use]
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / usize_to_f64(values.len()))
}

/// One step of an empirical cumulative distribution function.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EcdfPoint {
    pub value: f64,
    /// Fraction of the sample less than or equal to `value`.
    pub cumulative: f64,
}

/// Empirical CDF of `values`, one point per distinct value in ascending order.
#[must_use]
pub fn ecdf(values: &[f64]) -> Vec<EcdfPoint> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let total = usize_to_f64(sorted.len());
    let mut points: Vec<EcdfPoint> = Vec::new();
    for (idx, value) in sorted.iter().copied().enumerate() {
        let cumulative = usize_to_f64(idx + 1) / total;
        match points.last_mut() {
            Some(point) if point.value.total_cmp(&value).is_eq() => point.cumulative = cumulative,
            _ => points.push(EcdfPoint { value, cumulative }),
        }
    }
    points
}
