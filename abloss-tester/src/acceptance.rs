use abloss_core::{SweepConfig, SweepReport};
use anyhow::{Result, ensure};

/// Default slack allowed when accuracy dips between neighbouring effect sizes.
pub const DEFAULT_TREND_TOLERANCE: f64 = 0.03;

fn sorted_grid(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup_by(|a, b| a.total_cmp(b).is_eq());
    sorted
}

/// Describe every aggregate trend the sweep breaks.
///
/// Accuracy must not fall by more than `tolerance` as the effect size grows,
/// and the duration percentile must not grow as the threshold loosens.
pub fn trend_violations(config: &SweepConfig, report: &SweepReport, tolerance: f64) -> Vec<String> {
    let effect_sizes = sorted_grid(&config.effect_sizes);
    let thresholds = sorted_grid(&config.thresholds);
    let mut violations = Vec::new();

    for &threshold in &thresholds {
        let accuracies: Vec<(f64, f64)> = effect_sizes
            .iter()
            .filter_map(|&effect| {
                let accuracy = report.cell(effect, threshold)?.accuracy?;
                Some((effect, accuracy))
            })
            .collect();
        for pair in accuracies.windows(2) {
            let ((smaller, before), (larger, after)) = (pair[0], pair[1]);
            if after + tolerance < before {
                violations.push(format!(
                    "threshold {threshold}: accuracy fell from {before:.3} at effect {smaller} to {after:.3} at effect {larger}"
                ));
            }
        }
    }

    for &effect in &effect_sizes {
        let durations: Vec<(f64, f64)> = thresholds
            .iter()
            .filter_map(|&threshold| {
                let duration = report.cell(effect, threshold)?.duration_percentile?;
                Some((threshold, duration))
            })
            .collect();
        for pair in durations.windows(2) {
            let ((tighter, before), (looser, after)) = (pair[0], pair[1]);
            if after > before {
                violations.push(format!(
                    "effect {effect}: p{} duration grew from {before:.0} at threshold {tighter} to {after:.0} at threshold {looser}",
                    config.duration_percentile
                ));
            }
        }
    }
    violations
}

/// Fail when the sweep breaks any aggregate trend target.
pub fn validate_trend_targets(violations: &[String]) -> Result<()> {
    ensure!(
        violations.is_empty(),
        "acceptance targets violated:\n  {}",
        violations.join("\n  ")
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use abloss_core::{SelectionFrequency, SweepResult};

    fn cell(effect_size: f64, threshold: f64, accuracy: f64, duration: f64) -> SweepResult {
        SweepResult {
            effect_size,
            threshold_used: threshold,
            simulations: 100,
            failed_units: 0,
            selection_frequency_by_variant: SelectionFrequency::default(),
            accuracy: Some(accuracy),
            percentile_level: 75.0,
            duration_percentile: Some(duration),
            median_duration: Some(duration),
            mean_duration: Some(duration),
            forced_stop_rate: 0.0,
        }
    }

    fn report(cells: Vec<SweepResult>) -> SweepReport {
        SweepReport {
            seed: 1,
            cells,
            outcomes: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn config() -> SweepConfig {
        SweepConfig::default().with_grid(vec![0.5, 0.1], vec![0.002, 0.001])
    }

    #[test]
    fn consistent_trends_pass() {
        let report = report(vec![
            cell(0.1, 0.001, 0.70, 9_000.0),
            cell(0.1, 0.002, 0.68, 6_000.0),
            cell(0.5, 0.001, 0.95, 3_000.0),
            cell(0.5, 0.002, 0.94, 2_000.0),
        ]);
        let violations = trend_violations(&config(), &report, DEFAULT_TREND_TOLERANCE);
        assert!(violations.is_empty(), "{violations:?}");
        assert!(validate_trend_targets(&violations).is_ok());
    }

    #[test]
    fn small_accuracy_dips_are_tolerated() {
        let report = report(vec![cell(0.1, 0.001, 0.80, 100.0), cell(0.5, 0.001, 0.78, 100.0)]);
        let cfg = SweepConfig::default().with_grid(vec![0.1, 0.5], vec![0.001]);
        assert!(trend_violations(&cfg, &report, DEFAULT_TREND_TOLERANCE).is_empty());
    }

    #[test]
    fn broken_trends_are_reported() {
        let report = report(vec![
            cell(0.1, 0.001, 0.90, 2_000.0),
            cell(0.1, 0.002, 0.90, 4_000.0),
            cell(0.5, 0.001, 0.60, 1_000.0),
            cell(0.5, 0.002, 0.60, 1_000.0),
        ]);
        let violations = trend_violations(&config(), &report, DEFAULT_TREND_TOLERANCE);
        assert_eq!(violations.len(), 3);
        assert!(violations.iter().any(|v| v.contains("accuracy fell")));
        assert!(violations.iter().any(|v| v.contains("duration grew")));
        assert!(validate_trend_targets(&violations).is_err());
    }
}
