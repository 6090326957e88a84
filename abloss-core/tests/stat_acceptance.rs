use abloss_core::{
    PriorConfig, SimulationConfig, SweepConfig, Variant, augment, mean_loss_by_time,
    run_experiment, simulate, sweep,
};

const TREND_TOLERANCE: f64 = 0.03;

#[test]
fn losses_shrink_as_evidence_accumulates() {
    let config = SimulationConfig::new(0.02, 0.06)
        .with_budget(3_000, 100)
        .with_simulations(300)
        .with_seed(0x5EED);
    let prior = PriorConfig::default()
        .with_posterior_samples(300)
        .with_sampling_seed(0xBEEF);
    let checkpoints = simulate(&config).unwrap();
    let losses = augment(&checkpoints, &prior).unwrap().into_complete().unwrap();

    let by_time = mean_loss_by_time(&losses);
    let (first_time, _, first_loss_b) = by_time[0];
    let (last_time, last_loss_a, last_loss_b) = by_time[by_time.len() - 1];
    assert_eq!(first_time, 100);
    assert_eq!(last_time, 3_000);
    assert!(
        last_loss_b < 1e-4,
        "loss of shipping the better variant stayed high: {last_loss_b}"
    );
    assert!(last_loss_b < first_loss_b);
    assert!(
        (last_loss_a - 0.04).abs() < 0.01,
        "loss of shipping the worse variant should approach the true gap: {last_loss_a}"
    );
}

#[test]
fn accuracy_grows_with_effect_size_and_duration_falls_with_threshold() {
    let mut config = SweepConfig::default()
        .with_grid(vec![0.05, 0.2, 0.5], vec![0.001, 0.002, 0.004])
        .with_simulations(300)
        .with_budget(2_000, 100)
        .with_seed(2024);
    config.base_rate = 0.05;
    config.prior = config.prior.with_posterior_samples(300);
    let report = sweep(&config).unwrap();
    assert!(report.failures.is_empty());

    for &threshold in &config.thresholds {
        let accuracies: Vec<f64> = report
            .cells_for_threshold(threshold)
            .map(|cell| cell.accuracy.unwrap())
            .collect();
        for pair in accuracies.windows(2) {
            assert!(
                pair[1] + TREND_TOLERANCE >= pair[0],
                "accuracy fell with effect size at threshold {threshold}: {accuracies:?}"
            );
        }
        assert!(
            accuracies[accuracies.len() - 1] > accuracies[0] + 0.1,
            "largest effect should be clearly easier to call: {accuracies:?}"
        );
    }

    for &effect_size in &config.effect_sizes {
        let durations: Vec<f64> = report
            .cells_for_effect_size(effect_size)
            .map(|cell| cell.duration_percentile.unwrap())
            .collect();
        for pair in durations.windows(2) {
            assert!(
                pair[1] <= pair[0],
                "p75 duration grew with threshold at effect {effect_size}: {durations:?}"
            );
        }
    }
}

#[test]
fn reference_experiment_favours_the_better_variant() {
    let config = SimulationConfig::new(0.002, 0.0025)
        .with_budget(100_000, 2_000)
        .with_simulations(500)
        .with_seed(0x00AB_7E57);
    let run = run_experiment(&config, &PriorConfig::default(), 0.000_04).unwrap();

    assert_eq!(run.outcomes.len(), 500);
    assert!(run.failures.is_empty());
    let b_share = run.summary.frequency(Some(Variant::B));
    assert!(b_share > 0.5, "B selected in only {b_share:.3} of runs");
    let median = run.summary.median_duration.unwrap();
    assert!(median < 200_000.0, "median duration hit the budget: {median}");
    assert!(run.summary.accuracy.unwrap() > 0.5);

    let ecdf = &run.duration_ecdf;
    assert!(!ecdf.is_empty());
    for pair in ecdf.windows(2) {
        assert!(pair[0].value < pair[1].value);
        assert!(pair[0].cumulative <= pair[1].cumulative);
    }
    let last = ecdf.last().unwrap();
    assert!((last.cumulative - 1.0).abs() < 1e-12);
    assert!(last.value <= 200_000.0);
    assert!(ecdf[0].value >= 4_000.0);
}
