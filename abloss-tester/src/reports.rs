use std::io::Write;
use std::time::Duration;

use abloss_core::{
    EcdfPoint, ExperimentRun, Outcome, PriorConfig, SimulationConfig, SweepConfig, SweepFailure,
    SweepReport, SweepResult, UnitFailure,
};
use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use serde::Serialize;

/// Result of one tester invocation.
#[derive(Debug, Clone)]
pub enum RunOutput {
    Sweep {
        config: SweepConfig,
        report: SweepReport,
    },
    Experiment {
        config: SimulationConfig,
        prior: PriorConfig,
        threshold: f64,
        run: ExperimentRun,
    },
}

impl RunOutput {
    const fn seed(&self) -> u64 {
        match self {
            Self::Sweep { report, .. } => report.seed,
            Self::Experiment { run, .. } => run.seed,
        }
    }

    fn cells(&self) -> &[SweepResult] {
        match self {
            Self::Sweep { report, .. } => &report.cells,
            Self::Experiment { run, .. } => std::slice::from_ref(&run.summary),
        }
    }

    fn failure_count(&self) -> usize {
        match self {
            Self::Sweep { report, .. } => report.failures.len(),
            Self::Experiment { run, .. } => run.failures.len(),
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
enum JsonReport<'a> {
    Sweep {
        generated_at: String,
        seed: u64,
        config: &'a SweepConfig,
        cells: &'a [SweepResult],
        failures: &'a [SweepFailure],
        acceptance_violations: &'a [String],
    },
    Experiment {
        generated_at: String,
        seed: u64,
        config: &'a SimulationConfig,
        prior: &'a PriorConfig,
        threshold: f64,
        summary: &'a SweepResult,
        outcomes: &'a [Outcome],
        duration_ecdf: &'a [EcdfPoint],
        failures: &'a [UnitFailure],
    },
}

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.precision$}"))
}

fn csv_opt(value: Option<f64>) -> String {
    value.map_or_else(String::new, |v| v.to_string())
}

pub fn generate_json_report<W: Write + ?Sized>(
    out: &mut W,
    output: &RunOutput,
    violations: &[String],
) -> Result<()> {
    let report = match output {
        RunOutput::Sweep { config, report } => JsonReport::Sweep {
            generated_at: timestamp(),
            seed: report.seed,
            config,
            cells: &report.cells,
            failures: &report.failures,
            acceptance_violations: violations,
        },
        RunOutput::Experiment {
            config,
            prior,
            threshold,
            run,
        } => JsonReport::Experiment {
            generated_at: timestamp(),
            seed: run.seed,
            config,
            prior,
            threshold: *threshold,
            summary: &run.summary,
            outcomes: &run.outcomes,
            duration_ecdf: &run.duration_ecdf,
            failures: &run.failures,
        },
    };
    let json_output = serde_json::to_string_pretty(&report)?;
    writeln!(out, "{json_output}")?;
    Ok(())
}

pub fn generate_markdown_report<W: Write + ?Sized>(
    out: &mut W,
    output: &RunOutput,
    violations: &[String],
) -> Result<()> {
    writeln!(out, "# A/B Loss Lab Results\n")?;
    writeln!(out, "- **Generated**: {}", timestamp())?;
    writeln!(out, "- **Seed**: {}", output.seed())?;
    writeln!(out, "- **Failed units**: {}", output.failure_count())?;
    if let RunOutput::Experiment {
        config, threshold, ..
    } = output
    {
        writeln!(
            out,
            "- **Rates**: A {} vs B {}, threshold {threshold}",
            config.rate_a, config.rate_b
        )?;
    }
    writeln!(out)?;

    writeln!(out, "## Cells\n")?;
    writeln!(
        out,
        "| Effect size | Threshold | A | B | Tie | Accuracy | Duration pct | Median | Forced stops |"
    )?;
    writeln!(out, "|---|---|---|---|---|---|---|---|---|")?;
    for cell in output.cells() {
        writeln!(
            out,
            "| {} | {} | {:.3} | {:.3} | {:.3} | {} | {} (p{}) | {} | {:.1}% |",
            cell.effect_size,
            cell.threshold_used,
            cell.selection_frequency_by_variant.a,
            cell.selection_frequency_by_variant.b,
            cell.selection_frequency_by_variant.none,
            fmt_opt(cell.accuracy, 3),
            fmt_opt(cell.duration_percentile, 0),
            cell.percentile_level,
            fmt_opt(cell.median_duration, 0),
            cell.forced_stop_rate * 100.0,
        )?;
    }

    if !violations.is_empty() {
        writeln!(out, "\n## Acceptance violations\n")?;
        for violation in violations {
            writeln!(out, "- {violation}")?;
        }
    }
    Ok(())
}

pub fn generate_csv_report<W: Write + ?Sized>(out: &mut W, output: &RunOutput) -> Result<()> {
    match output {
        RunOutput::Sweep { report, .. } => write_cells_csv(out, &report.cells),
        RunOutput::Experiment { run, .. } => write_outcomes_csv(out, &run.outcomes),
    }
}

fn write_cells_csv<W: Write + ?Sized>(out: &mut W, cells: &[SweepResult]) -> Result<()> {
    writeln!(
        out,
        "effect_size,threshold,simulations,failed_units,freq_a,freq_b,freq_none,accuracy,percentile_level,duration_percentile,median_duration,mean_duration,forced_stop_rate"
    )?;
    for cell in cells {
        writeln!(
            out,
            "{},{},{},{},{},{},{},{},{},{},{},{},{}",
            cell.effect_size,
            cell.threshold_used,
            cell.simulations,
            cell.failed_units,
            cell.selection_frequency_by_variant.a,
            cell.selection_frequency_by_variant.b,
            cell.selection_frequency_by_variant.none,
            csv_opt(cell.accuracy),
            cell.percentile_level,
            csv_opt(cell.duration_percentile),
            csv_opt(cell.median_duration),
            csv_opt(cell.mean_duration),
            cell.forced_stop_rate,
        )?;
    }
    Ok(())
}

fn write_outcomes_csv<W: Write + ?Sized>(out: &mut W, outcomes: &[Outcome]) -> Result<()> {
    writeln!(
        out,
        "simulation_id,effect_size,threshold,stopping_checkpoint,total_duration,selected_variant,is_correct,forced_stop,loss_a,loss_b"
    )?;
    for outcome in outcomes {
        let selected = outcome
            .selected_variant
            .map_or("None", |variant| variant.label());
        let correct = outcome
            .is_correct
            .map_or_else(String::new, |correct| correct.to_string());
        writeln!(
            out,
            "{},{},{},{},{},{selected},{correct},{},{},{}",
            outcome.simulation_id,
            outcome.effect_size,
            outcome.threshold_used,
            outcome.stopping_checkpoint,
            outcome.total_duration,
            outcome.forced_stop,
            outcome.loss_a,
            outcome.loss_b,
        )?;
    }
    Ok(())
}

pub fn generate_console_report<W: Write + ?Sized>(
    out: &mut W,
    output: &RunOutput,
    violations: Option<&[String]>,
    total_duration: Duration,
    verbose: bool,
) -> Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", "📊 Stopping Rule Summary".bright_cyan().bold())?;
    writeln!(out, "{}", "========================".cyan())?;
    writeln!(out, "Seed: {}", output.seed())?;
    if let RunOutput::Experiment {
        config, threshold, ..
    } = output
    {
        writeln!(
            out,
            "Rates: A {} vs B {} | threshold {threshold}",
            config.rate_a, config.rate_b
        )?;
    }
    writeln!(out, "Elapsed: {total_duration:?}")?;
    writeln!(out)?;

    writeln!(
        out,
        "{:>10} {:>11} {:>7} {:>7} {:>7} {:>9} {:>12} {:>10} {:>8}",
        "effect", "threshold", "A", "B", "tie", "accuracy", "duration", "median", "forced"
    )?;
    for cell in output.cells() {
        let accuracy = fmt_opt(cell.accuracy, 3);
        let accuracy = match cell.accuracy {
            Some(value) if value >= 0.9 => accuracy.green(),
            Some(value) if value >= 0.7 => accuracy.yellow(),
            Some(_) => accuracy.red(),
            None => accuracy.normal(),
        };
        writeln!(
            out,
            "{:>10} {:>11} {:>7.3} {:>7.3} {:>7.3} {:>9} {:>12} {:>10} {:>7.1}%",
            cell.effect_size,
            cell.threshold_used,
            cell.selection_frequency_by_variant.a,
            cell.selection_frequency_by_variant.b,
            cell.selection_frequency_by_variant.none,
            accuracy,
            fmt_opt(cell.duration_percentile, 0),
            fmt_opt(cell.median_duration, 0),
            cell.forced_stop_rate * 100.0,
        )?;
    }

    let failures = output.failure_count();
    if failures > 0 {
        writeln!(out)?;
        writeln!(
            out,
            "{}",
            format!("⚠️  {failures} simulation units failed").yellow()
        )?;
        if verbose {
            write_failures(out, output)?;
        }
    }

    if verbose && let RunOutput::Experiment { run, .. } = output {
        writeln!(out)?;
        writeln!(out, "{}", "Duration eCDF".bright_yellow().bold())?;
        for point in &run.duration_ecdf {
            writeln!(out, "  {:>10} {:.3}", point.value, point.cumulative)?;
        }
    }

    if let Some(violations) = violations {
        writeln!(out)?;
        if violations.is_empty() {
            writeln!(out, "{}", "✅ Acceptance targets met".green())?;
        } else {
            writeln!(out, "{}", "❌ Acceptance targets violated".red().bold())?;
            for violation in violations {
                writeln!(out, "   • {}", violation.red())?;
            }
        }
    }
    Ok(())
}

fn write_failures<W: Write + ?Sized>(out: &mut W, output: &RunOutput) -> Result<()> {
    match output {
        RunOutput::Sweep { report, .. } => {
            for failure in &report.failures {
                writeln!(
                    out,
                    "   • effect {}: {}",
                    failure.effect_size, failure.failure
                )?;
            }
        }
        RunOutput::Experiment { run, .. } => {
            for failure in &run.failures {
                writeln!(out, "   • {failure}")?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use abloss_core::{SweepConfig, sweep};

    fn sample_sweep() -> RunOutput {
        let mut config = SweepConfig::default()
            .with_grid(vec![0.5], vec![0.002, 0.004])
            .with_simulations(10)
            .with_budget(500, 100)
            .with_seed(3);
        config.base_rate = 0.1;
        config.prior = config.prior.with_posterior_samples(100);
        let report = sweep(&config).unwrap();
        RunOutput::Sweep { config, report }
    }

    fn sample_experiment() -> RunOutput {
        let config = SimulationConfig::new(0.1, 0.15)
            .with_budget(500, 100)
            .with_simulations(5)
            .with_seed(4);
        let prior = PriorConfig::default().with_posterior_samples(100);
        let run = abloss_core::run_experiment(&config, &prior, 0.002).unwrap();
        RunOutput::Experiment {
            config,
            prior,
            threshold: 0.002,
            run,
        }
    }

    #[test]
    fn json_report_is_tagged_by_mode() {
        let mut buf = Vec::new();
        generate_json_report(&mut buf, &sample_sweep(), &[]).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value["mode"], "sweep");
        assert_eq!(value["seed"], 3);
        assert_eq!(value["cells"].as_array().unwrap().len(), 2);
        assert!(value["generated_at"].is_string());
    }

    #[test]
    fn cells_expose_duration_value_and_level_separately() {
        let mut buf = Vec::new();
        generate_json_report(&mut buf, &sample_sweep(), &[]).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        let cell = &value["cells"][0];
        assert_eq!(cell["percentile_level"], 75.0);
        let duration = cell["duration_percentile"].as_f64().unwrap();
        assert!((200.0..=1_000.0).contains(&duration), "{duration}");
        assert!(cell["selection_frequency_by_variant"]["b"].is_number());

        let mut buf = Vec::new();
        generate_csv_report(&mut buf, &sample_sweep()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let header: Vec<&str> = text.lines().next().unwrap().split(',').collect();
        assert_eq!(header[8], "percentile_level");
        assert_eq!(header[9], "duration_percentile");
    }

    #[test]
    fn csv_report_has_one_row_per_cell_or_outcome() {
        let mut buf = Vec::new();
        generate_csv_report(&mut buf, &sample_sweep()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("effect_size,threshold"));
        assert_eq!(text.lines().count(), 3);

        let mut buf = Vec::new();
        generate_csv_report(&mut buf, &sample_experiment()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("simulation_id,"));
        assert_eq!(text.lines().count(), 6);
    }

    #[test]
    fn markdown_report_lists_violations() {
        let mut buf = Vec::new();
        let violations = vec!["accuracy fell".to_string()];
        generate_markdown_report(&mut buf, &sample_sweep(), &violations).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("# A/B Loss Lab Results"));
        assert!(text.contains("| Effect size |"));
        assert!(text.contains("- accuracy fell"));
    }

    #[test]
    fn console_report_includes_verdict_and_ecdf() {
        let mut buf = Vec::new();
        generate_console_report(
            &mut buf,
            &sample_experiment(),
            Some(&[]),
            Duration::from_millis(5),
            true,
        )
        .unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Stopping Rule Summary"));
        assert!(text.contains("Duration eCDF"));
        assert!(text.contains("Acceptance targets met"));
    }
}
