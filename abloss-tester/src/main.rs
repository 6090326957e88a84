mod acceptance;
mod reports;
mod util;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use std::fs::File;
use std::io::{BufWriter, Write, stdout};
use std::path::PathBuf;
use std::time::Instant;

use abloss_core::{SimulationConfig, SweepConfig, run_experiment_at_effect, summarize, sweep};
use acceptance::{DEFAULT_TREND_TOLERANCE, trend_violations, validate_trend_targets};
use reports::RunOutput;
use util::parse_grid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    /// One configuration at one threshold, reported per simulated experiment
    Experiment,
    /// Full effect-size by threshold grid
    Sweep,
}

#[derive(Debug, Parser)]
#[command(name = "abloss-tester", version = "0.1.0")]
#[command(about = "Simulate A/B experiments and evaluate an expected-loss stopping rule")]
struct Args {
    /// Run a single experiment configuration or the full sweep
    #[arg(long, value_enum, default_value_t = RunMode::Sweep)]
    mode: RunMode,

    /// JSON sweep configuration; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Baseline conversion rate of variant A
    #[arg(long)]
    base_rate: Option<f64>,

    /// Relative lifts of variant B (comma-separated or start:stop:step)
    #[arg(long, allow_hyphen_values = true)]
    effect_sizes: Option<String>,

    /// Expected-loss thresholds (comma-separated or start:stop:step)
    #[arg(long)]
    thresholds: Option<String>,

    /// Simulated experiments per effect size
    #[arg(long)]
    simulations: Option<u32>,

    /// Per-variant observation budget
    #[arg(long)]
    max_observations: Option<u32>,

    /// Observations per variant between checkpoints
    #[arg(long)]
    increment: Option<u32>,

    /// Paired posterior draws per checkpoint
    #[arg(long)]
    posterior_samples: Option<u32>,

    /// Beta prior alpha
    #[arg(long)]
    prior_alpha: Option<f64>,

    /// Beta prior beta
    #[arg(long)]
    prior_beta: Option<f64>,

    /// Duration percentile reported per cell
    #[arg(long)]
    percentile: Option<f64>,

    /// Run seed (drawn from entropy and logged when omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Validate aggregate accuracy and duration trends; exit non-zero on violation
    #[arg(long)]
    acceptance: bool,

    /// Allowed accuracy dip between neighbouring effect sizes
    #[arg(long, default_value_t = DEFAULT_TREND_TOLERANCE)]
    tolerance: f64,

    /// Output report format
    #[arg(long, default_value = "console")]
    #[arg(value_parser = ["json", "markdown", "console", "csv"])]
    report: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Optional path to write the report output instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.report == "console" {
        announce_banner();
    }

    let start_time = Instant::now();
    let config = build_sweep_config(&args)?;
    let output = match args.mode {
        RunMode::Sweep => run_sweep(config)?,
        RunMode::Experiment => run_single_experiment(config)?,
    };

    let violations = acceptance_violations(&args, &output);
    write_reports(&args, &output, violations.as_deref(), start_time)?;

    if let Some(violations) = violations {
        validate_trend_targets(&violations)?;
    }
    Ok(())
}

fn announce_banner() {
    println!("{}", "🧪 A/B Loss Lab".bright_cyan().bold());
    println!("{}", "================".cyan());
}

fn build_sweep_config(args: &Args) -> Result<SweepConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            SweepConfig::from_json(&text)
                .with_context(|| format!("invalid configuration in {}", path.display()))?
        }
        None => SweepConfig::default(),
    };
    apply_overrides(&mut config, args)?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn apply_overrides(config: &mut SweepConfig, args: &Args) -> Result<()> {
    if let Some(base_rate) = args.base_rate {
        config.base_rate = base_rate;
    }
    if let Some(effect_sizes) = &args.effect_sizes {
        config.effect_sizes = parse_grid(effect_sizes).context("parsing --effect-sizes")?;
    }
    if let Some(thresholds) = &args.thresholds {
        config.thresholds = parse_grid(thresholds).context("parsing --thresholds")?;
    }
    if let Some(simulations) = args.simulations {
        config.simulations_per_effect_size = simulations;
    }
    if let Some(max_observations) = args.max_observations {
        config.max_observations = max_observations;
    }
    if let Some(increment) = args.increment {
        config.checkpoint_increment = increment;
    }
    if let Some(samples) = args.posterior_samples {
        config.prior.posterior_samples = samples;
    }
    if let Some(alpha) = args.prior_alpha {
        config.prior.alpha = alpha;
    }
    if let Some(beta) = args.prior_beta {
        config.prior.beta = beta;
    }
    if let Some(percentile) = args.percentile {
        config.duration_percentile = percentile;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    Ok(())
}

fn run_sweep(config: SweepConfig) -> Result<RunOutput> {
    let report = sweep(&config).context("sweep failed")?;
    Ok(RunOutput::Sweep { config, report })
}

/// Single experiment at the first effect size and first threshold of the grid.
fn run_single_experiment(config: SweepConfig) -> Result<RunOutput> {
    let effect_size = *config
        .effect_sizes
        .first()
        .context("no effect size configured")?;
    let threshold = *config
        .thresholds
        .first()
        .context("no threshold configured")?;
    let simulation = SimulationConfig {
        seed: config.seed,
        ..config.simulation_config_for(effect_size, 0)
    };
    let prior = config.prior.clone();
    let mut run = run_experiment_at_effect(&simulation, &prior, threshold, effect_size)
        .context("experiment failed")?;
    run.summary = summarize(
        run.truth.effect_size,
        threshold,
        simulation.num_simulations,
        &run.outcomes,
        run.failures.len(),
        config.duration_percentile,
    );
    Ok(RunOutput::Experiment {
        config: simulation,
        prior,
        threshold,
        run,
    })
}

fn acceptance_violations(args: &Args, output: &RunOutput) -> Option<Vec<String>> {
    if !args.acceptance {
        return None;
    }
    match output {
        RunOutput::Sweep { config, report } => {
            Some(trend_violations(config, report, args.tolerance))
        }
        RunOutput::Experiment { .. } => {
            log::warn!("acceptance trends need a sweep; skipping for experiment mode");
            None
        }
    }
}

fn write_reports(
    args: &Args,
    output: &RunOutput,
    violations: Option<&[String]>,
    start_time: Instant,
) -> Result<()> {
    let mut output_target = OutputTarget::new(args.output.clone())?;
    let listed = violations.unwrap_or(&[]);
    match args.report.as_str() {
        "json" => reports::generate_json_report(&mut output_target, output, listed)?,
        "markdown" => reports::generate_markdown_report(&mut output_target, output, listed)?,
        "csv" => reports::generate_csv_report(&mut output_target, output)?,
        _ => {
            reports::generate_console_report(
                &mut output_target,
                output,
                violations,
                start_time.elapsed(),
                args.verbose,
            )?;
            writeln!(&mut output_target)?;
            writeln!(
                &mut output_target,
                "🏁 Total time: {:?}",
                start_time.elapsed()
            )?;
        }
    }
    output_target.flush_inner()?;
    Ok(())
}

enum OutputTarget {
    Stdout(BufWriter<std::io::Stdout>),
    File(BufWriter<File>),
}

impl OutputTarget {
    fn new(path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = path {
            let file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(Self::File(BufWriter::new(file)))
        } else {
            Ok(Self::Stdout(BufWriter::new(stdout())))
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::Stdout(w) => w,
            Self::File(w) => w,
        }
    }

    fn flush_inner(&mut self) -> std::io::Result<()> {
        match self {
            Self::Stdout(w) => w.flush(),
            Self::File(w) => w.flush(),
        }
    }
}

impl Write for OutputTarget {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abloss_core::ConfigError;

    fn base_args() -> Args {
        Args {
            mode: RunMode::Sweep,
            config: None,
            base_rate: Some(0.1),
            effect_sizes: Some("0.2,1.0".to_string()),
            thresholds: Some("0.002,0.004".to_string()),
            simulations: Some(12),
            max_observations: Some(500),
            increment: Some(100),
            posterior_samples: Some(100),
            prior_alpha: None,
            prior_beta: None,
            percentile: None,
            seed: Some(1337),
            acceptance: false,
            tolerance: DEFAULT_TREND_TOLERANCE,
            report: "json".to_string(),
            verbose: false,
            output: None,
        }
    }

    fn temp_path(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "abloss-main-{label}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ))
    }

    #[test]
    fn overrides_replace_defaults() {
        let config = build_sweep_config(&base_args()).unwrap();
        assert!((config.base_rate - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.effect_sizes, vec![0.2, 1.0]);
        assert_eq!(config.simulations_per_effect_size, 12);
        assert_eq!(config.prior.posterior_samples, 100);
        assert_eq!(config.seed, Some(1337));
    }

    #[test]
    fn config_file_is_loaded_before_overrides() {
        let path = temp_path("config.json");
        std::fs::write(
            &path,
            r#"{ "base_rate": 0.05, "duration_percentile": 90.0, "prior": { "alpha": 2.0 } }"#,
        )
        .unwrap();
        let args = Args {
            config: Some(path),
            base_rate: None,
            ..base_args()
        };
        let config = build_sweep_config(&args).unwrap();
        assert!((config.base_rate - 0.05).abs() < f64::EPSILON);
        assert!((config.duration_percentile - 90.0).abs() < f64::EPSILON);
        assert!((config.prior.alpha - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.prior.posterior_samples, 100);
    }

    #[test]
    fn invalid_overrides_are_rejected() {
        let args = Args {
            increment: Some(300),
            ..base_args()
        };
        let err = build_sweep_config(&args).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::IncrementDoesNotDivide { .. })
        ));
    }

    #[test]
    fn experiment_mode_uses_first_grid_points() {
        let config = build_sweep_config(&base_args()).unwrap();
        let RunOutput::Experiment {
            config, threshold, run, ..
        } = run_single_experiment(config).unwrap()
        else {
            panic!("expected experiment output");
        };
        assert!((config.rate_b - 0.12).abs() < 1e-12);
        assert!((threshold - 0.002).abs() < f64::EPSILON);
        assert_eq!(run.seed, 1337);
        assert_eq!(run.outcomes.len(), 12);
        assert!(run.outcomes.iter().all(|o| o.effect_size.to_bits() == 0.2f64.to_bits()));
        assert_eq!(run.summary.effect_size.to_bits(), 0.2f64.to_bits());
    }

    #[test]
    fn acceptance_is_only_checked_for_sweeps() {
        let mut args = base_args();
        args.acceptance = true;
        let config = build_sweep_config(&args).unwrap();
        let experiment = run_single_experiment(config.clone()).unwrap();
        assert!(acceptance_violations(&args, &experiment).is_none());
        let swept = run_sweep(config).unwrap();
        assert!(acceptance_violations(&args, &swept).is_some());
    }

    #[test]
    fn write_reports_emits_csv_to_file() {
        let temp = temp_path("report.csv");
        let args = Args {
            report: "csv".to_string(),
            output: Some(temp.clone()),
            ..base_args()
        };
        let output = run_sweep(build_sweep_config(&args).unwrap()).unwrap();
        write_reports(&args, &output, None, Instant::now()).unwrap();
        let content = std::fs::read_to_string(temp).unwrap();
        assert!(content.starts_with("effect_size,threshold"));
        assert_eq!(content.lines().count(), 5);
    }

    #[test]
    fn output_target_stdout_writes() {
        let mut target = OutputTarget::new(None).unwrap();
        target.write_all(b"ok").unwrap();
        target.flush().unwrap();
    }
}
