use anyhow::{Context, Result, bail, ensure};
use regex::Regex;

const RANGE_PATTERN: &str = r"^\s*(?P<start>[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)\s*:\s*(?P<stop>[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)\s*:\s*(?P<step>[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)\s*$";
const MAX_GRID_POINTS: usize = 10_000;

pub fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|x| x.trim().to_string())
        .filter(|x| !x.is_empty())
        .collect()
}

/// Parse a grid given either as comma-separated values or as an inclusive
/// `start:stop:step` range.
pub fn parse_grid(grid: &str) -> Result<Vec<f64>> {
    let range = Regex::new(RANGE_PATTERN).context("compiling range pattern")?;
    if let Some(caps) = range.captures(grid) {
        let start = parse_number(&caps["start"])?;
        let stop = parse_number(&caps["stop"])?;
        let step = parse_number(&caps["step"])?;
        return expand_range(start, stop, step);
    }
    let values = split_csv(grid)
        .iter()
        .map(|token| parse_number(token))
        .collect::<Result<Vec<f64>>>()?;
    ensure!(!values.is_empty(), "grid '{grid}' has no values");
    Ok(values)
}

fn parse_number(token: &str) -> Result<f64> {
    let value: f64 = token
        .parse()
        .with_context(|| format!("'{token}' is not a number"))?;
    ensure!(value.is_finite(), "'{token}' is not finite");
    Ok(value)
}

fn expand_range(start: f64, stop: f64, step: f64) -> Result<Vec<f64>> {
    ensure!(step > 0.0, "range step must be positive, got {step}");
    ensure!(stop >= start, "range stop {stop} is below start {start}");
    let slack = step * 1e-9;
    let mut values = Vec::new();
    let mut index = 0u32;
    loop {
        let value = f64::from(index).mul_add(step, start);
        if value > stop + slack {
            break;
        }
        if values.len() == MAX_GRID_POINTS {
            bail!("range {start}:{stop}:{step} expands to more than {MAX_GRID_POINTS} points");
        }
        values.push(value);
        index += 1;
    }
    Ok(values)
}
