//! Cumulative detection probability P*(n) = 1 - (1 - p)^n.
//!
//! Two ways to put uncertainty around P*:
//!
//! - bootstrap: resample per-site detection probabilities with replacement and
//!   take the mean P* of each resample
//! - jitter: perturb a fixed detection level with N(0, sd) noise, clamped to
//!   `[0, 1]`
//!
//! For every survey count the RNG starts from the same seed, so each `n` sees
//! the same draws. Because P* is monotone in `n` per draw, the summaries are
//! too.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::Serialize;

use crate::error::AppError;
use crate::math::{mean, quantile_sorted};

/// Default number of bootstrap / jitter iterations.
pub const DEFAULT_ITERATIONS: usize = 10_000;

/// Default detection levels for the jitter mode.
pub const DEFAULT_JITTER_LEVELS: [f64; 4] = [0.2, 0.4, 0.6, 0.8];

pub const DEFAULT_JITTER_SD: f64 = 0.01;

/// Summary of P* at one survey count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PstarSample {
    /// Detection level for the jitter mode; `None` for the bootstrap.
    pub level: Option<f64>,
    pub surveys: u32,
    pub mean: f64,
    /// 2.5th percentile.
    pub lower: f64,
    /// 97.5th percentile.
    pub upper: f64,
}

/// Survey counts `1..=max`.
pub fn default_surveys(max: u32) -> Vec<u32> {
    (1..=max).collect()
}

/// Probability of at least one detection in `surveys` independent surveys.
pub fn cumulative_detection(p: f64, surveys: u32) -> f64 {
    let miss = 1.0 - p;
    match i32::try_from(surveys) {
        Ok(n) => 1.0 - miss.powi(n),
        Err(_) => 1.0 - miss.powf(f64::from(surveys)),
    }
}

fn validate_common(surveys: &[u32], iterations: usize) -> Result<(), AppError> {
    if surveys.is_empty() {
        return Err(AppError::input("At least one survey count is required."));
    }
    if surveys.contains(&0) {
        return Err(AppError::input("Survey counts must be at least 1."));
    }
    if iterations == 0 {
        return Err(AppError::input("P* needs at least one iteration."));
    }
    Ok(())
}

fn is_probability(p: f64) -> bool {
    p.is_finite() && (0.0..=1.0).contains(&p)
}

fn summarize(level: Option<f64>, surveys: u32, mut draws: Vec<f64>) -> PstarSample {
    draws.sort_by(f64::total_cmp);
    PstarSample {
        level,
        surveys,
        mean: mean(&draws).unwrap_or(f64::NAN),
        lower: quantile_sorted(&draws, 0.025).unwrap_or(f64::NAN),
        upper: quantile_sorted(&draws, 0.975).unwrap_or(f64::NAN),
    }
}

/// Bootstrap P* from per-site detection probabilities.
pub fn bootstrap_pstar(
    detection: &[f64],
    surveys: &[u32],
    iterations: usize,
    seed: u64,
) -> Result<Vec<PstarSample>, AppError> {
    validate_common(surveys, iterations)?;
    if detection.is_empty() {
        return Err(AppError::input("P* bootstrap needs at least one detection probability."));
    }
    if let Some(bad) = detection.iter().find(|p| !is_probability(**p)) {
        return Err(AppError::input(format!("Detection probability {bad} is outside [0, 1].")));
    }

    let m = detection.len();
    Ok(surveys
        .iter()
        .map(|&n| {
            let mut rng = StdRng::seed_from_u64(seed);
            let draws = (0..iterations)
                .map(|_| {
                    let total: f64 = (0..m)
                        .map(|_| cumulative_detection(detection[rng.gen_range(0..m)], n))
                        .sum();
                    total / m as f64
                })
                .collect();
            summarize(None, n, draws)
        })
        .collect())
}

/// Jitter P* around fixed detection levels.
pub fn jitter_pstar(
    levels: &[f64],
    surveys: &[u32],
    iterations: usize,
    sd: f64,
    seed: u64,
) -> Result<Vec<PstarSample>, AppError> {
    validate_common(surveys, iterations)?;
    if levels.is_empty() {
        return Err(AppError::input("Jitter mode needs at least one detection level."));
    }
    if let Some(bad) = levels.iter().find(|p| !is_probability(**p)) {
        return Err(AppError::input(format!("Detection level {bad} is outside [0, 1].")));
    }
    let noise = Normal::new(0.0, sd)
        .map_err(|e| AppError::input(format!("Invalid jitter standard deviation {sd}: {e}")))?;

    let grid: Vec<(f64, u32)> = levels
        .iter()
        .flat_map(|&level| surveys.iter().map(move |&n| (level, n)))
        .collect();
    Ok(grid
        .into_iter()
        .map(|(level, n)| {
            let mut rng = StdRng::seed_from_u64(seed);
            let draws = (0..iterations)
                .map(|_| {
                    let p = (level + noise.sample(&mut rng)).clamp(0.0, 1.0);
                    cumulative_detection(p, n)
                })
                .collect();
            summarize(Some(level), n, draws)
        })
        .collect())
}

/// Smallest survey count whose mean P* reaches `target`.
pub fn surveys_required(samples: &[PstarSample], target: f64) -> Option<u32> {
    samples
        .iter()
        .filter(|s| s.mean >= target)
        .map(|s| s.surveys)
        .min()
}
