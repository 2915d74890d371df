//! Survey-effort sensitivity: how many surveys are needed to detect the
//! species at a site where it is present.

use serde::Serialize;
use tracing::info;

use crate::error::AppError;

pub mod pstar;

pub use pstar::*;

/// Settings shared by both P* modes.
#[derive(Debug, Clone, PartialEq)]
pub struct SensitivityConfig {
    pub iterations: usize,
    pub seed: u64,
    pub surveys: Vec<u32>,
    pub jitter_levels: Vec<f64>,
    pub jitter_sd: f64,
    /// Mean P* a survey design should reach.
    pub target: f64,
}

impl Default for SensitivityConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            seed: 42,
            surveys: default_surveys(15),
            jitter_levels: DEFAULT_JITTER_LEVELS.to_vec(),
            jitter_sd: DEFAULT_JITTER_SD,
            target: 0.95,
        }
    }
}

/// P* tables for one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SensitivityRun {
    pub bootstrap: Vec<PstarSample>,
    pub jitter: Vec<PstarSample>,
    pub target: f64,
}

impl SensitivityRun {
    /// Distinct jitter levels in the order they were run.
    pub fn levels(&self) -> Vec<f64> {
        let mut out: Vec<f64> = Vec::new();
        for s in &self.jitter {
            if let Some(level) = s.level.filter(|l| !out.contains(l)) {
                out.push(level);
            }
        }
        out
    }

    /// Samples for one jitter level, or the bootstrap curve for `None`.
    pub fn curve(&self, level: Option<f64>) -> Vec<PstarSample> {
        match level {
            None => self.bootstrap.clone(),
            Some(l) => self.jitter.iter().filter(|s| s.level == Some(l)).copied().collect(),
        }
    }

    pub fn surveys_required(&self, level: Option<f64>) -> Option<u32> {
        surveys_required(&self.curve(level), self.target)
    }
}

/// Run the bootstrap (when detection probabilities are given) and the jitter
/// grid (when levels are configured).
pub fn run_sensitivity(detection: Option<&[f64]>, config: &SensitivityConfig) -> Result<SensitivityRun, AppError> {
    if !(config.target > 0.0 && config.target <= 1.0) {
        return Err(AppError::input(format!(
            "P* target must be in (0, 1] (got {}).",
            config.target
        )));
    }

    let bootstrap = match detection {
        Some(p) => bootstrap_pstar(p, &config.surveys, config.iterations, config.seed)?,
        None => Vec::new(),
    };
    let jitter = if config.jitter_levels.is_empty() {
        Vec::new()
    } else {
        jitter_pstar(
            &config.jitter_levels,
            &config.surveys,
            config.iterations,
            config.jitter_sd,
            config.seed,
        )?
    };

    let run = SensitivityRun {
        bootstrap,
        jitter,
        target: config.target,
    };
    info!(
        iterations = config.iterations,
        bootstrap_surveys_required = ?run.surveys_required(None),
        levels = run.levels().len(),
        "P* sensitivity complete"
    );
    Ok(run)
}
