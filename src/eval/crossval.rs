//! k-fold cross-validation of occupancy predictions.
//!
//! Sites are shuffled with a seeded RNG and dealt round-robin into `k` folds.
//! Each fold refits the same spec on the remaining sites and scores the
//! predicted ψ on the held-out sites against the naive "ever detected"
//! indicator. Held-out sites without any observed occasion are not scored.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::debug;

use crate::domain::{ModelSpec, PredictionKind, SiteData};
use crate::error::AppError;
use crate::eval::EvaluationFailure;
use crate::fit::estimator::{Estimator, FitBudget};
use crate::math::{mean, mean_squared_error};

/// Score of one successful fold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoldScore {
    /// 1-based fold number.
    pub fold: usize,
    pub held_out: usize,
    pub mse: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossValidation {
    pub folds: Vec<FoldScore>,
    pub failures: Vec<EvaluationFailure>,
    /// Mean MSE over successful folds; `None` when every fold failed.
    pub mean_mse: Option<f64>,
}

/// Deterministic partition of `0..n` into `k` folds.
pub fn fold_assignment(n: usize, k: usize, seed: u64) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let mut folds = vec![Vec::new(); k];
    for (pos, idx) in order.into_iter().enumerate() {
        folds[pos % k].push(idx);
    }
    for fold in &mut folds {
        fold.sort_unstable();
    }
    folds
}

pub fn k_fold<E: Estimator + ?Sized>(
    estimator: &E,
    spec: &ModelSpec,
    data: &SiteData,
    budget: &FitBudget,
    k: usize,
    seed: u64,
) -> Result<CrossValidation, AppError> {
    if k < 2 {
        return Err(AppError::input(format!("Cross-validation needs at least 2 folds (got {k}).")));
    }
    if k > data.len() {
        return Err(AppError::input(format!(
            "Cannot split {} sites into {k} folds.",
            data.len()
        )));
    }

    let folds = fold_assignment(data.len(), k, seed);
    let mut scores = Vec::new();
    let mut failures = Vec::new();

    for (i, held_out) in folds.iter().enumerate() {
        let fold = i + 1;
        match score_fold(estimator, spec, data, budget, held_out) {
            Ok((n, mse)) => {
                debug!(fold, held_out = n, mse, "fold scored");
                scores.push(FoldScore {
                    fold,
                    held_out: n,
                    mse,
                });
            }
            Err(reason) => failures.push(EvaluationFailure::Fold { fold, reason }),
        }
    }

    let mses: Vec<f64> = scores.iter().map(|s| s.mse).collect();
    Ok(CrossValidation {
        mean_mse: mean(&mses),
        folds: scores,
        failures,
    })
}

fn score_fold<E: Estimator + ?Sized>(
    estimator: &E,
    spec: &ModelSpec,
    data: &SiteData,
    budget: &FitBudget,
    held_out: &[usize],
) -> Result<(usize, f64), String> {
    let train: Vec<usize> = (0..data.len()).filter(|i| held_out.binary_search(i).is_err()).collect();
    let scored: Vec<usize> = held_out
        .iter()
        .copied()
        .filter(|&i| data.sites()[i].observed_occasions() > 0)
        .collect();
    if scored.is_empty() {
        return Err("no surveyed sites in the held-out fold".to_string());
    }

    let model = estimator
        .fit(spec, &data.subset(&train), budget)
        .map_err(|failure| failure.to_string())?;
    let test = data.subset(&scored);
    let predicted: Vec<f64> = model
        .predict(PredictionKind::Occupancy, &test)
        .map_err(|missing| format!("missing covariate '{missing}'"))?
        .iter()
        .map(|p| p.estimate)
        .collect();
    let observed: Vec<f64> = test
        .sites()
        .iter()
        .map(|s| if s.ever_detected() { 1.0 } else { 0.0 })
        .collect();

    let mse = mean_squared_error(&observed, &predicted).ok_or_else(|| "empty held-out fold".to_string())?;
    if !mse.is_finite() {
        return Err("non-finite prediction error".to_string());
    }
    Ok((test.len(), mse))
}
