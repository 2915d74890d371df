//! Model evaluation: cross-validated predictive accuracy and goodness of fit.
//!
//! Evaluation never aborts the run. A failed fold or an unusable bootstrap is
//! reported as an `EvaluationFailure` next to whatever could be computed.

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{FitResult, ModelKey, SiteData};
use crate::error::AppError;
use crate::fit::estimator::{Estimator, FitBudget};

pub mod crossval;
pub mod gof;

pub use crossval::*;
pub use gof::*;

/// Non-fatal evaluation problems.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum EvaluationFailure {
    #[error("fold {fold} failed: {reason}")]
    Fold { fold: usize, reason: String },
    #[error("parametric bootstrap unavailable: {0}")]
    BootstrapUnavailable(String),
}

/// Knobs for `evaluate_model`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationSettings {
    pub folds: usize,
    pub cv_seed: u64,
    pub simulations: usize,
    pub gof_seed: u64,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            folds: 5,
            cv_seed: 42,
            simulations: 100,
            gof_seed: 42,
        }
    }
}

/// Everything we know about one model's fit to the data.
#[derive(Debug, Clone, Serialize)]
pub struct ModelEvaluation {
    pub model: ModelKey,
    pub cross_validation: CrossValidation,
    pub goodness_of_fit: GofOutcome,
    /// Pearson χ² over residual degrees of freedom.
    pub c_hat: Option<f64>,
}

/// Run cross-validation, the parametric bootstrap and the ĉ estimate.
pub fn evaluate_model<E: Estimator + ?Sized>(
    estimator: &E,
    result: &FitResult,
    data: &SiteData,
    budget: &FitBudget,
    settings: &EvaluationSettings,
) -> Result<ModelEvaluation, AppError> {
    let model = result.key();
    info!(%model, folds = settings.folds, simulations = settings.simulations, "evaluating model");

    let cross_validation = k_fold(estimator, result.spec(), data, budget, settings.folds, settings.cv_seed)?;
    for failure in &cross_validation.failures {
        warn!(%model, %failure, "cross-validation fold excluded");
    }

    let goodness_of_fit = parametric_bootstrap(estimator, &result.model, data, budget, settings.simulations, settings.gof_seed);
    if let GofOutcome::Unavailable { reason, .. } = &goodness_of_fit {
        warn!(%model, %reason, "goodness-of-fit bootstrap unavailable");
    }

    let c_hat = overdispersion(&result.model, data);

    Ok(ModelEvaluation {
        model,
        cross_validation,
        goodness_of_fit,
        c_hat,
    })
}
