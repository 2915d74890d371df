//! Shared analysis pipeline used by the `analyze` and `rank` subcommands.
//!
//! ingest -> enumerate -> fit (parallel) -> rank/select -> average
//! -> evaluate (top + reference model) -> P* sensitivity
//!
//! The estimator is a parameter so tests can drive the whole workflow with a
//! stand-in.

use tracing::{info, warn};

use crate::domain::{AnalysisConfig, PredictionKind, SiteData};
use crate::error::AppError;
use crate::eval::{EvaluationSettings, ModelEvaluation, evaluate_model};
use crate::fit::averaging::{AveragedPrediction, ModelAverage, average_parameters, average_predictions};
use crate::fit::enumerate::{enumerate_specs, total_combinations};
use crate::fit::estimator::{Estimator, FitBudget, MleEstimator};
use crate::fit::orchestrator::{CandidateSet, fit_all};
use crate::fit::selection::{ModelSelection, RankedCandidate, SelectionFailure, confidence_set, rank_candidates, reference_model, select};
use crate::io::ingest::{IngestedData, load_sites};
use crate::sensitivity::{SensitivityConfig, SensitivityRun, run_sensitivity};

/// Outputs of `occu rank`.
#[derive(Debug, Clone)]
pub struct RankRun {
    pub ingest: IngestedData,
    pub candidates: CandidateSet,
    pub ranked: Vec<RankedCandidate>,
    /// Why averaging would not be possible, if it would not.
    pub selection_failure: Option<SelectionFailure>,
}

impl RankRun {
    pub fn confidence_set(&self) -> &[RankedCandidate] {
        confidence_set(&self.ranked).unwrap_or(&[])
    }
}

/// Outputs of `occu analyze`.
#[derive(Debug, Clone)]
pub struct AnalysisRun {
    pub ingest: IngestedData,
    pub candidates: CandidateSet,
    pub selection: ModelSelection,
    pub average: ModelAverage,
    pub occupancy: Vec<AveragedPrediction>,
    pub detection: Vec<AveragedPrediction>,
    /// Top-ranked model first, then the reference model when it differs.
    pub evaluations: Vec<ModelEvaluation>,
    pub sensitivity: SensitivityRun,
}

pub fn fit_budget(config: &AnalysisConfig) -> FitBudget {
    FitBudget {
        max_iterations: config.max_iterations,
        timeout: config.fit_timeout,
    }
}

pub fn evaluation_settings(config: &AnalysisConfig) -> EvaluationSettings {
    EvaluationSettings {
        folds: config.cv_folds,
        cv_seed: config.cv_seed,
        simulations: config.gof_simulations,
        gof_seed: config.gof_seed,
    }
}

pub fn sensitivity_config(config: &AnalysisConfig) -> SensitivityConfig {
    SensitivityConfig {
        iterations: config.pstar_iterations,
        seed: config.pstar_seed,
        surveys: config.surveys.clone(),
        jitter_levels: config.jitter_levels.clone(),
        jitter_sd: config.jitter_sd,
        target: config.pstar_target,
    }
}

/// Enumerate and fit every candidate over the data's covariate universe.
pub fn fit_candidates<E: Estimator + ?Sized>(
    estimator: &E,
    data: &SiteData,
    config: &AnalysisConfig,
) -> Result<CandidateSet, AppError> {
    if config.max_models == 0 {
        return Err(AppError::input("--max-models must be at least 1."));
    }
    let space = total_combinations(data.universe().len());
    info!(
        covariates = data.universe().len(),
        search_space = %space,
        budget = config.max_models,
        "enumerating candidate models"
    );
    if (config.max_models as u128) < space {
        warn!(
            search_space = %space,
            budget = config.max_models,
            "model budget truncates the search space"
        );
    }

    let specs = enumerate_specs(data.universe(), config.max_models);
    fit_all(estimator, specs, data, &fit_budget(config), config.workers)
}

/// Load, fit and rank with the built-in estimator.
pub fn run_ranking(config: &AnalysisConfig) -> Result<RankRun, AppError> {
    let ingest = load_sites(config)?;
    rank_with(&MleEstimator, ingest, config)
}

pub fn rank_with<E: Estimator + ?Sized>(
    estimator: &E,
    ingest: IngestedData,
    config: &AnalysisConfig,
) -> Result<RankRun, AppError> {
    let candidates = fit_candidates(estimator, &ingest.data, config)?;
    let ranked = rank_candidates(&candidates)?;
    let selection_failure = confidence_set(&ranked).err();
    if let Some(failure) = &selection_failure {
        warn!(%failure, "ranking complete but model averaging is not possible");
    }
    Ok(RankRun {
        ingest,
        candidates,
        ranked,
        selection_failure,
    })
}

/// Full analysis with the built-in estimator.
pub fn run_analysis(config: &AnalysisConfig) -> Result<AnalysisRun, AppError> {
    let ingest = load_sites(config)?;
    analyze_with(&MleEstimator, ingest, config)
}

pub fn analyze_with<E: Estimator + ?Sized>(
    estimator: &E,
    ingest: IngestedData,
    config: &AnalysisConfig,
) -> Result<AnalysisRun, AppError> {
    let data = &ingest.data;
    if let Some(spec) = &config.reference_model {
        spec.validate_against(data.universe())?;
    }

    let candidates = fit_candidates(estimator, data, config)?;
    let selection = select(&candidates)?;
    let members = selection.confidence_set();

    let average = average_parameters(members)?;
    let occupancy = average_predictions(PredictionKind::Occupancy, members, data)?;
    let detection = average_predictions(PredictionKind::Detection, members, data)?;

    let budget = fit_budget(config);
    let settings = evaluation_settings(config);
    let top = &selection.top().result;
    let mut evaluations = vec![evaluate_model(estimator, top, data, &budget, &settings)?];

    if let Some(spec) = &config.reference_model {
        if spec.key() == top.key() {
            info!(model = %spec.key(), "reference model is the top-ranked model");
        } else {
            match reference_model(&candidates, estimator, spec, data, &budget) {
                Ok(result) => evaluations.push(evaluate_model(estimator, &result, data, &budget, &settings)?),
                Err(failure) => warn!(model = %spec.key(), %failure, "reference model could not be fit; skipping its evaluation"),
            }
        }
    }

    let probabilities: Vec<f64> = detection.iter().map(|p| p.estimate).collect();
    if probabilities.is_empty() {
        warn!("no averaged detection probabilities; P* bootstrap skipped");
    }
    let sensitivity = run_sensitivity(
        (!probabilities.is_empty()).then_some(probabilities.as_slice()),
        &sensitivity_config(config),
    )?;

    Ok(AnalysisRun {
        ingest,
        candidates,
        selection,
        average,
        occupancy,
        detection,
        evaluations,
        sensitivity,
    })
}
