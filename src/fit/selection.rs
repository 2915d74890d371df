//! Model ranking and confidence-set selection using AICc.
//!
//! For every converged candidate we compute
//!
//! ```text
//! AICc = -2 ln L + 2K + 2K(K + 1) / (n - K - 1)
//! ```
//!
//! with `n` the number of surveyed sites and `K` the parameter count.
//!
//! Selection rules:
//! 1. No converged candidates is fatal.
//! 2. Rank by AICc ascending; ties keep enumeration order.
//! 3. The confidence set is every candidate within 2 AICc units of the best.
//! 4. Fewer than 2 models in the confidence set is fatal: averaging a single
//!    model is not model averaging, and we do not silently fall back to it.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{FitResult, FittedModel, ModelSpec, SiteData};
use crate::fit::estimator::{Estimator, FitBudget, FitFailure};
use crate::fit::orchestrator::CandidateSet;

/// Width of the confidence set in AICc units.
pub const CONFIDENCE_DELTA: f64 = 2.0;

/// Minimum confidence-set size for model averaging.
pub const MIN_CONFIDENCE_SET: usize = 2;

/// Fatal selection outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionFailure {
    #[error("no candidate models converged")]
    NoConvergedModels,
    #[error("confidence set (delta AICc < 2) has {size} model(s); model averaging needs at least 2")]
    ConfidenceSetTooSmall { size: usize },
}

/// A candidate with its position in the ranking.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub result: Arc<FitResult>,
    /// 1-based rank.
    pub rank: usize,
    pub aicc: f64,
    pub delta: f64,
}

/// Ranking plus the confidence-set boundary.
#[derive(Debug, Clone)]
pub struct ModelSelection {
    ranked: Vec<RankedCandidate>,
    confidence_len: usize,
}

impl ModelSelection {
    pub fn ranked(&self) -> &[RankedCandidate] {
        &self.ranked
    }

    /// The rank-1 (minimum AICc) candidate.
    pub fn top(&self) -> &RankedCandidate {
        &self.ranked[0]
    }

    pub fn confidence_set(&self) -> &[RankedCandidate] {
        &self.ranked[..self.confidence_len]
    }
}

/// Sample-size corrected AIC. `None` when `n - K - 1 <= 0` or the
/// log-likelihood is not finite.
pub fn aicc(log_likelihood: f64, k: usize, n: usize) -> Option<f64> {
    if !log_likelihood.is_finite() || n <= k + 1 {
        return None;
    }
    let k_f = k as f64;
    let n_f = n as f64;
    Some(-2.0 * log_likelihood + 2.0 * k_f + 2.0 * k_f * (k_f + 1.0) / (n_f - k_f - 1.0))
}

/// Attach the information criterion to a fitted model.
///
/// A model whose AICc is undefined cannot be ranked and is reported as a
/// failure.
pub fn score(ordinal: usize, model: FittedModel) -> Result<FitResult, FitFailure> {
    let k = model.param_count();
    let n = model.n_sites;
    let criterion = aicc(model.log_likelihood, k, n).ok_or(FitFailure::UndefinedCriterion { n, k })?;
    Ok(FitResult {
        ordinal,
        model,
        n_params: k,
        aicc: Some(criterion),
    })
}

/// Rank every candidate by AICc (ascending, ties by enumeration order).
pub fn rank_candidates(set: &CandidateSet) -> Result<Vec<RankedCandidate>, SelectionFailure> {
    let mut scored: Vec<(f64, Arc<FitResult>)> = set
        .iter()
        .filter_map(|r| r.aicc.filter(|v| v.is_finite()).map(|v| (v, Arc::clone(r))))
        .collect();
    if scored.is_empty() {
        return Err(SelectionFailure::NoConvergedModels);
    }

    scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.ordinal.cmp(&b.1.ordinal)));
    let best = scored[0].0;

    Ok(scored
        .into_iter()
        .enumerate()
        .map(|(i, (aicc, result))| RankedCandidate {
            result,
            rank: i + 1,
            aicc,
            delta: aicc - best,
        })
        .collect())
}

/// Leading slice of `ranked` with delta below `CONFIDENCE_DELTA`.
///
/// `ranked` must come from `rank_candidates` (sorted by AICc).
pub fn confidence_set(ranked: &[RankedCandidate]) -> Result<&[RankedCandidate], SelectionFailure> {
    let size = ranked.iter().take_while(|c| c.delta < CONFIDENCE_DELTA).count();
    if size < MIN_CONFIDENCE_SET {
        return Err(SelectionFailure::ConfidenceSetTooSmall { size });
    }
    Ok(&ranked[..size])
}

/// Rank candidates and select the confidence set.
pub fn select(set: &CandidateSet) -> Result<ModelSelection, SelectionFailure> {
    let ranked = rank_candidates(set)?;
    let confidence_len = confidence_set(&ranked)?.len();

    info!(
        candidates = ranked.len(),
        confidence_set = confidence_len,
        top = %ranked[0].result.key(),
        top_aicc = ranked[0].aicc,
        "model selection complete"
    );
    Ok(ModelSelection {
        ranked,
        confidence_len,
    })
}

/// Fit result for a named model: taken from the candidate set when it was
/// enumerated, otherwise fitted on demand.
pub fn reference_model<E: Estimator + ?Sized>(
    set: &CandidateSet,
    estimator: &E,
    spec: &ModelSpec,
    data: &SiteData,
    budget: &FitBudget,
) -> Result<Arc<FitResult>, FitFailure> {
    if let Some(found) = set.get(&spec.key()) {
        return Ok(Arc::clone(found));
    }
    debug!(model = %spec.key(), "reference model not among candidates; fitting it");
    let model = estimator.fit(spec, data, budget)?;
    score(usize::MAX, model).map(Arc::new)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{Coefficient, CovariateSet};
    use crate::fit::estimator::MleEstimator;
    use crate::fit::estimator::tests::simulated_survey;
    use nalgebra::DMatrix;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls before delegating to the MLE estimator.
    #[derive(Default)]
    struct CountingEstimator {
        calls: AtomicUsize,
    }

    impl Estimator for CountingEstimator {
        fn fit(&self, spec: &ModelSpec, data: &SiteData, budget: &FitBudget) -> Result<FittedModel, FitFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            MleEstimator.fit(spec, data, budget)
        }
    }

    /// A synthetic result with a chosen AICc; slopes are 0.5 (p) and 1.0 (psi).
    pub(crate) fn result_with_aicc(ordinal: usize, det: &[&str], occ: &[&str], aicc_value: f64) -> FitResult {
        let spec = ModelSpec::new(CovariateSet::new(det.iter().copied()), CovariateSet::new(occ.iter().copied()));
        let coef = |name: String, estimate: f64| Coefficient {
            name,
            estimate,
            std_error: 0.1,
        };
        let detection: Vec<Coefficient> = std::iter::once(coef("p(Int)".into(), 0.0))
            .chain(spec.detection.iter().map(|c| coef(format!("p({c})"), 0.5)))
            .collect();
        let occupancy: Vec<Coefficient> = std::iter::once(coef("psi(Int)".into(), 0.0))
            .chain(spec.occupancy.iter().map(|c| coef(format!("psi({c})"), 1.0)))
            .collect();
        let k = detection.len() + occupancy.len();
        FitResult {
            ordinal,
            model: FittedModel {
                spec,
                detection,
                occupancy,
                vcov: DMatrix::identity(k, k) * 0.01,
                log_likelihood: 0.0,
                n_sites: 100,
                iterations: 1,
            },
            n_params: k,
            aicc: Some(aicc_value),
        }
    }

    #[test]
    fn aicc_penalizes_small_samples() {
        let a = aicc(-50.0, 3, 20).unwrap();
        // -2ll + 2k + 2k(k+1)/(n-k-1) = 100 + 6 + 24/16
        assert!((a - 107.5).abs() < 1e-12);
        assert_eq!(aicc(-50.0, 3, 4), None);
        assert_eq!(aicc(f64::NAN, 3, 40), None);
    }

    #[test]
    fn score_rejects_undefined_criterion() {
        let mut fit = result_with_aicc(0, &["a"], &["b"], 0.0).model;
        fit.n_sites = 3;
        let err = score(0, fit).unwrap_err();
        assert_eq!(err, FitFailure::UndefinedCriterion { n: 3, k: 4 });
    }

    #[test]
    fn empty_set_fails() {
        let set = CandidateSet::default();
        assert_eq!(rank_candidates(&set).unwrap_err(), SelectionFailure::NoConvergedModels);
        assert_eq!(select(&set).unwrap_err(), SelectionFailure::NoConvergedModels);
    }

    #[test]
    fn single_member_confidence_set_fails() {
        let set = CandidateSet::from_results([
            result_with_aicc(0, &["a"], &["a"], 100.0),
            result_with_aicc(1, &["a"], &["b"], 102.5),
            result_with_aicc(2, &["b"], &["a"], 110.0),
        ]);
        assert_eq!(
            select(&set).unwrap_err(),
            SelectionFailure::ConfidenceSetTooSmall { size: 1 }
        );

        // The ranking itself is still available for the top model.
        let ranked = rank_candidates(&set).unwrap();
        assert_eq!(ranked[0].result.key().as_str(), "p(a) psi(a)");
    }

    #[test]
    fn confidence_set_uses_strict_delta() {
        let set = CandidateSet::from_results([
            result_with_aicc(0, &["a"], &["a"], 100.0),
            result_with_aicc(1, &["a"], &["b"], 101.9),
            result_with_aicc(2, &["b"], &["a"], 102.0),
        ]);
        let selection = select(&set).unwrap();
        assert_eq!(selection.confidence_set().len(), 2);
        assert_eq!(selection.ranked().len(), 3);
        assert_eq!(selection.top().rank, 1);
        assert!((selection.ranked()[2].delta - 2.0).abs() < 1e-12);
    }

    #[test]
    fn ties_keep_enumeration_order() {
        let set = CandidateSet::from_results([
            result_with_aicc(5, &["a"], &["a"], 100.0),
            result_with_aicc(2, &["b"], &["b"], 100.0),
            result_with_aicc(9, &["a"], &["b"], 100.0),
        ]);
        let ranked = rank_candidates(&set).unwrap();
        let ordinals: Vec<usize> = ranked.iter().map(|c| c.result.ordinal).collect();
        assert_eq!(ordinals, vec![2, 5, 9]);
    }

    #[test]
    fn reference_model_reuses_enumerated_candidates() {
        let data = simulated_survey(60, 4, 2);
        let set = CandidateSet::from_results([result_with_aicc(3, &["open"], &["dense"], 100.0)]);
        let estimator = CountingEstimator::default();
        let spec = ModelSpec::parse("~open ~dense").unwrap();

        let found = reference_model(&set, &estimator, &spec, &data, &FitBudget::default()).unwrap();
        assert_eq!(found.ordinal, 3);
        assert_eq!(estimator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reference_model_fits_specs_outside_the_candidates() {
        let data = simulated_survey(120, 4, 2);
        let set = CandidateSet::from_results([result_with_aicc(0, &["open"], &["dense"], 100.0)]);
        let estimator = CountingEstimator::default();
        let spec = ModelSpec::parse("~1 ~1").unwrap();

        let fitted = reference_model(&set, &estimator, &spec, &data, &FitBudget::default()).unwrap();
        assert_eq!(estimator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fitted.key().as_str(), "p(1) psi(1)");
        assert_eq!(fitted.n_params, 2);
        assert!(fitted.aicc.is_some_and(f64::is_finite));
        assert!(set.get(&spec.key()).is_none());
    }
}
