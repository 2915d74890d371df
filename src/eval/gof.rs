//! Goodness of fit by parametric bootstrap (MacKenzie & Bailey 2004 style).
//!
//! Datasets are simulated from one seeded RNG and refit in order on the
//! calling thread, so the outcome depends only on the seed.

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;

use crate::domain::{FittedModel, SiteData};
use crate::eval::EvaluationFailure;
use crate::fit::estimator::{Estimator, FitBudget};
use crate::math::mean;

const RELY_ON_CV: &str = "rely on the cross-validated prediction error instead";

/// Result of a successful bootstrap.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GofTest {
    /// Freeman–Tukey statistic of the observed data.
    pub statistic: f64,
    /// Share of simulated statistics at least as large as `statistic`.
    pub p_value: f64,
    pub simulated_mean: f64,
    /// Observed Pearson χ² over the mean simulated χ².
    pub c_hat: f64,
    pub simulations: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GofOutcome {
    Available(GofTest),
    Unavailable { reason: String, recommendation: String },
}

impl GofOutcome {
    fn unavailable(reason: impl Into<String>) -> Self {
        GofOutcome::Unavailable {
            reason: reason.into(),
            recommendation: RELY_ON_CV.to_string(),
        }
    }

    pub fn test(&self) -> Result<&GofTest, EvaluationFailure> {
        match self {
            GofOutcome::Available(test) => Ok(test),
            GofOutcome::Unavailable { reason, .. } => Err(EvaluationFailure::BootstrapUnavailable(reason.clone())),
        }
    }
}

/// Freeman–Tukey statistic `Σ (√y - √(ψp))²` over observed occasions.
pub fn freeman_tukey(model: &FittedModel, data: &SiteData) -> Result<f64, String> {
    let expected = model.expected_detections(data)?;
    let mut total = 0.0;
    for (site, row) in data.sites().iter().zip(expected) {
        for (y, mu) in site.detections.iter().zip(row) {
            if let (Some(y), Some(mu)) = (y, mu) {
                total += (f64::from(*y).sqrt() - mu.max(0.0).sqrt()).powi(2);
            }
        }
    }
    Ok(total)
}

/// Pearson χ², the sum of squared Pearson residuals.
pub fn pearson_chi_square(model: &FittedModel, data: &SiteData) -> Result<f64, String> {
    Ok(model.pearson_residuals(data)?.iter().map(|r| r * r).sum())
}

/// Overdispersion ĉ = χ² / (sites - parameters).
///
/// `None` when the residual degrees of freedom are not positive.
pub fn overdispersion(model: &FittedModel, data: &SiteData) -> Option<f64> {
    let df = data.effective_sites() as i64 - model.param_count() as i64;
    if df <= 0 {
        return None;
    }
    let chi = pearson_chi_square(model, data).ok()?;
    let c_hat = chi / df as f64;
    c_hat.is_finite().then_some(c_hat)
}

/// Simulate `simulations` datasets from `model`, refit each with the same spec
/// and compare Freeman–Tukey statistics.
pub fn parametric_bootstrap<E: Estimator + ?Sized>(
    estimator: &E,
    model: &FittedModel,
    data: &SiteData,
    budget: &FitBudget,
    simulations: usize,
    seed: u64,
) -> GofOutcome {
    if simulations == 0 {
        return GofOutcome::unavailable("no bootstrap simulations requested");
    }
    let (observed, observed_chi) = match (freeman_tukey(model, data), pearson_chi_square(model, data)) {
        (Ok(ft), Ok(chi)) => (ft, chi),
        (Err(missing), _) | (_, Err(missing)) => {
            return GofOutcome::unavailable(format!("missing covariate '{missing}'"));
        }
    };

    let mut rng = StdRng::seed_from_u64(seed);
    let mut datasets = Vec::with_capacity(simulations);
    for _ in 0..simulations {
        match model.simulate(data, &mut rng) {
            Ok(sim) => datasets.push(sim),
            Err(missing) => return GofOutcome::unavailable(format!("missing covariate '{missing}'")),
        }
    }

    let stats: Vec<Option<(f64, f64)>> = datasets
        .iter()
        .map(|sim| {
            let refit = estimator.fit(&model.spec, sim, budget).ok()?;
            let ft = freeman_tukey(&refit, sim).ok()?;
            let chi = pearson_chi_square(&refit, sim).ok()?;
            (ft.is_finite() && chi.is_finite()).then_some((ft, chi))
        })
        .collect();

    let (ft_sim, chi_sim): (Vec<f64>, Vec<f64>) = stats.into_iter().flatten().unzip();
    let failed = simulations - ft_sim.len();
    let (Some(simulated_mean), Some(chi_mean)) = (mean(&ft_sim), mean(&chi_sim)) else {
        return GofOutcome::unavailable(format!("all {simulations} bootstrap refits failed"));
    };

    let exceed = ft_sim.iter().filter(|&&s| s >= observed).count();
    GofOutcome::Available(GofTest {
        statistic: observed,
        p_value: exceed as f64 / ft_sim.len() as f64,
        simulated_mean,
        c_hat: observed_chi / chi_mean,
        simulations: ft_sim.len(),
        failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CovariateSet, ModelSpec};
    use crate::fit::estimator::tests::simulated_survey;
    use crate::fit::estimator::{FitFailure, MleEstimator};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::thread::ThreadId;

    struct AlwaysFails;

    impl Estimator for AlwaysFails {
        fn fit(&self, _: &ModelSpec, _: &SiteData, _: &FitBudget) -> Result<FittedModel, FitFailure> {
            Err(FitFailure::SingularHessian)
        }
    }

    /// Delegates to the MLE estimator and records which threads called it.
    #[derive(Default)]
    struct ThreadRecorder {
        threads: Mutex<HashSet<ThreadId>>,
    }

    impl Estimator for ThreadRecorder {
        fn fit(&self, spec: &ModelSpec, data: &SiteData, budget: &FitBudget) -> Result<FittedModel, FitFailure> {
            self.threads.lock().unwrap().insert(std::thread::current().id());
            MleEstimator.fit(spec, data, budget)
        }
    }

    fn fitted(data: &SiteData) -> FittedModel {
        let spec = ModelSpec::new(CovariateSet::new(["open"]), CovariateSet::new(["dense"]));
        MleEstimator.fit(&spec, data, &FitBudget::default()).unwrap()
    }

    #[test]
    fn bootstrap_reports_a_p_value() {
        let data = simulated_survey(150, 5, 12);
        let model = fitted(&data);
        let outcome = parametric_bootstrap(&MleEstimator, &model, &data, &FitBudget::default(), 30, 42);

        let test = outcome.test().unwrap();
        assert_eq!(test.simulations + test.failed, 30);
        assert!((0.0..=1.0).contains(&test.p_value));
        assert!(test.statistic > 0.0 && test.simulated_mean > 0.0);
        assert!(test.c_hat.is_finite() && test.c_hat > 0.0);
    }

    #[test]
    fn bootstrap_is_reproducible() {
        let data = simulated_survey(80, 4, 3);
        let model = fitted(&data);
        let a = parametric_bootstrap(&MleEstimator, &model, &data, &FitBudget::default(), 10, 7);
        let b = parametric_bootstrap(&MleEstimator, &model, &data, &FitBudget::default(), 10, 7);
        assert_eq!(a, b);
    }

    #[test]
    fn bootstrap_refits_stay_on_the_calling_thread() {
        let data = simulated_survey(80, 4, 8);
        let model = fitted(&data);
        let recorder = ThreadRecorder::default();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap();

        let caller = pool.install(|| {
            parametric_bootstrap(&recorder, &model, &data, &FitBudget::default(), 40, 42);
            std::thread::current().id()
        });

        let threads = recorder.threads.into_inner().unwrap();
        assert_eq!(threads.len(), 1, "refits ran on {} threads", threads.len());
        assert!(threads.contains(&caller));
    }

    #[test]
    fn bootstrap_without_successful_refits_is_unavailable() {
        let data = simulated_survey(60, 4, 5);
        let model = fitted(&data);
        let outcome = parametric_bootstrap(&AlwaysFails, &model, &data, &FitBudget::default(), 10, 42);
        match &outcome {
            GofOutcome::Unavailable { reason, recommendation } => {
                assert!(reason.contains("all 10 bootstrap refits failed"));
                assert!(recommendation.contains("cross-validated"));
            }
            other => panic!("expected unavailable, got {other:?}"),
        }
        assert!(matches!(outcome.test(), Err(EvaluationFailure::BootstrapUnavailable(_))));
    }

    #[test]
    fn overdispersion_needs_positive_degrees_of_freedom() {
        let data = simulated_survey(100, 4, 6);
        let model = fitted(&data);
        assert!(overdispersion(&model, &data).is_some_and(|c| c > 0.0));

        let tiny = data.subset(&[0, 1, 2, 3]);
        assert_eq!(overdispersion(&model, &tiny), None);
    }
}
