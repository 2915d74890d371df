//! Parallel fitting of many candidate specs.
//!
//! Each spec is fit independently on a dedicated rayon pool that lives only for
//! the fitting phase. A failing spec never aborts the batch: its `FitFailure`
//! is recorded and the spec is absent from the result map.
//!
//! Results are keyed by `ModelKey` in a `BTreeMap`, so the candidate set is the
//! same whatever the worker count or completion order.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::domain::{FitResult, ModelKey, ModelSpec, SiteData};
use crate::error::AppError;
use crate::fit::estimator::{Estimator, FitBudget, FitFailure};
use crate::fit::selection::score;

/// A spec that produced no result, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedFit {
    pub ordinal: usize,
    pub spec: ModelSpec,
    pub failure: FitFailure,
}

/// Successful fits keyed by spec identity, plus the recorded failures.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    results: BTreeMap<ModelKey, Arc<FitResult>>,
    failures: Vec<FailedFit>,
    attempted: usize,
}

impl CandidateSet {
    /// Build a set from already-scored results (first occurrence of a key wins).
    pub fn from_results<I: IntoIterator<Item = FitResult>>(results: I) -> Self {
        let mut set = Self::default();
        for result in results {
            set.attempted += 1;
            set.results.entry(result.key()).or_insert_with(|| Arc::new(result));
        }
        set
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn get(&self, key: &ModelKey) -> Option<&Arc<FitResult>> {
        self.results.get(key)
    }

    /// Results in key order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<FitResult>> {
        self.results.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ModelKey> {
        self.results.keys()
    }

    /// Failures in enumeration order.
    pub fn failures(&self) -> &[FailedFit] {
        &self.failures
    }

    /// Distinct specs that were attempted.
    pub fn attempted(&self) -> usize {
        self.attempted
    }
}

/// Fit every distinct spec on `workers` threads.
///
/// Duplicate specs (same key) are fit once, keeping the first enumeration
/// position. Only the pool construction can fail.
pub fn fit_all<E, I>(
    estimator: &E,
    specs: I,
    data: &SiteData,
    budget: &FitBudget,
    workers: usize,
) -> Result<CandidateSet, AppError>
where
    E: Estimator + ?Sized,
    I: IntoIterator<Item = ModelSpec>,
{
    let mut seen = HashSet::new();
    let jobs: Vec<(usize, ModelSpec)> = specs
        .into_iter()
        .enumerate()
        .filter(|(_, spec)| seen.insert(spec.key()))
        .collect();
    let attempted = jobs.len();

    let workers = workers.max(1);
    let started = Instant::now();
    info!(models = attempted, workers, "fitting candidate models");

    let outcomes: Vec<(usize, ModelSpec, Result<FitResult, FitFailure>)> = {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("occu-fit-{i}"))
            .build()
            .map_err(|e| AppError::new(4, format!("Failed to create worker pool: {e}")))?;

        pool.install(|| {
            jobs.into_par_iter()
                .map(|(ordinal, spec)| {
                    let outcome = estimator
                        .fit(&spec, data, budget)
                        .and_then(|model| score(ordinal, model));
                    (ordinal, spec, outcome)
                })
                .collect()
        })
        // The pool is dropped here; its threads do not outlive the fitting phase.
    };

    let mut results = BTreeMap::new();
    let mut failures = Vec::new();
    for (ordinal, spec, outcome) in outcomes {
        match outcome {
            Ok(result) => {
                results.insert(spec.key(), Arc::new(result));
            }
            Err(failure) => {
                debug!(model = %spec.key(), %failure, "fit failed");
                failures.push(FailedFit {
                    ordinal,
                    spec,
                    failure,
                });
            }
        }
    }
    failures.sort_by_key(|f| f.ordinal);

    info!(
        attempted,
        converged = results.len(),
        failed = failures.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "fitting phase complete"
    );

    Ok(CandidateSet {
        results,
        failures,
        attempted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CovariateSet, FittedModel};
    use crate::fit::enumerate::enumerate_specs;
    use crate::fit::estimator::MleEstimator;
    use crate::fit::estimator::tests::simulated_survey;

    /// Delegates to the MLE estimator but fails any spec using `noise` for
    /// detection.
    struct FlakyEstimator;

    impl Estimator for FlakyEstimator {
        fn fit(&self, spec: &ModelSpec, data: &SiteData, budget: &FitBudget) -> Result<FittedModel, FitFailure> {
            if spec.detection.contains("noise") {
                return Err(FitFailure::NonConvergence { iterations: 7 });
            }
            MleEstimator.fit(spec, data, budget)
        }
    }

    #[test]
    fn results_do_not_depend_on_worker_count() {
        let data = simulated_survey(120, 5, 11);
        let specs: Vec<ModelSpec> = enumerate_specs(data.universe(), 20).collect();
        let budget = FitBudget::default();

        let serial = fit_all(&MleEstimator, specs.clone(), &data, &budget, 1).unwrap();
        let parallel = fit_all(&MleEstimator, specs, &data, &budget, 4).unwrap();

        assert_eq!(serial.keys().collect::<Vec<_>>(), parallel.keys().collect::<Vec<_>>());
        for (a, b) in serial.iter().zip(parallel.iter()) {
            assert_eq!(a.ordinal, b.ordinal);
            let (x, y) = (a.aicc.unwrap(), b.aicc.unwrap());
            assert!((x - y).abs() < 1e-9, "{}: {x} vs {y}", a.key());
        }
        assert_eq!(serial.failures(), parallel.failures());
    }

    #[test]
    fn failures_are_isolated_and_recorded() {
        let data = simulated_survey(80, 4, 5);
        let specs: Vec<ModelSpec> = enumerate_specs(data.universe(), 49).collect();
        let set = fit_all(&FlakyEstimator, specs, &data, &FitBudget::default(), 3).unwrap();

        assert_eq!(set.attempted(), 49);
        assert_eq!(set.len() + set.failures().len(), 49);
        let injected = set
            .failures()
            .iter()
            .filter(|f| f.failure == FitFailure::NonConvergence { iterations: 7 })
            .count();
        // 4 detection subsets contain `noise`, each crossed with 7 occupancy subsets.
        assert_eq!(injected, 28);
        assert!(set.iter().all(|r| !r.spec().detection.contains("noise")));
        let ordinals: Vec<usize> = set.failures().iter().map(|f| f.ordinal).collect();
        let mut sorted = ordinals.clone();
        sorted.sort_unstable();
        assert_eq!(ordinals, sorted);
    }

    #[test]
    fn duplicate_specs_are_fit_once() {
        let data = simulated_survey(60, 4, 9);
        let spec = ModelSpec::new(CovariateSet::new(["open"]), CovariateSet::new(["dense"]));
        let set = fit_all(
            &MleEstimator,
            vec![spec.clone(), spec.clone(), spec],
            &data,
            &FitBudget::default(),
            2,
        )
        .unwrap();
        assert_eq!(set.attempted(), 1);
        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().next().unwrap().ordinal, 0);
    }
}
