//! The single-model fitting capability.
//!
//! Everything above this module (orchestrator, selector, evaluators) talks to
//! an `Estimator`, never to the likelihood directly. A fit either returns a
//! `FittedModel` or a `FitFailure`; failures are values, not panics, so the
//! caller decides whether they are fatal.
//!
//! `MleEstimator` maximizes the occupancy likelihood with damped Newton steps:
//!
//! - start at θ = 0 (ψ = p = 0.5)
//! - Hessian by central differences of the analytic gradient
//! - step = `(-H + λI)⁻¹ g`, halved until the log-likelihood does not decrease
//! - stop when the largest gradient component falls below `GRAD_TOL`
//!
//! The covariance matrix is the inverse of the observed information at the
//! optimum; a non-invertible information matrix is reported as a failure.

use std::time::{Duration, Instant};

use nalgebra::DVector;
use thiserror::Error;

use crate::domain::{FittedModel, ModelSpec, SiteData};
use crate::math::{invert_spd, solve_damped};
use crate::models::{Likelihood, coefficients};

/// Convergence threshold on `max |∂ℓ/∂θ|`.
const GRAD_TOL: f64 = 1e-6;

/// Relative log-likelihood change treated as converged.
const LL_TOL: f64 = 1e-11;

/// Maximum number of step halvings per iteration.
const MAX_HALVINGS: usize = 40;

/// Logit magnitude beyond which we stop trusting the fit.
const MAX_ABS_LOGIT: f64 = 40.0;

/// Why a single fit produced no result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitFailure {
    #[error("did not converge after {iterations} iterations")]
    NonConvergence { iterations: usize },
    #[error("singular information matrix at the optimum")]
    SingularHessian,
    #[error("numerical overflow: {0}")]
    NumericalOverflow(String),
    #[error("exceeded the {0:?} time budget")]
    Timeout(Duration),
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("information criterion undefined (n={n}, k={k})")]
    UndefinedCriterion { n: usize, k: usize },
}

/// Per-fit resource bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitBudget {
    pub max_iterations: usize,
    /// Wall-clock limit, checked once per iteration.
    pub timeout: Option<Duration>,
}

impl Default for FitBudget {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Capability to fit one occupancy model.
///
/// Implementations must be `Sync`: the orchestrator shares one estimator across
/// all workers.
pub trait Estimator: Sync {
    fn fit(&self, spec: &ModelSpec, data: &SiteData, budget: &FitBudget) -> Result<FittedModel, FitFailure>;
}

/// Maximum-likelihood estimator for the single-season occupancy model.
#[derive(Debug, Clone, Copy, Default)]
pub struct MleEstimator;

impl Estimator for MleEstimator {
    fn fit(&self, spec: &ModelSpec, data: &SiteData, budget: &FitBudget) -> Result<FittedModel, FitFailure> {
        let started = Instant::now();
        let n = data.effective_sites();
        let k = spec.param_count();
        if n < k {
            return Err(FitFailure::InsufficientData(format!(
                "{n} surveyed sites for {k} parameters"
            )));
        }
        if !data.sites().iter().any(|s| s.ever_detected()) {
            return Err(FitFailure::InsufficientData(
                "species never detected; detection is not identifiable".to_string(),
            ));
        }

        let lik = Likelihood::new(spec, data)
            .map_err(|name| FitFailure::InsufficientData(format!("missing covariate '{name}'")))?;

        let mut theta = DVector::<f64>::zeros(lik.param_count());
        let (mut ll, mut grad) = lik
            .evaluate(&theta)
            .ok_or_else(|| FitFailure::NumericalOverflow("non-finite likelihood at start".to_string()))?;

        let mut iterations = 0;
        let mut converged = grad.amax() < GRAD_TOL;
        while !converged {
            if iterations >= budget.max_iterations {
                return Err(FitFailure::NonConvergence { iterations });
            }
            if let Some(limit) = budget.timeout {
                if started.elapsed() > limit {
                    return Err(FitFailure::Timeout(limit));
                }
            }
            iterations += 1;

            let hess = lik
                .hessian(&theta)
                .ok_or_else(|| FitFailure::NumericalOverflow("non-finite Hessian".to_string()))?;
            let step = solve_damped(&(-hess), &grad).ok_or(FitFailure::SingularHessian)?;

            let mut scale = 1.0;
            let mut accepted = None;
            for _ in 0..MAX_HALVINGS {
                let candidate = &theta + &step * scale;
                if let Some((ll_new, grad_new)) = lik.evaluate(&candidate) {
                    if ll_new >= ll - 1e-12 * (1.0 + ll.abs()) {
                        accepted = Some((candidate, ll_new, grad_new));
                        break;
                    }
                }
                scale *= 0.5;
            }
            let Some((next, ll_new, grad_new)) = accepted else {
                return Err(FitFailure::NonConvergence { iterations });
            };

            let ll_change = (ll_new - ll).abs();
            theta = next;
            ll = ll_new;
            grad = grad_new;

            if theta.amax() > MAX_ABS_LOGIT {
                return Err(FitFailure::NumericalOverflow(format!(
                    "estimate diverged beyond |logit| > {MAX_ABS_LOGIT}"
                )));
            }
            converged = grad.amax() < GRAD_TOL || ll_change < LL_TOL * (1.0 + ll.abs());
        }

        let hess = lik
            .hessian(&theta)
            .ok_or_else(|| FitFailure::NumericalOverflow("non-finite Hessian at optimum".to_string()))?;
        let vcov = invert_spd(&(-hess)).ok_or(FitFailure::SingularHessian)?;
        let (detection, occupancy) = coefficients(spec, &theta, &vcov);

        Ok(FittedModel {
            spec: spec.clone(),
            detection,
            occupancy,
            vcov,
            log_likelihood: ll,
            n_sites: n,
            iterations,
        })
    }
}
