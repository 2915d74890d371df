//! Single-season occupancy model (MacKenzie et al. 2002) with site covariates.
//!
//! For site `i` with `J_i` observed occasions and `d_i` detections:
//!
//! ```text
//! ψ_i = inv_logit(x_i β)      (occupancy)
//! p_i = inv_logit(v_i α)      (per-survey detection)
//!
//! d_i > 0:  L_i = ψ_i p_i^d_i (1 - p_i)^(J_i - d_i)
//! d_i = 0:  L_i = ψ_i (1 - p_i)^J_i + (1 - ψ_i)
//! ```
//!
//! Sites with no observed occasion contribute nothing.
//!
//! The fitting primitives live here (design matrices, log-likelihood and its
//! gradient); the search loop lives in `fit::estimator`. Prediction, simulation
//! and residuals are implemented on `FittedModel`.

use nalgebra::{DMatrix, DVector};
use rand::Rng;

use crate::domain::{Coefficient, CovariateSet, FittedModel, ModelSpec, Prediction, PredictionKind, SiteData};
use crate::math::{inv_logit, log1m_inv_logit, log_inv_logit};

/// Normal quantile for two-sided 95% intervals.
pub const Z_95: f64 = 1.959_963_984_540_054;

/// Build the design matrix for one linear predictor: intercept column first,
/// then one column per covariate in canonical order.
///
/// Returns the name of the first missing covariate on failure.
pub fn design_matrix(data: &SiteData, covariates: &CovariateSet) -> Result<DMatrix<f64>, String> {
    let n = data.len();
    let k = covariates.len() + 1;
    let mut x = DMatrix::<f64>::zeros(n, k);
    for (i, site) in data.sites().iter().enumerate() {
        x[(i, 0)] = 1.0;
        for (j, name) in covariates.iter().enumerate() {
            let v = site
                .covariate(name)
                .filter(|v| v.is_finite())
                .ok_or_else(|| name.to_string())?;
            x[(i, j + 1)] = v;
        }
    }
    Ok(x)
}

/// Parameter names in parameter-vector order for one predictor.
pub fn parameter_names(kind: PredictionKind, covariates: &CovariateSet) -> Vec<String> {
    let prefix = kind.prefix();
    std::iter::once(format!("{prefix}(Int)"))
        .chain(covariates.iter().map(|c| format!("{prefix}({c})")))
        .collect()
}

/// Log-likelihood of a spec on a dataset, evaluated at arbitrary parameters.
#[derive(Debug, Clone)]
pub struct Likelihood {
    xp: DMatrix<f64>,
    xpsi: DMatrix<f64>,
    detections: Vec<f64>,
    occasions: Vec<f64>,
}

impl Likelihood {
    pub fn new(spec: &ModelSpec, data: &SiteData) -> Result<Self, String> {
        let xp = design_matrix(data, &spec.detection)?;
        let xpsi = design_matrix(data, &spec.occupancy)?;
        let detections = data.sites().iter().map(|s| s.detection_count() as f64).collect();
        let occasions = data.sites().iter().map(|s| s.observed_occasions() as f64).collect();
        Ok(Self {
            xp,
            xpsi,
            detections,
            occasions,
        })
    }

    pub fn param_count(&self) -> usize {
        self.xp.ncols() + self.xpsi.ncols()
    }

    /// Log-likelihood and gradient at `theta`.
    ///
    /// Returns `None` if anything along the way is non-finite.
    pub fn evaluate(&self, theta: &DVector<f64>) -> Option<(f64, DVector<f64>)> {
        let kp = self.xp.ncols();
        let alpha = theta.rows(0, kp);
        let beta = theta.rows(kp, self.xpsi.ncols());
        let eta_p = &self.xp * alpha;
        let eta_psi = &self.xpsi * beta;

        let mut ll = 0.0;
        let mut d_eta_p = DVector::<f64>::zeros(eta_p.len());
        let mut d_eta_psi = DVector::<f64>::zeros(eta_psi.len());

        for i in 0..self.detections.len() {
            let j = self.occasions[i];
            if j == 0.0 {
                continue;
            }
            let d = self.detections[i];
            let (ep, epsi) = (eta_p[i], eta_psi[i]);
            let p = inv_logit(ep);
            let psi = inv_logit(epsi);
            let log_p = log_inv_logit(ep);
            let log_q = log1m_inv_logit(ep);
            let log_psi = log_inv_logit(epsi);

            // `a` is the posterior probability that the site is occupied.
            let (ll_i, a) = if d > 0.0 {
                (log_psi + d * log_p + (j - d) * log_q, 1.0)
            } else {
                let occupied = log_psi + j * log_q;
                let empty = log1m_inv_logit(epsi);
                let m = occupied.max(empty);
                let log_l = m + ((occupied - m).exp() + (empty - m).exp()).ln();
                (log_l, (occupied - log_l).exp())
            };

            ll += ll_i;
            d_eta_psi[i] = a - psi;
            d_eta_p[i] = a * (d - j * p);
        }

        let grad_alpha = self.xp.transpose() * d_eta_p;
        let grad_beta = self.xpsi.transpose() * d_eta_psi;
        let mut grad = DVector::<f64>::zeros(self.param_count());
        grad.rows_mut(0, kp).copy_from(&grad_alpha);
        grad.rows_mut(kp, self.xpsi.ncols()).copy_from(&grad_beta);

        if ll.is_finite() && grad.iter().all(|g| g.is_finite()) {
            Some((ll, grad))
        } else {
            None
        }
    }

    /// Hessian of the log-likelihood by central differences of the analytic
    /// gradient.
    pub fn hessian(&self, theta: &DVector<f64>) -> Option<DMatrix<f64>> {
        let k = theta.len();
        let mut h = DMatrix::<f64>::zeros(k, k);
        for c in 0..k {
            let step = 1e-5 * (1.0 + theta[c].abs());
            let mut up = theta.clone();
            let mut down = theta.clone();
            up[c] += step;
            down[c] -= step;
            let (_, g_up) = self.evaluate(&up)?;
            let (_, g_down) = self.evaluate(&down)?;
            let col = (g_up - g_down) / (2.0 * step);
            h.set_column(c, &col);
        }
        Some(crate::math::symmetrize(&h))
    }
}

/// Build named coefficients from a parameter vector and its covariance.
pub fn coefficients(
    spec: &ModelSpec,
    theta: &DVector<f64>,
    vcov: &DMatrix<f64>,
) -> (Vec<Coefficient>, Vec<Coefficient>) {
    let det_names = parameter_names(PredictionKind::Detection, &spec.detection);
    let occ_names = parameter_names(PredictionKind::Occupancy, &spec.occupancy);
    let offset = det_names.len();
    let make = |names: Vec<String>, start: usize| -> Vec<Coefficient> {
        names
            .into_iter()
            .enumerate()
            .map(|(j, name)| Coefficient {
                name,
                estimate: theta[start + j],
                std_error: vcov[(start + j, start + j)].max(0.0).sqrt(),
            })
            .collect()
    };
    (make(det_names, 0), make(occ_names, offset))
}

impl FittedModel {
    fn block(&self, kind: PredictionKind) -> (&[Coefficient], &CovariateSet, usize) {
        match kind {
            PredictionKind::Detection => (&self.detection, &self.spec.detection, 0),
            PredictionKind::Occupancy => (&self.occupancy, &self.spec.occupancy, self.detection.len()),
        }
    }

    /// Per-site predicted probabilities with delta-method standard errors and
    /// 95% bounds from the logit scale.
    pub fn predict(&self, kind: PredictionKind, data: &SiteData) -> Result<Vec<Prediction>, String> {
        let (coefs, covariates, offset) = self.block(kind);
        let x = design_matrix(data, covariates)?;
        let k = coefs.len();
        let beta = DVector::from_iterator(k, coefs.iter().map(|c| c.estimate));
        let cov = self.vcov.view((offset, offset), (k, k));

        let mut out = Vec::with_capacity(data.len());
        for i in 0..x.nrows() {
            let row = x.row(i).transpose();
            let eta = row.dot(&beta);
            let var = (row.transpose() * cov * &row)[(0, 0)];
            let se_eta = var.max(0.0).sqrt();
            let prob = inv_logit(eta);
            out.push(Prediction {
                estimate: prob,
                std_error: prob * (1.0 - prob) * se_eta,
                lower: inv_logit(eta - Z_95 * se_eta),
                upper: inv_logit(eta + Z_95 * se_eta),
                logit: eta,
                logit_se: se_eta,
            });
        }
        Ok(out)
    }

    /// Point estimates of (ψ_i, p_i) for every site.
    pub fn site_probabilities(&self, data: &SiteData) -> Result<Vec<(f64, f64)>, String> {
        let psi = self.predict(PredictionKind::Occupancy, data)?;
        let p = self.predict(PredictionKind::Detection, data)?;
        Ok(psi.iter().zip(&p).map(|(a, b)| (a.estimate, b.estimate)).collect())
    }

    /// Expected value `ψ_i p_i` for every observed occasion (`None` where the
    /// occasion is missing).
    pub fn expected_detections(&self, data: &SiteData) -> Result<Vec<Vec<Option<f64>>>, String> {
        let probs = self.site_probabilities(data)?;
        Ok(data
            .sites()
            .iter()
            .zip(probs)
            .map(|(site, (psi, p))| site.detections.iter().map(|y| y.map(|_| psi * p)).collect())
            .collect())
    }

    /// Pearson residuals `(y - ψp) / sqrt(ψp (1 - ψp))` over observed occasions.
    pub fn pearson_residuals(&self, data: &SiteData) -> Result<Vec<f64>, String> {
        let expected = self.expected_detections(data)?;
        let mut out = Vec::new();
        for (site, row) in data.sites().iter().zip(expected) {
            for (y, mu) in site.detections.iter().zip(row) {
                if let (Some(y), Some(mu)) = (y, mu) {
                    let var = (mu * (1.0 - mu)).max(1e-12);
                    out.push((f64::from(*y) - mu) / var.sqrt());
                }
            }
        }
        Ok(out)
    }

    /// Draw a synthetic dataset from the fitted model: latent occupancy per
    /// site, then detections on the occasions that were observed in `data`.
    pub fn simulate<R: Rng + ?Sized>(&self, data: &SiteData, rng: &mut R) -> Result<SiteData, String> {
        let probs = self.site_probabilities(data)?;
        let histories = data
            .sites()
            .iter()
            .zip(probs)
            .map(|(site, (psi, p))| {
                let occupied = rng.gen_bool(psi.clamp(0.0, 1.0));
                let p = if occupied { p.clamp(0.0, 1.0) } else { 0.0 };
                site.detections
                    .iter()
                    .map(|y| y.map(|_| u8::from(rng.gen_bool(p))))
                    .collect()
            })
            .collect();
        Ok(data.with_detections(histories))
    }
}
