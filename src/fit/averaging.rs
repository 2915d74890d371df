//! Multi-model averaging over the confidence set.
//!
//! Weights are Akaike weights over the set, `w_i ∝ exp(-Δ_i / 2)`.
//!
//! For a parameter θ:
//!
//! ```text
//! full         θ̄  = Σ w_i θ_i                      (θ_i = 0 where absent)
//! conditional  θ̃  = Σ_{i∋θ} w_i θ_i / Σ_{i∋θ} w_i
//! SE(θ̄)²          = Σ w_i (SE_i² + (θ_i - θ̄)²)
//! ```
//!
//! The conditional SE uses the same formula over the models containing θ with
//! renormalized weights.

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::domain::{Coefficient, ModelKey, Prediction, PredictionKind, SiteData};
use crate::fit::selection::RankedCandidate;
use crate::math::inv_logit;
use crate::models::Z_95;

/// Shape disagreement between predictions and weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DimensionMismatch {
    #[error("prediction matrix has {columns} model column(s) but {weights} weight(s)")]
    ModelColumns { columns: usize, weights: usize },
    #[error("model column {column} has {found} site row(s), expected {expected}")]
    SiteRows { column: usize, expected: usize, found: usize },
}

/// Model-averaged value of one named parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AveragedEstimate {
    pub parameter: String,
    pub full_estimate: f64,
    pub full_std_error: f64,
    pub conditional_estimate: f64,
    pub conditional_std_error: f64,
    /// Number of averaged models containing the parameter.
    pub models: usize,
    /// Summed weight of those models (relative variable importance).
    pub importance: f64,
}

/// Model-averaged per-site probability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AveragedPrediction {
    pub estimate: f64,
    pub std_error: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Averaged parameters with the weights that produced them.
#[derive(Debug, Clone, Serialize)]
pub struct ModelAverage {
    pub weights: Vec<(ModelKey, f64)>,
    pub estimates: Vec<AveragedEstimate>,
}

/// Akaike weights `exp(-Δ/2)` normalized to sum to 1.
pub fn akaike_weights(deltas: &[f64]) -> Vec<f64> {
    let raw: Vec<f64> = deltas.iter().map(|d| (-0.5 * d).exp()).collect();
    let total: f64 = raw.iter().sum();
    raw.into_iter().map(|w| w / total).collect()
}

/// Average named coefficients across models with the given weights.
///
/// `models[i]` holds model `i`'s coefficients. Parameters are reported
/// detection first, then occupancy; intercepts lead each block, slopes keep
/// the order in which they first appear.
pub fn average_coefficients(
    weights: &[f64],
    models: &[Vec<Coefficient>],
) -> Result<Vec<AveragedEstimate>, DimensionMismatch> {
    if weights.len() != models.len() {
        return Err(DimensionMismatch::ModelColumns {
            columns: models.len(),
            weights: weights.len(),
        });
    }

    let mut names: Vec<&str> = Vec::new();
    for coef in models.iter().flatten() {
        if !names.contains(&coef.name.as_str()) {
            names.push(&coef.name);
        }
    }
    names.sort_by_key(|name| parameter_order(name));

    Ok(names
        .into_iter()
        .map(|name| {
            let found: Vec<(f64, Option<&Coefficient>)> = weights
                .iter()
                .zip(models)
                .map(|(&w, coefs)| (w, coefs.iter().find(|c| c.name == name)))
                .collect();

            let full: f64 = found
                .iter()
                .map(|(w, c)| w * c.map_or(0.0, |c| c.estimate))
                .sum();
            let full_var: f64 = found
                .iter()
                .map(|(w, c)| {
                    let (est, se) = c.map_or((0.0, 0.0), |c| (c.estimate, c.std_error));
                    w * (se * se + (est - full).powi(2))
                })
                .sum();

            let present: Vec<(f64, &Coefficient)> = found
                .iter()
                .filter_map(|(w, c)| c.map(|c| (*w, c)))
                .collect();
            let importance: f64 = present.iter().map(|(w, _)| w).sum();
            let conditional = present.iter().map(|(w, c)| w * c.estimate).sum::<f64>() / importance;
            let conditional_var = present
                .iter()
                .map(|(w, c)| (w / importance) * (c.std_error.powi(2) + (c.estimate - conditional).powi(2)))
                .sum::<f64>();

            AveragedEstimate {
                parameter: name.to_string(),
                full_estimate: full,
                full_std_error: full_var.sqrt(),
                conditional_estimate: conditional,
                conditional_std_error: conditional_var.sqrt(),
                models: present.len(),
                importance,
            }
        })
        .collect())
}

/// Sort key: detection block before occupancy, intercept first within a block.
fn parameter_order(name: &str) -> (u8, u8) {
    let block = if name.starts_with("p(") { 0 } else { 1 };
    let slope = u8::from(!name.ends_with("(Int)"));
    (block, slope)
}

/// Average every parameter of the confidence set.
pub fn average_parameters(members: &[RankedCandidate]) -> Result<ModelAverage, DimensionMismatch> {
    let deltas: Vec<f64> = members.iter().map(|m| m.delta).collect();
    let weights = akaike_weights(&deltas);
    let models: Vec<Vec<Coefficient>> = members
        .iter()
        .map(|m| m.result.model.coefficients().cloned().collect())
        .collect();
    let estimates = average_coefficients(&weights, &models)?;
    Ok(ModelAverage {
        weights: members
            .iter()
            .zip(&weights)
            .map(|(m, &w)| (m.result.key(), w))
            .collect(),
        estimates,
    })
}

/// Weighted per-site average of a sites × models prediction matrix.
///
/// `columns[j]` holds model `j`'s predictions for every site.
pub fn weighted_predictions(
    columns: &[Vec<Prediction>],
    weights: &[f64],
) -> Result<Vec<AveragedPrediction>, DimensionMismatch> {
    if columns.len() != weights.len() {
        return Err(DimensionMismatch::ModelColumns {
            columns: columns.len(),
            weights: weights.len(),
        });
    }
    let Some(first) = columns.first() else {
        return Ok(Vec::new());
    };
    let n_sites = first.len();
    if let Some((column, col)) = columns.iter().enumerate().find(|(_, c)| c.len() != n_sites) {
        return Err(DimensionMismatch::SiteRows {
            column,
            expected: n_sites,
            found: col.len(),
        });
    }

    Ok((0..n_sites)
        .map(|i| {
            let estimate: f64 = columns.iter().zip(weights).map(|(c, w)| w * c[i].estimate).sum();
            let variance: f64 = columns
                .iter()
                .zip(weights)
                .map(|(c, w)| w * (c[i].std_error.powi(2) + (c[i].estimate - estimate).powi(2)))
                .sum();
            let logit: f64 = columns.iter().zip(weights).map(|(c, w)| w * c[i].logit).sum();
            let logit_var: f64 = columns
                .iter()
                .zip(weights)
                .map(|(c, w)| w * (c[i].logit_se.powi(2) + (c[i].logit - logit).powi(2)))
                .sum();
            let logit_se = logit_var.sqrt();
            AveragedPrediction {
                estimate,
                std_error: variance.sqrt(),
                lower: inv_logit(logit - Z_95 * logit_se),
                upper: inv_logit(logit + Z_95 * logit_se),
            }
        })
        .collect())
}

/// Model-averaged per-site predictions of one kind.
///
/// Members whose predictions are unavailable or not finite are left out and
/// the remaining weights renormalized.
pub fn average_predictions(
    kind: PredictionKind,
    members: &[RankedCandidate],
    data: &SiteData,
) -> Result<Vec<AveragedPrediction>, DimensionMismatch> {
    let deltas: Vec<f64> = members.iter().map(|m| m.delta).collect();
    let weights = akaike_weights(&deltas);

    let mut columns = Vec::with_capacity(members.len());
    let mut kept = Vec::with_capacity(members.len());
    for (member, &w) in members.iter().zip(&weights) {
        match member.result.model.predict(kind, data) {
            Ok(pred) if pred.iter().all(Prediction::is_finite) => {
                columns.push(pred);
                kept.push(w);
            }
            Ok(_) => warn!(model = %member.result.key(), ?kind, "non-finite predictions; excluded from average"),
            Err(missing) => {
                warn!(model = %member.result.key(), ?kind, %missing, "prediction failed; excluded from average")
            }
        }
    }

    if columns.is_empty() {
        warn!(?kind, "no confidence-set member produced predictions");
        return Ok(Vec::new());
    }
    let total: f64 = kept.iter().sum();
    let kept: Vec<f64> = kept.into_iter().map(|w| w / total).collect();
    weighted_predictions(&columns, &kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::orchestrator::CandidateSet;
    use crate::fit::selection::rank_candidates;
    use crate::fit::estimator::tests::simulated_survey;
    use proptest::prelude::*;
    use crate::fit::selection::tests::result_with_aicc;

    /// Confidence-set members over `open`/`dense`; `broken` get a NaN ψ slope.
    fn members_with_broken(broken: &[usize]) -> Vec<RankedCandidate> {
        let shapes: [(&[&str], &[&str], f64); 3] = [
            (&["open"], &["dense"], 100.0),
            (&["open"], &["open"], 100.5),
            (&["dense"], &["dense"], 101.0),
        ];
        let results = shapes.iter().enumerate().map(|(i, (det, occ, aicc))| {
            let mut result = result_with_aicc(i, det, occ, *aicc);
            if broken.contains(&i) {
                result.model.occupancy[1].estimate = f64::NAN;
            }
            result
        });
        rank_candidates(&CandidateSet::from_results(results)).unwrap()
    }

    fn coef(name: &str, estimate: f64, std_error: f64) -> Coefficient {
        Coefficient {
            name: name.to_string(),
            estimate,
            std_error,
        }
    }

    fn pred(estimate: f64, std_error: f64) -> Prediction {
        let logit = crate::math::logit(estimate);
        Prediction {
            estimate,
            std_error,
            lower: 0.0,
            upper: 1.0,
            logit,
            logit_se: std_error / (estimate * (1.0 - estimate)),
        }
    }

    #[test]
    fn weights_sum_to_one() {
        for deltas in [vec![0.0], vec![0.0, 0.4, 1.9], vec![0.0, 0.0, 0.0, 1.2, 1.99]] {
            let w = akaike_weights(&deltas);
            assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
            assert!(w.windows(2).all(|p| p[0] >= p[1]));
        }
    }

    #[test]
    fn full_estimate_zero_fills_absent_parameters() {
        let weights = [0.5, 0.3, 0.2];
        let models = vec![
            vec![coef("psi(Int)", 1.0, 0.2), coef("psi(dense)", 2.0, 0.5)],
            vec![coef("psi(Int)", 1.5, 0.3)],
            vec![coef("psi(Int)", 0.5, 0.1), coef("psi(dense)", 4.0, 1.0)],
        ];
        let avg = average_coefficients(&weights, &models).unwrap();

        let dense = avg.iter().find(|a| a.parameter == "psi(dense)").unwrap();
        // 0.5*2.0 + 0.3*0 + 0.2*4.0
        assert!((dense.full_estimate - 1.8).abs() < 1e-12);
        // (0.5*2.0 + 0.2*4.0) / 0.7
        assert!((dense.conditional_estimate - 1.8 / 0.7).abs() < 1e-12);
        assert_eq!(dense.models, 2);
        assert!((dense.importance - 0.7).abs() < 1e-12);

        let full_var = 0.5 * (0.25 + (2.0f64 - 1.8).powi(2))
            + 0.3 * (0.0 + 1.8f64.powi(2))
            + 0.2 * (1.0 + (4.0f64 - 1.8).powi(2));
        assert!((dense.full_std_error - full_var.sqrt()).abs() < 1e-12);

        let cond: f64 = 1.8 / 0.7;
        let cond_var = (0.5 / 0.7) * (0.25 + (2.0 - cond).powi(2)) + (0.2 / 0.7) * (1.0 + (4.0 - cond).powi(2));
        assert!((dense.conditional_std_error - cond_var.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn full_equals_conditional_when_every_model_has_the_parameter() {
        let weights = [0.5, 0.3, 0.2];
        let models = vec![
            vec![coef("psi(Int)", 1.0, 0.2)],
            vec![coef("psi(Int)", 1.5, 0.3)],
            vec![coef("psi(Int)", 0.5, 0.1)],
        ];
        let avg = average_coefficients(&weights, &models).unwrap();
        assert_eq!(avg.len(), 1);
        let a = &avg[0];
        assert!((a.full_estimate - a.conditional_estimate).abs() < 1e-12);
        assert!((a.full_std_error - a.conditional_std_error).abs() < 1e-12);
        assert!((a.full_estimate - 1.05).abs() < 1e-12);
    }

    #[test]
    fn parameters_are_grouped_by_block() {
        let weights = [0.6, 0.4];
        let models = vec![
            vec![coef("p(Int)", 0.0, 0.1), coef("psi(Int)", 0.0, 0.1), coef("psi(sav)", 1.0, 0.1)],
            vec![coef("p(Int)", 0.0, 0.1), coef("p(open)", 0.3, 0.1), coef("psi(Int)", 0.0, 0.1)],
        ];
        let names: Vec<String> = average_coefficients(&weights, &models)
            .unwrap()
            .into_iter()
            .map(|a| a.parameter)
            .collect();
        assert_eq!(names, vec!["p(Int)", "p(open)", "psi(Int)", "psi(sav)"]);
    }

    #[test]
    fn mismatched_weights_are_rejected() {
        let err = average_coefficients(&[1.0], &[vec![], vec![]]).unwrap_err();
        assert_eq!(err, DimensionMismatch::ModelColumns { columns: 2, weights: 1 });

        let columns = vec![vec![pred(0.4, 0.05)], vec![pred(0.6, 0.05)]];
        let err = weighted_predictions(&columns, &[1.0]).unwrap_err();
        assert_eq!(err, DimensionMismatch::ModelColumns { columns: 2, weights: 1 });

        let ragged = vec![vec![pred(0.4, 0.05)], vec![pred(0.6, 0.05), pred(0.5, 0.05)]];
        assert!(matches!(
            weighted_predictions(&ragged, &[0.5, 0.5]),
            Err(DimensionMismatch::SiteRows { column: 1, .. })
        ));
    }

    #[test]
    fn weighted_predictions_combine_sites() {
        let columns = vec![vec![pred(0.4, 0.05), pred(0.2, 0.02)], vec![pred(0.6, 0.05), pred(0.2, 0.02)]];
        let out = weighted_predictions(&columns, &[0.75, 0.25]).unwrap();
        assert_eq!(out.len(), 2);
        assert!((out[0].estimate - 0.45).abs() < 1e-12);
        assert!((out[1].estimate - 0.2).abs() < 1e-12);
        // Identical member predictions: the SE is just the within-model SE.
        assert!((out[1].std_error - 0.02).abs() < 1e-12);
        assert!(out[0].lower < out[0].estimate && out[0].estimate < out[0].upper);
    }

    #[test]
    fn average_parameters_uses_confidence_set_weights() {
        let set = CandidateSet::from_results([
            result_with_aicc(0, &["a"], &["a"], 100.0),
            result_with_aicc(1, &["a"], &["b"], 101.0),
        ]);
        let ranked = rank_candidates(&set).unwrap();
        let avg = average_parameters(&ranked).unwrap();

        let w0 = 1.0 / (1.0 + (-0.5f64).exp());
        assert!((avg.weights[0].1 - w0).abs() < 1e-12);

        let psi_a = avg.estimates.iter().find(|e| e.parameter == "psi(a)").unwrap();
        assert!((psi_a.full_estimate - w0).abs() < 1e-12);
        assert!((psi_a.conditional_estimate - 1.0).abs() < 1e-12);
    }

    #[test]
    fn non_finite_members_are_dropped_and_weights_renormalized() {
        let data = simulated_survey(30, 3, 4);
        let members = members_with_broken(&[1]);
        let averaged = average_predictions(PredictionKind::Occupancy, &members, &data).unwrap();
        assert_eq!(averaged.len(), 30);

        let weights = akaike_weights(&[0.0, 0.5, 1.0]);
        let kept = [weights[0] / (weights[0] + weights[2]), weights[2] / (weights[0] + weights[2])];
        let columns: Vec<Vec<Prediction>> = [&members[0], &members[2]]
            .iter()
            .map(|m| m.result.model.predict(PredictionKind::Occupancy, &data).unwrap())
            .collect();
        let expected = weighted_predictions(&columns, &kept).unwrap();
        for (got, want) in averaged.iter().zip(&expected) {
            assert!((got.estimate - want.estimate).abs() < 1e-12);
            assert!((got.std_error - want.std_error).abs() < 1e-12);
        }
    }

    #[test]
    fn no_finite_members_gives_no_predictions() {
        let data = simulated_survey(30, 3, 4);
        let members = members_with_broken(&[0, 1, 2]);
        let averaged = average_predictions(PredictionKind::Occupancy, &members, &data).unwrap();
        assert!(averaged.is_empty());
    }

    proptest! {
        #[test]
        fn weights_sum_to_one_for_any_ranking(aicc in proptest::collection::vec(-1e5f64..1e5, 1..40)) {
            let best = aicc.iter().copied().fold(f64::INFINITY, f64::min);
            let deltas: Vec<f64> = aicc.iter().map(|a| a - best).collect();
            let w = akaike_weights(&deltas);
            prop_assert_eq!(w.len(), aicc.len());
            prop_assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
            prop_assert!(w.iter().all(|x| (0.0..=1.0).contains(x)));
        }
    }
}
