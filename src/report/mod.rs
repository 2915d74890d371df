//! Reporting utilities: ranking rows, per-site prediction rows, and formatted
//! terminal output (`format`).

use serde::Serialize;

use crate::domain::{ModelKey, SiteData};
use crate::fit::averaging::{AveragedPrediction, akaike_weights};
use crate::fit::selection::RankedCandidate;

mod format;

pub use format::*;

/// One line of the model ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingRow {
    pub rank: usize,
    pub model: ModelKey,
    pub n_params: usize,
    pub log_likelihood: f64,
    pub aicc: f64,
    pub delta: f64,
    /// Akaike weight within the confidence set; `None` outside it.
    pub weight: Option<f64>,
}

/// Averaged predictions for one site.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SitePrediction {
    pub site: String,
    pub occupancy: Option<AveragedPrediction>,
    pub detection: Option<AveragedPrediction>,
}

/// Ranking rows, with weights for the first `confidence_len` candidates.
pub fn ranking_rows(ranked: &[RankedCandidate], confidence_len: usize) -> Vec<RankingRow> {
    let members = confidence_len.min(ranked.len());
    let deltas: Vec<f64> = ranked[..members].iter().map(|c| c.delta).collect();
    let weights = akaike_weights(&deltas);

    ranked
        .iter()
        .enumerate()
        .map(|(i, c)| RankingRow {
            rank: c.rank,
            model: c.result.key(),
            n_params: c.result.n_params,
            log_likelihood: c.result.model.log_likelihood,
            aicc: c.aicc,
            delta: c.delta,
            weight: weights.get(i).copied(),
        })
        .collect()
}

/// Zip averaged predictions back onto site ids.
pub fn site_predictions(
    data: &SiteData,
    occupancy: &[AveragedPrediction],
    detection: &[AveragedPrediction],
) -> Vec<SitePrediction> {
    data.sites()
        .iter()
        .enumerate()
        .map(|(i, site)| SitePrediction {
            site: site.id.clone(),
            occupancy: occupancy.get(i).copied(),
            detection: detection.get(i).copied(),
        })
        .collect()
}
