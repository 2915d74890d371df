//! Shared domain types.
//!
//! These types are intentionally kept lightweight so they can be:
//!
//! - shared read-only across fitting workers
//! - summarized into serializable report structures
//! - rebuilt cheaply for cross-validation folds and simulated datasets

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use itertools::Itertools;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Covariate universe of the camera-trap survey this tool was built for.
pub const DEFAULT_COVARIATES: [&str; 9] = [
    "dense",
    "gallery",
    "open",
    "sav",
    "crops",
    "past",
    "d_streams",
    "d_crops",
    "d_roads",
];

/// One sampling unit (camera station).
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    pub id: String,
    /// One entry per survey occasion: `Some(0)`, `Some(1)` or missing.
    pub detections: Vec<Option<u8>>,
    /// Standardized covariate values keyed by covariate name.
    pub covariates: BTreeMap<String, f64>,
}

impl Site {
    /// Number of occasions with an observed outcome.
    pub fn observed_occasions(&self) -> usize {
        self.detections.iter().filter(|d| d.is_some()).count()
    }

    /// Number of occasions on which the species was detected.
    pub fn detection_count(&self) -> usize {
        self.detections.iter().filter(|d| **d == Some(1)).count()
    }

    pub fn ever_detected(&self) -> bool {
        self.detection_count() > 0
    }

    pub fn covariate(&self, name: &str) -> Option<f64> {
        self.covariates.get(name).copied()
    }
}

/// The read-only data frame shared by every fit.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteData {
    sites: Vec<Site>,
    occasions: Vec<String>,
    universe: Vec<String>,
}

impl SiteData {
    /// Build a data frame, checking that every site has one outcome per occasion
    /// and a finite value for every covariate in the universe.
    pub fn new(sites: Vec<Site>, occasions: Vec<String>, universe: Vec<String>) -> Result<Self, AppError> {
        if occasions.is_empty() {
            return Err(AppError::input("At least one detection occasion is required."));
        }
        if let Some(name) = universe.iter().duplicates().next() {
            return Err(AppError::input(format!("Covariate '{name}' is listed more than once.")));
        }
        for site in &sites {
            if site.detections.len() != occasions.len() {
                return Err(AppError::input(format!(
                    "Site '{}' has {} detection values, expected {}.",
                    site.id,
                    site.detections.len(),
                    occasions.len()
                )));
            }
            if site.detections.iter().flatten().any(|&y| y > 1) {
                return Err(AppError::input(format!(
                    "Site '{}' has a detection value outside {{0, 1}}.",
                    site.id
                )));
            }
            for name in &universe {
                match site.covariate(name) {
                    Some(v) if v.is_finite() => {}
                    _ => {
                        return Err(AppError::input(format!(
                            "Site '{}' is missing covariate '{name}'.",
                            site.id
                        )));
                    }
                }
            }
        }
        Ok(Self {
            sites,
            occasions,
            universe,
        })
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    pub fn occasions(&self) -> &[String] {
        &self.occasions
    }

    pub fn universe(&self) -> &[String] {
        &self.universe
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Sites that contribute to the likelihood (at least one observed occasion).
    pub fn effective_sites(&self) -> usize {
        self.sites.iter().filter(|s| s.observed_occasions() > 0).count()
    }

    /// Share of sites with at least one detection.
    pub fn naive_occupancy(&self) -> f64 {
        if self.sites.is_empty() {
            return 0.0;
        }
        let detected = self.sites.iter().filter(|s| s.ever_detected()).count();
        detected as f64 / self.sites.len() as f64
    }

    /// A new frame containing the sites at `indices` (in that order).
    pub fn subset(&self, indices: &[usize]) -> SiteData {
        SiteData {
            sites: indices.iter().filter_map(|&i| self.sites.get(i).cloned()).collect(),
            occasions: self.occasions.clone(),
            universe: self.universe.clone(),
        }
    }

    /// Same sites and covariates with replaced detection histories.
    ///
    /// Used for simulated datasets; `histories` must have one entry per site.
    pub fn with_detections(&self, histories: Vec<Vec<Option<u8>>>) -> SiteData {
        let sites = self
            .sites
            .iter()
            .zip(histories)
            .map(|(site, detections)| Site {
                id: site.id.clone(),
                detections,
                covariates: site.covariates.clone(),
            })
            .collect();
        SiteData {
            sites,
            occasions: self.occasions.clone(),
            universe: self.universe.clone(),
        }
    }
}

/// A set of covariate names used as one linear predictor.
///
/// Stored sorted so that two sets with the same members are equal and encode
/// to the same key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct CovariateSet(BTreeSet<String>);

impl CovariateSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    pub fn intercept_only() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Canonical encoding: names joined with `+`, `1` for intercept-only.
    pub fn key(&self) -> String {
        if self.0.is_empty() {
            "1".to_string()
        } else {
            self.iter().collect::<Vec<_>>().join("+")
        }
    }
}

impl fmt::Display for CovariateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Identity of a model specification (`p(<det>) psi(<occ>)`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModelKey(String);

impl ModelKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A (detection, occupancy) formula pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSpec {
    pub detection: CovariateSet,
    pub occupancy: CovariateSet,
}

impl ModelSpec {
    pub fn new(detection: CovariateSet, occupancy: CovariateSet) -> Self {
        Self {
            detection,
            occupancy,
        }
    }

    pub fn key(&self) -> ModelKey {
        ModelKey(format!("p({}) psi({})", self.detection.key(), self.occupancy.key()))
    }

    /// Estimated parameters: one intercept per linear predictor plus one slope
    /// per covariate.
    pub fn param_count(&self) -> usize {
        self.detection.len() + self.occupancy.len() + 2
    }

    /// Parse a double right-hand-side formula such as `~dense+open ~d_roads`.
    ///
    /// The first formula is detection, the second occupancy; `1` means
    /// intercept-only.
    pub fn parse(formula: &str) -> Result<Self, AppError> {
        let parts: Vec<&str> = formula.split('~').map(str::trim).collect();
        if parts.len() != 3 || !parts[0].is_empty() {
            return Err(AppError::input(format!(
                "Invalid model formula '{formula}': expected `~<detection> ~<occupancy>`."
            )));
        }
        let detection = parse_terms(parts[1], formula)?;
        let occupancy = parse_terms(parts[2], formula)?;
        Ok(Self::new(detection, occupancy))
    }

    /// Every covariate used by either predictor must be present in `universe`.
    pub fn validate_against(&self, universe: &[String]) -> Result<(), AppError> {
        for name in self.detection.iter().chain(self.occupancy.iter()) {
            if !universe.iter().any(|u| u == name) {
                return Err(AppError::input(format!(
                    "Model {} uses unknown covariate '{name}'.",
                    self.key()
                )));
            }
        }
        Ok(())
    }
}

fn parse_terms(rhs: &str, formula: &str) -> Result<CovariateSet, AppError> {
    if rhs.is_empty() {
        return Err(AppError::input(format!("Empty right-hand side in '{formula}'.")));
    }
    let terms: Vec<&str> = rhs
        .split('+')
        .map(str::trim)
        .filter(|t| *t != "1")
        .collect();
    if terms.iter().any(|t| t.is_empty()) {
        return Err(AppError::input(format!("Empty term in '{formula}'.")));
    }
    Ok(CovariateSet::new(terms))
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Which linear predictor a prediction is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PredictionKind {
    /// Occupancy probability ψ (`state` in unmarked terms).
    Occupancy,
    /// Per-survey detection probability p.
    Detection,
}

impl PredictionKind {
    /// Prefix used in parameter names (`psi(Int)`, `p(dense)`).
    pub fn prefix(self) -> &'static str {
        match self {
            PredictionKind::Occupancy => "psi",
            PredictionKind::Detection => "p",
        }
    }
}

/// One estimated coefficient on the logit scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coefficient {
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
}

/// Per-site prediction with a 95% interval built on the logit scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub estimate: f64,
    pub std_error: f64,
    pub lower: f64,
    pub upper: f64,
    pub logit: f64,
    pub logit_se: f64,
}

impl Prediction {
    pub fn is_finite(&self) -> bool {
        self.estimate.is_finite() && self.logit.is_finite() && self.logit_se.is_finite()
    }
}

/// A converged single-season occupancy model.
///
/// Coefficient order matches the parameter vector: detection intercept and
/// slopes first, then occupancy intercept and slopes. Slopes follow the
/// canonical (sorted) covariate order of the spec.
#[derive(Debug, Clone)]
pub struct FittedModel {
    pub spec: ModelSpec,
    pub detection: Vec<Coefficient>,
    pub occupancy: Vec<Coefficient>,
    /// Inverse of the observed information matrix.
    pub vcov: DMatrix<f64>,
    pub log_likelihood: f64,
    /// Sites contributing to the likelihood.
    pub n_sites: usize,
    pub iterations: usize,
}

impl FittedModel {
    pub fn param_count(&self) -> usize {
        self.detection.len() + self.occupancy.len()
    }

    pub fn coefficients(&self) -> impl Iterator<Item = &Coefficient> {
        self.detection.iter().chain(self.occupancy.iter())
    }
}

/// A fitted candidate as held by the orchestrator. Never mutated.
#[derive(Debug, Clone)]
pub struct FitResult {
    /// Position in the enumeration; the stable tie-break for ranking.
    pub ordinal: usize,
    pub model: FittedModel,
    pub n_params: usize,
    /// AICc; `None` when it cannot be computed.
    pub aicc: Option<f64>,
}

impl FitResult {
    pub fn spec(&self) -> &ModelSpec {
        &self.model.spec
    }

    pub fn key(&self) -> ModelKey {
        self.model.spec.key()
    }
}

/// How the detection columns of the input table are chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionColumns {
    /// Explicit list of column names, in occasion order.
    Named(Vec<String>),
    /// Every column from `first` to `last` (inclusive) in header order.
    Range { first: String, last: String },
}

impl DetectionColumns {
    /// `first:last` selects a header range; otherwise a comma-separated list.
    pub fn parse(text: &str) -> Result<Self, AppError> {
        if let Some((first, last)) = text.split_once(':') {
            let (first, last) = (first.trim(), last.trim());
            if first.is_empty() || last.is_empty() || last.contains(':') {
                return Err(AppError::input(format!(
                    "Invalid detection column range '{text}': expected `first:last`."
                )));
            }
            return Ok(DetectionColumns::Range {
                first: first.to_string(),
                last: last.to_string(),
            });
        }
        let names: Vec<String> = text.split(',').map(|s| s.trim().to_string()).collect();
        if names.iter().any(String::is_empty) {
            return Err(AppError::input(format!("Invalid detection column list '{text}'.")));
        }
        Ok(DetectionColumns::Named(names))
    }
}

/// A full run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus `OCCU_*` environment defaults).
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub csv_path: PathBuf,
    pub site_column: String,
    pub detection_columns: DetectionColumns,
    pub covariates: Vec<String>,

    /// Upper bound on the number of enumerated model specs.
    pub max_models: usize,
    /// Worker threads for the fitting phase.
    pub workers: usize,
    pub max_iterations: usize,
    pub fit_timeout: Option<Duration>,

    /// Optional user-designated model evaluated alongside the top-ranked one.
    pub reference_model: Option<ModelSpec>,

    pub cv_folds: usize,
    pub cv_seed: u64,
    pub gof_simulations: usize,
    pub gof_seed: u64,

    pub pstar_iterations: usize,
    pub pstar_seed: u64,
    pub surveys: Vec<u32>,
    pub jitter_levels: Vec<f64>,
    pub jitter_sd: f64,
    pub pstar_target: f64,

    pub top_n: usize,
    pub export: Option<PathBuf>,
}
