//! JSON export of a full analysis.
//!
//! The report carries everything printed to the terminal plus the per-site
//! averaged predictions, so downstream tooling can chart it without refitting.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::app::pipeline::AnalysisRun;
use crate::error::AppError;
use crate::eval::ModelEvaluation;
use crate::fit::averaging::AveragedEstimate;
use crate::report::{RankingRow, SitePrediction, ranking_rows, site_predictions};
use crate::sensitivity::SensitivityRun;

#[derive(Debug, Serialize)]
pub struct AnalysisReport<'a> {
    pub tool: &'static str,
    pub version: &'static str,
    pub generated_at: String,
    pub input: InputSummary,
    pub candidates: CandidateSummary,
    pub ranking: Vec<RankingRow>,
    pub averaged: &'a [AveragedEstimate],
    pub evaluations: &'a [ModelEvaluation],
    pub sensitivity: &'a SensitivityRun,
    pub sites: Vec<SitePrediction>,
}

#[derive(Debug, Serialize)]
pub struct InputSummary {
    pub rows_read: usize,
    pub rows_used: usize,
    pub sites: usize,
    pub surveyed_sites: usize,
    pub occasions: Vec<String>,
    pub covariates: Vec<String>,
    pub naive_occupancy: f64,
}

#[derive(Debug, Serialize)]
pub struct CandidateSummary {
    pub attempted: usize,
    pub converged: usize,
    pub failures: Vec<FailureEntry>,
}

#[derive(Debug, Serialize)]
pub struct FailureEntry {
    pub model: String,
    pub reason: String,
}

impl<'a> AnalysisReport<'a> {
    pub fn new(run: &'a AnalysisRun) -> Self {
        let data = &run.ingest.data;
        AnalysisReport {
            tool: "occu",
            version: env!("CARGO_PKG_VERSION"),
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            input: InputSummary {
                rows_read: run.ingest.rows_read,
                rows_used: run.ingest.rows_used,
                sites: data.len(),
                surveyed_sites: data.effective_sites(),
                occasions: data.occasions().to_vec(),
                covariates: data.universe().to_vec(),
                naive_occupancy: data.naive_occupancy(),
            },
            candidates: CandidateSummary {
                attempted: run.candidates.attempted(),
                converged: run.candidates.len(),
                failures: run
                    .candidates
                    .failures()
                    .iter()
                    .map(|f| FailureEntry {
                        model: f.spec.key().to_string(),
                        reason: f.failure.to_string(),
                    })
                    .collect(),
            },
            ranking: ranking_rows(run.selection.ranked(), run.selection.confidence_set().len()),
            averaged: &run.average.estimates,
            evaluations: &run.evaluations,
            sensitivity: &run.sensitivity,
            sites: site_predictions(data, &run.occupancy, &run.detection),
        }
    }
}

/// Write the analysis report as pretty-printed JSON.
pub fn write_report_json(path: &Path, run: &AnalysisRun) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create report JSON '{}': {e}", path.display())))?;
    let report = AnalysisReport::new(run);
    serde_json::to_writer_pretty(BufWriter::new(file), &report)
        .map_err(|e| AppError::new(2, format!("Failed to write report JSON: {e}")))?;
    Ok(())
}
