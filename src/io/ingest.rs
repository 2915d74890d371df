//! CSV ingest and validation.
//!
//! Turns a site table (one row per camera site) into a `SiteData` frame.
//!
//! - **Strict schema**: every requested column must exist (exit code 2)
//! - **Row-level validation**: bad rows are skipped and reported
//! - **Explicit detection columns**: a name list or a `first:last` header range
//!   resolved by name, never by raw position
//!
//! Covariates are expected to be standardized already.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;
use tracing::{debug, info};

use crate::domain::{AnalysisConfig, DetectionColumns, Site, SiteData};
use crate::error::AppError;

/// Cells treated as a missing occasion.
const MISSING_TOKENS: [&str; 4] = ["", "na", "nan", "."];

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub id: Option<String>,
    pub message: String,
}

/// Ingest output: the site frame plus row accounting.
#[derive(Debug, Clone)]
pub struct IngestedData {
    pub data: SiteData,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    pub rows_used: usize,
}

/// Column layout resolved against the header row.
struct Schema {
    site: Option<usize>,
    detections: Vec<(String, usize)>,
    covariates: Vec<(String, usize)>,
}

/// Load the site table named in `config`.
pub fn load_sites(config: &AnalysisConfig) -> Result<IngestedData, AppError> {
    let file = File::open(&config.csv_path).map_err(|e| {
        AppError::input(format!("Failed to open CSV '{}': {e}", config.csv_path.display()))
    })?;
    let ingested = read_sites(file, &config.site_column, &config.detection_columns, &config.covariates)?;
    log_summary(&config.csv_path, &ingested);
    Ok(ingested)
}

fn log_summary(path: &Path, ingested: &IngestedData) {
    info!(
        path = %path.display(),
        rows_read = ingested.rows_read,
        rows_used = ingested.rows_used,
        occasions = ingested.data.occasions().len(),
        "site table loaded"
    );
    for err in &ingested.row_errors {
        debug!(line = err.line, id = ?err.id, message = %err.message, "row skipped");
    }
}

/// Parse a site table from any reader.
pub fn read_sites<R: Read>(
    reader: R,
    site_column: &str,
    detection: &DetectionColumns,
    covariates: &[String],
) -> Result<IngestedData, AppError> {
    if covariates.is_empty() {
        return Err(AppError::input("At least one covariate column is required."));
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| AppError::input(format!("Failed to read CSV headers: {e}")))?
        .clone();
    let schema = resolve_schema(&headers, site_column, detection, covariates)?;

    let mut sites = Vec::new();
    let mut seen_ids = HashSet::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // Line 1 is the header.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    id: None,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        let id = match schema.site {
            Some(col) => match record.get(col).filter(|s| !s.is_empty()) {
                Some(id) => id.to_string(),
                None => {
                    row_errors.push(RowError {
                        line,
                        id: None,
                        message: "Missing site id.".to_string(),
                    });
                    continue;
                }
            },
            None => (idx + 1).to_string(),
        };

        if !seen_ids.insert(id.clone()) {
            row_errors.push(RowError {
                line,
                id: Some(id),
                message: "Duplicate site id.".to_string(),
            });
            continue;
        }

        match parse_row(&record, &schema) {
            Ok((detections, covariates)) => sites.push(Site {
                id,
                detections,
                covariates,
            }),
            Err(message) => row_errors.push(RowError {
                line,
                id: Some(id),
                message,
            }),
        }
    }

    let rows_used = sites.len();
    if rows_used == 0 {
        return Err(AppError::input("No valid site rows remain after validation."));
    }

    let occasions = schema.detections.iter().map(|(name, _)| name.clone()).collect();
    let universe = schema.covariates.iter().map(|(name, _)| name.clone()).collect();
    let data = SiteData::new(sites, occasions, universe)?;

    Ok(IngestedData {
        data,
        row_errors,
        rows_read,
        rows_used,
    })
}

fn resolve_schema(
    headers: &StringRecord,
    site_column: &str,
    detection: &DetectionColumns,
    covariates: &[String],
) -> Result<Schema, AppError> {
    let names: Vec<String> = headers.iter().map(normalize_header_name).collect();
    let header_map = build_header_map(&names);

    let site = header_map.get(&normalize_header_name(site_column)).copied();

    let mut covariate_cols = Vec::with_capacity(covariates.len());
    for name in covariates {
        let key = normalize_header_name(name);
        let idx = *header_map
            .get(&key)
            .ok_or_else(|| AppError::input(format!("Missing covariate column: `{name}`")))?;
        covariate_cols.push((key, idx));
    }

    let detection_idx: Vec<usize> = match detection {
        DetectionColumns::Named(cols) => cols
            .iter()
            .map(|name| {
                header_map
                    .get(&normalize_header_name(name))
                    .copied()
                    .ok_or_else(|| AppError::input(format!("Missing detection column: `{name}`")))
            })
            .collect::<Result<_, _>>()?,
        DetectionColumns::Range { first, last } => {
            let start = *header_map
                .get(&normalize_header_name(first))
                .ok_or_else(|| AppError::input(format!("Detection range start `{first}` is not a column.")))?;
            let end = *header_map
                .get(&normalize_header_name(last))
                .ok_or_else(|| AppError::input(format!("Detection range end `{last}` is not a column.")))?;
            if start > end {
                return Err(AppError::input(format!(
                    "Detection range `{first}:{last}` is reversed in the header."
                )));
            }
            (start..=end).collect()
        }
    };

    if detection_idx.is_empty() {
        return Err(AppError::input("At least one detection column is required."));
    }
    let mut unique = HashSet::new();
    for &idx in &detection_idx {
        if !unique.insert(idx) {
            return Err(AppError::input(format!("Detection column `{}` is listed twice.", names[idx])));
        }
        if Some(idx) == site || covariate_cols.iter().any(|(_, c)| *c == idx) {
            return Err(AppError::input(format!(
                "Column `{}` cannot be both a detection occasion and a site/covariate column.",
                names[idx]
            )));
        }
    }

    Ok(Schema {
        site,
        detections: detection_idx.into_iter().map(|idx| (names[idx].clone(), idx)).collect(),
        covariates: covariate_cols,
    })
}

type ParsedRow = (Vec<Option<u8>>, std::collections::BTreeMap<String, f64>);

fn parse_row(record: &StringRecord, schema: &Schema) -> Result<ParsedRow, String> {
    let detections = schema
        .detections
        .iter()
        .map(|(name, idx)| parse_detection(record.get(*idx).unwrap_or(""), name))
        .collect::<Result<Vec<_>, _>>()?;

    let covariates = schema
        .covariates
        .iter()
        .map(|(name, idx)| {
            let raw = record
                .get(*idx)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| format!("Missing covariate value: `{name}`"))?;
            let v = raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| format!("Invalid covariate `{name}` value '{raw}'."))?;
            Ok((name.clone(), v))
        })
        .collect::<Result<_, String>>()?;

    Ok((detections, covariates))
}

fn parse_detection(raw: &str, column: &str) -> Result<Option<u8>, String> {
    let cell = raw.trim();
    if MISSING_TOKENS.iter().any(|t| cell.eq_ignore_ascii_case(t)) {
        return Ok(None);
    }
    match cell.parse::<f64>() {
        Ok(v) if v == 0.0 => Ok(Some(0)),
        Ok(v) if v == 1.0 => Ok(Some(1)),
        _ => Err(format!("Invalid detection value '{cell}' in `{column}` (expected 0, 1 or NA).")),
    }
}

fn build_header_map(names: &[String]) -> HashMap<String, usize> {
    // First occurrence wins for duplicated headers.
    let mut map = HashMap::with_capacity(names.len());
    for (idx, name) in names.iter().enumerate() {
        map.entry(name.clone()).or_insert(idx);
    }
    map
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports often carry a UTF-8 BOM on the first header.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}
