//! Top-level application orchestration.
//!
//! `src/main.rs` only parses the command line and sets up logging; this module
//! is the "real main" that:
//! - loads `.env` defaults
//! - turns CLI arguments into an `AnalysisConfig`
//! - runs the analysis pipeline
//! - prints reports and writes optional exports

use std::time::Duration;

use itertools::Itertools;

use crate::cli::{AnalyzeArgs, Cli, Command, PstarArgs, PstarOptions};
use crate::domain::{AnalysisConfig, DEFAULT_COVARIATES, DetectionColumns, ModelSpec};
use crate::error::AppError;
use crate::sensitivity::{SensitivityConfig, default_surveys, run_sensitivity};

pub mod pipeline;

/// Entry point for the `occu` binary.
pub fn run(cli: Cli) -> Result<(), AppError> {
    match cli.command {
        Command::Analyze(args) => handle_analyze(&args),
        Command::Rank(args) => handle_rank(&args),
        Command::Pstar(args) => handle_pstar(&args),
    }
}

/// Load `.env` into the process environment. A missing file is fine.
pub fn load_env() {
    dotenvy::dotenv().ok();
}

fn handle_analyze(args: &AnalyzeArgs) -> Result<(), AppError> {
    let config = analysis_config_from_args(args)?;
    let run = pipeline::run_analysis(&config)?;

    let rows = crate::report::ranking_rows(run.selection.ranked(), run.selection.confidence_set().len());
    println!("{}", crate::report::format_run_summary(&run.ingest, &run.candidates));
    print!("{}", crate::report::format_ranking(&rows, config.top_n));
    print!("{}", crate::report::format_average(&run.average));
    print!("{}", crate::report::format_evaluations(&run.evaluations));
    print!("{}", crate::report::format_sensitivity(&run.sensitivity));

    if let Some(path) = &config.export {
        crate::io::export::write_report_json(path, &run)?;
    }
    Ok(())
}

fn handle_rank(args: &AnalyzeArgs) -> Result<(), AppError> {
    let config = analysis_config_from_args(args)?;
    let run = pipeline::run_ranking(&config)?;

    let rows = crate::report::ranking_rows(&run.ranked, run.confidence_set().len());
    println!("{}", crate::report::format_run_summary(&run.ingest, &run.candidates));
    print!("{}", crate::report::format_ranking(&rows, config.top_n));
    print!("{}", crate::report::format_failures(&run.candidates, 10));
    if let Some(failure) = &run.selection_failure {
        println!("Note: {failure}");
    }
    Ok(())
}

fn handle_pstar(args: &PstarArgs) -> Result<(), AppError> {
    let config = sensitivity_config_from_options(&args.pstar, args.seed);
    let detection = (!args.probabilities.is_empty()).then_some(args.probabilities.as_slice());
    if detection.is_none() && config.jitter_levels.is_empty() {
        return Err(AppError::input("Provide detection probabilities (--p) or jitter levels (--levels)."));
    }
    let run = run_sensitivity(detection, &config)?;
    print!("{}", crate::report::format_sensitivity(&run));
    Ok(())
}

pub fn sensitivity_config_from_options(options: &PstarOptions, seed: u64) -> SensitivityConfig {
    SensitivityConfig {
        iterations: options.iterations,
        seed,
        surveys: default_surveys(options.max_surveys),
        jitter_levels: options.levels.clone(),
        jitter_sd: options.jitter_sd,
        target: options.target,
    }
}

pub fn analysis_config_from_args(args: &AnalyzeArgs) -> Result<AnalysisConfig, AppError> {
    let covariates = if args.input.covariates.is_empty() {
        DEFAULT_COVARIATES.iter().map(|s| s.to_string()).collect()
    } else {
        args.input
            .covariates
            .iter()
            .map(|s| s.trim().to_ascii_lowercase())
            .unique()
            .collect()
    };
    let reference_model = args.reference.as_deref().map(ModelSpec::parse).transpose()?;
    let workers = if args.workers == 0 {
        std::thread::available_parallelism().map_or(1, |n| n.get())
    } else {
        args.workers
    };
    let pstar = sensitivity_config_from_options(&args.pstar, args.seed);

    Ok(AnalysisConfig {
        csv_path: args.input.csv.clone(),
        site_column: args.input.site_column.clone(),
        detection_columns: DetectionColumns::parse(&args.input.detections)?,
        covariates,
        max_models: args.max_models,
        workers,
        max_iterations: args.max_iterations,
        fit_timeout: (args.fit_timeout > 0).then(|| Duration::from_secs(args.fit_timeout)),
        reference_model,
        cv_folds: args.folds,
        cv_seed: args.seed,
        gof_simulations: args.gof_simulations,
        gof_seed: args.seed,
        pstar_iterations: pstar.iterations,
        pstar_seed: pstar.seed,
        surveys: pstar.surveys,
        jitter_levels: pstar.jitter_levels,
        jitter_sd: pstar.jitter_sd,
        pstar_target: pstar.target,
        top_n: args.top,
        export: args.export.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn analyze_args(extra: &[&str]) -> AnalyzeArgs {
        let mut argv = vec!["occu", "analyze", "--csv", "sites.csv", "--detections", "y1:y8"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Analyze(args) => args,
            _ => panic!("expected analyze"),
        }
    }

    #[test]
    fn config_uses_default_covariates_and_range() {
        let config = analysis_config_from_args(&analyze_args(&["--workers", "3"])).unwrap();
        assert_eq!(config.covariates.len(), 9);
        assert_eq!(config.workers, 3);
        assert_eq!(
            config.detection_columns,
            DetectionColumns::Range {
                first: "y1".to_string(),
                last: "y8".to_string()
            }
        );
        assert_eq!(config.surveys, (1..=15).collect::<Vec<u32>>());
        assert_eq!(config.fit_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn config_parses_reference_model() {
        let config = analysis_config_from_args(&analyze_args(&[
            "--reference",
            "~open ~dense+sav",
            "--covariates",
            "Open,dense,sav",
            "--fit-timeout",
            "0",
        ]))
        .unwrap();
        let reference = config.reference_model.unwrap();
        assert_eq!(reference.key().as_str(), "p(open) psi(dense+sav)");
        assert_eq!(config.covariates, vec!["open", "dense", "sav"]);
        assert_eq!(config.fit_timeout, None);
    }

    #[test]
    fn repeated_covariates_collapse_case_insensitively() {
        let config = analysis_config_from_args(&analyze_args(&["--covariates", "dense,Dense, open,DENSE"])).unwrap();
        assert_eq!(config.covariates, vec!["dense", "open"]);
    }

    #[test]
    fn bad_reference_formula_is_an_input_error() {
        let err = analysis_config_from_args(&analyze_args(&["--reference", "open"])).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
