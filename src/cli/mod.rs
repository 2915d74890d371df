//! Command-line parsing for the occupancy model search.
//!
//! Argument parsing and command dispatch stay separate from the modeling code:
//! this module only describes flags; `app` turns them into an `AnalysisConfig`.
//!
//! Frequently tuned knobs fall back to `OCCU_*` environment variables, which
//! may come from a `.env` file.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "occu",
    version,
    about = "Occupancy model search, AICc model averaging and P* sensitivity"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` also applies.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit all candidate models, average the confidence set, evaluate and run P*.
    Analyze(AnalyzeArgs),
    /// Fit and rank candidate models only (useful for scripting).
    Rank(AnalyzeArgs),
    /// P* sensitivity from explicit detection probabilities and/or a jitter grid.
    Pstar(PstarArgs),
}

/// Input table options.
#[derive(Debug, Args, Clone)]
pub struct InputArgs {
    /// Site table (one row per site, covariates already standardized).
    #[arg(long, value_name = "CSV")]
    pub csv: PathBuf,

    /// Site id column (rows are numbered when it is absent).
    #[arg(long, default_value = "site")]
    pub site_column: String,

    /// Detection columns: `first:last` header range or a comma-separated list.
    #[arg(long, value_name = "COLUMNS")]
    pub detections: String,

    /// Covariate universe (comma-separated). Defaults to the nine habitat covariates.
    #[arg(long, value_delimiter = ',')]
    pub covariates: Vec<String>,
}

/// Options for `analyze` and `rank`.
#[derive(Debug, Args, Clone)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Maximum number of candidate models to fit.
    #[arg(long, env = "OCCU_MAX_MODELS", default_value_t = 2000)]
    pub max_models: usize,

    /// Worker threads for model fitting (0 = number of CPUs).
    #[arg(long, env = "OCCU_WORKERS", default_value_t = 0)]
    pub workers: usize,

    /// Newton iterations allowed per fit.
    #[arg(long, default_value_t = 200)]
    pub max_iterations: usize,

    /// Wall-clock budget per fit in seconds (0 disables the limit).
    #[arg(long, env = "OCCU_FIT_TIMEOUT_SECS", default_value_t = 30)]
    pub fit_timeout: u64,

    /// Reference model to evaluate next to the top model, e.g. `~open+dense ~sav`.
    #[arg(long, value_name = "FORMULA")]
    pub reference: Option<String>,

    /// Seed for cross-validation, bootstrap GoF and P*.
    #[arg(long, env = "OCCU_SEED", default_value_t = 42)]
    pub seed: u64,

    /// Cross-validation folds.
    #[arg(long, default_value_t = 5)]
    pub folds: usize,

    /// Parametric bootstrap simulations for goodness of fit.
    #[arg(long, default_value_t = 100)]
    pub gof_simulations: usize,

    #[command(flatten)]
    pub pstar: PstarOptions,

    /// Show top-N rows of the model ranking.
    #[arg(long, default_value_t = 20)]
    pub top: usize,

    /// Export the full analysis to JSON.
    #[arg(long)]
    pub export: Option<PathBuf>,
}

/// P* settings shared by `analyze` and `pstar`.
#[derive(Debug, Args, Clone)]
pub struct PstarOptions {
    /// Bootstrap / jitter iterations per survey count.
    #[arg(long = "pstar-iterations", default_value_t = 10_000)]
    pub iterations: usize,

    /// Largest survey count (P* is reported for 1..=N).
    #[arg(long, default_value_t = 15)]
    pub max_surveys: u32,

    /// Detection levels for the jitter grid (comma-separated).
    #[arg(long, value_delimiter = ',', default_values_t = [0.2, 0.4, 0.6, 0.8])]
    pub levels: Vec<f64>,

    /// Standard deviation of the jitter noise.
    #[arg(long, default_value_t = 0.01)]
    pub jitter_sd: f64,

    /// Target P* for the "surveys required" summary.
    #[arg(long, default_value_t = 0.95)]
    pub target: f64,
}

/// Options for `pstar`.
#[derive(Debug, Args, Clone)]
pub struct PstarArgs {
    /// Per-site detection probabilities to bootstrap (comma-separated).
    #[arg(long = "p", value_delimiter = ',')]
    pub probabilities: Vec<f64>,

    /// Random seed.
    #[arg(long, env = "OCCU_SEED", default_value_t = 42)]
    pub seed: u64,

    #[command(flatten)]
    pub pstar: PstarOptions,
}
