//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - survey data (`Site`, `SiteData`)
//! - model identity (`CovariateSet`, `ModelSpec`, `ModelKey`)
//! - fit outputs (`FittedModel`, `FitResult`, `Coefficient`, `Prediction`)
//! - run configuration (`AnalysisConfig`)

pub mod types;

pub use types::*;
