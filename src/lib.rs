//! `occu-meta` library crate.
//!
//! The binary (`occu`) is a thin wrapper around this library so that:
//!
//! - the engine is testable without spawning processes
//! - the estimator can be swapped (`fit::Estimator`) without touching the pipeline
//! - modules stay easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod domain;
pub mod error;
pub mod eval;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
pub mod sensitivity;
