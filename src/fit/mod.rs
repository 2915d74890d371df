//! Candidate fitting, ranking and averaging.
//!
//! Responsibilities:
//!
//! - enumerate (detection, occupancy) covariate subsets
//! - fit each candidate (parallel) with a pluggable estimator
//! - rank by AICc and select the ΔAICc < 2 confidence set
//! - model-average parameters and per-site predictions over that set

pub mod averaging;
pub mod enumerate;
pub mod estimator;
pub mod orchestrator;
pub mod selection;

pub use averaging::*;
pub use enumerate::*;
pub use estimator::*;
pub use orchestrator::*;
pub use selection::*;
