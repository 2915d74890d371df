//! Mathematical utilities: link functions, dense solves, and summary statistics.

pub mod linalg;
pub mod link;
pub mod stats;

pub use linalg::*;
pub use link::*;
pub use stats::*;
