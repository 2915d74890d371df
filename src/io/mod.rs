//! Input/output helpers.
//!
//! - CSV ingest + validation (`ingest`)
//! - JSON analysis report (`export`)

pub mod export;
pub mod ingest;

pub use export::*;
pub use ingest::*;
