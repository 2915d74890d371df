//! Occupancy model implementation.
//!
//! The likelihood is implemented as a small, pure structure so that the
//! estimator and the evaluators can stay generic over model specs.

pub mod occupancy;

pub use occupancy::*;
