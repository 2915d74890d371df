//! Top-level error type.
//!
//! Typed failures from the engine (`SelectionFailure`, `DimensionMismatch`, ...)
//! convert into `AppError`, which carries the process exit code:
//!
//! - `2`: invalid input or configuration
//! - `3`: not enough models to continue (selection failure)
//! - `4`: numerical / internal failure

use crate::fit::averaging::DimensionMismatch;
use crate::fit::selection::SelectionFailure;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    /// Shorthand for exit code 2 (bad input / configuration).
    pub fn input(message: impl Into<String>) -> Self {
        Self::new(2, message)
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

impl From<SelectionFailure> for AppError {
    fn from(err: SelectionFailure) -> Self {
        AppError::new(3, format!("Model selection failed: {err}"))
    }
}

impl From<DimensionMismatch> for AppError {
    fn from(err: DimensionMismatch) -> Self {
        AppError::new(4, format!("Model averaging failed: {err}"))
    }
}
