//! Robust statistics and normal-equation assembly.
//!
//! This module contains the numeric building blocks that every refinement
//! strategy shares:
//! - Robust loss functions and the per-residual weighting stage
//! - The median-absolute-deviation scale estimator
//! - The weighted normal-equation builder
//! - The [`Template`](template::Template) abstraction of the reference side

pub mod linear_system;
pub mod loss_functions;
pub mod scale_estimator;
pub mod template;
pub mod weighting;

use thiserror::Error;
use tracing::error;

/// Core module error types
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Dimension mismatch between template, Jacobian and pose
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Loss function error
    #[error("Loss function error: {0}")]
    LossFunction(String),

    /// Invalid image or channel data
    #[error("Invalid image data: {0}")]
    InvalidImage(String),

    /// Invalid input parameter or configuration
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| CoreError::from(e).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error together with the underlying error that caused it
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for core module operations
pub type CoreResult<T> = Result<T, CoreError>;
