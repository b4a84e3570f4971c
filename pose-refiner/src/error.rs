//! Error types for the pose-refiner library
//!
//! Public APIs return [`PoseRefinerError`], which wraps the module errors
//! (`CoreError`, `OptimizerError`, `LinAlgError`, `ManifoldError`) and keeps
//! their sources so the whole chain can be printed.
//!
//! Numerical outcomes of a refinement (singular systems, missing data) are not
//! errors; they are reported through
//! [`RefinementStatus`](crate::optimizer::RefinementStatus).
//!
//! Example error chain:
//! ```text
//! PoseRefinerError::Optimizer(
//!     OptimizerError::LinAlg(
//!         LinAlgError::RankDeficient { informative: 3, dof: 6 }
//!     )
//! )
//! ```

use crate::{
    core::CoreError, linalg::LinAlgError, manifold::ManifoldError, optimizer::OptimizerError,
};
use std::error::Error as StdError;
use thiserror::Error;

/// Main result type used throughout the pose-refiner library
pub type PoseRefinerResult<T> = Result<T, PoseRefinerError>;

/// Top-level error of the pose-refiner library
///
/// ```rust,ignore
/// if let Err(e) = refiner.refine(&template, &channels, initial_pose) {
///     warn!("Full chain: {}", e.chain());
/// }
/// ```
#[derive(Debug, Error)]
pub enum PoseRefinerError {
    /// Template, image and robust statistics errors
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Configuration and iteration-state errors
    #[error(transparent)]
    Optimizer(#[from] OptimizerError),

    /// Linear algebra errors
    #[error(transparent)]
    LinearAlgebra(#[from] LinAlgError),

    /// Manifold operation errors
    #[error(transparent)]
    Manifold(#[from] ManifoldError),
}

impl PoseRefinerError {
    /// Full error chain, one cause per line.
    pub fn chain(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(format!("  → {}", err));
            source = err.source();
        }

        chain.join("\n")
    }

    /// Single-line error chain for log messages.
    ///
    /// ```rust,ignore
    /// error!("Refinement failed: {}", err.chain_compact());
    /// // "Pose update failed → Invalid tangent dimension: expected 6, got 3"
    /// ```
    pub fn chain_compact(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }

        chain.join(" → ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pose_refiner_error_display() {
        let error = PoseRefinerError::from(LinAlgError::NonFiniteSolution);
        assert!(error.to_string().contains("Non-finite"));
    }

    #[test]
    fn test_pose_refiner_error_chain() {
        let error = PoseRefinerError::from(OptimizerError::LinAlg(
            LinAlgError::FactorizationFailed("Cholesky factorization failed".to_string()),
        ));

        let chain = error.chain();
        assert!(chain.contains("Linear algebra error"));
        assert!(chain.contains("Cholesky"));
    }

    #[test]
    fn test_pose_refiner_error_chain_compact() {
        let error = PoseRefinerError::from(OptimizerError::Manifold(
            ManifoldError::InvalidTangentDimension {
                expected: 6,
                actual: 3,
            },
        ));

        let compact = error.chain_compact();
        assert!(compact.contains("Pose update failed"));
        assert!(compact.contains("expected 6, got 3"));
        assert!(!compact.contains('\n'));
    }

    #[test]
    fn test_pose_refiner_result_err() {
        let result: PoseRefinerResult<i32> =
            Err(CoreError::InvalidImage("empty channel".to_string()).into());
        assert!(result.is_err());
    }

    #[test]
    fn test_transparent_error_conversion() {
        let manifold_error = ManifoldError::InvalidNumber;
        let error: PoseRefinerError = manifold_error.into();
        assert!(matches!(error, PoseRefinerError::Manifold(_)));
    }
}
