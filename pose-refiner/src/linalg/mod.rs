//! Dense linear solvers for the P × P normal equations of a pose update.

pub mod cholesky;

use faer::Mat;
use thiserror::Error;
use tracing::error;

pub use cholesky::DenseCholeskySolver;

/// Linear algebra specific error types
#[derive(Debug, Clone, Error)]
pub enum LinAlgError {
    /// Matrix factorization failed (matrix not positive definite)
    #[error("Matrix factorization failed: {0}")]
    FactorizationFailed(String),

    /// Fewer informative rows than unknowns
    #[error("Rank-deficient system: {informative} informative rows for {dof} unknowns")]
    RankDeficient { informative: usize, dof: usize },

    /// Solution contains NaN or Inf
    #[error("Non-finite solution of the linear system")]
    NonFiniteSolution,

    /// Matrix shapes do not agree
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),
}

impl LinAlgError {
    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error with the original source error from a third-party library
    ///
    /// # Example
    /// ```ignore
    /// hessian.as_ref().llt(Side::Lower).map_err(|e| {
    ///     LinAlgError::FactorizationFailed("Cholesky factorization failed".to_string())
    ///         .log_with_source(e)
    /// })?;
    /// ```
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for linear algebra operations
pub type LinAlgResult<T> = Result<T, LinAlgError>;

/// Solver for the symmetric normal equations `H δ = G`.
pub trait NormalEquationSolver {
    /// Solve `H δ = G`.
    ///
    /// # Errors
    /// Returns `LinAlgError` if the factorization fails or the solution is not finite.
    fn solve_normal_equation(
        &mut self,
        hessian: &Mat<f64>,
        gradient: &Mat<f64>,
    ) -> LinAlgResult<Mat<f64>>;

    /// Solve the damped system `(H + λI) δ = G`.
    ///
    /// # Errors
    /// Same as [`NormalEquationSolver::solve_normal_equation`].
    fn solve_augmented_equation(
        &mut self,
        hessian: &Mat<f64>,
        gradient: &Mat<f64>,
        lambda: f64,
    ) -> LinAlgResult<Mat<f64>>;

    /// `H⁻¹` from the most recent factorization, if one succeeded.
    fn compute_covariance_matrix(&self) -> Option<Mat<f64>>;
}
