//! Iteratively reweighted pose refinement.
//!
//! One refinement call repeatedly applies a [`PoseEstimationStrategy`] to an
//! [`IterationState`] until the [`IterativeRefiner`] decides to stop:
//! - Gauss-Newton: undamped IRLS step `δ = H⁻¹G`
//! - Levenberg-Marquardt: damped step with cost-checked acceptance
//!
//! Numerical outcomes (divergence, singular systems, missing data) are reported
//! through [`RefinementStatus`], never as errors. Errors are reserved for
//! invalid configuration and inconsistent template dimensions.

use crate::core::{
    linear_system::LinearSystemBuilder,
    loss_functions::LossFunction,
    scale_estimator::MadScaleEstimator,
    template::Template,
    weighting::compute_weights,
};
use crate::error::PoseRefinerResult;
use crate::linalg;
use crate::manifold::ManifoldError;
use std::{
    fmt,
    fmt::{Display, Formatter},
};
use thiserror::Error;
use tracing::{debug, error};

pub mod config;
pub mod gauss_newton;
pub mod levenberg_marquardt;
pub mod refiner;
pub mod state;

pub use config::{RefinerConfig, Verbosity};
pub use gauss_newton::GaussNewton;
pub use levenberg_marquardt::{LevenbergMarquardt, LevenbergMarquardtConfig};
pub use refiner::{IterativeRefiner, RefinementResult};
pub use state::IterationState;

/// Optimizer-specific error types
#[derive(Debug, Clone, Error)]
pub enum OptimizerError {
    /// Invalid optimization parameters provided
    #[error("Invalid optimization parameters: {0}")]
    InvalidParameters(String),

    /// Iteration state does not match the template it is used with
    #[error("Iteration state mismatch: {0}")]
    StateMismatch(String),

    /// Linear algebra operation failed
    #[error("Linear algebra error: {0}")]
    LinAlg(#[from] linalg::LinAlgError),

    /// Pose update could not be applied
    #[error("Pose update failed: {0}")]
    Manifold(#[from] ManifoldError),
}

impl OptimizerError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| OptimizerError::from(e).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error with the original source error from a third-party library
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for optimizer operations
pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// Terminal state of a refinement call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefinementStatus {
    /// A convergence criterion was met
    Converged,
    /// The iteration budget ran out before convergence
    MaxIterationsReached,
    /// The linear solve failed; the last good pose is returned
    SolverError,
    /// No residual could be sampled on the first iteration
    InsufficientData,
}

impl RefinementStatus {
    /// Whether the returned pose is the result of a completed refinement.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            RefinementStatus::Converged | RefinementStatus::MaxIterationsReached
        )
    }
}

impl Display for RefinementStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RefinementStatus::Converged => write!(f, "Converged"),
            RefinementStatus::MaxIterationsReached => write!(f, "Maximum iterations reached"),
            RefinementStatus::SolverError => write!(f, "Solver error"),
            RefinementStatus::InsufficientData => write!(f, "Insufficient data"),
        }
    }
}

/// Outcome of a single strategy iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationReport {
    /// Cost at the pose the iteration started from.
    pub function_value: f64,
    /// `None` when the iteration completed; the failure status otherwise.
    pub status: Option<RefinementStatus>,
}

impl IterationReport {
    pub fn completed(function_value: f64) -> Self {
        IterationReport {
            function_value,
            status: None,
        }
    }

    pub fn failed(function_value: f64, status: RefinementStatus) -> Self {
        IterationReport {
            function_value,
            status: Some(status),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status.is_none()
    }
}

/// One way of turning a linearization into a pose update.
pub trait PoseEstimationStrategy {
    /// Human-readable algorithm name.
    fn name(&self) -> &'static str;

    /// Evaluate residuals, scale, weights and normal equations at the state's
    /// pose and return the cost. Does not modify the pose.
    fn linearize<T: Template>(
        &self,
        template: &T,
        channels: &T::Channels,
        state: &mut IterationState<T::Pose>,
    ) -> f64;

    /// Linearize and attempt one pose update.
    fn run_iteration<T: Template>(
        &self,
        template: &T,
        channels: &T::Channels,
        state: &mut IterationState<T::Pose>,
    ) -> IterationReport;
}

/// Shared residual → scale → weights → normal-equation pipeline.
#[derive(Debug)]
pub struct RobustLinearizer {
    loss: Box<dyn LossFunction>,
    scale_estimator: MadScaleEstimator,
    builder: LinearSystemBuilder,
}

impl RobustLinearizer {
    pub fn new(loss: Box<dyn LossFunction>, scale_estimator: MadScaleEstimator) -> Self {
        RobustLinearizer {
            loss,
            scale_estimator,
            builder: LinearSystemBuilder::new(),
        }
    }

    /// Build the loss and scale estimator selected by `config`.
    pub fn from_config(config: &RefinerConfig) -> PoseRefinerResult<Self> {
        let loss = match config.loss_tuning {
            Some(c) => config.loss_function.build_with_tuning(c)?,
            None => config.loss_function.build(),
        };
        config.scale_estimator.validate()?;
        Ok(Self::new(loss, config.scale_estimator))
    }

    pub fn linearize<T: Template>(
        &self,
        template: &T,
        channels: &T::Channels,
        state: &mut IterationState<T::Pose>,
    ) -> f64 {
        template.compute_residuals(
            channels,
            &state.pose,
            &mut state.residuals,
            &mut state.valid,
        );
        state.num_function_evaluations += 1;

        state.scale = self.scale_estimator.estimate_scale_with_buffer(
            &state.residuals,
            &state.valid,
            &mut state.scratch,
        );
        compute_weights(
            self.loss.as_ref(),
            &state.residuals,
            &state.valid,
            state.scale,
            &mut state.weights,
        );

        let summary = self.builder.run(
            template.jacobians(),
            &state.residuals,
            &state.weights,
            &state.valid,
            &mut state.hessian,
            &mut state.gradient,
        );
        state.num_valid = summary.num_valid;
        state.num_informative = summary.num_informative;
        state.cost = summary.cost;

        debug!(
            "linearized: cost {:.6e}, scale {:.4e}, valid {}/{}",
            summary.cost,
            state.scale,
            summary.num_valid,
            state.residuals.len()
        );
        summary.cost
    }

    /// Robust objective `Σ 2σ² ρ(rᵢ/σ)` over valid entries at scale `σ`.
    pub fn robust_cost(&self, residuals: &[f64], valid: &[bool], scale: f64) -> f64 {
        let two_scale2 = 2.0 * scale * scale;
        residuals
            .iter()
            .zip(valid)
            .filter(|&(r, &v)| v && r.is_finite())
            .map(|(r, _)| two_scale2 * self.loss.rho(r / scale))
            .sum()
    }

    /// Robust objective of `pose`, using the scale of the last linearization.
    ///
    /// Residuals go to the state's trial buffers, leaving the linearization intact.
    pub fn evaluate_robust_cost<T: Template>(
        &self,
        template: &T,
        channels: &T::Channels,
        pose: &T::Pose,
        state: &mut IterationState<T::Pose>,
    ) -> f64 {
        template.compute_residuals(
            channels,
            pose,
            &mut state.trial_residuals,
            &mut state.trial_valid,
        );
        state.num_function_evaluations += 1;
        self.robust_cost(&state.trial_residuals, &state.trial_valid, state.scale)
    }
}

/// Per-iteration statistics for the verbose progress table.
#[derive(Debug, Clone)]
pub struct IterationStats {
    pub iteration: usize,
    pub cost: f64,
    pub cost_change: f64,
    pub gradient_norm: f64,
    pub step_norm: f64,
    pub scale: f64,
    pub num_valid: usize,
    pub iter_time_ms: f64,
    pub total_time_ms: f64,
}

impl IterationStats {
    pub fn print_header() {
        debug!(
            "{:>4}  {:>13}  {:>13}  {:>13}  {:>13}  {:>11}  {:>8}  {:>11}  {:>13}",
            "iter",
            "cost",
            "cost_change",
            "|gradient|",
            "|step|",
            "scale",
            "valid",
            "iter_time",
            "total_time",
        );
    }

    pub fn print_line(&self) {
        debug!(
            "{:>4}  {:>13.6e}  {:>13.2e}  {:>13.2e}  {:>13.2e}  {:>11.2e}  {:>8}  {:>9.2}ms  {:>11.2}ms",
            self.iteration,
            self.cost,
            self.cost_change,
            self.gradient_norm,
            self.step_norm,
            self.scale,
            self.num_valid,
            self.iter_time_ms,
            self.total_time_ms,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loss_functions::{HuberLoss, L2Loss};

    #[test]
    fn test_status_display_and_success() {
        assert_eq!(RefinementStatus::Converged.to_string(), "Converged");
        assert!(RefinementStatus::MaxIterationsReached.is_success());
        assert!(!RefinementStatus::SolverError.is_success());
        assert!(!RefinementStatus::InsufficientData.is_success());
    }

    #[test]
    fn test_iteration_report() {
        assert!(IterationReport::completed(1.0).succeeded());
        let failed = IterationReport::failed(2.0, RefinementStatus::SolverError);
        assert!(!failed.succeeded());
        assert_eq!(failed.function_value, 2.0);
    }

    #[test]
    fn test_robust_cost_reduces_to_sum_of_squares_for_l2() {
        let linearizer = RobustLinearizer::new(Box::new(L2Loss), MadScaleEstimator::default());
        let cost = linearizer.robust_cost(&[1.0, -2.0, 100.0], &[true, true, false], 3.0);
        assert!((cost - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_robust_cost_bounds_outlier_influence() {
        let linearizer =
            RobustLinearizer::new(Box::new(HuberLoss::default()), MadScaleEstimator::default());
        let cost = linearizer.robust_cost(&[0.0, 1000.0], &[true, true], 1.0);
        assert!(cost < 1000.0 * 1000.0);
    }
}
