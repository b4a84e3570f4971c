//! Outer iteration loop and termination logic.
//!
//! ```text
//!              ┌──────── success, not converged ───────┐
//!              ▼                                        │
//! start ──▶ Running ──── run_iteration ────────────────┤
//!              │                                        │
//!              ├── convergence criterion met ──▶ Converged
//!              ├── iteration budget exhausted ──▶ MaxIterationsReached
//!              ├── no valid residual, first iteration ──▶ InsufficientData
//!              └── solve failed ──▶ SolverError
//! ```

use crate::core::template::Template;
use crate::error::PoseRefinerResult;
use crate::manifold::LieGroup;
use crate::optimizer::{
    GaussNewton, IterationState, IterationStats, LevenbergMarquardt, LevenbergMarquardtConfig,
    OptimizerError, PoseEstimationStrategy, RefinementStatus, RefinerConfig, Verbosity,
};
use faer::Mat;
use std::{
    fmt,
    fmt::{Display, Formatter},
};
use tracing::{debug, info, warn};
use web_time as time;

/// Floor of the previous function value in the relative-change test.
const MIN_RELATIVE_DENOMINATOR: f64 = 1e-10;

/// Output of one refinement call.
#[derive(Debug, Clone)]
pub struct RefinementResult<P> {
    /// Final pose; the last good pose when the status is a failure
    pub pose: P,
    /// How the refinement ended
    pub status: RefinementStatus,
    /// Iterations run, including a failing one
    pub iterations: usize,
    /// Residual evaluations, including rejected trials
    pub function_evaluations: usize,
    /// Cost at the initial pose
    pub initial_cost: f64,
    /// Cost of the last linearization
    pub final_cost: f64,
    /// Cost of every iteration's linearization, in order
    pub cost_history: Vec<f64>,
    /// Norm of the last increment
    pub final_increment_norm: f64,
    /// Max-norm of the last gradient
    pub final_gradient_norm: f64,
    /// Valid residuals of the last linearization
    pub num_valid: usize,
    /// Robust scale of the last linearization
    pub scale: f64,
    /// Last Hessian, when requested
    pub hessian: Option<Mat<f64>>,
    /// Last gradient, when requested
    pub gradient: Option<Mat<f64>>,
    /// `H⁻¹` of the last linearization, when requested and `H` is invertible
    pub covariance: Option<Mat<f64>>,
    /// Wall-clock time of the call
    pub elapsed_time: time::Duration,
}

impl<P> RefinementResult<P> {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl<P: Display> Display for RefinementResult<P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Refinement Summary")?;
        writeln!(f, "  Status:               {}", self.status)?;
        writeln!(f, "  Pose:                 {}", self.pose)?;
        writeln!(f, "  Initial cost:         {:.6e}", self.initial_cost)?;
        writeln!(f, "  Final cost:           {:.6e}", self.final_cost)?;
        writeln!(f, "  Iterations:           {}", self.iterations)?;
        writeln!(f, "  Function evaluations: {}", self.function_evaluations)?;
        writeln!(f, "  Valid residuals:      {}", self.num_valid)?;
        writeln!(f, "  Final |step|:         {:.2e}", self.final_increment_norm)?;
        writeln!(f, "  Final |gradient|:     {:.2e}", self.final_gradient_norm)?;
        write!(
            f,
            "  Elapsed:              {:.3}ms",
            self.elapsed_time.as_secs_f64() * 1000.0
        )
    }
}

/// Repeats a strategy until convergence, failure or budget exhaustion.
///
/// # Example
///
/// ```no_run
/// use pose_refiner::optimizer::{IterativeRefiner, RefinerConfig, Verbosity};
/// # use pose_refiner::error::PoseRefinerResult;
/// # fn example() -> PoseRefinerResult<()> {
///
/// let refiner = IterativeRefiner::new(
///     RefinerConfig::new()
///         .with_max_iterations(30)
///         .with_verbosity(Verbosity::Normal),
/// )?;
/// # let _ = refiner;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct IterativeRefiner<S: PoseEstimationStrategy = GaussNewton> {
    config: RefinerConfig,
    strategy: S,
}

impl IterativeRefiner<GaussNewton> {
    /// Gauss-Newton refiner.
    pub fn new(config: RefinerConfig) -> PoseRefinerResult<Self> {
        let strategy = GaussNewton::new(&config)?;
        Self::with_strategy(config, strategy)
    }
}

impl IterativeRefiner<LevenbergMarquardt> {
    /// Levenberg-Marquardt refiner.
    pub fn levenberg_marquardt(
        config: RefinerConfig,
        damping: LevenbergMarquardtConfig,
    ) -> PoseRefinerResult<Self> {
        let strategy = LevenbergMarquardt::new(&config, damping)?;
        Self::with_strategy(config, strategy)
    }
}

impl<S: PoseEstimationStrategy> IterativeRefiner<S> {
    pub fn with_strategy(config: RefinerConfig, strategy: S) -> PoseRefinerResult<Self> {
        config.validate()?;
        Ok(IterativeRefiner { config, strategy })
    }

    pub fn config(&self) -> &RefinerConfig {
        &self.config
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Refine `initial_pose` against `channels`, allocating a fresh state.
    ///
    /// # Errors
    /// Fails only when the template's Jacobian does not match the pose.
    pub fn refine<T: Template>(
        &self,
        template: &T,
        channels: &T::Channels,
        initial_pose: T::Pose,
    ) -> PoseRefinerResult<RefinementResult<T::Pose>> {
        let mut state = IterationState::new(template, initial_pose.clone())?;
        self.refine_with_state(template, channels, initial_pose, &mut state)
    }

    /// Refine reusing the buffers of `state`, which is reset to `initial_pose` first.
    ///
    /// # Errors
    /// Fails when `state` was sized for a different template or pose dimension.
    pub fn refine_with_state<T: Template>(
        &self,
        template: &T,
        channels: &T::Channels,
        initial_pose: T::Pose,
        state: &mut IterationState<T::Pose>,
    ) -> PoseRefinerResult<RefinementResult<T::Pose>> {
        if !state.fits(template, &initial_pose) {
            return Err(OptimizerError::StateMismatch(format!(
                "state holds {} residuals and {} degrees of freedom, template needs {} and {}",
                state.residuals().len(),
                state.dof(),
                template.num_residuals(),
                initial_pose.tangent_dim()
            ))
            .into());
        }
        state.reset(initial_pose);
        Ok(self.run(template, channels, state))
    }

    fn run<T: Template>(
        &self,
        template: &T,
        channels: &T::Channels,
        state: &mut IterationState<T::Pose>,
    ) -> RefinementResult<T::Pose> {
        let verbose = self.config.verbosity >= Verbosity::Verbose;
        let start_time = time::Instant::now();
        if verbose {
            self.config.print_configuration(self.strategy.name());
            IterationStats::print_header();
        }

        let mut cost_history = Vec::new();
        let mut previous_cost: Option<f64> = None;
        let mut iterations = 0;

        let status = loop {
            if iterations >= self.config.max_iterations {
                break RefinementStatus::MaxIterationsReached;
            }

            let iter_start = time::Instant::now();
            let report = self.strategy.run_iteration(template, channels, state);
            iterations += 1;
            cost_history.push(report.function_value);

            if let Some(failure) = report.status {
                if iterations == 1 && state.num_valid() == 0 {
                    break RefinementStatus::InsufficientData;
                }
                break failure;
            }

            let cost = report.function_value;
            let cost_change = previous_cost.map_or(0.0, |previous| previous - cost);
            if verbose {
                IterationStats {
                    iteration: iterations,
                    cost,
                    cost_change,
                    gradient_norm: state.gradient_norm(),
                    step_norm: state.increment_norm(),
                    scale: state.scale(),
                    num_valid: state.num_valid(),
                    iter_time_ms: iter_start.elapsed().as_secs_f64() * 1000.0,
                    total_time_ms: start_time.elapsed().as_secs_f64() * 1000.0,
                }
                .print_line();
            }

            if let Some(reason) = self.check_convergence(previous_cost, cost, state) {
                if verbose {
                    debug!("converged after {} iterations: {}", iterations, reason);
                }
                break RefinementStatus::Converged;
            }
            previous_cost = Some(cost);
        };

        if status == RefinementStatus::InsufficientData
            && self.config.verbosity >= Verbosity::Normal
        {
            warn!(
                "no valid residuals out of {} at the initial pose",
                template.num_residuals()
            );
        }

        let result = RefinementResult {
            pose: state.pose().clone(),
            status,
            iterations,
            function_evaluations: state.num_function_evaluations(),
            initial_cost: cost_history.first().copied().unwrap_or(0.0),
            final_cost: cost_history.last().copied().unwrap_or(0.0),
            cost_history,
            final_increment_norm: state.increment_norm(),
            final_gradient_norm: state.gradient_norm(),
            num_valid: state.num_valid(),
            scale: state.scale(),
            hessian: self
                .config
                .return_normal_equations
                .then(|| state.hessian().clone()),
            gradient: self
                .config
                .return_normal_equations
                .then(|| state.gradient().clone()),
            covariance: if self.config.compute_covariance {
                state.covariance()
            } else {
                None
            },
            elapsed_time: start_time.elapsed(),
        };

        if verbose {
            info!("{} finished: {}", self.strategy.name(), result.status);
            debug!(
                "cost {:.6e} -> {:.6e} in {} iterations, {} evaluations",
                result.initial_cost,
                result.final_cost,
                result.iterations,
                result.function_evaluations
            );
        }
        result
    }

    fn check_convergence<P: LieGroup>(
        &self,
        previous_cost: Option<f64>,
        cost: f64,
        state: &IterationState<P>,
    ) -> Option<&'static str> {
        if state.gradient_norm() < self.config.gradient_tolerance {
            return Some("gradient tolerance");
        }
        if state.increment_norm() < self.config.parameter_tolerance {
            return Some("parameter tolerance");
        }
        if let Some(previous) = previous_cost {
            let relative_change = (previous - cost).abs() / previous.max(MIN_RELATIVE_DENOMINATOR);
            if relative_change < self.config.function_tolerance {
                return Some("function tolerance");
            }
        }
        None
    }
}
