//! Levenberg-Marquardt strategy for robust pose refinement.
//!
//! A damped alternative to [`GaussNewton`](crate::optimizer::GaussNewton) for
//! large initial misalignments. After linearizing at the current pose it solves
//!
//! ```text
//! (H + λI) δ = G
//! ```
//!
//! and keeps the candidate `T ∘ Exp(δ)⁻¹` only if the robust objective
//! decreases. The damping adapts with Nielsen's rule:
//!
//! - accepted step with quality ρ: `λ ← λ · max(1/3, 1 - (2ρ - 1)³)`, `ν ← 2`
//! - rejected step: `λ ← λ · ν`, `ν ← 2ν`
//!
//! where ρ is the ratio of actual to predicted reduction. Each trial costs one
//! extra residual evaluation. When every trial of an iteration is rejected the
//! pose is kept and a zero increment is recorded, which the refiner treats as
//! parameter convergence.
//!
//! The damping state lives in the [`IterationState`], so one strategy value
//! can serve any number of concurrent refinements.

use crate::core::template::Template;
use crate::error::PoseRefinerResult;
use crate::optimizer::{
    IterationReport, IterationState, OptimizerError, OptimizerResult, PoseEstimationStrategy,
    RefinementStatus, RefinerConfig, RobustLinearizer, Verbosity, state::DampingState,
};
use tracing::{debug, warn};

/// Damping parameters of [`LevenbergMarquardt`].
///
/// ```
/// use pose_refiner::optimizer::LevenbergMarquardtConfig;
///
/// let config = LevenbergMarquardtConfig::new()
///     .with_damping(1e-3)
///     .with_damping_bounds(1e-10, 1e10)
///     .with_max_trials(5);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LevenbergMarquardtConfig {
    /// Initial damping λ
    pub damping: f64,
    /// Lower bound of λ
    pub damping_min: f64,
    /// Upper bound of λ
    pub damping_max: f64,
    /// Rejected trials allowed per iteration before the pose is kept
    pub max_trials: usize,
}

impl Default for LevenbergMarquardtConfig {
    fn default() -> Self {
        Self {
            damping: 1e-4,
            damping_min: 1e-12,
            damping_max: 1e12,
            max_trials: 10,
        }
    }
}

impl LevenbergMarquardtConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    pub fn with_damping_bounds(mut self, min: f64, max: f64) -> Self {
        self.damping_min = min;
        self.damping_max = max;
        self
    }

    pub fn with_max_trials(mut self, max_trials: usize) -> Self {
        self.max_trials = max_trials;
        self
    }

    pub fn validate(&self) -> OptimizerResult<()> {
        if !(self.damping_min > 0.0
            && self.damping_min <= self.damping
            && self.damping <= self.damping_max
            && self.damping_max.is_finite())
        {
            return Err(OptimizerError::InvalidParameters(format!(
                "damping must satisfy 0 < {} <= {} <= {} < inf",
                self.damping_min, self.damping, self.damping_max
            )));
        }
        if self.max_trials == 0 {
            return Err(OptimizerError::InvalidParameters(
                "max_trials must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// IRLS Levenberg-Marquardt with cost-checked step acceptance.
#[derive(Debug)]
pub struct LevenbergMarquardt {
    linearizer: RobustLinearizer,
    config: LevenbergMarquardtConfig,
    verbosity: Verbosity,
}

impl LevenbergMarquardt {
    pub fn new(
        refiner_config: &RefinerConfig,
        config: LevenbergMarquardtConfig,
    ) -> PoseRefinerResult<Self> {
        config.validate()?;
        Ok(LevenbergMarquardt {
            linearizer: RobustLinearizer::from_config(refiner_config)?,
            config,
            verbosity: refiner_config.verbosity,
        })
    }

    pub fn config(&self) -> &LevenbergMarquardtConfig {
        &self.config
    }

    /// Ratio of actual to predicted reduction.
    fn step_quality(current_cost: f64, new_cost: f64, predicted_reduction: f64) -> f64 {
        let actual_reduction = current_cost - new_cost;
        if predicted_reduction.abs() < 1e-15 {
            if actual_reduction > 0.0 { 1.0 } else { 0.0 }
        } else {
            actual_reduction / predicted_reduction
        }
    }

    /// Returns whether the step is accepted.
    fn update_damping(&self, damping: &mut DampingState, rho: f64) -> bool {
        if rho > 0.0 {
            let coff = 2.0 * rho - 1.0;
            damping.lambda *= (1.0_f64 / 3.0).max(1.0 - coff * coff * coff);
            damping.lambda = damping.lambda.max(self.config.damping_min);
            damping.nu = 2.0;
            true
        } else {
            damping.lambda *= damping.nu;
            damping.nu *= 2.0;
            damping.lambda = damping.lambda.min(self.config.damping_max);
            false
        }
    }
}

impl PoseEstimationStrategy for LevenbergMarquardt {
    fn name(&self) -> &'static str {
        "Levenberg-Marquardt"
    }

    fn linearize<T: Template>(
        &self,
        template: &T,
        channels: &T::Channels,
        state: &mut IterationState<T::Pose>,
    ) -> f64 {
        self.linearizer.linearize(template, channels, state)
    }

    fn run_iteration<T: Template>(
        &self,
        template: &T,
        channels: &T::Channels,
        state: &mut IterationState<T::Pose>,
    ) -> IterationReport {
        let function_value = self.linearize(template, channels, state);
        let current_cost = self
            .linearizer
            .robust_cost(&state.residuals, &state.valid, state.scale);
        let mut damping = state.damping.unwrap_or(DampingState {
            lambda: self.config.damping,
            nu: 2.0,
        });

        for trial in 0..self.config.max_trials {
            let step = state
                .solve_damped(damping.lambda)
                .and_then(|delta| state.candidate_pose(&delta).map(|pose| (delta, pose)));
            let (delta, candidate) = match step {
                Ok(step) => step,
                Err(e) => {
                    if self.verbosity >= Verbosity::Normal {
                        warn!("{} step rejected: {}", self.name(), e);
                    }
                    state.damping = Some(damping);
                    return IterationReport::failed(function_value, RefinementStatus::SolverError);
                }
            };

            let new_cost = self
                .linearizer
                .evaluate_robust_cost(template, channels, &candidate, state);
            let predicted_reduction = (0..delta.len())
                .map(|i| delta[i] * (state.gradient[(i, 0)] + damping.lambda * delta[i]))
                .sum::<f64>();
            let rho = if new_cost.is_finite() && new_cost < current_cost {
                Self::step_quality(current_cost, new_cost, predicted_reduction).max(f64::MIN_POSITIVE)
            } else {
                0.0
            };

            if self.verbosity >= Verbosity::Verbose {
                debug!(
                    "trial {}: lambda {:.2e}, cost {:.6e} -> {:.6e}, rho {:.3}",
                    trial, damping.lambda, current_cost, new_cost, rho
                );
            }

            if self.update_damping(&mut damping, rho) {
                state.damping = Some(damping);
                if let Err(e) = state.apply_increment(delta) {
                    if self.verbosity >= Verbosity::Normal {
                        warn!("{} update failed: {}", self.name(), e);
                    }
                    return IterationReport::failed(function_value, RefinementStatus::SolverError);
                }
                return IterationReport::completed(function_value);
            }
        }

        state.damping = Some(damping);
        state.clear_increment();
        IterationReport::completed(function_value)
    }
}
