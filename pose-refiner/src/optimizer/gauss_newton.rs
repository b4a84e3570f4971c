//! Gauss-Newton strategy for robust pose refinement.
//!
//! Each iteration linearizes the photometric error at the current pose and
//! takes the full IRLS step
//!
//! ```text
//! H = Σ wᵢ Jᵢᵀ Jᵢ,   G = Σ wᵢ Jᵢᵀ rᵢ,   δ = H⁻¹ G,   T ← T ∘ Exp(δ)⁻¹
//! ```
//!
//! with no damping and no line search. Because the Jacobian of an
//! inverse-compositional template is fixed, the cost of an iteration is one
//! residual evaluation plus a P × P Cholesky solve.
//!
//! # Example
//!
//! ```no_run
//! use pose_refiner::optimizer::{GaussNewton, IterativeRefiner, RefinerConfig};
//! # use pose_refiner::error::PoseRefinerResult;
//! # fn example() -> PoseRefinerResult<()> {
//!
//! let config = RefinerConfig::new().with_max_iterations(20);
//! let refiner = IterativeRefiner::with_strategy(config.clone(), GaussNewton::new(&config)?)?;
//! # let _ = refiner;
//! # Ok(())
//! # }
//! ```

use crate::core::template::Template;
use crate::error::PoseRefinerResult;
use crate::optimizer::{
    IterationReport, IterationState, PoseEstimationStrategy, RefinementStatus, RefinerConfig,
    RobustLinearizer, Verbosity,
};
use tracing::warn;

/// Undamped IRLS Gauss-Newton.
#[derive(Debug)]
pub struct GaussNewton {
    linearizer: RobustLinearizer,
    verbosity: Verbosity,
}

impl GaussNewton {
    pub fn new(config: &RefinerConfig) -> PoseRefinerResult<Self> {
        Ok(GaussNewton {
            linearizer: RobustLinearizer::from_config(config)?,
            verbosity: config.verbosity,
        })
    }
}

impl PoseEstimationStrategy for GaussNewton {
    fn name(&self) -> &'static str {
        "Gauss-Newton"
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

        if let Err(e) = state.solve() {
            if self.verbosity >= Verbosity::Normal {
                warn!("{} step rejected: {}", self.name(), e);
            }
            return IterationReport::failed(function_value, RefinementStatus::SolverError);
        }

        IterationReport::completed(function_value)
    }
}
