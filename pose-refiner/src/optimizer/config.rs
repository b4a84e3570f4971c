use crate::core::{loss_functions::LossFunctionType, scale_estimator::MadScaleEstimator};
use crate::optimizer::{OptimizerError, OptimizerResult};
use std::{
    fmt,
    fmt::{Display, Formatter},
    str::FromStr,
};
use tracing::debug;

/// How much the refiner reports through `tracing`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Verbosity {
    /// Nothing, not even solver failures
    #[default]
    Silent,
    /// Warnings on solver failure and missing data
    Normal,
    /// Configuration, per-iteration table and final summary
    Verbose,
}

impl Display for Verbosity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Verbosity::Silent => write!(f, "silent"),
            Verbosity::Normal => write!(f, "normal"),
            Verbosity::Verbose => write!(f, "verbose"),
        }
    }
}

impl FromStr for Verbosity {
    type Err = OptimizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "silent" | "quiet" => Ok(Verbosity::Silent),
            "normal" => Ok(Verbosity::Normal),
            "verbose" | "debug" => Ok(Verbosity::Verbose),
            other => Err(OptimizerError::InvalidParameters(format!(
                "unknown verbosity '{other}'"
            ))),
        }
    }
}

/// Configuration shared by every refinement strategy.
///
/// # Builder Pattern
///
/// ```
/// use pose_refiner::core::loss_functions::LossFunctionType;
/// use pose_refiner::optimizer::{RefinerConfig, Verbosity};
///
/// let config = RefinerConfig::new()
///     .with_loss_function(LossFunctionType::Tukey)
///     .with_max_iterations(30)
///     .with_parameter_tolerance(1e-8)
///     .with_verbosity(Verbosity::Normal);
/// assert!(config.validate().is_ok());
/// ```
///
/// # Convergence Criteria
///
/// After every successful iteration the refiner stops when ANY of these holds:
///
/// - **Function tolerance**: `|f_{k-1} - f_k| / max(f_{k-1}, 1e-10) < function_tolerance`
/// - **Parameter tolerance**: `‖δ‖ < parameter_tolerance`
/// - **Gradient tolerance**: `‖G‖∞ < gradient_tolerance`
#[derive(Debug, Clone)]
pub struct RefinerConfig {
    /// Robust loss applied to normalized residuals
    pub loss_function: LossFunctionType,
    /// Custom tuning constant; `None` uses the loss's standard constant
    pub loss_tuning: Option<f64>,
    /// Noise-scale estimator used to normalize residuals
    pub scale_estimator: MadScaleEstimator,
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// Relative function-value change below which the refinement has converged
    pub function_tolerance: f64,
    /// Increment norm below which the refinement has converged
    pub parameter_tolerance: f64,
    /// Gradient max-norm below which the refinement has converged
    pub gradient_tolerance: f64,
    /// Logging level of the refinement loop
    pub verbosity: Verbosity,
    /// Copy the last Hessian and gradient into the result
    pub return_normal_equations: bool,
    /// Invert the last Hessian into a tangent-space covariance
    pub compute_covariance: bool,
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            loss_function: LossFunctionType::default(),
            loss_tuning: None,
            scale_estimator: MadScaleEstimator::default(),
            max_iterations: 50,
            function_tolerance: 1e-6,
            parameter_tolerance: 1e-6,
            gradient_tolerance: 1e-10,
            verbosity: Verbosity::default(),
            return_normal_equations: false,
            compute_covariance: false,
        }
    }
}

impl RefinerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loss_function(mut self, loss_function: LossFunctionType) -> Self {
        self.loss_function = loss_function;
        self
    }

    pub fn with_loss_tuning(mut self, tuning: f64) -> Self {
        self.loss_tuning = Some(tuning);
        self
    }

    pub fn with_scale_estimator(mut self, scale_estimator: MadScaleEstimator) -> Self {
        self.scale_estimator = scale_estimator;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_function_tolerance(mut self, tolerance: f64) -> Self {
        self.function_tolerance = tolerance;
        self
    }

    pub fn with_parameter_tolerance(mut self, tolerance: f64) -> Self {
        self.parameter_tolerance = tolerance;
        self
    }

    pub fn with_gradient_tolerance(mut self, tolerance: f64) -> Self {
        self.gradient_tolerance = tolerance;
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_normal_equations(mut self, return_normal_equations: bool) -> Self {
        self.return_normal_equations = return_normal_equations;
        self
    }

    pub fn with_covariance(mut self, compute_covariance: bool) -> Self {
        self.compute_covariance = compute_covariance;
        self
    }

    /// Check that every numeric setting is usable.
    pub fn validate(&self) -> OptimizerResult<()> {
        if self.max_iterations == 0 {
            return Err(OptimizerError::InvalidParameters(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("function_tolerance", self.function_tolerance),
            ("parameter_tolerance", self.parameter_tolerance),
            ("gradient_tolerance", self.gradient_tolerance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(OptimizerError::InvalidParameters(format!(
                    "{name} must be non-negative and finite, got {value}"
                )));
            }
        }
        if let Some(c) = self.loss_tuning
            && (!c.is_finite() || c <= 0.0)
        {
            return Err(OptimizerError::InvalidParameters(format!(
                "loss tuning constant must be positive and finite, got {c}"
            )));
        }
        Ok(())
    }

    pub fn print_configuration(&self, strategy: &str) {
        debug!(
            "Configuration:\n  Strategy:            {}\n  Loss function:       {} (tuning: {})\n  Scale fallback:      {:.2e}\n  Convergence Criteria:\n  Max iterations:      {}\n  Function tolerance:  {:.2e}\n  Parameter tolerance: {:.2e}\n  Gradient tolerance:  {:.2e}\n  Outputs:\n  Normal equations:    {}\n  Covariance:          {}",
            strategy,
            self.loss_function,
            self.loss_tuning
                .map_or_else(|| "default".to_string(), |c| format!("{c}")),
            self.scale_estimator.fallback_scale,
            self.max_iterations,
            self.function_tolerance,
            self.parameter_tolerance,
            self.gradient_tolerance,
            if self.return_normal_equations {
                "enabled"
            } else {
                "disabled"
            },
            if self.compute_covariance {
                "enabled"
            } else {
                "disabled"
            }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_defaults_are_valid() {
        let config = RefinerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.loss_function, LossFunctionType::Huber);
        assert_eq!(config.verbosity, Verbosity::Silent);
    }

    #[test]
    fn test_builder() {
        let config = RefinerConfig::new()
            .with_loss_function(LossFunctionType::Cauchy)
            .with_loss_tuning(3.0)
            .with_max_iterations(7)
            .with_function_tolerance(1e-3)
            .with_parameter_tolerance(1e-4)
            .with_gradient_tolerance(1e-5)
            .with_verbosity(Verbosity::Verbose)
            .with_normal_equations(true)
            .with_covariance(true);
        assert_eq!(config.loss_function, LossFunctionType::Cauchy);
        assert_eq!(config.loss_tuning, Some(3.0));
        assert_eq!(config.max_iterations, 7);
        assert_eq!(config.function_tolerance, 1e-3);
        assert_eq!(config.parameter_tolerance, 1e-4);
        assert_eq!(config.gradient_tolerance, 1e-5);
        assert_eq!(config.verbosity, Verbosity::Verbose);
        assert!(config.return_normal_equations);
        assert!(config.compute_covariance);
    }

    #[test]
    fn test_invalid_configurations() {
        assert!(RefinerConfig::new().with_max_iterations(0).validate().is_err());
        assert!(RefinerConfig::new().with_function_tolerance(-1.0).validate().is_err());
        assert!(RefinerConfig::new().with_parameter_tolerance(f64::NAN).validate().is_err());
        assert!(RefinerConfig::new().with_loss_tuning(0.0).validate().is_err());
    }

    #[test]
    fn test_verbosity_parse() -> TestResult {
        assert_eq!("Verbose".parse::<Verbosity>()?, Verbosity::Verbose);
        assert_eq!("normal".parse::<Verbosity>()?, Verbosity::Normal);
        assert!("chatty".parse::<Verbosity>().is_err());
        assert!(Verbosity::Silent < Verbosity::Normal);
        Ok(())
    }
}
