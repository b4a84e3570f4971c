//! Robust loss functions for iteratively reweighted least squares.
//!
//! A loss `ρ(u)` is evaluated on the *normalized* residual `u = r / σ`, where `σ`
//! is the robust scale of the current residual set. IRLS only needs the weight
//! `w(u) = ρ'(u) / u`, which multiplies each row of the normal equations:
//!
//! ```text
//! H = Σ w(uᵢ) Jᵢᵀ Jᵢ        G = Σ w(uᵢ) Jᵢᵀ rᵢ
//! ```
//!
//! Every weight in this module lies in `[0, 1]` and is non-increasing in `|u|`.
//!
//! | Loss      | w(u)                              | Tuning constant (95% efficiency) |
//! |-----------|-----------------------------------|----------------------------------|
//! | L2        | 1                                 | n/a                              |
//! | Huber     | 1 if \|u\| ≤ c, else c / \|u\|    | c = 1.345                        |
//! | Tukey     | (1 - (u/c)²)² if \|u\| ≤ c, else 0| c = 4.6851                       |
//! | Cauchy    | 1 / (1 + (u/c)²)                  | c = 2.3849                       |
//!
//! # Example
//!
//! ```
//! use pose_refiner::core::loss_functions::{HuberLoss, LossFunction};
//! # use pose_refiner::error::PoseRefinerResult;
//! # fn example() -> PoseRefinerResult<()> {
//!
//! let huber = HuberLoss::new(1.345)?;
//! assert_eq!(huber.weight(0.5), 1.0);
//! assert!(huber.weight(10.0) < 0.2);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use crate::core::CoreError;
use crate::error::PoseRefinerResult;
use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

/// A robust M-estimator evaluated on normalized residuals.
pub trait LossFunction: Debug + Send + Sync {
    /// Robust cost `ρ(u)`; equals `u² / 2` near zero.
    fn rho(&self, u: f64) -> f64;

    /// IRLS weight `w(u) = ρ'(u) / u`, in `[0, 1]`.
    fn weight(&self, u: f64) -> f64;
}

fn check_tuning(name: &str, c: f64) -> PoseRefinerResult<()> {
    if !c.is_finite() || c <= 0.0 {
        return Err(CoreError::LossFunction(format!(
            "{name} tuning constant must be positive and finite, got {c}"
        ))
        .into());
    }
    Ok(())
}

/// Plain least squares: every valid residual gets full weight.
#[derive(Debug, Clone, Copy, Default)]
pub struct L2Loss;

impl LossFunction for L2Loss {
    fn rho(&self, u: f64) -> f64 {
        0.5 * u * u
    }

    fn weight(&self, _u: f64) -> f64 {
        1.0
    }
}

/// Huber loss: quadratic for `|u| ≤ c`, linear beyond.
///
/// ```text
/// ρ(u) = u²/2            |u| ≤ c
///        c|u| - c²/2     |u| > c
/// ```
#[derive(Debug, Clone, Copy)]
pub struct HuberLoss {
    c: f64,
}

impl HuberLoss {
    pub const DEFAULT_TUNING: f64 = 1.345;

    pub fn new(c: f64) -> PoseRefinerResult<Self> {
        check_tuning("Huber", c)?;
        Ok(HuberLoss { c })
    }
}

impl Default for HuberLoss {
    fn default() -> Self {
        HuberLoss {
            c: Self::DEFAULT_TUNING,
        }
    }
}

impl LossFunction for HuberLoss {
    fn rho(&self, u: f64) -> f64 {
        let a = u.abs();
        if a <= self.c {
            0.5 * u * u
        } else {
            self.c * a - 0.5 * self.c * self.c
        }
    }

    fn weight(&self, u: f64) -> f64 {
        let a = u.abs();
        if a <= self.c { 1.0 } else { self.c / a }
    }
}

/// Tukey biweight: redescending, residuals beyond `c` are ignored entirely.
///
/// ```text
/// ρ(u) = c²/6 (1 - (1 - (u/c)²)³)   |u| ≤ c
///        c²/6                       |u| > c
/// ```
#[derive(Debug, Clone, Copy)]
pub struct TukeyBiweightLoss {
    c: f64,
}

impl TukeyBiweightLoss {
    pub const DEFAULT_TUNING: f64 = 4.6851;

    pub fn new(c: f64) -> PoseRefinerResult<Self> {
        check_tuning("Tukey", c)?;
        Ok(TukeyBiweightLoss { c })
    }
}

impl Default for TukeyBiweightLoss {
    fn default() -> Self {
        TukeyBiweightLoss {
            c: Self::DEFAULT_TUNING,
        }
    }
}

impl LossFunction for TukeyBiweightLoss {
    fn rho(&self, u: f64) -> f64 {
        let c2_6 = self.c * self.c / 6.0;
        if u.abs() > self.c {
            c2_6
        } else {
            let t = 1.0 - (u / self.c).powi(2);
            c2_6 * (1.0 - t * t * t)
        }
    }

    fn weight(&self, u: f64) -> f64 {
        if u.abs() > self.c {
            0.0
        } else {
            let t = 1.0 - (u / self.c).powi(2);
            t * t
        }
    }
}

/// Cauchy (Lorentzian) loss: smooth, never fully rejects a residual.
///
/// ```text
/// ρ(u) = c²/2 log(1 + (u/c)²)
/// ```
#[derive(Debug, Clone, Copy)]
pub struct CauchyLoss {
    c: f64,
}

impl CauchyLoss {
    pub const DEFAULT_TUNING: f64 = 2.3849;

    pub fn new(c: f64) -> PoseRefinerResult<Self> {
        check_tuning("Cauchy", c)?;
        Ok(CauchyLoss { c })
    }
}

impl Default for CauchyLoss {
    fn default() -> Self {
        CauchyLoss {
            c: Self::DEFAULT_TUNING,
        }
    }
}

impl LossFunction for CauchyLoss {
    fn rho(&self, u: f64) -> f64 {
        0.5 * self.c * self.c * (u / self.c).powi(2).ln_1p()
    }

    fn weight(&self, u: f64) -> f64 {
        1.0 / (1.0 + (u / self.c).powi(2))
    }
}

/// Selectable loss family, with the standard tuning constant of each.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LossFunctionType {
    L2,
    #[default]
    Huber,
    Tukey,
    Cauchy,
}

impl LossFunctionType {
    pub const ALL: [LossFunctionType; 4] = [
        LossFunctionType::L2,
        LossFunctionType::Huber,
        LossFunctionType::Tukey,
        LossFunctionType::Cauchy,
    ];

    /// Instantiate the loss with its default tuning constant.
    pub fn build(self) -> Box<dyn LossFunction> {
        match self {
            LossFunctionType::L2 => Box::new(L2Loss),
            LossFunctionType::Huber => Box::new(HuberLoss::default()),
            LossFunctionType::Tukey => Box::new(TukeyBiweightLoss::default()),
            LossFunctionType::Cauchy => Box::new(CauchyLoss::default()),
        }
    }

    /// Instantiate the loss with a custom tuning constant (ignored for L2).
    pub fn build_with_tuning(self, c: f64) -> PoseRefinerResult<Box<dyn LossFunction>> {
        Ok(match self {
            LossFunctionType::L2 => Box::new(L2Loss),
            LossFunctionType::Huber => Box::new(HuberLoss::new(c)?),
            LossFunctionType::Tukey => Box::new(TukeyBiweightLoss::new(c)?),
            LossFunctionType::Cauchy => Box::new(CauchyLoss::new(c)?),
        })
    }
}

impl Display for LossFunctionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LossFunctionType::L2 => write!(f, "l2"),
            LossFunctionType::Huber => write!(f, "huber"),
            LossFunctionType::Tukey => write!(f, "tukey"),
            LossFunctionType::Cauchy => write!(f, "cauchy"),
        }
    }
}

impl FromStr for LossFunctionType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l2" | "none" | "gaussian" => Ok(LossFunctionType::L2),
            "huber" => Ok(LossFunctionType::Huber),
            "tukey" | "bisquare" => Ok(LossFunctionType::Tukey),
            "cauchy" => Ok(LossFunctionType::Cauchy),
            other => Err(CoreError::LossFunction(format!(
                "unknown loss function '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    const EPSILON: f64 = 1e-6;

    /// ρ'(u) / u by central differences
    fn numerical_weight(loss: &dyn LossFunction, u: f64) -> f64 {
        let h = 1e-6;
        (loss.rho(u + h) - loss.rho(u - h)) / (2.0 * h) / u
    }

    #[test]
    fn test_l2_loss() {
        let loss = L2Loss;
        assert_eq!(loss.weight(0.0), 1.0);
        assert_eq!(loss.weight(1e6), 1.0);
        assert_eq!(loss.rho(2.0), 2.0);
    }

    #[test]
    fn test_huber_loss() -> TestResult {
        let loss = HuberLoss::new(1.345)?;
        assert_eq!(loss.weight(1.0), 1.0);
        assert_eq!(loss.weight(-1.345), 1.0);
        assert!((loss.weight(2.69) - 0.5).abs() < EPSILON);
        assert!((loss.weight(-2.69) - 0.5).abs() < EPSILON);
        Ok(())
    }

    #[test]
    fn test_tukey_loss() -> TestResult {
        let loss = TukeyBiweightLoss::new(4.6851)?;
        assert_eq!(loss.weight(0.0), 1.0);
        assert_eq!(loss.weight(5.0), 0.0);
        assert_eq!(loss.weight(-5.0), 0.0);
        let half = loss.weight(4.6851 / 2.0);
        assert!((half - 0.5625).abs() < EPSILON);
        Ok(())
    }

    #[test]
    fn test_cauchy_loss() -> TestResult {
        let loss = CauchyLoss::new(2.3849)?;
        assert_eq!(loss.weight(0.0), 1.0);
        assert!((loss.weight(2.3849) - 0.5).abs() < EPSILON);
        Ok(())
    }

    #[test]
    fn test_weight_matches_derivative_of_rho() {
        for kind in LossFunctionType::ALL {
            let loss = kind.build();
            for &u in &[0.3, 0.9, 1.7, 3.1, 4.2, 6.0] {
                let numeric = numerical_weight(loss.as_ref(), u);
                assert!(
                    (numeric - loss.weight(u)).abs() < 1e-4,
                    "{kind}: w({u}) = {} but ρ'(u)/u = {numeric}",
                    loss.weight(u)
                );
            }
        }
    }

    #[test]
    fn test_weights_bounded_and_monotone() {
        for kind in LossFunctionType::ALL {
            let loss = kind.build();
            let mut previous = f64::INFINITY;
            for step in 0..400 {
                let u = step as f64 * 0.05;
                let w = loss.weight(u);
                assert!((0.0..=1.0).contains(&w), "{kind}: w({u}) = {w}");
                assert!(w <= previous + 1e-15, "{kind} not monotone at {u}");
                assert_eq!(w, loss.weight(-u));
                previous = w;
            }
        }
    }

    #[test]
    fn test_invalid_tuning_rejected() {
        assert!(HuberLoss::new(0.0).is_err());
        assert!(TukeyBiweightLoss::new(-1.0).is_err());
        assert!(CauchyLoss::new(f64::NAN).is_err());
        assert!(LossFunctionType::Huber.build_with_tuning(-2.0).is_err());
        assert!(LossFunctionType::L2.build_with_tuning(-2.0).is_ok());
    }

    #[test]
    fn test_parse_and_display() -> TestResult {
        for kind in LossFunctionType::ALL {
            let parsed: LossFunctionType = kind.to_string().parse()?;
            assert_eq!(parsed, kind);
        }
        assert_eq!("Bisquare".parse::<LossFunctionType>()?, LossFunctionType::Tukey);
        assert!("quadratic".parse::<LossFunctionType>().is_err());
        Ok(())
    }
}
