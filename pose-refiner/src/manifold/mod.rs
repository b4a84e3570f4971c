//! Pose manifolds for the refinement loop.
//!
//! Poses are never added to their increments. Every update goes through the
//! group composition and the exponential map, following the right-perturbation
//! model of the [manif](https://github.com/artivis/manif) library:
//!
//! ```text
//! X ⊕ τ = X ∘ Exp(τ)
//! Y ⊖ X = Log(X⁻¹ ∘ Y)
//! ```
//!
//! Lie group M,° | dim | X ∈ M             | Exp(τ)          | Comp. | Action
//! ------------- | --- | ----------------- | --------------- | ----- | ------
//! n-D vector    | n   | v ∈ Rⁿ            | v = exp(v)      | v₁+v₂ | v + x
//! Rotation      | 3   | R, RᵀR = I        | R = exp([θ]x)   | R₁R₂  | Rx
//! Rigid motion  | 6   | M = [R t; 0 1]    | Exp([ρ, θ])     | M₁M₂  | Rx+t
//!
//! The SE(3) tangent is ordered `[ρ(3), θ(3)]`: translational part first.

use nalgebra::{DVector, Matrix3, Vector3};
use std::{
    error, fmt,
    fmt::{Debug, Display, Formatter},
};

pub mod rn;
pub mod se3;
pub mod so3;

pub use rn::Rn;
pub use se3::{SE3, SE3Tangent};
pub use so3::{SO3, SO3Tangent};

/// Errors that can occur during manifold operations.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifoldError {
    /// Invalid tangent vector dimension
    InvalidTangentDimension { expected: usize, actual: usize },
    /// Invalid manifold element
    InvalidElement(String),
    /// NaN or Inf detected in manifold element
    InvalidNumber,
}

impl Display for ManifoldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ManifoldError::InvalidTangentDimension { expected, actual } => {
                write!(
                    f,
                    "Invalid tangent dimension: expected {expected}, got {actual}"
                )
            }
            ManifoldError::InvalidElement(msg) => write!(f, "Invalid manifold element: {msg}"),
            ManifoldError::InvalidNumber => write!(f, "Invalid number: NaN or Inf detected"),
        }
    }
}

impl error::Error for ManifoldError {}

/// Result type for manifold operations
pub type ManifoldResult<T> = Result<T, ManifoldError>;

/// A Lie group usable as the pose of a refinement problem.
///
/// Tangent vectors are exchanged as `DVector<f64>` so that the solver can
/// stay agnostic of the pose's degrees of freedom; the dimension is reported
/// by [`LieGroup::tangent_dim`] and checked on every update.
pub trait LieGroup: Clone + Debug + PartialEq + Send + Sync {
    /// Degrees of freedom of the tangent space.
    fn tangent_dim(&self) -> usize;

    /// Group inverse `X⁻¹`.
    fn inverse(&self) -> Self;

    /// Group composition `X ∘ Y`.
    fn compose(&self, other: &Self) -> Self;

    /// Logarithmic map to the tangent space at the identity.
    fn log(&self) -> DVector<f64>;

    /// Right plus `X ⊕ τ = X ∘ Exp(τ)`.
    ///
    /// Fails when `tangent` has the wrong dimension or contains non-finite entries.
    fn right_plus(&self, tangent: &DVector<f64>) -> ManifoldResult<Self>;

    /// Right minus `Y ⊖ X = Log(X⁻¹ ∘ Y)`.
    fn right_minus(&self, other: &Self) -> DVector<f64> {
        other.inverse().compose(self).log()
    }

    /// Whether two elements are within `tolerance` of each other in the tangent norm.
    fn is_approx(&self, other: &Self, tolerance: f64) -> bool {
        self.right_minus(other).norm() < tolerance
    }
}

pub(crate) fn check_tangent(tangent: &DVector<f64>, expected: usize) -> ManifoldResult<()> {
    if tangent.len() != expected {
        return Err(ManifoldError::InvalidTangentDimension {
            expected,
            actual: tangent.len(),
        });
    }
    if tangent.iter().any(|v| !v.is_finite()) {
        return Err(ManifoldError::InvalidNumber);
    }
    Ok(())
}

/// Skew-symmetric matrix `[v]x` such that `[v]x w = v × w`.
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skew_matches_cross_product() {
        let a = Vector3::new(0.3, -1.2, 2.0);
        let b = Vector3::new(-0.7, 0.4, 1.1);
        assert!((skew(&a) * b - a.cross(&b)).norm() < 1e-15);
    }

    #[test]
    fn test_check_tangent_rejects_bad_input() {
        let short = DVector::from_vec(vec![1.0, 2.0]);
        assert_eq!(
            check_tangent(&short, 3),
            Err(ManifoldError::InvalidTangentDimension {
                expected: 3,
                actual: 2
            })
        );

        let nan = DVector::from_vec(vec![1.0, f64::NAN, 0.0]);
        assert_eq!(check_tangent(&nan, 3), Err(ManifoldError::InvalidNumber));
    }
}
