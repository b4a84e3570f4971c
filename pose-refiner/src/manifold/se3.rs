//! SE(3) - Special Euclidean Group in 3D
//!
//! Rigid body transformations `T = [R t; 0 1]` with tangent ordered
//! `[ρ(3), θ(3)]`. The exponential map couples both halves:
//!
//! ```text
//! Exp([ρ, θ]) = [Exp(θ)  J_l(θ)·ρ; 0 1]
//! ```

use crate::manifold::{
    LieGroup, ManifoldError, ManifoldResult, check_tangent,
    so3::{SO3, SO3Tangent},
};
use nalgebra::{
    DVector, Isometry3, Matrix3, Matrix4, Translation3, UnitQuaternion, Vector3, Vector6,
};
use std::fmt::{self, Display, Formatter};

/// SE(3) group element: a rotation followed by a translation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SE3 {
    rotation: SO3,
    translation: Vector3<f64>,
}

impl SE3 {
    pub fn identity() -> Self {
        SE3 {
            rotation: SO3::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn new(rotation: SO3, translation: Vector3<f64>) -> Self {
        SE3 {
            rotation,
            translation,
        }
    }

    pub fn from_translation_quaternion(
        translation: Vector3<f64>,
        quaternion: UnitQuaternion<f64>,
    ) -> Self {
        SE3 {
            rotation: SO3::from_quaternion(quaternion),
            translation,
        }
    }

    /// Build from a 4x4 homogeneous matrix; the rotation block is re-orthonormalized.
    pub fn from_matrix(matrix: &Matrix4<f64>) -> ManifoldResult<Self> {
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(ManifoldError::InvalidNumber);
        }
        let last_row = matrix.fixed_view::<1, 4>(3, 0);
        if (last_row[(0, 3)] - 1.0).abs() > 1e-9 || last_row.fixed_view::<1, 3>(0, 0).norm() > 1e-9
        {
            return Err(ManifoldError::InvalidElement(
                "homogeneous row must be [0 0 0 1]".to_string(),
            ));
        }
        let rotation: Matrix3<f64> = matrix.fixed_view::<3, 3>(0, 0).into_owned();
        let quaternion = UnitQuaternion::from_matrix(&rotation);
        Ok(SE3::from_translation_quaternion(
            matrix.fixed_view::<3, 1>(0, 3).into_owned(),
            quaternion,
        ))
    }

    pub fn rotation(&self) -> &SO3 {
        &self.rotation
    }

    pub fn translation(&self) -> &Vector3<f64> {
        &self.translation
    }

    pub fn to_matrix(&self) -> Matrix4<f64> {
        self.to_isometry().to_homogeneous()
    }

    pub fn to_isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(self.translation),
            *self.rotation.quaternion(),
        )
    }

    /// Transform a point: `R · p + t`.
    pub fn act(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.act(point) + self.translation
    }

    pub fn compose(&self, other: &SE3) -> SE3 {
        SE3 {
            rotation: self.rotation.compose(&other.rotation),
            translation: self.rotation.act(&other.translation) + self.translation,
        }
    }

    pub fn inverse(&self) -> SE3 {
        let rotation = self.rotation.inverse();
        SE3 {
            translation: -rotation.act(&self.translation),
            rotation,
        }
    }

    pub fn log(&self) -> SE3Tangent {
        let theta = self.rotation.log();
        SE3Tangent {
            rho: theta.left_jacobian_inv() * self.translation,
            theta: theta.coeffs(),
        }
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Display for SE3 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let t = self.translation;
        let q = self.rotation.quaternion().quaternion();
        write!(
            f,
            "SE3(translation: [{:.4}, {:.4}, {:.4}], rotation: [w: {:.4}, x: {:.4}, y: {:.4}, z: {:.4}])",
            t.x, t.y, t.z, q.w, q.i, q.j, q.k
        )
    }
}

impl LieGroup for SE3 {
    fn tangent_dim(&self) -> usize {
        6
    }

    fn inverse(&self) -> Self {
        SE3::inverse(self)
    }

    fn compose(&self, other: &Self) -> Self {
        SE3::compose(self, other)
    }

    fn log(&self) -> DVector<f64> {
        DVector::from_column_slice(SE3::log(self).coeffs().as_slice())
    }

    fn right_plus(&self, tangent: &DVector<f64>) -> ManifoldResult<Self> {
        check_tangent(tangent, 6)?;
        let delta = SE3Tangent::from_slice(tangent.as_slice());
        Ok(self.compose(&delta.exp()))
    }
}

/// Twist `[ρ, θ]` in se(3).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SE3Tangent {
    rho: Vector3<f64>,
    theta: Vector3<f64>,
}

impl SE3Tangent {
    pub fn new(rho: Vector3<f64>, theta: Vector3<f64>) -> Self {
        SE3Tangent { rho, theta }
    }

    /// From six coefficients `[ρx, ρy, ρz, θx, θy, θz]`.
    ///
    /// # Panics
    /// Panics if `data` has fewer than six elements.
    pub fn from_slice(data: &[f64]) -> Self {
        SE3Tangent {
            rho: Vector3::new(data[0], data[1], data[2]),
            theta: Vector3::new(data[3], data[4], data[5]),
        }
    }

    pub fn rho(&self) -> Vector3<f64> {
        self.rho
    }

    pub fn theta(&self) -> Vector3<f64> {
        self.theta
    }

    pub fn coeffs(&self) -> Vector6<f64> {
        Vector6::new(
            self.rho.x,
            self.rho.y,
            self.rho.z,
            self.theta.x,
            self.theta.y,
            self.theta.z,
        )
    }

    pub fn exp(&self) -> SE3 {
        let theta = SO3Tangent::new(self.theta);
        SE3 {
            rotation: theta.exp(),
            translation: theta.left_jacobian() * self.rho,
        }
    }
}
