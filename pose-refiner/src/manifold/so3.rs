//! SO(3) - Special Orthogonal Group in 3D
//!
//! Rotations are stored as unit quaternions. The tangent space is the
//! rotation vector `θ = angle · axis`.

use crate::manifold::{LieGroup, ManifoldResult, check_tangent, skew};
use nalgebra::{DVector, Matrix3, Quaternion, UnitQuaternion, Vector3};
use std::fmt::{self, Display, Formatter};

/// SO(3) group element represented as a unit quaternion.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SO3 {
    quaternion: UnitQuaternion<f64>,
}

impl SO3 {
    pub fn identity() -> Self {
        SO3 {
            quaternion: UnitQuaternion::identity(),
        }
    }

    pub fn from_quaternion(quaternion: UnitQuaternion<f64>) -> Self {
        SO3 { quaternion }
    }

    /// Rotation from Euler angles (roll, pitch, yaw) in radians.
    pub fn from_euler_angles(roll: f64, pitch: f64, yaw: f64) -> Self {
        SO3 {
            quaternion: UnitQuaternion::from_euler_angles(roll, pitch, yaw),
        }
    }

    pub fn quaternion(&self) -> &UnitQuaternion<f64> {
        &self.quaternion
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.quaternion.to_rotation_matrix().into_inner()
    }

    /// Rotate a point: `R · v`.
    pub fn act(&self, vector: &Vector3<f64>) -> Vector3<f64> {
        self.quaternion * vector
    }

    pub fn compose(&self, other: &SO3) -> SO3 {
        SO3 {
            quaternion: self.quaternion * other.quaternion,
        }
    }

    pub fn inverse(&self) -> SO3 {
        SO3 {
            quaternion: self.quaternion.inverse(),
        }
    }

    /// Logarithmic map to the rotation vector.
    pub fn log(&self) -> SO3Tangent {
        SO3Tangent {
            data: self.quaternion.scaled_axis(),
        }
    }

    /// Rotation angle in radians, in `[0, π]`.
    pub fn angle(&self) -> f64 {
        self.quaternion.angle()
    }
}

impl Default for SO3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Display for SO3 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let q = self.quaternion.quaternion();
        write!(
            f,
            "SO3(quaternion: [w: {:.4}, x: {:.4}, y: {:.4}, z: {:.4}])",
            q.w, q.i, q.j, q.k
        )
    }
}

impl LieGroup for SO3 {
    fn tangent_dim(&self) -> usize {
        3
    }

    fn inverse(&self) -> Self {
        SO3::inverse(self)
    }

    fn compose(&self, other: &Self) -> Self {
        SO3::compose(self, other)
    }

    fn log(&self) -> DVector<f64> {
        DVector::from_column_slice(SO3::log(self).coeffs().as_slice())
    }

    fn right_plus(&self, tangent: &DVector<f64>) -> ManifoldResult<Self> {
        check_tangent(tangent, 3)?;
        let delta = SO3Tangent::new(Vector3::new(tangent[0], tangent[1], tangent[2]));
        Ok(self.compose(&delta.exp()))
    }
}

/// Rotation vector in so(3).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SO3Tangent {
    data: Vector3<f64>,
}

impl SO3Tangent {
    pub fn new(data: Vector3<f64>) -> Self {
        SO3Tangent { data }
    }

    pub fn zero() -> Self {
        SO3Tangent {
            data: Vector3::zeros(),
        }
    }

    pub fn coeffs(&self) -> Vector3<f64> {
        self.data
    }

    /// `[θ]x`
    pub fn hat(&self) -> Matrix3<f64> {
        skew(&self.data)
    }

    /// Exponential map to SO(3).
    pub fn exp(&self) -> SO3 {
        let theta_squared = self.data.norm_squared();

        let quaternion = if theta_squared > f64::EPSILON {
            UnitQuaternion::from_scaled_axis(self.data)
        } else {
            UnitQuaternion::from_quaternion(Quaternion::new(
                1.0,
                self.data.x / 2.0,
                self.data.y / 2.0,
                self.data.z / 2.0,
            ))
        };

        SO3 { quaternion }
    }

    /// Left Jacobian of the exponential map.
    ///
    /// J_l(θ) = I + (1 - cos θ)/θ² [θ]x + (θ - sin θ)/θ³ [θ]x²
    pub fn left_jacobian(&self) -> Matrix3<f64> {
        let angle = self.data.norm_squared();
        let tangent_skew = self.hat();

        if angle <= f64::EPSILON {
            Matrix3::identity() + 0.5 * tangent_skew
        } else {
            let theta = angle.sqrt();
            Matrix3::identity()
                + (1.0 - theta.cos()) / angle * tangent_skew
                + (theta - theta.sin()) / (angle * theta) * tangent_skew * tangent_skew
        }
    }

    /// Inverse of [`SO3Tangent::left_jacobian`].
    ///
    /// J_l⁻¹(θ) = I - ½[θ]x + (1/θ² - (1 + cos θ)/(2θ sin θ)) [θ]x²
    pub fn left_jacobian_inv(&self) -> Matrix3<f64> {
        let angle = self.data.norm_squared();
        let tangent_skew = self.hat();

        if angle <= f64::EPSILON {
            Matrix3::identity() - 0.5 * tangent_skew
        } else {
            let theta = angle.sqrt();
            let coefficient = 1.0 / angle - (1.0 + theta.cos()) / (2.0 * theta * theta.sin());
            Matrix3::identity() - 0.5 * tangent_skew + coefficient * tangent_skew * tangent_skew
        }
    }
}
