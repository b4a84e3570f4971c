//! Pinhole camera model.
//!
//! ```text
//! u = fx · x / z + cx
//! v = fy · y / z + cy
//! ```

use crate::core::{CoreError, CoreResult};
use nalgebra::{Matrix2x3, Vector2, Vector3};

/// Points closer than this to the image plane do not project.
pub const MIN_PROJECTION_DEPTH: f64 = 1e-6;

/// Undistorted pinhole intrinsics of an image of `width × height` pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinholeCamera {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: usize,
    pub height: usize,
}

impl PinholeCamera {
    pub fn new(
        fx: f64,
        fy: f64,
        cx: f64,
        cy: f64,
        width: usize,
        height: usize,
    ) -> CoreResult<Self> {
        if !(fx.is_finite() && fy.is_finite() && fx > 0.0 && fy > 0.0) {
            return Err(CoreError::InvalidInput(format!(
                "focal lengths must be positive and finite, got fx={fx}, fy={fy}"
            )));
        }
        if !(cx.is_finite() && cy.is_finite()) {
            return Err(CoreError::InvalidInput(format!(
                "principal point must be finite, got ({cx}, {cy})"
            )));
        }
        if width == 0 || height == 0 {
            return Err(CoreError::InvalidInput(format!(
                "image size must be non-zero, got {width}x{height}"
            )));
        }
        Ok(PinholeCamera {
            fx,
            fy,
            cx,
            cy,
            width,
            height,
        })
    }

    /// Pixel coordinates of a camera-frame point, `None` behind the camera.
    #[inline]
    pub fn project(&self, point: &Vector3<f64>) -> Option<Vector2<f64>> {
        if !(point.z > MIN_PROJECTION_DEPTH) {
            return None;
        }
        let inv_z = 1.0 / point.z;
        Some(Vector2::new(
            self.fx * point.x * inv_z + self.cx,
            self.fy * point.y * inv_z + self.cy,
        ))
    }

    /// Camera-frame point seen at pixel `(u, v)` with depth `depth` along z.
    #[inline]
    pub fn back_project(&self, u: f64, v: f64, depth: f64) -> Vector3<f64> {
        Vector3::new(
            (u - self.cx) / self.fx * depth,
            (v - self.cy) / self.fy * depth,
            depth,
        )
    }

    /// `∂(u, v) / ∂(x, y, z)` at a camera-frame point in front of the camera.
    #[inline]
    pub fn projection_jacobian(&self, point: &Vector3<f64>) -> Matrix2x3<f64> {
        let inv_z = 1.0 / point.z;
        let inv_z2 = inv_z * inv_z;
        Matrix2x3::new(
            self.fx * inv_z,
            0.0,
            -self.fx * point.x * inv_z2,
            0.0,
            self.fy * inv_z,
            -self.fy * point.y * inv_z2,
        )
    }
}
