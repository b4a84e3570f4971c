//! Dense photometric template on SE(3).
//!
//! Reference pixels with valid depth and enough texture are back-projected to
//! 3D points `Xᵢ`. Every point contributes one residual per channel, stored
//! point-major (row `i·C + c`):
//!
//! ```text
//! rᵢ꜀ = I꜀(π(T · Xᵢ)) - I꜀_ref(π(Xᵢ))
//! ```
//!
//! The Jacobian is taken with respect to an increment applied at the
//! reference frame, so it only depends on reference data:
//!
//! ```text
//! g  = ∇I꜀_ref · ∂π/∂X = (a, b, -(a·x + b·y) / z),   a = gx·fx/z,  b = gy·fy/z
//! Jᵢ꜀ = [ g , X × g ]
//! ```

use crate::core::{CoreError, CoreResult, template::Template};
use crate::manifold::SE3;
use crate::photometric::{ChannelStack, Image, PinholeCamera};
use faer::Mat;
use nalgebra::{Vector2, Vector3};
use rayon::prelude::*;
use tracing::debug;

/// Reference pixel selection.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateOptions {
    /// Pixels closer than this to the image border are neither selected nor sampled
    pub border: usize,
    /// Minimum usable depth
    pub min_depth: f64,
    /// Maximum usable depth
    pub max_depth: f64,
    /// Minimum gradient magnitude, over any channel, for a pixel to be selected
    pub min_gradient: f32,
    /// Pixel step between selected candidates in both directions
    pub stride: usize,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            border: 2,
            min_depth: 1e-3,
            max_depth: f64::INFINITY,
            min_gradient: 1e-3,
            stride: 1,
        }
    }
}

impl TemplateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_border(mut self, border: usize) -> Self {
        self.border = border;
        self
    }

    pub fn with_depth_range(mut self, min: f64, max: f64) -> Self {
        self.min_depth = min;
        self.max_depth = max;
        self
    }

    pub fn with_min_gradient(mut self, min_gradient: f32) -> Self {
        self.min_gradient = min_gradient;
        self
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.stride == 0 {
            return Err(CoreError::InvalidInput("stride must be at least 1".to_string()));
        }
        if !(self.min_depth > 0.0 && self.min_depth < self.max_depth) {
            return Err(CoreError::InvalidInput(format!(
                "depth range must satisfy 0 < min < max, got [{}, {}]",
                self.min_depth, self.max_depth
            )));
        }
        if !(self.min_gradient >= 0.0) {
            return Err(CoreError::InvalidInput(format!(
                "min_gradient must be non-negative, got {}",
                self.min_gradient
            )));
        }
        Ok(())
    }
}

/// Photometric template built from one reference frame.
#[derive(Debug, Clone)]
pub struct PhotometricTemplate {
    camera: PinholeCamera,
    border: f64,
    num_channels: usize,
    points: Vec<Vector3<f64>>,
    reference: Vec<f32>,
    jacobians: Mat<f64>,
}

impl PhotometricTemplate {
    /// Select pixels of `reference` with usable `depth` and precompute their
    /// values and Jacobians.
    ///
    /// # Errors
    /// Fails on invalid options, on images that do not match `camera`, or when
    /// no pixel qualifies.
    pub fn new(
        camera: PinholeCamera,
        reference: &ChannelStack,
        depth: &Image,
        options: &TemplateOptions,
    ) -> CoreResult<Self> {
        options.validate()?;
        let (width, height) = (camera.width, camera.height);
        if reference.width() != width || reference.height() != height {
            return Err(CoreError::DimensionMismatch(format!(
                "reference channels are {}x{}, camera expects {width}x{height}",
                reference.width(),
                reference.height()
            )));
        }
        if depth.width() != width || depth.height() != height {
            return Err(CoreError::DimensionMismatch(format!(
                "depth map is {}x{}, camera expects {width}x{height}",
                depth.width(),
                depth.height()
            )));
        }

        let num_channels = reference.num_channels();
        let border = options.border;
        let mut points = Vec::new();
        let mut values = Vec::new();
        let mut rows: Vec<[f64; 6]> = Vec::new();

        for y in (border..height.saturating_sub(border)).step_by(options.stride) {
            for x in (border..width.saturating_sub(border)).step_by(options.stride) {
                let z = f64::from(depth.get(x, y));
                if !(z >= options.min_depth && z <= options.max_depth) {
                    continue;
                }
                let gradients: Vec<(f32, f32)> = reference
                    .channels()
                    .iter()
                    .map(|channel| channel.gradient(x, y))
                    .collect();
                let textured = gradients
                    .iter()
                    .any(|(gx, gy)| gx.hypot(*gy) >= options.min_gradient);
                if !textured {
                    continue;
                }

                let point = camera.back_project(x as f64, y as f64, z);
                for (channel, (gx, gy)) in reference.channels().iter().zip(&gradients) {
                    values.push(channel.get(x, y));
                    rows.push(jacobian_row(&camera, &point, *gx, *gy));
                }
                points.push(point);
            }
        }

        if points.is_empty() {
            return Err(CoreError::InvalidInput(
                "no reference pixel has valid depth and enough gradient".to_string(),
            ));
        }

        let jacobians = Mat::from_fn(rows.len(), 6, |i, j| rows[i][j]);
        debug!(
            "photometric template: {} points x {} channels from {}x{} reference",
            points.len(),
            num_channels,
            width,
            height
        );

        Ok(PhotometricTemplate {
            camera,
            border: border as f64,
            num_channels,
            points,
            reference: values,
            jacobians,
        })
    }

    pub fn camera(&self) -> &PinholeCamera {
        &self.camera
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Reference-frame 3D points.
    pub fn points(&self) -> &[Vector3<f64>] {
        &self.points
    }

    /// Reference values, point-major.
    pub fn reference(&self) -> &[f32] {
        &self.reference
    }
}

fn jacobian_row(camera: &PinholeCamera, point: &Vector3<f64>, gx: f32, gy: f32) -> [f64; 6] {
    let image_gradient = Vector2::new(f64::from(gx), f64::from(gy));
    let g = camera.projection_jacobian(point).transpose() * image_gradient;
    let w = point.cross(&g);
    [g.x, g.y, g.z, w.x, w.y, w.z]
}

impl Template for PhotometricTemplate {
    type Pose = SE3;
    type Channels = ChannelStack;

    fn num_residuals(&self) -> usize {
        self.reference.len()
    }

    fn jacobians(&self) -> &Mat<f64> {
        &self.jacobians
    }

    fn compute_residuals(
        &self,
        channels: &ChannelStack,
        pose: &SE3,
        residuals: &mut [f64],
        valid: &mut [bool],
    ) {
        let num_channels = self.num_channels;
        residuals
            .par_chunks_mut(num_channels)
            .zip(valid.par_chunks_mut(num_channels))
            .zip(self.points.par_iter())
            .zip(self.reference.par_chunks(num_channels))
            .for_each(|(((r, v), point), reference)| {
                let pixel = self
                    .camera
                    .project(&pose.act(point))
                    .filter(|p| channels.channel(0).in_bounds(p.x, p.y, self.border));
                for c in 0..num_channels {
                    let sampled = match (pixel, channels.channels().get(c)) {
                        (Some(p), Some(image)) => image.sample(p.x, p.y),
                        _ => None,
                    };
                    match sampled {
                        Some(value) => {
                            r[c] = f64::from(value) - f64::from(reference[c]);
                            v[c] = true;
                        }
                        None => {
                            r[c] = 0.0;
                            v[c] = false;
                        }
                    }
                }
            });
    }
}
