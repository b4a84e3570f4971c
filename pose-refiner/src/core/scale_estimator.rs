//! Robust noise-scale estimation from a residual set.
//!
//! The scale `σ` normalizes residuals before the loss is applied, so that the
//! tuning constants of [`crate::core::loss_functions`] keep their meaning for any
//! image contrast. The estimator is the median absolute deviation about the
//! median, made consistent with the standard deviation of a Gaussian:
//!
//! ```text
//! σ = 1.4826 · median(|rᵢ - median(r)|)
//! ```
//!
//! Only valid, finite residuals contribute.

use crate::core::CoreError;
use crate::error::PoseRefinerResult;
use std::cmp::Ordering;

/// Median-absolute-deviation scale estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MadScaleEstimator {
    /// Returned when there are no valid residuals or their spread is degenerate.
    pub fallback_scale: f64,
    /// Spreads at or below this value are treated as degenerate.
    pub min_scale: f64,
}

impl Default for MadScaleEstimator {
    fn default() -> Self {
        Self {
            fallback_scale: 1.0,
            min_scale: 1e-9,
        }
    }
}

impl MadScaleEstimator {
    /// Gaussian consistency factor `1 / Φ⁻¹(3/4)`.
    pub const NORMAL_CONSISTENCY: f64 = 1.4826;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback_scale(mut self, fallback_scale: f64) -> Self {
        self.fallback_scale = fallback_scale;
        self
    }

    pub fn with_min_scale(mut self, min_scale: f64) -> Self {
        self.min_scale = min_scale;
        self
    }

    pub fn validate(&self) -> PoseRefinerResult<()> {
        if !self.fallback_scale.is_finite() || self.fallback_scale <= 0.0 {
            return Err(CoreError::InvalidInput(format!(
                "fallback scale must be positive and finite, got {}",
                self.fallback_scale
            ))
            .into());
        }
        if !self.min_scale.is_finite() || self.min_scale < 0.0 {
            return Err(CoreError::InvalidInput(format!(
                "minimum scale must be non-negative and finite, got {}",
                self.min_scale
            ))
            .into());
        }
        Ok(())
    }

    /// Estimate the scale of `residuals` over entries where `valid` is set.
    pub fn estimate_scale(&self, residuals: &[f64], valid: &[bool]) -> f64 {
        let mut buffer = Vec::new();
        self.estimate_scale_with_buffer(residuals, valid, &mut buffer)
    }

    /// Same as [`MadScaleEstimator::estimate_scale`], reusing `buffer` as scratch space.
    pub fn estimate_scale_with_buffer(
        &self,
        residuals: &[f64],
        valid: &[bool],
        buffer: &mut Vec<f64>,
    ) -> f64 {
        debug_assert_eq!(residuals.len(), valid.len());

        buffer.clear();
        buffer.extend(
            residuals
                .iter()
                .zip(valid)
                .filter(|&(r, &v)| v && r.is_finite())
                .map(|(r, _)| *r),
        );

        let Some(center) = median_in_place(buffer) else {
            return self.fallback_scale;
        };

        for r in buffer.iter_mut() {
            *r = (*r - center).abs();
        }
        let mad = median_in_place(buffer).unwrap_or(0.0);

        let scale = Self::NORMAL_CONSISTENCY * mad;
        if scale > self.min_scale {
            scale
        } else {
            self.fallback_scale
        }
    }
}

/// Median by partial selection; reorders `values`.
fn median_in_place(values: &mut [f64]) -> Option<f64> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    let mid = n / 2;
    let (lower, upper, _) = values.select_nth_unstable_by(mid, total_order);
    let upper = *upper;
    if n % 2 == 1 {
        return Some(upper);
    }
    let below = lower.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(0.5 * (below + upper))
}

fn total_order(a: &f64, b: &f64) -> Ordering {
    a.total_cmp(b)
}
