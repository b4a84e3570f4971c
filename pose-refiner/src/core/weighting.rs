//! Per-residual IRLS weights.

use crate::core::loss_functions::LossFunction;
use rayon::prelude::*;

/// Write `w(|rᵢ| / scale)` for every valid residual and `0` for every invalid one.
///
/// `scale` must be strictly positive, which
/// [`MadScaleEstimator`](crate::core::scale_estimator::MadScaleEstimator) guarantees.
pub fn compute_weights(
    loss: &dyn LossFunction,
    residuals: &[f64],
    valid: &[bool],
    scale: f64,
    weights: &mut [f64],
) {
    debug_assert_eq!(residuals.len(), valid.len());
    debug_assert_eq!(residuals.len(), weights.len());
    debug_assert!(scale > 0.0);

    let inv_scale = 1.0 / scale;
    weights
        .par_iter_mut()
        .zip(residuals.par_iter())
        .zip(valid.par_iter())
        .for_each(|((w, &r), &v)| {
            *w = if v && r.is_finite() {
                loss.weight(r.abs() * inv_scale)
            } else {
                0.0
            };
        });
}
