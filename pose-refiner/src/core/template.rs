//! Reference-side data of a direct alignment problem.

use crate::manifold::LieGroup;
use faer::Mat;

/// Immutable reference data against which live observations are aligned.
///
/// A template owns `N` residual rows. Each row has a reference value and a
/// fixed Jacobian row with respect to a pose increment applied at the
/// reference frame (inverse-compositional formulation), so the Jacobian is
/// computed once and reused for every iteration and every live frame.
///
/// Implementations must keep `N` and the Jacobian fixed for their lifetime.
pub trait Template {
    /// Pose manifold the template is parameterized on.
    type Pose: LieGroup;
    /// Live multi-channel observation the residuals are sampled from.
    type Channels: ?Sized;

    /// Number of residual rows `N`.
    fn num_residuals(&self) -> usize;

    /// Precomputed `N × P` Jacobian, `P` being the pose's tangent dimension.
    fn jacobians(&self) -> &Mat<f64>;

    /// Warp the template into `channels` with `pose` and write, for every row,
    /// the residual `observed - reference` and whether it could be sampled.
    ///
    /// Rows whose validity flag is cleared may hold any residual value.
    fn compute_residuals(
        &self,
        channels: &Self::Channels,
        pose: &Self::Pose,
        residuals: &mut [f64],
        valid: &mut [bool],
    );
}
