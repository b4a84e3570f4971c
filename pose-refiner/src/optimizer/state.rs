//! Mutable per-call state of a refinement: pose, buffers and normal equations.

use crate::core::{CoreError, template::Template};
use crate::error::PoseRefinerResult;
use crate::linalg::{DenseCholeskySolver, LinAlgError, NormalEquationSolver};
use crate::manifold::LieGroup;
use crate::optimizer::{OptimizerError, OptimizerResult};
use faer::Mat;
use nalgebra::DVector;

/// Levenberg-Marquardt damping carried between iterations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct DampingState {
    pub lambda: f64,
    pub nu: f64,
}

/// Everything a refinement call mutates.
///
/// The state owns its buffers; they are sized once for a template and can be
/// reused across calls with [`IterationState::reset`]. The template and the
/// live channels are never written.
#[derive(Debug)]
pub struct IterationState<P: LieGroup> {
    pub(crate) pose: P,
    pub(crate) residuals: Vec<f64>,
    pub(crate) weights: Vec<f64>,
    pub(crate) valid: Vec<bool>,
    pub(crate) hessian: Mat<f64>,
    pub(crate) gradient: Mat<f64>,
    pub(crate) scale: f64,
    pub(crate) cost: f64,
    pub(crate) num_valid: usize,
    pub(crate) num_informative: usize,
    pub(crate) num_function_evaluations: usize,
    pub(crate) scratch: Vec<f64>,
    pub(crate) trial_residuals: Vec<f64>,
    pub(crate) trial_valid: Vec<bool>,
    pub(crate) damping: Option<DampingState>,
    increment: DVector<f64>,
    increment_norm: f64,
    solver: DenseCholeskySolver,
}

impl<P: LieGroup> IterationState<P> {
    /// Allocate buffers for `template`, starting from `initial_pose`.
    ///
    /// # Errors
    /// Fails when the template's Jacobian does not have one row per residual
    /// and one column per pose degree of freedom.
    pub fn new<T: Template<Pose = P>>(template: &T, initial_pose: P) -> PoseRefinerResult<Self> {
        let n = template.num_residuals();
        let dof = initial_pose.tangent_dim();
        check_template_dimensions(template, dof)?;

        Ok(IterationState {
            pose: initial_pose,
            residuals: vec![0.0; n],
            weights: vec![0.0; n],
            valid: vec![false; n],
            hessian: Mat::zeros(dof, dof),
            gradient: Mat::zeros(dof, 1),
            scale: 1.0,
            cost: 0.0,
            num_valid: 0,
            num_informative: 0,
            num_function_evaluations: 0,
            scratch: Vec::with_capacity(n),
            trial_residuals: vec![0.0; n],
            trial_valid: vec![false; n],
            damping: None,
            increment: DVector::zeros(dof),
            increment_norm: 0.0,
            solver: DenseCholeskySolver::new(),
        })
    }

    /// Start over from `pose`, keeping the allocated buffers.
    pub fn reset(&mut self, pose: P) {
        self.pose = pose;
        self.residuals.fill(0.0);
        self.weights.fill(0.0);
        self.valid.fill(false);
        let dof = self.dof();
        self.hessian = Mat::zeros(dof, dof);
        self.gradient = Mat::zeros(dof, 1);
        self.scale = 1.0;
        self.cost = 0.0;
        self.num_valid = 0;
        self.num_informative = 0;
        self.num_function_evaluations = 0;
        self.damping = None;
        self.increment.fill(0.0);
        self.increment_norm = 0.0;
    }

    /// Whether the buffers were sized for `template` and the tangent dimension of `pose`.
    pub fn fits<T: Template<Pose = P>>(&self, template: &T, pose: &P) -> bool {
        self.residuals.len() == template.num_residuals()
            && self.increment.len() == pose.tangent_dim()
    }

    pub fn pose(&self) -> &P {
        &self.pose
    }

    pub fn residuals(&self) -> &[f64] {
        &self.residuals
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn valid(&self) -> &[bool] {
        &self.valid
    }

    pub fn hessian(&self) -> &Mat<f64> {
        &self.hessian
    }

    pub fn gradient(&self) -> &Mat<f64> {
        &self.gradient
    }

    /// Robust scale of the last linearization.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Weighted cost of the last linearization.
    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn num_valid(&self) -> usize {
        self.num_valid
    }

    pub fn num_informative(&self) -> usize {
        self.num_informative
    }

    pub fn num_function_evaluations(&self) -> usize {
        self.num_function_evaluations
    }

    /// Increment of the last successful update.
    pub fn increment(&self) -> &DVector<f64> {
        &self.increment
    }

    pub fn increment_norm(&self) -> f64 {
        self.increment_norm
    }

    /// Max-norm of the gradient of the last linearization.
    pub fn gradient_norm(&self) -> f64 {
        (0..self.gradient.nrows())
            .map(|i| self.gradient[(i, 0)].abs())
            .fold(0.0, f64::max)
    }

    pub fn dof(&self) -> usize {
        self.increment.len()
    }

    /// Solve `H δ = G` and update the pose with `T ← T ∘ Exp(δ)⁻¹`.
    ///
    /// # Errors
    /// Fails without touching the pose when fewer informative rows than
    /// degrees of freedom are available, when `H` is not positive definite,
    /// or when `δ` is not finite.
    pub fn solve(&mut self) -> OptimizerResult<()> {
        let delta = self.compute_increment(None)?;
        self.apply_increment(delta)
    }

    /// Solve `(H + λI) δ = G` without applying the result.
    pub fn solve_damped(&mut self, lambda: f64) -> OptimizerResult<DVector<f64>> {
        self.compute_increment(Some(lambda))
    }

    /// Pose that [`IterationState::apply_increment`] would produce.
    pub fn candidate_pose(&self, delta: &DVector<f64>) -> OptimizerResult<P> {
        Ok(self.pose.right_plus(&-delta)?)
    }

    /// Compose `delta` into the pose inverse-compositionally.
    pub fn apply_increment(&mut self, delta: DVector<f64>) -> OptimizerResult<()> {
        self.pose = self.candidate_pose(&delta)?;
        self.increment_norm = delta.norm();
        self.increment = delta;
        Ok(())
    }

    /// Record that the last iteration kept the pose.
    pub(crate) fn clear_increment(&mut self) {
        self.increment.fill(0.0);
        self.increment_norm = 0.0;
    }

    /// Tangent-space covariance `H⁻¹` of the last linearization.
    pub fn covariance(&self) -> Option<Mat<f64>> {
        let mut solver = DenseCholeskySolver::new();
        let rhs = Mat::zeros(self.dof(), 1);
        solver.solve_normal_equation(&self.hessian, &rhs).ok()?;
        solver.compute_covariance_matrix()
    }

    fn compute_increment(&mut self, lambda: Option<f64>) -> OptimizerResult<DVector<f64>> {
        let dof = self.dof();
        if self.num_informative < dof {
            return Err(LinAlgError::RankDeficient {
                informative: self.num_informative,
                dof,
            }
            .into());
        }

        let solution = match lambda {
            None => self
                .solver
                .solve_normal_equation(&self.hessian, &self.gradient)?,
            Some(lambda) => {
                self.solver
                    .solve_augmented_equation(&self.hessian, &self.gradient, lambda)?
            }
        };

        let delta = DVector::from_fn(dof, |i, _| solution[(i, 0)]);
        if delta.iter().any(|v| !v.is_finite()) {
            return Err(OptimizerError::from(LinAlgError::NonFiniteSolution));
        }
        Ok(delta)
    }
}

fn check_template_dimensions<T: Template>(template: &T, dof: usize) -> PoseRefinerResult<()> {
    let jacobians = template.jacobians();
    if dof == 0 {
        return Err(
            CoreError::DimensionMismatch("pose has no degrees of freedom".to_string()).into(),
        );
    }
    if jacobians.nrows() != template.num_residuals() || jacobians.ncols() != dof {
        return Err(CoreError::DimensionMismatch(format!(
            "template Jacobian is {}x{}, expected {}x{}",
            jacobians.nrows(),
            jacobians.ncols(),
            template.num_residuals(),
            dof
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::Rn;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    /// Residual `rᵢ = Jᵢ·t - bᵢ` for a translation-only pose.
    struct LinearTemplate {
        jacobians: Mat<f64>,
        offsets: Vec<f64>,
    }

    impl Template for LinearTemplate {
        type Pose = Rn;
        type Channels = ();

        fn num_residuals(&self) -> usize {
            self.offsets.len()
        }

        fn jacobians(&self) -> &Mat<f64> {
            &self.jacobians
        }

        fn compute_residuals(&self, _: &(), pose: &Rn, residuals: &mut [f64], valid: &mut [bool]) {
            for i in 0..self.offsets.len() {
                let jt: f64 = (0..pose.dim())
                    .map(|j| self.jacobians[(i, j)] * pose.data()[j])
                    .sum();
                residuals[i] = jt - self.offsets[i];
                valid[i] = true;
            }
        }
    }

    fn template() -> LinearTemplate {
        let rows = [[1.0, 0.0], [0.0, 2.0], [1.0, 1.0]];
        LinearTemplate {
            jacobians: Mat::from_fn(3, 2, |i, j| rows[i][j]),
            offsets: vec![1.0, -2.0, 0.5],
        }
    }

    fn fill_system(state: &mut IterationState<Rn>, hessian: [[f64; 2]; 2], gradient: [f64; 2]) {
        state.hessian = Mat::from_fn(2, 2, |i, j| hessian[i][j]);
        state.gradient = Mat::from_fn(2, 1, |i, _| gradient[i]);
        state.num_informative = 3;
        state.num_valid = 3;
    }

    #[test]
    fn test_new_checks_dimensions() {
        let template = template();
        assert!(IterationState::new(&template, Rn::zeros(2)).is_ok());
        assert!(IterationState::new(&template, Rn::zeros(3)).is_err());
        assert!(IterationState::new(&template, Rn::zeros(0)).is_err());
    }

    #[test]
    fn test_solve_applies_inverse_compositional_update() -> TestResult {
        let mut state = IterationState::new(&template(), Rn::from_slice(&[1.0, 1.0]))?;
        fill_system(&mut state, [[2.0, 0.0], [0.0, 4.0]], [2.0, -4.0]);
        state.solve()?;
        // δ = [1, -1], T ← T - δ
        assert!(state.pose().is_approx(&Rn::from_slice(&[0.0, 2.0]), 1e-12));
        assert!((state.increment_norm() - 2f64.sqrt()).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_solve_failure_leaves_pose_unchanged() -> TestResult {
        let initial = Rn::from_slice(&[0.3, -0.7]);
        let mut state = IterationState::new(&template(), initial.clone())?;

        fill_system(&mut state, [[1.0, 1.0], [1.0, 1.0]], [1.0, 1.0]);
        assert!(state.solve().is_err());
        assert_eq!(state.pose(), &initial);

        fill_system(&mut state, [[1.0, 0.0], [0.0, 1.0]], [1.0, 1.0]);
        state.num_informative = 1;
        assert!(matches!(
            state.solve(),
            Err(OptimizerError::LinAlg(LinAlgError::RankDeficient { informative: 1, dof: 2 }))
        ));
        assert_eq!(state.pose(), &initial);
        Ok(())
    }

    #[test]
    fn test_overflowing_increment_leaves_pose_unchanged() -> TestResult {
        let initial = Rn::from_slice(&[0.3, -0.7]);
        let mut state = IterationState::new(&template(), initial.clone())?;
        fill_system(&mut state, [[1e-300, 0.0], [0.0, 1e-300]], [1e300, -1e300]);
        assert!(matches!(
            state.solve(),
            Err(OptimizerError::LinAlg(LinAlgError::NonFiniteSolution))
        ));
        assert_eq!(state.pose(), &initial);
        assert_eq!(state.increment_norm(), 0.0);
        Ok(())
    }

    #[test]
    fn test_zero_gradient_gives_zero_increment() -> TestResult {
        let initial = Rn::from_slice(&[0.3, -0.7]);
        let mut state = IterationState::new(&template(), initial.clone())?;
        fill_system(&mut state, [[3.0, 1.0], [1.0, 2.0]], [0.0, 0.0]);
        state.solve()?;
        assert_eq!(state.pose(), &initial);
        assert_eq!(state.increment_norm(), 0.0);
        Ok(())
    }

    #[test]
    fn test_damped_solve_does_not_move_pose() -> TestResult {
        let initial = Rn::zeros(2);
        let mut state = IterationState::new(&template(), initial.clone())?;
        fill_system(&mut state, [[1.0, 0.0], [0.0, 1.0]], [2.0, 2.0]);
        let delta = state.solve_damped(1.0)?;
        assert!((delta[0] - 1.0).abs() < 1e-12);
        assert!((delta[1] - 1.0).abs() < 1e-12);
        assert_eq!(state.pose(), &initial);
        Ok(())
    }

    #[test]
    fn test_reset_clears_counters() -> TestResult {
        let mut state = IterationState::new(&template(), Rn::zeros(2))?;
        state.num_function_evaluations = 4;
        state.num_valid = 3;
        state.reset(Rn::from_slice(&[1.0, 2.0]));
        assert_eq!(state.num_function_evaluations(), 0);
        assert_eq!(state.num_valid(), 0);
        assert_eq!(state.pose(), &Rn::from_slice(&[1.0, 2.0]));
        Ok(())
    }

    #[test]
    fn test_covariance_inverts_hessian() -> TestResult {
        let mut state = IterationState::new(&template(), Rn::zeros(2))?;
        fill_system(&mut state, [[2.0, 0.0], [0.0, 4.0]], [0.0, 0.0]);
        let covariance = state.covariance().ok_or("covariance should exist")?;
        assert!((covariance[(0, 0)] - 0.5).abs() < 1e-12);
        assert!((covariance[(1, 1)] - 0.25).abs() < 1e-12);
        Ok(())
    }
}
