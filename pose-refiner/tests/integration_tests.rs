//! Integration tests for pose-refiner
//!
//! End-to-end refinement through the public API:
//!
//! - **Table template** (`Rn` pose, four rows): exact fit and invalid-row handling
//! - **Box room** (`SE3` pose, rendered photometric frames): recovery of a known
//!   perturbation with both strategies, several losses, noise and occlusion
//!
//! # Running Tests
//!
//! ```bash
//! cargo test --test integration_tests
//! ```

use faer::Mat;
use nalgebra::{DVector, Vector3};
use pose_refiner::core::loss_functions::LossFunctionType;
use pose_refiner::core::template::Template;
use pose_refiner::manifold::{LieGroup, Rn, SE3, SE3Tangent};
use pose_refiner::optimizer::{
    GaussNewton, IterationState, IterativeRefiner, LevenbergMarquardtConfig,
    PoseEstimationStrategy, RefinementStatus, RefinerConfig,
};
use pose_refiner::photometric::{
    ChannelStack, Image, PhotometricTemplate, PinholeCamera, TemplateOptions,
};
use pose_refiner::synthetic::BoxRoomScene;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Four rows `rᵢ = pᵢ + Jᵢ·t - refᵢ`, `pᵢ` being the predicted value read from
/// the channels (`None` when the warp falls outside the image).
struct TableTemplate {
    jacobians: Mat<f64>,
    reference: Vec<f64>,
}

impl TableTemplate {
    fn new() -> Self {
        let rows = [[1.0, 0.5], [-0.5, 2.0], [1.5, 1.0], [0.25, -1.0]];
        TableTemplate {
            jacobians: Mat::from_fn(4, 2, |i, j| rows[i][j]),
            reference: vec![10.0, 20.0, 30.0, 40.0],
        }
    }
}

impl Template for TableTemplate {
    type Pose = Rn;
    type Channels = [Option<f64>];

    fn num_residuals(&self) -> usize {
        self.reference.len()
    }

    fn jacobians(&self) -> &Mat<f64> {
        &self.jacobians
    }

    fn compute_residuals(
        &self,
        channels: &[Option<f64>],
        pose: &Rn,
        residuals: &mut [f64],
        valid: &mut [bool],
    ) {
        for (i, predicted) in channels.iter().enumerate() {
            let shift: f64 = (0..pose.dim())
                .map(|j| self.jacobians[(i, j)] * pose.data()[j])
                .sum();
            residuals[i] = predicted.map_or(0.0, |p| p + shift - self.reference[i]);
            valid[i] = predicted.is_some();
        }
    }
}

#[test]
fn test_exact_fit_converges_on_first_iteration() -> TestResult {
    let template = TableTemplate::new();
    let channels = [Some(10.0), Some(20.0), Some(30.0), Some(40.0)];
    let initial = Rn::zeros(2);

    let refiner = IterativeRefiner::new(RefinerConfig::new())?;
    let result = refiner.refine(&template, &channels[..], initial.clone())?;

    assert_eq!(result.status, RefinementStatus::Converged);
    assert_eq!(result.iterations, 1);
    assert_eq!(result.final_cost, 0.0);
    assert_eq!(result.cost_history, vec![0.0]);
    assert_eq!(result.pose, initial);
    Ok(())
}

#[test]
fn test_invalid_row_is_excluded_from_normal_equations() -> TestResult {
    let template = TableTemplate::new();
    let channels = [Some(11.0), None, Some(28.5), Some(40.5)];
    let gn = GaussNewton::new(&RefinerConfig::new().with_loss_function(LossFunctionType::L2))?;
    let mut state = IterationState::new(&template, Rn::zeros(2))?;

    let cost = gn.linearize(&template, &channels[..], &mut state);

    let residuals = [1.0, -1.5, 0.5];
    let rows = [[1.0, 0.5], [1.5, 1.0], [0.25, -1.0]];
    let mut hessian = [[0.0; 2]; 2];
    let mut gradient = [0.0; 2];
    for (row, r) in rows.iter().zip(residuals) {
        for a in 0..2 {
            gradient[a] += row[a] * r;
            for b in 0..2 {
                hessian[a][b] += row[a] * row[b];
            }
        }
    }

    assert_eq!(state.num_valid(), 3);
    assert_eq!(state.weights()[1], 0.0);
    assert!((cost - (1.0 + 2.25 + 0.25)).abs() < 1e-12);
    for a in 0..2 {
        assert!((state.gradient()[(a, 0)] - gradient[a]).abs() < 1e-12);
        for b in 0..2 {
            assert!((state.hessian()[(a, b)] - hessian[a][b]).abs() < 1e-12);
        }
    }
    Ok(())
}

#[test]
fn test_invalid_row_with_robust_weights() -> TestResult {
    let template = TableTemplate::new();
    let channels = [Some(11.0), None, Some(28.5), Some(46.0)];
    let gn = GaussNewton::new(&RefinerConfig::new().with_loss_function(LossFunctionType::Huber))?;
    let mut state = IterationState::new(&template, Rn::zeros(2))?;
    gn.linearize(&template, &channels[..], &mut state);

    let weights = state.weights();
    assert_eq!(weights[1], 0.0);
    assert!(weights.iter().all(|w| (0.0..=1.0).contains(w)));
    // The 6.0 residual is the outlier of the three.
    assert!(weights[3] < weights[0]);

    let jacobians = template.jacobians();
    for a in 0..2 {
        let expected: f64 = [0, 2, 3]
            .iter()
            .map(|&i| weights[i] * jacobians[(i, a)] * state.residuals()[i])
            .sum();
        assert!((state.gradient()[(a, 0)] - expected).abs() < 1e-10);
    }
    Ok(())
}

#[test]
fn test_table_template_outcomes() -> TestResult {
    let template = TableTemplate::new();
    let refiner = IterativeRefiner::new(RefinerConfig::new())?;

    let nothing = refiner.refine(&template, &[None; 4][..], Rn::zeros(2))?;
    assert_eq!(nothing.status, RefinementStatus::InsufficientData);

    let one_row = refiner.refine(&template, &[Some(12.0), None, None, None][..], Rn::zeros(2))?;
    assert_eq!(one_row.status, RefinementStatus::SolverError);
    assert_eq!(one_row.pose, Rn::zeros(2));
    assert!(!one_row.is_success());
    Ok(())
}

const WIDTH: usize = 96;
const HEIGHT: usize = 72;

fn scene() -> Result<BoxRoomScene, Box<dyn std::error::Error>> {
    let camera = PinholeCamera::new(80.0, 80.0, 47.5, 35.5, WIDTH, HEIGHT)?;
    Ok(BoxRoomScene::new(camera))
}

fn perturbation() -> SE3 {
    SE3Tangent::from_slice(&[0.03, -0.02, 0.04, 0.01, -0.015, 0.008]).exp()
}

fn reference_template(
    scene: &BoxRoomScene,
    num_channels: usize,
) -> Result<PhotometricTemplate, Box<dyn std::error::Error>> {
    let reference = scene.render_channels(&SE3::identity(), num_channels)?;
    Ok(PhotometricTemplate::new(
        *scene.camera(),
        &reference.channels,
        &reference.depth,
        &TemplateOptions::default(),
    )?)
}

fn pose_error(estimate: &SE3, truth: &SE3) -> f64 {
    estimate.inverse().compose(truth).log().coeffs().norm()
}

#[test]
fn test_gauss_newton_recovers_perturbation() -> TestResult {
    let scene = scene()?;
    let template = reference_template(&scene, 1)?;
    let truth = perturbation();
    let live = scene.render(&truth)?;

    let refiner = IterativeRefiner::new(RefinerConfig::new().with_max_iterations(50))?;
    let result = refiner.refine(&template, &live.channels, SE3::identity())?;

    assert_eq!(result.status, RefinementStatus::Converged);
    assert!(pose_error(&result.pose, &truth) < 5e-3, "{}", result);
    assert!(result.final_cost < 0.5 * result.initial_cost);
    assert!(result.cost_history[1] < result.cost_history[0]);
    assert_eq!(result.cost_history.len(), result.iterations);
    Ok(())
}

#[test]
fn test_levenberg_marquardt_recovers_perturbation() -> TestResult {
    let scene = scene()?;
    let template = reference_template(&scene, 1)?;
    let truth = perturbation();
    let live = scene.render(&truth)?;

    let refiner = IterativeRefiner::levenberg_marquardt(
        RefinerConfig::new().with_loss_function(LossFunctionType::Cauchy),
        LevenbergMarquardtConfig::new(),
    )?;
    let result = refiner.refine(&template, &live.channels, SE3::identity())?;

    assert!(result.is_success());
    assert!(pose_error(&result.pose, &truth) < 5e-3, "{}", result);
    assert!(result.final_cost < 0.5 * result.initial_cost);
    // Every iteration evaluates at least one trial pose.
    assert!(result.function_evaluations > result.iterations);
    Ok(())
}

#[test]
fn test_multi_channel_refinement() -> TestResult {
    let scene = scene()?;
    let template = reference_template(&scene, 2)?;
    assert_eq!(template.num_residuals(), 2 * template.num_points());

    let truth = perturbation();
    let live = scene.render_channels(&truth, 2)?;
    let refiner =
        IterativeRefiner::new(RefinerConfig::new().with_loss_function(LossFunctionType::Tukey))?;
    let result = refiner.refine(&template, &live.channels, SE3::identity())?;

    assert!(result.is_success());
    assert!(pose_error(&result.pose, &truth) < 5e-3, "{}", result);
    Ok(())
}

#[test]
fn test_robust_to_noise_and_occlusion() -> TestResult {
    let scene = scene()?;
    let template = reference_template(&scene, 1)?;
    let truth = perturbation();
    let live = scene.render(&truth)?;

    let mut rng = StdRng::seed_from_u64(7);
    let source = live.channels.channel(0);
    let corrupted = Image::from_fn(WIDTH, HEIGHT, |x, y| {
        if (20..30).contains(&x) && (30..40).contains(&y) {
            1.0
        } else {
            source.get(x, y) + rng.random_range(-0.01..0.01)
        }
    })?;
    let channels = ChannelStack::single(corrupted);

    let refiner = IterativeRefiner::new(RefinerConfig::new())?;
    let result = refiner.refine(&template, &channels, SE3::identity())?;

    assert!(result.is_success());
    assert!(pose_error(&result.pose, &truth) < 1e-2, "{}", result);
    Ok(())
}

#[test]
fn test_state_reuse_across_frames() -> TestResult {
    let scene = scene()?;
    let template = reference_template(&scene, 1)?;
    let refiner = IterativeRefiner::new(RefinerConfig::new())?;
    let mut state = IterationState::new(&template, SE3::identity())?;

    let small = SE3::new(Default::default(), Vector3::new(0.01, 0.0, -0.02));
    for truth in [small, perturbation()] {
        let live = scene.render(&truth)?;
        let result =
            refiner.refine_with_state(&template, &live.channels, SE3::identity(), &mut state)?;
        assert!(result.is_success());
        assert!(pose_error(&result.pose, &truth) < 5e-3);
        assert_eq!(result.function_evaluations, state.num_function_evaluations());
    }
    Ok(())
}

#[test]
fn test_covariance_and_normal_equations_outputs() -> TestResult {
    let scene = scene()?;
    let template = reference_template(&scene, 1)?;
    let live = scene.render(&perturbation())?;

    let config = RefinerConfig::new()
        .with_normal_equations(true)
        .with_covariance(true);
    let result = IterativeRefiner::new(config)?.refine(&template, &live.channels, SE3::identity())?;

    let hessian = result.hessian.ok_or("hessian requested")?;
    let covariance = result.covariance.ok_or("covariance requested")?;
    assert_eq!((hessian.nrows(), hessian.ncols()), (6, 6));
    assert!(result.gradient.is_some());
    for i in 0..6 {
        assert!(covariance[(i, i)] > 0.0);
        for j in 0..6 {
            let asymmetry = (covariance[(i, j)] - covariance[(j, i)]).abs();
            assert!(asymmetry < 1e-9 * covariance[(i, i)].max(1.0));
        }
    }
    Ok(())
}

#[test]
fn test_pose_update_is_inverse_compositional() -> TestResult {
    let pose = perturbation();
    let delta = DVector::from_vec(vec![0.01, 0.02, -0.01, 0.005, 0.0, -0.004]);
    let updated = pose.right_plus(&-&delta)?;
    let expected = pose.compose(&SE3Tangent::from_slice(delta.as_slice()).exp().inverse());
    assert!(pose_error(&updated, &expected) < 1e-12);
    Ok(())
}
