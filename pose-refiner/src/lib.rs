//! # Pose Refiner
//!
//! Robust iteratively reweighted least-squares (IRLS) refinement of a camera
//! pose against a dense photometric template, the inner loop of direct visual
//! odometry.
//!
//! Each iteration warps the template into the live channels, estimates a
//! robust noise scale, reweights the residuals under a robust loss, builds the
//! weighted normal equations and applies an inverse-compositional update:
//!
//! ```text
//! σ = 1.4826 · median(|rᵢ - median(r)|)
//! wᵢ = ψ(rᵢ/σ) / (rᵢ/σ)
//! H = Σ wᵢ Jᵢᵀ Jᵢ,   G = Σ wᵢ Jᵢᵀ rᵢ,   δ = H⁻¹ G
//! T ← T ∘ Exp(δ)⁻¹
//! ```
//!
//! ## Features
//!
//! - **Robust losses**: L2, Huber, Tukey biweight and Cauchy on MAD-normalized residuals
//! - **Strategies**: undamped Gauss-Newton and damped Levenberg-Marquardt
//! - **Explicit failure semantics**: a failed solve never moves the pose; the
//!   outcome is reported as a [`RefinementStatus`]
//! - **Generic over the manifold**: any [`LieGroup`](manifold::LieGroup) pose,
//!   with [`SE3`](manifold::SE3) for camera poses
//! - **Parallel**: residuals, weights and normal equations are evaluated with rayon
//!
//! ## Example
//!
//! ```no_run
//! use pose_refiner::manifold::SE3;
//! use pose_refiner::photometric::{PhotometricTemplate, PinholeCamera, TemplateOptions};
//! use pose_refiner::synthetic::BoxRoomScene;
//! use pose_refiner::{IterativeRefiner, RefinerConfig};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//!
//! let camera = PinholeCamera::new(120.0, 120.0, 79.5, 59.5, 160, 120)?;
//! let scene = BoxRoomScene::new(camera);
//! let reference = scene.render(&SE3::identity())?;
//! let template = PhotometricTemplate::new(
//!     camera,
//!     &reference.channels,
//!     &reference.depth,
//!     &TemplateOptions::default(),
//! )?;
//!
//! let live = scene.render(&SE3::identity())?;
//! let refiner = IterativeRefiner::new(RefinerConfig::new())?;
//! let result = refiner.refine(&template, &live.channels, SE3::identity())?;
//! println!("{result}");
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;
pub mod linalg;
#[cfg(feature = "logging")]
pub mod logger;
pub mod manifold;
pub mod optimizer;
pub mod photometric;
pub mod synthetic;

pub use core::loss_functions::{LossFunction, LossFunctionType};
pub use core::scale_estimator::MadScaleEstimator;
pub use core::template::Template;
pub use error::{PoseRefinerError, PoseRefinerResult};
pub use linalg::{DenseCholeskySolver, NormalEquationSolver};
#[cfg(feature = "logging")]
pub use logger::{init_logger, init_logger_for, init_logger_with_level};
pub use optimizer::{
    GaussNewton, IterationState, IterativeRefiner, LevenbergMarquardt, LevenbergMarquardtConfig,
    RefinementResult, RefinementStatus, RefinerConfig, Verbosity,
};
