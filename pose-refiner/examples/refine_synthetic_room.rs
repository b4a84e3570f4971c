use clap::{Parser, ValueEnum};
use pose_refiner::core::loss_functions::LossFunctionType;
use pose_refiner::init_logger_for;
use pose_refiner::manifold::{SE3, SE3Tangent};
use pose_refiner::optimizer::{
    IterativeRefiner, LevenbergMarquardtConfig, PoseEstimationStrategy, RefinementResult,
    RefinerConfig, Verbosity,
};
use pose_refiner::photometric::{
    ChannelStack, Image, PhotometricTemplate, PinholeCamera, TemplateOptions,
};
use pose_refiner::synthetic::BoxRoomScene;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    /// Undamped Gauss-Newton
    Gn,
    /// Levenberg-Marquardt
    Lm,
    /// Run both and compare
    Both,
}

#[derive(Parser)]
#[command(name = "refine_synthetic_room")]
#[command(about = "Refine a perturbed camera pose against a rendered box room")]
struct Args {
    /// Robust loss: l2, huber, tukey, cauchy
    #[arg(short, long, default_value = "huber")]
    loss: LossFunctionType,

    /// Refinement strategy
    #[arg(short, long, value_enum, default_value = "both")]
    strategy: Strategy,

    /// Maximum number of iterations
    #[arg(short, long, default_value = "50")]
    max_iterations: usize,

    /// Logging verbosity: silent, normal, verbose
    #[arg(short, long, default_value = "normal")]
    verbosity: Verbosity,

    /// Number of texture channels
    #[arg(short, long, default_value = "1")]
    channels: usize,

    /// Scale applied to the default pose perturbation
    #[arg(long, default_value = "1.0")]
    perturbation: f64,

    /// Amplitude of uniform noise added to the live frame
    #[arg(long, default_value = "0.0")]
    noise: f32,

    /// Random seed for the noise
    #[arg(long, default_value = "42")]
    seed: u64,
}

fn run<S: PoseEstimationStrategy>(
    refiner: &IterativeRefiner<S>,
    template: &PhotometricTemplate,
    live: &ChannelStack,
    truth: &SE3,
) -> Result<RefinementResult<SE3>, Box<dyn std::error::Error>> {
    let result = refiner.refine(template, live, SE3::identity())?;
    let error = result.pose.inverse().compose(truth).log().coeffs();
    info!("{}", result);
    info!(
        "{}: translation error {:.3e}, rotation error {:.3e} rad",
        refiner.strategy().name(),
        error.fixed_rows::<3>(0).norm(),
        error.fixed_rows::<3>(3).norm()
    );
    if !result.is_success() {
        warn!("{} ended with status {}", refiner.strategy().name(), result.status);
    }
    Ok(result)
}

fn add_noise(
    frame: &ChannelStack,
    amplitude: f32,
    rng: &mut StdRng,
) -> Result<ChannelStack, Box<dyn std::error::Error>> {
    if amplitude <= 0.0 {
        return Ok(frame.clone());
    }
    let channels = frame
        .channels()
        .iter()
        .map(|channel| {
            Image::from_fn(channel.width(), channel.height(), |x, y| {
                channel.get(x, y) + rng.random_range(-amplitude..amplitude)
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ChannelStack::new(channels)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logger_for(args.verbosity.max(Verbosity::Normal));

    let camera = PinholeCamera::new(120.0, 120.0, 79.5, 59.5, 160, 120)?;
    let scene = BoxRoomScene::new(camera);

    let reference = scene.render_channels(&SE3::identity(), args.channels)?;
    let template = PhotometricTemplate::new(
        camera,
        &reference.channels,
        &reference.depth,
        &TemplateOptions::default(),
    )?;
    info!(
        "template: {} points x {} channels",
        template.num_points(),
        template.num_channels()
    );

    let delta: Vec<f64> = [0.03, -0.02, 0.04, 0.01, -0.015, 0.008]
        .iter()
        .map(|v| v * args.perturbation)
        .collect();
    let truth = SE3Tangent::from_slice(&delta).exp();
    info!("true pose: {}", truth);

    let mut rng = StdRng::seed_from_u64(args.seed);
    let live = scene.render_channels(&truth, args.channels)?;
    let live = add_noise(&live.channels, args.noise, &mut rng)?;

    let config = RefinerConfig::new()
        .with_loss_function(args.loss)
        .with_max_iterations(args.max_iterations)
        .with_verbosity(args.verbosity)
        .with_covariance(true);

    if matches!(args.strategy, Strategy::Gn | Strategy::Both) {
        let refiner = IterativeRefiner::new(config.clone())?;
        run(&refiner, &template, &live, &truth)?;
    }
    if matches!(args.strategy, Strategy::Lm | Strategy::Both) {
        let refiner = IterativeRefiner::levenberg_marquardt(config, LevenbergMarquardtConfig::new())?;
        run(&refiner, &template, &live, &truth)?;
    }
    Ok(())
}
