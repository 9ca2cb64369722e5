use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use geofit::adjustment::{AdjustmentConfig, EstimationType, FeatureAdjustment};
use geofit::config::DefaultValues;
use geofit::core::{CoreError, FeaturePoint, Point};
use geofit::error::{GeoFitError, GeoFitResult};
use geofit::feature::Feature;
use geofit::statistic::TestStatisticType;
use geofit::{init_logger, init_logger_with_level};
use tracing::{Level, error, info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FeatureKind {
    Line,
    Circle,
    Ellipse,
    QuadraticCurve,
    Plane,
    Sphere,
    QuadraticSurface,
}

impl FeatureKind {
    fn build(self) -> GeoFitResult<Feature> {
        let feature = match self {
            FeatureKind::Line => Feature::line()?,
            FeatureKind::Circle => Feature::circle()?,
            FeatureKind::Ellipse => Feature::ellipse()?,
            FeatureKind::QuadraticCurve => Feature::quadratic_curve()?,
            FeatureKind::Plane => Feature::plane()?,
            FeatureKind::Sphere => Feature::sphere()?,
            FeatureKind::QuadraticSurface => Feature::quadratic_surface()?,
        };
        Ok(feature)
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TestKind {
    Baarda,
    Sidak,
    None,
}

impl From<TestKind> for TestStatisticType {
    fn from(kind: TestKind) -> Self {
        match kind {
            TestKind::Baarda => TestStatisticType::BaardaMethod,
            TestKind::Sidak => TestStatisticType::Sidak,
            TestKind::None => TestStatisticType::None,
        }
    }
}

#[derive(Parser)]
#[command(name = "fit_feature")]
#[command(about = "Fit a geometric feature to observed points by least-squares adjustment")]
struct Args {
    /// Point file, one point per line: `name x y [z]`; `#` starts a comment
    points: PathBuf,

    /// Feature type to fit
    #[arg(short, long, value_enum, default_value = "circle")]
    feature: FeatureKind,

    /// Maximum number of iterations (0 estimates the model in a single pass)
    #[arg(short, long)]
    max_iterations: Option<usize>,

    /// Initial Levenberg-Marquardt damping, 0 disables damping
    #[arg(long)]
    damping: Option<f64>,

    /// Use robust L1 reweighting instead of plain least squares
    #[arg(long)]
    robust: bool,

    /// Propagate the point dispersions by a spherical simplex unscented transformation
    #[arg(long, conflicts_with = "robust")]
    unscented: bool,

    /// Test strategy for the point and global tests
    #[arg(long, value_enum)]
    test_statistic: Option<TestKind>,

    /// Probability value α in percent
    #[arg(long)]
    alpha: Option<f64>,

    /// Power of test β in percent
    #[arg(long)]
    beta: Option<f64>,

    /// Properties file overriding the built-in defaults
    #[arg(long)]
    defaults: Option<PathBuf>,

    /// Coordinate standard deviation applied to every point
    #[arg(long, default_value = "1.0")]
    sigma: f64,

    /// Print the iteration table and configuration
    #[arg(short, long)]
    verbose: bool,
}

fn read_to_string(path: &Path) -> GeoFitResult<String> {
    std::fs::read_to_string(path).map_err(|e| {
        GeoFitError::from(
            CoreError::InvalidInput(format!("cannot read {}: {}", path.display(), e)).log(),
        )
    })
}

/// Parse `name x y [z]` lines; every point must have the feature's dimension.
fn parse_points(content: &str, dimension: usize, sigma: f64) -> GeoFitResult<Vec<FeaturePoint>> {
    let mut points = Vec::new();
    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != dimension + 1 {
            return Err(CoreError::IllegalDimension(format!(
                "line {}: expected a name and {} coordinates, found {} fields",
                index + 1,
                dimension,
                fields.len()
            ))
            .log()
            .into());
        }
        let coordinates = fields[1..]
            .iter()
            .map(|field| {
                field.parse::<f64>().map_err(|e| {
                    CoreError::InvalidInput(format!("line {}: '{}'", index + 1, field))
                        .log_with_source(e)
                })
            })
            .collect::<Result<Vec<f64>, CoreError>>()?;
        let point = FeaturePoint::new(fields[0], Point::from_slice(&coordinates)?)
            .with_uncertainties(&[sigma; 3][..dimension])?;
        points.push(point);
    }
    Ok(points)
}

fn configuration(args: &Args) -> GeoFitResult<AdjustmentConfig> {
    let mut defaults = DefaultValues::default();
    if let Some(path) = &args.defaults {
        defaults = defaults.merge_properties(&read_to_string(path)?)?;
    }
    if let Some(iterations) = args.max_iterations {
        defaults.maximum_iterations = iterations;
    }
    if let Some(damping) = args.damping {
        defaults.levenberg_marquardt_damping = damping.max(0.0);
    }
    if args.robust {
        defaults.estimation_type = EstimationType::L1Norm;
    }
    if args.unscented {
        defaults.estimation_type = EstimationType::SphericalSimplexUnscentedTransformation;
    }
    if let Some(kind) = args.test_statistic {
        defaults.test_statistic_type = kind.into();
    }
    if let Some(alpha) = args.alpha {
        defaults.probability_value = alpha;
    }
    if let Some(beta) = args.beta {
        defaults.power_of_test = beta;
    }
    Ok(AdjustmentConfig::from_defaults(&defaults))
}

fn run(args: &Args) -> GeoFitResult<()> {
    let mut feature = args.feature.build()?;
    let points = parse_points(&read_to_string(&args.points)?, feature.dimension(), args.sigma)?;
    info!(
        "Loaded {} points from {} for a {} fit",
        points.len(),
        args.points.display(),
        feature.feature_type()
    );
    feature.add_points(points)?;

    let mut adjustment = FeatureAdjustment::new(configuration(args)?);
    let state = adjustment.estimate(&mut feature)?;

    info!("{}", adjustment.summary());
    info!("Parameters:");
    for (_, parameter) in feature.store().iter().filter(|(_, p)| p.visible) {
        info!("  {}", parameter);
    }
    info!("{}", adjustment.variance_component());

    let outliers: Vec<&FeaturePoint> = feature
        .points()
        .iter()
        .filter(|p| p.test_statistic().is_significant())
        .collect();
    if outliers.is_empty() {
        info!("No significant points");
    }
    for point in outliers {
        let test = point.test_statistic();
        warn!(
            "Outlier {}: T_prio = {:.3} (q = {:.3}), T_post = {:.3} (q = {:.3}), ∇ = {:?}",
            point.name(),
            test.apriori.value,
            test.apriori.quantile,
            test.aposteriori.value,
            test.aposteriori.quantile,
            point.gross_errors().as_slice()
        );
    }

    if !state.is_success() {
        warn!("Adjustment did not finish regularly: {}", state);
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    if args.verbose {
        init_logger_with_level(Level::DEBUG);
    } else {
        init_logger();
    }

    if let Err(e) = run(&args) {
        error!("Fit failed: {}", e.chain_compact());
        return Err(e.into());
    }
    Ok(())
}
