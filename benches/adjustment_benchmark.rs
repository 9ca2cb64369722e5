//! Adjustment timing for growing point sets
//!
//! Fits a circle, a sphere and a quadratic surface to synthetic point sets of increasing
//! size with both linear algebra backends and reports the average wall-clock time.
//!
//! ```bash
//! cargo bench --bench adjustment_benchmark
//! cargo bench --bench adjustment_benchmark --features parallel
//! ```

use std::f64::consts::PI;
use std::hint::black_box;

use geofit::adjustment::{AdjustmentConfig, FeatureAdjustment};
use geofit::core::{FeaturePoint, Point};
use geofit::feature::Feature;
use geofit::init_logger;
use geofit::linalg::LinearAlgebraType;
use tracing::{info, warn};
use web_time::Instant;

const RUNS: usize = 5;
const POINT_COUNTS: [usize; 4] = [50, 200, 1000, 5000];

#[derive(Clone, Copy)]
enum Workload {
    Circle,
    Sphere,
    QuadraticSurface,
}

impl Workload {
    fn name(self) -> &'static str {
        match self {
            Workload::Circle => "circle",
            Workload::Sphere => "sphere",
            Workload::QuadraticSurface => "quadratic surface",
        }
    }

    fn feature(self, count: usize) -> Result<Feature, Box<dyn std::error::Error>> {
        let jitter = |i: usize| ((i as f64 * 7.31).sin() * 1e4).fract() * 0.01;
        let mut feature = match self {
            Workload::Circle => Feature::circle()?,
            Workload::Sphere => Feature::sphere()?,
            Workload::QuadraticSurface => Feature::quadratic_surface()?,
        };
        for i in 0..count {
            let t = i as f64 * 2.0 * PI / count as f64;
            let position = match self {
                Workload::Circle => {
                    Point::new_2d(10.0 + 4.0 * t.cos() + jitter(i), -3.0 + 4.0 * t.sin())
                }
                Workload::Sphere | Workload::QuadraticSurface => {
                    // spiral over the sphere
                    let polar = (1.0 - 2.0 * (i as f64 + 0.5) / count as f64).acos();
                    let azimuth = i as f64 * PI * (3.0 - 5.0_f64.sqrt());
                    let (a, b, c) = match self {
                        Workload::Sphere => (5.0, 5.0, 5.0),
                        _ => (5.0, 4.0, 3.0),
                    };
                    Point::new_3d(
                        1.0 + a * polar.sin() * azimuth.cos() + jitter(i),
                        2.0 + b * polar.sin() * azimuth.sin(),
                        -1.0 + c * polar.cos(),
                    )
                }
            };
            feature.add_point(FeaturePoint::new(format!("P{i}"), position))?;
        }
        Ok(feature)
    }
}

struct BenchmarkResult {
    workload: &'static str,
    backend: LinearAlgebraType,
    points: usize,
    iterations: usize,
    state: String,
    average_ms: f64,
}

fn run_single(
    workload: Workload,
    backend: LinearAlgebraType,
    count: usize,
) -> Result<BenchmarkResult, Box<dyn std::error::Error>> {
    let config = AdjustmentConfig::new().with_linear_algebra_type(backend);
    let mut total_ms = 0.0;
    let mut iterations = 0;
    let mut state = String::new();
    for _ in 0..RUNS {
        let mut feature = workload.feature(count)?;
        let mut adjustment = FeatureAdjustment::new(config.clone());
        let start = Instant::now();
        let result = black_box(adjustment.estimate(&mut feature)?);
        total_ms += start.elapsed().as_secs_f64() * 1000.0;
        iterations = adjustment.iterations();
        state = result.to_string();
    }
    Ok(BenchmarkResult {
        workload: workload.name(),
        backend,
        points: count,
        iterations,
        state,
        average_ms: total_ms / RUNS as f64,
    })
}

fn main() {
    init_logger();
    info!("Adjustment benchmark, {} runs per configuration", RUNS);

    let mut results = Vec::new();
    for workload in [Workload::Circle, Workload::Sphere, Workload::QuadraticSurface] {
        for backend in [LinearAlgebraType::Faer, LinearAlgebraType::Nalgebra] {
            for count in POINT_COUNTS {
                match run_single(workload, backend, count) {
                    Ok(result) => results.push(result),
                    Err(e) => warn!("{} / {:?} / {} points failed: {}", workload.name(), backend, count, e),
                }
            }
        }
    }

    info!(
        "{:<18} | {:<9} | {:>6} | {:>5} | {:<22} | {:>10}",
        "Feature", "Backend", "Points", "Iters", "State", "Time(ms)"
    );
    info!("{}", "-".repeat(84));
    for r in &results {
        info!(
            "{:<18} | {:<9} | {:>6} | {:>5} | {:<22} | {:>10.3}",
            r.workload,
            format!("{:?}", r.backend),
            r.points,
            r.iterations,
            r.state,
            r.average_ms
        );
    }
}
