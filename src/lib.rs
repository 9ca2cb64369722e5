//! # geofit
//!
//! Geometric model fitting by constrained weighted least squares.
//!
//! Observed 2-D/3-D points with individual dispersions are fitted to lines, circles,
//! ellipses, quadratic curves, planes, spheres and quadratic surfaces in a Gauss-Helmert
//! model. Parameter restrictions are bordered into the normal equations, and the adjustment
//! returns the parameter covariance, a variance component test and per-point outlier tests.
//!
//! ## Features
//!
//! - **Primitives and features**: closed-form initial guesses, center-of-mass reduction and
//!   post-processed parameters such as the ellipse's minor semi-axis
//! - **Restrictions**: average, product-sum, trigonometric, vector-angle and point constraints
//! - **Adjustment**: Gauss-Newton iteration with optional Levenberg-Marquardt damping, Jacobi
//!   preconditioning and L1 robust reweighting
//! - **Hypothesis tests**: Baarda method, Šidák correction or unadjusted tests
//! - **Confidence regions**: ellipses and ellipsoids from the parameter covariance
//! - **Linear algebra backends**: `faer` (default) and pure `nalgebra`
//!
//! ## Example
//!
//! ```no_run
//! use geofit::{AdjustmentConfig, Feature, FeatureAdjustment, FeaturePoint, Point};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut feature = Feature::circle()?;
//! for (i, angle) in [0.0_f64, 1.5, 3.0, 4.5].iter().enumerate() {
//!     let position = Point::new_2d(2.0 + angle.cos(), 3.0 + angle.sin());
//!     feature.add_point(FeaturePoint::new(format!("P{i}"), position))?;
//! }
//!
//! let mut adjustment = FeatureAdjustment::new(AdjustmentConfig::default());
//! let state = adjustment.estimate(&mut feature)?;
//! println!("{state}\n{}", adjustment.summary());
//! # Ok(())
//! # }
//! ```

pub mod adjustment;
pub mod confidence;
pub mod config;
pub mod core;
pub mod error;
pub mod feature;
pub mod initial_guess;
pub mod linalg;
#[cfg(feature = "logging")]
pub mod logger;
pub mod observers;
pub mod primitive;
pub mod restriction;
pub mod statistic;

pub use adjustment::{
    AdjustmentConfig, AdjustmentSummary, CancellationToken, EstimationStateType, EstimationType,
    FeatureAdjustment,
};
pub use confidence::ConfidenceRegion;
pub use config::DefaultValues;
pub use core::{FeaturePoint, ParameterType, Point, ProcessingType, UnknownParameter};
pub use error::{GeoFitError, GeoFitResult};
pub use feature::Feature;
pub use linalg::{FaerBackend, LinearAlgebra, LinearAlgebraType, NalgebraBackend};
#[cfg(feature = "logging")]
pub use logger::{init_logger, init_logger_with_level};
pub use observers::{AdjustmentEvent, AdjustmentObserver, ChannelObserver};
pub use primitive::{GeometricPrimitive, PrimitiveType};
pub use restriction::Restriction;
pub use statistic::{TestStatisticDefinition, TestStatisticParameters, TestStatisticType};
