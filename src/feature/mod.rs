//! Features: primitives, restrictions and observed points fitted together.
//!
//! A [`Feature`] owns the [`ParameterStore`] every primitive and restriction refers to. Its
//! points are bound to all primitives of the feature, so each point contributes one
//! observation equation per primitive (its number of geometries).
//!
//! Parameters that are not estimated directly but follow from the estimated ones (the
//! center of an ellipse, the origin of a line, ...) are expressed as post-processing
//! restrictions: after the adjustment their regressand is set to `f(regressors)` and the
//! covariance matrix is extended with the gradient of `f`.

pub mod curve;
pub mod surface;

use nalgebra::DMatrix;
use thiserror::Error;
use tracing::{debug, error};

use crate::core::{
    CoreError, FeaturePoint, ParameterId, ParameterStore, ParameterType, Point, ProcessingType,
    UnknownParameter,
};
use crate::initial_guess::{self, InitialGuessError};
use crate::linalg::LinearAlgebra;
use crate::primitive::{GeometricPrimitive, PrimitiveError, PrimitiveType};
use crate::restriction::{Restriction, RestrictionError};

/// Feature module error types
#[derive(Debug, Clone, Error)]
pub enum FeatureError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Primitive(#[from] PrimitiveError),

    #[error(transparent)]
    Restriction(#[from] RestrictionError),

    #[error(transparent)]
    InitialGuess(#[from] InitialGuessError),

    /// A restriction or point does not fit the feature
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl FeatureError {
    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error with the original source error
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for feature operations
pub type FeatureResult<T> = Result<T, FeatureError>;

/// A set of primitives fitted to a common point set.
#[derive(Debug, Clone)]
pub struct Feature {
    feature_type: PrimitiveType,
    store: ParameterStore,
    primitives: Vec<Box<dyn GeometricPrimitive>>,
    restrictions: Vec<Box<dyn Restriction>>,
    post_processing: Vec<Box<dyn Restriction>>,
    points: Vec<FeaturePoint>,
    center_of_mass: Point,
    estimate_center_of_mass: bool,
    estimate_initial_guess: bool,
}

impl Feature {
    /// Empty feature of the given kind; primitives are attached by the builders.
    pub(crate) fn with_store(feature_type: PrimitiveType, store: ParameterStore) -> Self {
        let center_of_mass = match feature_type.dimension() {
            2 => Point::new_2d(0.0, 0.0),
            _ => Point::new_3d(0.0, 0.0, 0.0),
        };
        Self {
            feature_type,
            store,
            primitives: Vec::new(),
            restrictions: Vec::new(),
            post_processing: Vec::new(),
            points: Vec::new(),
            center_of_mass,
            estimate_center_of_mass: true,
            estimate_initial_guess: true,
        }
    }

    pub(crate) fn push_primitive(&mut self, primitive: Box<dyn GeometricPrimitive>) {
        self.primitives.push(primitive);
    }

    /// Add a parameter computed after the adjustment.
    pub(crate) fn add_derived_parameter(
        &mut self,
        parameter_type: ParameterType,
        name: &str,
    ) -> ParameterId {
        self.store.add(
            UnknownParameter::new(parameter_type, 0.0)
                .with_name(name)
                .with_processing_type(ProcessingType::PostProcessing),
        )
    }

    /// Add a hidden constant used as a factor in product-sum restrictions.
    pub(crate) fn add_constant(&mut self, value: f64) -> ParameterId {
        self.store.add(
            UnknownParameter::new(ParameterType::Constant, value)
                .with_processing_type(ProcessingType::Fixed)
                .with_visible(false),
        )
    }

    pub fn feature_type(&self) -> PrimitiveType {
        self.feature_type
    }

    pub fn dimension(&self) -> usize {
        self.feature_type.dimension()
    }

    pub fn store(&self) -> &ParameterStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ParameterStore {
        &mut self.store
    }

    pub fn primitives(&self) -> &[Box<dyn GeometricPrimitive>] {
        &self.primitives
    }

    /// First parameter of the given type, in store order.
    pub fn parameter(&self, parameter_type: ParameterType) -> Option<ParameterId> {
        self.store.find(parameter_type)
    }

    /// Value of the first parameter of the given type.
    pub fn value(&self, parameter_type: ParameterType) -> Option<f64> {
        self.parameter(parameter_type).map(|id| self.store.value(id))
    }

    /// Restrictions of the primitives followed by the user-defined ones.
    pub fn restrictions(&self) -> Vec<Box<dyn Restriction>> {
        self.primitives
            .iter()
            .flat_map(|p| p.restrictions())
            .chain(self.restrictions.iter().cloned())
            .collect()
    }

    /// Add a restriction between parameters of this feature.
    ///
    /// # Errors
    /// `InvalidArgument` if the restriction defines a post-processed parameter; those belong
    /// to [`Feature::add_post_processing`].
    pub fn add_restriction(&mut self, restriction: Box<dyn Restriction>) -> FeatureResult<()> {
        if let Some(regressand) = restriction.regressand() {
            if self.store.get(regressand).processing_type == ProcessingType::PostProcessing {
                return Err(FeatureError::InvalidArgument(format!(
                    "{} restriction defines post-processed parameter '{}'",
                    restriction.restriction_type(),
                    self.store.get(regressand).name
                ))
                .log());
            }
        }
        self.restrictions.push(restriction);
        Ok(())
    }

    /// Whether a user restriction ties a parameter that moves with the frame origin.
    ///
    /// Such a restriction holds in the original frame only, so the adjustment must not
    /// reduce the primitives to the center of mass.
    pub fn has_frame_dependent_restriction(&self) -> bool {
        let delta = vec![0.0; self.dimension()];
        let moving: Vec<ParameterId> = self
            .primitives
            .iter()
            .flat_map(|p| p.translation(&self.store, &delta))
            .map(|t| t.id)
            .collect();
        self.restrictions
            .iter()
            .filter(|r| !r.tracks_center_of_mass())
            .any(|r| moving.iter().any(|id| r.references(*id)))
    }

    pub fn post_processing(&self) -> &[Box<dyn Restriction>] {
        &self.post_processing
    }

    /// Append a calculation whose regressand is computed after the adjustment.
    ///
    /// # Errors
    /// `InvalidArgument` unless the regressand exists and is a post-processed parameter.
    pub fn add_post_processing(&mut self, restriction: Box<dyn Restriction>) -> FeatureResult<()> {
        let regressand = restriction.regressand().ok_or_else(|| {
            FeatureError::InvalidArgument(format!(
                "{} restriction without regressand cannot be post-processed",
                restriction.restriction_type()
            ))
            .log()
        })?;
        if self.store.get(regressand).processing_type != ProcessingType::PostProcessing {
            return Err(FeatureError::InvalidArgument(format!(
                "parameter '{}' is not marked for post-processing",
                self.store.get(regressand).name
            ))
            .log());
        }
        self.post_processing.push(restriction);
        Ok(())
    }

    pub fn points(&self) -> &[FeaturePoint] {
        &self.points
    }

    pub fn points_mut(&mut self) -> &mut [FeaturePoint] {
        &mut self.points
    }

    /// Bind an observed point to every primitive of the feature.
    ///
    /// # Errors
    /// `IllegalDimension` if the point dimension differs from the feature dimension.
    pub fn add_point(&mut self, point: FeaturePoint) -> FeatureResult<()> {
        if point.dimension() != self.dimension() {
            return Err(FeatureError::Core(
                CoreError::IllegalDimension(format!(
                    "point '{}' has dimension {}, {} feature needs {}",
                    point.name(),
                    point.dimension(),
                    self.feature_type,
                    self.dimension()
                ))
                .log(),
            ));
        }
        self.points.push(point);
        Ok(())
    }

    pub fn add_points(&mut self, points: impl IntoIterator<Item = FeaturePoint>) -> FeatureResult<()> {
        points.into_iter().try_for_each(|p| self.add_point(p))
    }

    pub fn number_of_enabled_points(&self) -> usize {
        self.points.iter().filter(|p| p.is_enabled()).count()
    }

    /// Observation equations contributed by each point.
    pub fn geometries_per_point(&self) -> usize {
        self.primitives.len()
    }

    pub fn center_of_mass(&self) -> &Point {
        &self.center_of_mass
    }

    pub fn set_center_of_mass(&mut self, center_of_mass: Point) {
        self.center_of_mass = center_of_mass;
    }

    pub fn is_estimate_center_of_mass(&self) -> bool {
        self.estimate_center_of_mass
    }

    pub fn set_estimate_center_of_mass(&mut self, estimate: bool) {
        self.estimate_center_of_mass = estimate;
    }

    pub fn is_estimate_initial_guess(&self) -> bool {
        self.estimate_initial_guess
    }

    pub fn set_estimate_initial_guess(&mut self, estimate: bool) {
        self.estimate_initial_guess = estimate;
    }

    /// Centroid of the enabled points.
    ///
    /// # Errors
    /// - `EmptyPointSet` if no point is enabled
    /// - `IllegalDimension` if the points do not share one dimension
    pub fn derive_center_of_mass(points: &[FeaturePoint]) -> FeatureResult<Point> {
        let mut enabled = points.iter().filter(|p| p.is_enabled());
        let first = enabled.next().ok_or_else(|| {
            FeatureError::Core(
                CoreError::EmptyPointSet("center of mass requires enabled points".to_string())
                    .log(),
            )
        })?;
        let dimension = first.dimension();
        let mut sum = first.position().as_slice().to_vec();
        let mut count = 1usize;
        for point in enabled {
            if point.dimension() != dimension {
                return Err(FeatureError::Core(
                    CoreError::IllegalDimension(format!(
                        "point '{}' has dimension {}, expected {}",
                        point.name(),
                        point.dimension(),
                        dimension
                    ))
                    .log(),
                ));
            }
            for (s, c) in sum.iter_mut().zip(point.position().as_slice()) {
                *s += c;
            }
            count += 1;
        }
        let mean: Vec<f64> = sum.iter().map(|s| s / count as f64).collect();
        Ok(Point::from_slice(&mean)?)
    }

    /// Recompute the center of mass from the enabled points.
    pub fn update_center_of_mass(&mut self) -> FeatureResult<()> {
        self.center_of_mass = Self::derive_center_of_mass(&self.points)?;
        Ok(())
    }

    /// Closed-form starting values for every primitive.
    ///
    /// The result becomes both the current value and the initial value `value0` of each
    /// parameter, expressed in the original (unreduced) frame.
    pub fn derive_initial_guess(&mut self, backend: &dyn LinearAlgebra) -> FeatureResult<()> {
        let positions: Vec<Point> = self
            .points
            .iter()
            .filter(|p| p.is_enabled())
            .map(|p| p.position().clone())
            .collect();

        for primitive in &self.primitives {
            let guess = initial_guess::derive(primitive.primitive_type(), &positions, backend)?;
            for (parameter_type, value) in &guess.values {
                match primitive.parameter(*parameter_type) {
                    Some(id) => self.store.set_value(id, *value),
                    None => debug!(
                        "{} has no parameter {}, initial guess value ignored",
                        primitive.primitive_type(),
                        parameter_type
                    ),
                }
            }
            primitive.translate(&mut self.store, guess.center.as_slice(), None)?;
        }

        let ids = self.store.ids();
        for id in ids {
            let parameter = self.store.get_mut(id);
            if parameter.processing_type == ProcessingType::Adjustment {
                parameter.value0 = parameter.value;
            }
        }
        self.evaluate_post_processing();
        Ok(())
    }

    /// Set every post-processed parameter to `f(regressors)` in declaration order.
    pub fn evaluate_post_processing(&mut self) {
        let origin = self.origin();
        for restriction in &self.post_processing {
            if let Some(regressand) = restriction.regressand() {
                let value = restriction.evaluate(&self.store, &origin);
                self.store.set_value(regressand, value);
            }
        }
    }

    /// Origin of the feature's coordinate system.
    pub(crate) fn origin(&self) -> Point {
        match self.dimension() {
            2 => Point::new_2d(0.0, 0.0),
            _ => Point::new_3d(0.0, 0.0, 0.0),
        }
    }

    /// Shift every primitive by `delta`, propagating `covariance` if given.
    pub(crate) fn translate_primitives(
        &mut self,
        delta: &[f64],
        covariance: Option<&mut DMatrix<f64>>,
    ) -> FeatureResult<()> {
        let mut covariance = covariance;
        for primitive in &self.primitives {
            primitive.translate(&mut self.store, delta, covariance.as_deref_mut())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::FaerBackend;
    use crate::restriction::{AverageRestriction, FeaturePointRestriction};
    use approx::assert_abs_diff_eq;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_center_of_mass_skips_disabled_points() -> TestResult {
        let points = vec![
            FeaturePoint::new("1", Point::new_2d(0.0, 0.0)),
            FeaturePoint::new("2", Point::new_2d(2.0, 4.0)),
            FeaturePoint::new("3", Point::new_2d(100.0, 100.0)).with_enabled(false),
        ];
        let center = Feature::derive_center_of_mass(&points)?;
        assert_eq!(center.as_slice(), &[1.0, 2.0]);
        Ok(())
    }

    #[test]
    fn test_center_of_mass_errors() {
        assert!(Feature::derive_center_of_mass(&[]).is_err());
        let mixed = vec![
            FeaturePoint::new("1", Point::new_2d(0.0, 0.0)),
            FeaturePoint::new("2", Point::new_3d(0.0, 0.0, 1.0)),
        ];
        assert!(matches!(
            Feature::derive_center_of_mass(&mixed),
            Err(FeatureError::Core(CoreError::IllegalDimension(_)))
        ));
    }

    #[test]
    fn test_add_point_checks_dimension() -> TestResult {
        let mut feature = Feature::circle()?;
        assert!(feature.add_point(FeaturePoint::new("P", Point::new_3d(0.0, 0.0, 0.0))).is_err());
        feature.add_point(FeaturePoint::new("P", Point::new_2d(0.0, 0.0)))?;
        assert_eq!(feature.number_of_enabled_points(), 1);
        Ok(())
    }

    #[test]
    fn test_frame_dependent_restriction() -> TestResult {
        let mut feature = Feature::circle()?;
        assert!(!feature.has_frame_dependent_restriction());

        let r = feature.parameter(ParameterType::Radius).ok_or("r")?;
        let radius = feature.add_constant(2.0);
        let restriction = AverageRestriction::new(feature.store(), vec![r], radius)?;
        feature.add_restriction(Box::new(restriction))?;
        assert!(!feature.has_frame_dependent_restriction());

        let x0 = feature.parameter(ParameterType::OriginCoordinateX).ok_or("x0")?;
        let primitive = feature.primitives()[0].box_clone();
        feature.add_restriction(Box::new(FeaturePointRestriction::new(
            primitive.as_ref(),
            Point::new_2d(1.0, 0.0),
        )))?;
        assert!(!feature.has_frame_dependent_restriction());

        let abscissa = feature.add_constant(0.5);
        let restriction = AverageRestriction::new(feature.store(), vec![x0], abscissa)?;
        feature.add_restriction(Box::new(restriction))?;
        assert!(feature.has_frame_dependent_restriction());
        Ok(())
    }

    #[test]
    fn test_initial_guess_is_stored_in_original_frame() -> TestResult {
        let mut feature = Feature::circle()?;
        feature.add_points([
            FeaturePoint::new("1", Point::new_2d(13.0, -2.0)),
            FeaturePoint::new("2", Point::new_2d(10.0, 1.0)),
            FeaturePoint::new("3", Point::new_2d(7.0, -2.0)),
            FeaturePoint::new("4", Point::new_2d(10.0, -5.0)),
        ])?;
        feature.derive_initial_guess(&FaerBackend::new())?;

        let x0 = feature.parameter(ParameterType::OriginCoordinateX).ok_or("x0")?;
        assert_abs_diff_eq!(feature.store().value(x0), 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(feature.store().get(x0).value0, 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(feature.value(ParameterType::OriginCoordinateY).ok_or("y0")?, -2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(feature.value(ParameterType::Radius).ok_or("r")?, 3.0, epsilon = 1e-9);
        Ok(())
    }
}
