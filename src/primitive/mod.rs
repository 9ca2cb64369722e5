//! Geometric primitives and their point observation equations.
//!
//! A primitive turns an observed point `p` (reduced to the feature's center of mass) into a
//! scalar misclosure `w(x, p)` that vanishes when the point lies on the primitive, together
//! with the partial derivatives with respect to the unknown parameters `x` and the point
//! coordinates `p`. The latter weight the coordinate dispersion in the Gauss-Helmert model.
//!
//! # Primitives
//!
//! | Type | Parameters | Observation equation |
//! |------|------------|----------------------|
//! | [`Line`] | nx, ny, d | `nx·x + ny·y − d`, with `n·n = 1` |
//! | [`Circle`] | x0, y0, r | `(x−x0)² + (y−y0)² − r²` |
//! | [`Ellipse`] | F1, F2, a | `|p−F1| + |p−F2| − 2a` |
//! | [`QuadraticCurve`] | A…E, F | `Ax² + By² + √2Cxy + Dx + Ey + F`, with `A²+B²+C² = 1` |
//! | [`Plane`] | nx, ny, nz, d | `n·p − d`, with `n·n = 1` |
//! | [`Sphere`] | x0, y0, z0, r | `|p−p0|² − r²` |
//! | [`QuadraticSurface`] | A…I, J | general quadric, with `A²+…+F² = 1` |
//!
//! # Center of mass
//!
//! Parameters are estimated in a frame whose origin is the centroid of the points. Moving
//! the origin by `δ` maps the parameters through an affine function whose Jacobian is the
//! identity plus a translation block; [`GeometricPrimitive::translate`] applies it to the
//! values and optionally propagates a parameter covariance `Q ← J·Q·Jᵀ`.

pub mod circle;
pub mod ellipse;
pub mod line;
pub mod plane;
pub mod quadratic_curve;
pub mod quadratic_surface;
pub mod sphere;

pub use circle::Circle;
pub use ellipse::Ellipse;
pub use line::Line;
pub use plane::Plane;
pub use quadratic_curve::QuadraticCurve;
pub use quadratic_surface::QuadraticSurface;
pub use sphere::Sphere;

use nalgebra::DMatrix;
use std::fmt::{self, Debug, Display, Formatter};
use thiserror::Error;
use tracing::error;

use crate::core::{ParameterId, ParameterStore, ParameterType, UnknownParameter};
use crate::restriction::{Restriction, RestrictionError};

pub(crate) const SQRT2: f64 = std::f64::consts::SQRT_2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Line,
    Circle,
    Ellipse,
    QuadraticCurve,
    Plane,
    Sphere,
    QuadraticSurface,
}

impl PrimitiveType {
    /// Coordinate dimension of the observed points.
    pub fn dimension(&self) -> usize {
        match self {
            PrimitiveType::Line
            | PrimitiveType::Circle
            | PrimitiveType::Ellipse
            | PrimitiveType::QuadraticCurve => 2,
            PrimitiveType::Plane | PrimitiveType::Sphere | PrimitiveType::QuadraticSurface => 3,
        }
    }
}

impl Display for PrimitiveType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PrimitiveType::Line => write!(f, "Line"),
            PrimitiveType::Circle => write!(f, "Circle"),
            PrimitiveType::Ellipse => write!(f, "Ellipse"),
            PrimitiveType::QuadraticCurve => write!(f, "Quadratic curve"),
            PrimitiveType::Plane => write!(f, "Plane"),
            PrimitiveType::Sphere => write!(f, "Sphere"),
            PrimitiveType::QuadraticSurface => write!(f, "Quadratic surface"),
        }
    }
}

/// Primitive module error types
#[derive(Debug, Clone, Error)]
pub enum PrimitiveError {
    /// Translation vector or point does not match the primitive's dimension
    #[error("Illegal dimension: expected {expected}, found {found}")]
    IllegalDimension { expected: usize, found: usize },

    /// Covariance matrix does not match the number of estimated parameters
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Building the primitive's own restriction failed
    #[error(transparent)]
    Restriction(#[from] RestrictionError),
}

impl PrimitiveError {
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

/// Result type for primitive operations
pub type PrimitiveResult<T> = Result<T, PrimitiveError>;

/// Linearized point observation equation.
#[derive(Debug, Clone, PartialEq)]
pub struct PointJacobian {
    /// `∂w/∂x` for every parameter of the primitive
    pub parameters: Vec<(ParameterId, f64)>,
    /// `∂w/∂p`, one entry per coordinate
    pub coordinates: Vec<f64>,
}

/// New value of a parameter after moving the frame origin, with its affine partials.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedParameter {
    pub id: ParameterId,
    pub value: f64,
    /// `∂value/∂x` with respect to the parameter values before the move, including itself
    pub partials: Vec<(ParameterId, f64)>,
}

/// Contract between a primitive and the estimator.
///
/// All point arguments are coordinates reduced to the current center of mass.
pub trait GeometricPrimitive: Send + Sync + Debug {
    fn primitive_type(&self) -> PrimitiveType;

    /// Ordered parameter signature.
    fn parameters(&self) -> &[(ParameterType, ParameterId)];

    /// Restrictions the primitive needs to be well defined (e.g. a unit normal).
    fn restrictions(&self) -> Vec<Box<dyn Restriction>>;

    fn misclosure(&self, store: &ParameterStore, point: &[f64]) -> f64;

    fn jacobian(&self, store: &ParameterStore, point: &[f64]) -> PointJacobian;

    /// Parameters that change when the frame origin moves so that `p_new = p_old + δ`.
    fn translation(&self, store: &ParameterStore, delta: &[f64]) -> Vec<TranslatedParameter>;

    fn box_clone(&self) -> Box<dyn GeometricPrimitive>;

    fn dimension(&self) -> usize {
        self.primitive_type().dimension()
    }

    fn parameter(&self, parameter_type: ParameterType) -> Option<ParameterId> {
        self.parameters()
            .iter()
            .find(|(t, _)| *t == parameter_type)
            .map(|(_, id)| *id)
    }

    fn parameter_ids(&self) -> Vec<ParameterId> {
        self.parameters().iter().map(|(_, id)| *id).collect()
    }

    /// Move the frame origin by `δ`, updating values and optionally a covariance matrix.
    ///
    /// The covariance is indexed by parameter columns; parameters without a column keep
    /// their value update only.
    fn translate(
        &self,
        store: &mut ParameterStore,
        delta: &[f64],
        covariance: Option<&mut DMatrix<f64>>,
    ) -> PrimitiveResult<()> {
        if delta.len() != self.dimension() {
            return Err(PrimitiveError::IllegalDimension {
                expected: self.dimension(),
                found: delta.len(),
            }
            .log());
        }
        let translated = self.translation(store, delta);

        if let Some(covariance) = covariance {
            let n = covariance.nrows();
            if covariance.ncols() != n {
                return Err(PrimitiveError::InvalidArgument(format!(
                    "covariance must be square, got {}x{}",
                    n,
                    covariance.ncols()
                ))
                .log());
            }
            let mut jacobian = DMatrix::<f64>::identity(n, n);
            for parameter in &translated {
                let Some(row) = store.column(parameter.id).filter(|c| *c < n) else {
                    continue;
                };
                jacobian.row_mut(row).fill(0.0);
                for (id, partial) in &parameter.partials {
                    if let Some(column) = store.column(*id).filter(|c| *c < n) {
                        jacobian[(row, column)] += partial;
                    }
                }
            }
            *covariance = &jacobian * &*covariance * jacobian.transpose();
        }

        for parameter in translated {
            store.set_value(parameter.id, parameter.value);
        }
        Ok(())
    }
}

impl Clone for Box<dyn GeometricPrimitive> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Add a parameter to the store and record it in the signature.
pub(crate) fn add_parameter(
    store: &mut ParameterStore,
    signature: &mut Vec<(ParameterType, ParameterId)>,
    parameter: UnknownParameter,
) -> ParameterId {
    let parameter_type = parameter.parameter_type;
    let id = store.add(parameter);
    signature.push((parameter_type, id));
    id
}

/// Shift `value` by `Σ coefficient·δ`; shared by origin-like and distance-like parameters.
pub(crate) fn shifted(
    store: &ParameterStore,
    id: ParameterId,
    terms: &[(ParameterId, f64)],
) -> TranslatedParameter {
    let value = store.value(id) + terms.iter().map(|(p, c)| c * store.value(*p)).sum::<f64>();
    let mut partials = vec![(id, 1.0)];
    partials.extend(terms.iter().copied());
    TranslatedParameter {
        id,
        value,
        partials,
    }
}

/// Origin-like parameter: `value + δ`.
pub(crate) fn shift_origin(store: &ParameterStore, id: ParameterId, delta: f64) -> TranslatedParameter {
    TranslatedParameter {
        id,
        value: store.value(id) + delta,
        partials: vec![(id, 1.0)],
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Reduce by `c`, reverse with covariance propagation, and compare against the start.
    pub fn assert_round_trip(
        primitive: &dyn GeometricPrimitive,
        store: &mut ParameterStore,
        center: &[f64],
    ) -> Result<(), Box<dyn std::error::Error>> {
        let nou = store.assign_columns();
        let original: Vec<f64> = primitive.parameter_ids().iter().map(|id| store.value(*id)).collect();
        let covariance0 = DMatrix::from_fn(nou, nou, |i, j| {
            if i == j { 1.0 + i as f64 } else { 0.1 / (1.0 + (i + j) as f64) }
        });

        let negative: Vec<f64> = center.iter().map(|c| -c).collect();
        let mut covariance = covariance0.clone();
        primitive.translate(store, &negative, Some(&mut covariance))?;
        primitive.translate(store, center, Some(&mut covariance))?;

        for (id, value) in primitive.parameter_ids().iter().zip(&original) {
            assert_abs_diff_eq!(store.value(*id), *value, epsilon = 1e-9);
        }
        for (a, b) in covariance.iter().zip(covariance0.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
        }
        Ok(())
    }

    /// Central finite differences of the misclosure against the analytic Jacobian.
    pub fn assert_jacobian(
        primitive: &dyn GeometricPrimitive,
        store: &mut ParameterStore,
        point: &[f64],
    ) {
        let jacobian = primitive.jacobian(store, point);
        let h = 1e-6;
        for (id, analytic) in &jacobian.parameters {
            let value = store.value(*id);
            store.set_value(*id, value + h);
            let plus = primitive.misclosure(store, point);
            store.set_value(*id, value - h);
            let minus = primitive.misclosure(store, point);
            store.set_value(*id, value);
            assert_abs_diff_eq!(*analytic, (plus - minus) / (2.0 * h), epsilon = 1e-6);
        }
        for (k, analytic) in jacobian.coordinates.iter().enumerate() {
            let mut p = point.to_vec();
            p[k] += h;
            let plus = primitive.misclosure(store, &p);
            p[k] -= 2.0 * h;
            let minus = primitive.misclosure(store, &p);
            assert_abs_diff_eq!(*analytic, (plus - minus) / (2.0 * h), epsilon = 1e-6);
        }
    }

    /// Misclosure of points invariant under a frame move applied to both points and parameters.
    pub fn assert_translation_invariant(
        primitive: &dyn GeometricPrimitive,
        store: &mut ParameterStore,
        point: &[f64],
        delta: &[f64],
    ) -> Result<(), Box<dyn std::error::Error>> {
        let before = primitive.misclosure(store, point);
        primitive.translate(store, delta, None)?;
        let moved: Vec<f64> = point.iter().zip(delta).map(|(p, d)| p + d).collect();
        let after = primitive.misclosure(store, &moved);
        assert_abs_diff_eq!(before, after, epsilon = 1e-9);
        Ok(())
    }
}
