//! Algebraic restrictions between unknown parameters.
//!
//! A restriction states `f(regressors) = regressand` and contributes one row to the
//! constraint block of the bordered normal equations:
//!
//! ```text
//! | JxᵀWJx  Rᵀ | |dx|   | −JxᵀWw |
//! |   R     0  | |k | = |   −r   |
//! ```
//!
//! where `r = f(regressors) − regressand` is the misclosure and `R` holds the partial
//! derivatives of `r` with respect to every estimated parameter.
//!
//! # Variants
//!
//! - [`AverageRestriction`]: `mean(a) = c`
//! - [`ProductSumRestriction`]: `(±a₁b₁ ± a₂b₂ ± …)^k = c`
//! - [`TrigonometricRestriction`]: `sin/cos/tan/cot(a) = c` or the inverse functions
//! - [`VectorAngleRestriction`]: `acos(a·b / (|a||b|)) = c`
//! - [`FeaturePointRestriction`]: a point observation of a primitive used as a hard constraint
//!
//! Restrictions also define post-processed parameters: after the adjustment the regressand is
//! evaluated as `f(regressors)` and its covariance is propagated with the same partials.

pub mod average;
pub mod feature_point;
pub mod product_sum;
pub mod trigonometric;
pub mod vector_angle;

pub use average::AverageRestriction;
pub use feature_point::FeaturePointRestriction;
pub use product_sum::ProductSumRestriction;
pub use trigonometric::{TrigonometricFunctionType, TrigonometricRestriction};
pub use vector_angle::VectorAngleRestriction;

use nalgebra::DMatrix;
use std::fmt::{self, Debug, Display, Formatter};
use thiserror::Error;
use tracing::error;

use crate::core::{ParameterId, ParameterStore, Point};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestrictionType {
    Average,
    ProductSum,
    TrigonometricFunction,
    VectorAngle,
    FeaturePoint,
}

impl Display for RestrictionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RestrictionType::Average => write!(f, "Average"),
            RestrictionType::ProductSum => write!(f, "Product sum"),
            RestrictionType::TrigonometricFunction => write!(f, "Trigonometric function"),
            RestrictionType::VectorAngle => write!(f, "Vector angle"),
            RestrictionType::FeaturePoint => write!(f, "Feature point"),
        }
    }
}

/// Restriction module error types
#[derive(Debug, Clone, Error)]
pub enum RestrictionError {
    /// Regressor lists of unequal length or a regressand among its own regressors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A parameter id does not belong to the store the restriction is used with
    #[error("Unknown parameter {0:?}")]
    UnknownParameter(ParameterId),
}

impl RestrictionError {
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

/// Result type for restriction operations
pub type RestrictionResult<T> = Result<T, RestrictionError>;

/// One scalar constraint equation.
///
/// `center` is the current center of mass of the feature; only restrictions that evaluate
/// point observations depend on it.
pub trait Restriction: Send + Sync + Debug {
    fn restriction_type(&self) -> RestrictionType;

    /// Parameter defined by this restriction, if any.
    fn regressand(&self) -> Option<ParameterId>;

    /// `f(regressors) − regressand` at the current parameter values.
    fn misclosure(&self, store: &ParameterStore, center: &Point) -> f64;

    /// `∂misclosure/∂parameter` for every referenced parameter.
    ///
    /// A parameter referenced several times appears once with the accumulated derivative.
    fn partial_derivatives(&self, store: &ParameterStore, center: &Point)
    -> Vec<(ParameterId, f64)>;

    /// Whether `id` is the regressand or one of the regressors.
    fn references(&self, id: ParameterId) -> bool;

    fn box_clone(&self) -> Box<dyn Restriction>;

    /// Whether the restriction reads the center of mass and so stays valid in the reduced frame.
    fn tracks_center_of_mass(&self) -> bool {
        false
    }

    /// `f(regressors)`, i.e. the value the regressand has to take.
    fn evaluate(&self, store: &ParameterStore, center: &Point) -> f64 {
        let regressand = self.regressand().map_or(0.0, |id| store.value(id));
        self.misclosure(store, center) + regressand
    }

    /// Add the partials of all estimated parameters to `row` of a constraint matrix.
    fn jacobian_row(
        &self,
        store: &ParameterStore,
        center: &Point,
        row: usize,
        matrix: &mut DMatrix<f64>,
    ) {
        for (id, derivative) in self.partial_derivatives(store, center) {
            if let Some(column) = store.column(id) {
                matrix[(row, column)] += derivative;
            }
        }
    }
}

impl Clone for Box<dyn Restriction> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Sum derivatives that belong to the same parameter, keeping first-seen order.
pub(crate) fn accumulate(partials: impl IntoIterator<Item = (ParameterId, f64)>) -> Vec<(ParameterId, f64)> {
    let mut accumulated: Vec<(ParameterId, f64)> = Vec::new();
    for (id, derivative) in partials {
        match accumulated.iter_mut().find(|(existing, _)| *existing == id) {
            Some((_, value)) => *value += derivative,
            None => accumulated.push((id, derivative)),
        }
    }
    accumulated
}

/// Reject a regressand that also acts as a regressor.
pub(crate) fn check_regressand(
    regressand: ParameterId,
    regressors: &[ParameterId],
    restriction_type: RestrictionType,
) -> RestrictionResult<()> {
    if regressors.contains(&regressand) {
        return Err(RestrictionError::InvalidArgument(format!(
            "{restriction_type} restriction: regressand {regressand:?} must not be one of its regressors"
        ))
        .log());
    }
    Ok(())
}

pub(crate) fn check_known(store: &ParameterStore, ids: &[ParameterId]) -> RestrictionResult<()> {
    match ids.iter().find(|id| !store.contains(**id)) {
        Some(id) => Err(RestrictionError::UnknownParameter(*id).log()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ParameterType, UnknownParameter};

    #[test]
    fn test_accumulate_merges_duplicates() {
        let mut store = ParameterStore::new();
        let a = store.add(UnknownParameter::new(ParameterType::VectorX, 0.0));
        let b = store.add(UnknownParameter::new(ParameterType::VectorY, 0.0));
        let merged = accumulate(vec![(a, 1.0), (b, 2.0), (a, 0.5)]);
        assert_eq!(merged, vec![(a, 1.5), (b, 2.0)]);
    }

    #[test]
    fn test_jacobian_row_skips_fixed_parameters() -> Result<(), Box<dyn std::error::Error>> {
        let mut store = ParameterStore::new();
        let a = store.add(UnknownParameter::new(ParameterType::VectorX, 2.0));
        let b = store.add(UnknownParameter::new(ParameterType::VectorY, 4.0));
        let c = store.add(
            UnknownParameter::new(ParameterType::Length, 3.0)
                .with_processing_type(crate::core::ProcessingType::Fixed),
        );
        let nou = store.assign_columns();
        let restriction = AverageRestriction::new(&store, vec![a, b], c)?;

        let mut matrix = DMatrix::zeros(1, nou);
        restriction.jacobian_row(&store, &Point::new_2d(0.0, 0.0), 0, &mut matrix);
        assert_eq!(matrix[(0, 0)], 0.5);
        assert_eq!(matrix[(0, 1)], 0.5);
        assert_eq!(restriction.evaluate(&store, &Point::new_2d(0.0, 0.0)), 3.0);
        Ok(())
    }
}
