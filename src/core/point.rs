//! Observed points.
//!
//! A [`FeaturePoint`] carries its a-priori coordinates and dispersion plus everything the
//! estimator derives for it: residuals, redundancy numbers, cofactors of the adjusted
//! coordinates, estimated gross errors and the outlier test statistic.

use nalgebra::{DMatrix, DVector};
use std::fmt::{self, Display, Formatter};

use crate::core::{CoreError, CoreResult};
use crate::linalg::SQRT_EPS;
use crate::statistic::distribution;

/// A 1-D, 2-D or 3-D coordinate tuple.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    coordinates: [f64; 3],
    dimension: usize,
}

impl Point {
    pub fn new_2d(x: f64, y: f64) -> Self {
        Self {
            coordinates: [x, y, 0.0],
            dimension: 2,
        }
    }

    pub fn new_3d(x: f64, y: f64, z: f64) -> Self {
        Self {
            coordinates: [x, y, z],
            dimension: 3,
        }
    }

    /// Origin of the given dimension.
    pub fn origin(dimension: usize) -> CoreResult<Self> {
        Self::from_slice(&vec![0.0; dimension])
    }

    pub fn from_slice(coordinates: &[f64]) -> CoreResult<Self> {
        if coordinates.is_empty() || coordinates.len() > 3 {
            return Err(CoreError::IllegalDimension(format!(
                "points must have 1 to 3 coordinates, got {}",
                coordinates.len()
            ))
            .log());
        }
        let mut c = [0.0; 3];
        c[..coordinates.len()].copy_from_slice(coordinates);
        Ok(Self {
            coordinates: c,
            dimension: coordinates.len(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn x(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn y(&self) -> f64 {
        self.coordinates[1]
    }

    pub fn z(&self) -> f64 {
        self.coordinates[2]
    }

    pub fn coordinate(&self, index: usize) -> f64 {
        self.coordinates[index]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.coordinates[..self.dimension]
    }

    /// Component-wise difference `self − other` over the shared dimension.
    pub fn offset_from(&self, other: &Point) -> Point {
        let mut c = self.coordinates;
        for (i, value) in c.iter_mut().enumerate().take(self.dimension) {
            *value -= other.coordinates[i];
        }
        Point {
            coordinates: c,
            dimension: self.dimension,
        }
    }

    pub fn negated(&self) -> Point {
        Point {
            coordinates: self.coordinates.map(|v| -v),
            dimension: self.dimension,
        }
    }
}

impl Display for Point {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.as_slice().iter().map(|v| format!("{v:.6}")).collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// Outcome of one side (a-priori or a-posteriori) of the point outlier test.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TestDecision {
    pub value: f64,
    pub quantile: f64,
    /// Natural logarithm of the probability value
    pub log_p_value: f64,
    pub significant: bool,
}

/// Outlier test of a single point.
#[derive(Debug, Clone, Default)]
pub struct PointTestStatistic {
    numerator: f64,
    dof: usize,
    pub apriori: TestDecision,
    pub aposteriori: TestDecision,
}

impl PointTestStatistic {
    pub fn numerator(&self) -> f64 {
        self.numerator
    }

    pub fn degree_of_freedom(&self) -> usize {
        self.dof
    }

    pub(crate) fn set_numerator(&mut self, numerator: f64, dof: usize) {
        self.numerator = numerator;
        self.dof = dof;
    }

    pub fn is_significant(&self) -> bool {
        self.apriori.significant || self.aposteriori.significant
    }

    /// Evaluate both test statistics once the variance component is known.
    ///
    /// The a-posteriori variance is bias corrected by removing this point's contribution:
    /// `σ̂² = (Ω − T)/(r − f)`.
    pub(crate) fn evaluate(
        &mut self,
        variance0: f64,
        omega: f64,
        redundancy: f64,
        apply_aposteriori: bool,
        quantile_apriori: f64,
        quantile_aposteriori: f64,
    ) {
        self.apriori = TestDecision {
            quantile: quantile_apriori,
            ..TestDecision::default()
        };
        self.aposteriori = TestDecision {
            quantile: quantile_aposteriori,
            ..TestDecision::default()
        };
        if self.dof == 0 {
            return;
        }
        let dof = self.dof as f64;

        let apriori = (self.numerator / dof / variance0).abs();
        self.apriori.value = apriori;
        self.apriori.log_p_value = distribution::log_probability_value(apriori, dof);
        self.apriori.significant = apriori > quantile_apriori;

        if apply_aposteriori {
            let remaining = redundancy - dof;
            let variance = if remaining > 0.0 {
                (omega - self.numerator) / remaining
            } else if redundancy > 0.0 {
                omega / redundancy
            } else {
                0.0
            };
            if variance > SQRT_EPS {
                let aposteriori = (self.numerator / (variance * dof)).abs();
                self.aposteriori.value = aposteriori;
                self.aposteriori.log_p_value =
                    distribution::log_probability_value_f(aposteriori, dof, remaining);
                self.aposteriori.significant = aposteriori > quantile_aposteriori;
            }
        }
    }
}

/// Observed point bound to a feature.
#[derive(Debug, Clone)]
pub struct FeaturePoint {
    name: String,
    position: Point,
    dispersion: DMatrix<f64>,
    enabled: bool,
    residuals: DVector<f64>,
    redundancy: DVector<f64>,
    cofactors: DVector<f64>,
    gross_errors: DVector<f64>,
    minimal_detectable_bias: DVector<f64>,
    test_statistic: PointTestStatistic,
}

impl FeaturePoint {
    /// Point with unit a-priori dispersion.
    pub fn new(name: impl Into<String>, position: Point) -> Self {
        let dim = position.dimension();
        Self {
            name: name.into(),
            position,
            dispersion: DMatrix::identity(dim, dim),
            enabled: true,
            residuals: DVector::zeros(dim),
            redundancy: DVector::zeros(dim),
            cofactors: DVector::zeros(dim),
            gross_errors: DVector::zeros(dim),
            minimal_detectable_bias: DVector::zeros(dim),
            test_statistic: PointTestStatistic::default(),
        }
    }

    /// Replace the a-priori dispersion.
    ///
    /// # Errors
    /// `InvalidDispersion` unless the matrix is square, matches the point dimension, is
    /// finite and symmetric and has a positive diagonal.
    pub fn with_dispersion(mut self, dispersion: DMatrix<f64>) -> CoreResult<Self> {
        let dim = self.position.dimension();
        let invalid = |reason: String| {
            CoreError::InvalidDispersion {
                name: self.name.clone(),
                reason,
            }
            .log()
        };
        if dispersion.nrows() != dim || dispersion.ncols() != dim {
            return Err(invalid(format!(
                "expected {dim}x{dim}, got {}x{}",
                dispersion.nrows(),
                dispersion.ncols()
            )));
        }
        if dispersion.iter().any(|v| !v.is_finite()) {
            return Err(invalid("contains NaN or Inf".to_string()));
        }
        for i in 0..dim {
            if dispersion[(i, i)] <= 0.0 {
                return Err(invalid(format!("non-positive variance at {i}")));
            }
            for j in (i + 1)..dim {
                if (dispersion[(i, j)] - dispersion[(j, i)]).abs()
                    > SQRT_EPS * dispersion[(i, i)].max(dispersion[(j, j)])
                {
                    return Err(invalid("matrix is not symmetric".to_string()));
                }
            }
        }
        self.dispersion = dispersion;
        Ok(self)
    }

    /// Diagonal dispersion from standard deviations.
    pub fn with_uncertainties(self, sigmas: &[f64]) -> CoreResult<Self> {
        let d = DMatrix::from_diagonal(&DVector::from_iterator(
            sigmas.len(),
            sigmas.iter().map(|s| s * s),
        ));
        self.with_dispersion(d)
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> usize {
        self.position.dimension()
    }

    /// A-priori coordinates.
    pub fn position(&self) -> &Point {
        &self.position
    }

    /// Adjusted coordinates `x0 + v`.
    pub fn adjusted(&self) -> Point {
        let mut c = [0.0; 3];
        for (i, value) in c.iter_mut().enumerate().take(self.dimension()) {
            *value = self.position.coordinate(i) + self.residuals[i];
        }
        Point {
            coordinates: c,
            dimension: self.dimension(),
        }
    }

    pub fn dispersion(&self) -> &DMatrix<f64> {
        &self.dispersion
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn residuals(&self) -> &DVector<f64> {
        &self.residuals
    }

    pub fn redundancy(&self) -> &DVector<f64> {
        &self.redundancy
    }

    /// Sum of the positive redundancy numbers.
    pub fn total_redundancy(&self) -> f64 {
        self.redundancy.iter().filter(|r| **r > 0.0).sum()
    }

    pub fn cofactors(&self) -> &DVector<f64> {
        &self.cofactors
    }

    pub fn gross_errors(&self) -> &DVector<f64> {
        &self.gross_errors
    }

    /// Smallest gross error per coordinate the outlier test detects with the configured power.
    ///
    /// Infinite for coordinates without redundancy.
    pub fn minimal_detectable_bias(&self) -> &DVector<f64> {
        &self.minimal_detectable_bias
    }

    pub fn test_statistic(&self) -> &PointTestStatistic {
        &self.test_statistic
    }

    /// Standard deviation of adjusted coordinate `index` for the given variance of unit weight.
    pub fn uncertainty(&self, index: usize, variance: f64) -> f64 {
        (self.cofactors[index] * variance).abs().sqrt()
    }

    /// Clear all derived quantities before a new estimation.
    pub fn reset(&mut self) {
        let dim = self.dimension();
        self.residuals = DVector::zeros(dim);
        self.redundancy = DVector::zeros(dim);
        self.cofactors = DVector::zeros(dim);
        self.gross_errors = DVector::zeros(dim);
        self.minimal_detectable_bias = DVector::zeros(dim);
        self.test_statistic = PointTestStatistic::default();
    }

    /// Move the observation, e.g. onto a sigma point of the unscented transformation.
    pub(crate) fn set_position(&mut self, position: Point) {
        self.position = position;
    }

    pub(crate) fn set_residuals(&mut self, residuals: DVector<f64>) {
        self.residuals = residuals;
    }

    pub(crate) fn set_redundancy(&mut self, redundancy: DVector<f64>) {
        self.redundancy = redundancy;
    }

    pub(crate) fn set_cofactors(&mut self, cofactors: DVector<f64>) {
        self.cofactors = cofactors;
    }

    pub(crate) fn set_gross_errors(&mut self, gross_errors: DVector<f64>) {
        self.gross_errors = gross_errors;
    }

    pub(crate) fn set_minimal_detectable_bias(&mut self, bias: DVector<f64>) {
        self.minimal_detectable_bias = bias;
    }

    pub(crate) fn test_statistic_mut(&mut self) -> &mut PointTestStatistic {
        &mut self.test_statistic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_point_dimension() -> TestResult {
        let p = Point::from_slice(&[1.0, 2.0, 3.0])?;
        assert_eq!(p.dimension(), 3);
        assert_eq!(p.as_slice(), &[1.0, 2.0, 3.0]);
        assert!(Point::from_slice(&[]).is_err());
        assert!(Point::from_slice(&[0.0; 4]).is_err());

        let d = Point::new_2d(3.0, 5.0).offset_from(&Point::new_2d(1.0, 1.0));
        assert_eq!(d.as_slice(), &[2.0, 4.0]);
        Ok(())
    }

    #[test]
    fn test_dispersion_validation() {
        let p = FeaturePoint::new("P1", Point::new_2d(0.0, 0.0));
        assert!(p.clone().with_dispersion(DMatrix::identity(3, 3)).is_err());
        assert!(
            p.clone()
                .with_dispersion(DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -1.0]))
                .is_err()
        );
        assert!(
            p.clone()
                .with_dispersion(DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.2, 1.0]))
                .is_err()
        );
        assert!(p.with_uncertainties(&[0.1, 0.2]).is_ok());
    }

    #[test]
    fn test_adjusted_and_reset() {
        let mut p = FeaturePoint::new("P1", Point::new_2d(1.0, 2.0));
        p.set_residuals(DVector::from_vec(vec![0.5, -0.5]));
        assert_eq!(p.adjusted().as_slice(), &[1.5, 1.5]);
        p.reset();
        assert_eq!(p.adjusted().as_slice(), &[1.0, 2.0]);
    }

    #[test]
    fn test_point_test_statistic() {
        let mut t = PointTestStatistic::default();
        t.set_numerator(8.0, 1);
        t.evaluate(1.0, 20.0, 10.0, true, 3.0, 5.0);
        assert_abs_diff_eq!(t.apriori.value, 8.0);
        assert!(t.apriori.significant);
        // (20 - 8) / (10 - 1) = 4/3
        assert_abs_diff_eq!(t.aposteriori.value, 6.0, epsilon = 1e-12);
        assert!(t.aposteriori.significant);
        assert!(t.apriori.log_p_value < 0.0);

        t.evaluate(1.0, 20.0, 10.0, false, 10.0, 5.0);
        assert!(!t.apriori.significant);
        assert_eq!(t.aposteriori.value, 0.0);
        assert!(!t.is_significant());
    }
}
