//! Confidence ellipses and ellipsoids of estimated parameters.
//!
//! A [`ConfidenceRegion`] is built from a (sub)matrix of the parameter covariance, e.g. the
//! 2×2 block of a circle center. Its principal axes follow from the singular value
//! decomposition `Σ = U·diag(λ)·Uᵀ`: axis `i` is `sqrt(λᵢ·d·q(d))` with the test-statistic
//! quantile `q(d)` of dimension `d` (1 if no registry is attached), and the orientation is
//! reported as Euler angles of the sequence `R = Rx·Ry·Rz`.
//!
//! For two dimensions the simple ellipse after Helmert is also available in closed form:
//!
//! ```text
//! w = sqrt((qxx − qyy)² + 4·qxy²)
//! a = sqrt((qxx + qyy + w)/2),  b = sqrt((qxx + qyy − w)/2),  φ = atan2(2·qxy, qxx − qyy)/2
//! ```
//!
//! # Example
//!
//! ```
//! use geofit::confidence::ConfidenceRegion;
//! use nalgebra::DMatrix;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let covariance = DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, 1.0]);
//! let region = ConfidenceRegion::new(&covariance)?;
//! assert_eq!(region.helmert_axes(), [2.0, 1.0]);
//! assert_eq!(region.confidence_angle_2d(), 0.0);
//! # Ok(())
//! # }
//! ```

use nalgebra::{DMatrix, DVector};
use std::cmp::Ordering;
use std::f64::consts::PI;
use thiserror::Error;
use tracing::error;

use crate::linalg::{EPS, LinAlgError, LinearAlgebra, LinearAlgebraType, create_backend, modulo};
use crate::statistic::{StatisticError, TestStatisticParameters};

/// Confidence-region error types
#[derive(Debug, Clone, Error)]
pub enum ConfidenceError {
    /// Covariance matrix not usable (shape, dimension or non-finite entries)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    LinAlg(#[from] LinAlgError),

    #[error(transparent)]
    Statistic(#[from] StatisticError),
}

impl ConfidenceError {
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

/// Result type for confidence-region operations
pub type ConfidenceResult<T> = Result<T, ConfidenceError>;

/// Eigen-analysis of a 1-, 2- or 3-dimensional covariance matrix.
#[derive(Debug, Clone)]
pub struct ConfidenceRegion {
    covariance: DMatrix<f64>,
    /// Eigenvalues, descending
    eigenvalues: DVector<f64>,
    /// Eigenvectors as columns, in eigenvalue order
    eigenvectors: DMatrix<f64>,
    minimal_detectable_bias: DVector<f64>,
    helmert_axes: [f64; 2],
    helmert_angle: f64,
    quantile: f64,
}

impl ConfidenceRegion {
    /// Analyse `covariance` with the default backend and quantile 1.
    ///
    /// # Errors
    /// `InvalidArgument` if the matrix is not square, not of dimension 1 to 3 or contains
    /// NaN/Inf; `LinAlg` if the decomposition fails.
    pub fn new(covariance: &DMatrix<f64>) -> ConfidenceResult<Self> {
        let backend = create_backend(LinearAlgebraType::default());
        Self::with_backend(covariance, backend.as_ref())
    }

    pub fn with_backend(
        covariance: &DMatrix<f64>,
        backend: &dyn LinearAlgebra,
    ) -> ConfidenceResult<Self> {
        let dimension = covariance.nrows();
        if covariance.ncols() != dimension {
            return Err(ConfidenceError::InvalidArgument(format!(
                "covariance matrix must be square, got {}x{}",
                dimension,
                covariance.ncols()
            ))
            .log());
        }
        if !(1..=3).contains(&dimension) {
            return Err(ConfidenceError::InvalidArgument(format!(
                "confidence regions are limited to 1 to 3 dimensions, got {dimension}"
            ))
            .log());
        }
        if let Some((index, value)) = covariance.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(ConfidenceError::InvalidArgument(format!(
                "covariance matrix contains {} at {}x{}",
                value,
                index % dimension,
                index / dimension
            ))
            .log());
        }

        let svd = backend.svd(covariance)?;
        let order = sort_order(&svd.singular_values);
        let eigenvalues = DVector::from_iterator(dimension, order.iter().map(|&i| svd.singular_values[i]));
        let mut eigenvectors = DMatrix::<f64>::zeros(dimension, dimension);
        for (target, &source) in order.iter().enumerate() {
            eigenvectors.set_column(target, &svd.u.column(source));
        }

        let minimal_detectable_bias = eigenvectors.column(0) * eigenvalues[0].abs().sqrt();
        let (helmert_axes, helmert_angle) = helmert_ellipse(covariance);

        Ok(Self {
            covariance: covariance.clone(),
            eigenvalues,
            eigenvectors,
            minimal_detectable_bias,
            helmert_axes,
            helmert_angle,
            quantile: 1.0,
        })
    }

    /// Scale the axes with the quantile `q(d, ∞)` of `registry`.
    pub fn with_test_statistic(mut self, registry: &TestStatisticParameters) -> ConfidenceResult<Self> {
        self.quantile = registry
            .parameter_set(self.dimension() as f64, f64::INFINITY)?
            .quantile;
        Ok(self)
    }

    pub fn dimension(&self) -> usize {
        self.eigenvalues.len()
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    /// Quantile the confidence axes are scaled with.
    pub fn quantile(&self) -> f64 {
        self.quantile
    }

    /// `i`-th largest eigenvalue.
    pub fn eigenvalue(&self, index: usize) -> f64 {
        self.eigenvalues[index]
    }

    /// Unit eigenvector of the `i`-th largest eigenvalue.
    pub fn eigenvector(&self, index: usize) -> DVector<f64> {
        self.eigenvectors.column(index).into_owned()
    }

    /// Semi-axis `i` of the confidence ellipse/ellipsoid.
    pub fn confidence_axis(&self, index: usize) -> f64 {
        (self.eigenvalue(index) * self.dimension() as f64 * self.quantile).sqrt()
    }

    pub fn confidence_axes(&self) -> Vec<f64> {
        (0..self.dimension()).map(|i| self.confidence_axis(i)).collect()
    }

    /// Rotation angles `[rx, ry, rz]` in `[0, 2π)` of the sequence `R = Rx·Ry·Rz` whose
    /// columns are the sorted eigenvectors; a left-handed eigenvector frame is flipped.
    pub fn euler_angles(&self) -> [f64; 3] {
        let dimension = self.dimension();
        if dimension == 1 {
            return [0.0; 3];
        }
        let r = &self.eigenvectors;
        let (mut r11, r12) = (r[(0, 0)], r[(0, 1)]);
        let (r21, r22) = (r[(1, 0)], r[(1, 1)]);

        // only r11 of the flipped first column enters the angles
        if dimension == 2 {
            if r11 * r22 - r12 * r21 < 0.0 {
                r11 = -r11;
            }
            return [0.0, 0.0, modulo((-r12).atan2(r11), 2.0 * PI)];
        }

        let (r13, r23) = (r[(0, 2)], r[(1, 2)]);
        let (r31, r32, r33) = (r[(2, 0)], r[(2, 1)], r[(2, 2)]);
        let det = r11 * r22 * r33 + r12 * r23 * r31 + r13 * r21 * r32
            - r13 * r22 * r31
            - r12 * r21 * r33
            - r11 * r23 * r32;
        if det < 0.0 {
            r11 = -r11;
        }
        [
            modulo((-r23).atan2(r33), 2.0 * PI),
            modulo(r13.atan2(r23.hypot(r33)), 2.0 * PI),
            modulo((-r12).atan2(r11), 2.0 * PI),
        ]
    }

    /// `sqrt(λmax)·u_max`: the largest displacement inside the unit region.
    pub fn minimal_detectable_bias(&self) -> &DVector<f64> {
        &self.minimal_detectable_bias
    }

    /// Semi-axes `[a, b]` of the simple ellipse after Helmert (`[σ, 0]` in 1-D).
    pub fn helmert_axes(&self) -> [f64; 2] {
        self.helmert_axes
    }

    /// Semi-axis `i` of the 2-D ellipse, scaled to the confidence level unless `helmert`.
    pub fn confidence_axis_2d(&self, index: usize, helmert: bool) -> f64 {
        let scale = if helmert {
            1.0
        } else {
            (self.dimension() as f64 * self.quantile).sqrt()
        };
        self.helmert_axes[index] * scale
    }

    /// Orientation of the Helmert ellipse in `[0, 2π)`.
    pub fn confidence_angle_2d(&self) -> f64 {
        self.helmert_angle
    }
}

/// Indices of `values` ordered descending; values within `eps·max` keep their index order.
fn sort_order(values: &DVector<f64>) -> Vec<usize> {
    let scale = values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let tolerance = EPS * scale.max(1.0);
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&i, &j| {
        let (a, b) = (values[i], values[j]);
        if (a - b).abs() <= tolerance {
            Ordering::Equal
        } else {
            b.total_cmp(&a)
        }
    });
    order
}

fn helmert_ellipse(covariance: &DMatrix<f64>) -> ([f64; 2], f64) {
    if covariance.nrows() == 1 {
        return ([covariance[(0, 0)].abs().sqrt(), 0.0], 0.0);
    }
    let (qxx, qyy, qxy) = (covariance[(0, 0)], covariance[(1, 1)], covariance[(0, 1)]);
    let w = ((qxx - qyy).powi(2) + 4.0 * qxy * qxy).sqrt();
    let a = (0.5 * (qxx + qyy + w)).max(0.0).sqrt();
    let b = (0.5 * (qxx + qyy - w)).max(0.0).sqrt();
    let angle = modulo(0.5 * (2.0 * qxy).atan2(qxx - qyy), 2.0 * PI);
    ([a, b], angle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::{FaerBackend, NalgebraBackend};
    use crate::statistic::{TestStatisticDefinition, TestStatisticType, create_test_statistic};
    use approx::assert_abs_diff_eq;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_diagonal_covariance() -> TestResult {
        let covariance = DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, 1.0]);
        let region = ConfidenceRegion::new(&covariance)?;
        assert_abs_diff_eq!(region.eigenvalue(0), 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(region.eigenvalue(1), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(region.confidence_axis_2d(0, true), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(region.confidence_axis_2d(1, true), 1.0, epsilon = 1e-12);
        assert_eq!(region.confidence_angle_2d(), 0.0);
        // sqrt(λ·d·q) with d = 2, q = 1
        assert_abs_diff_eq!(region.confidence_axis(0), 8.0_f64.sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(region.minimal_detectable_bias().norm(), 2.0, epsilon = 1e-12);
        let angles = region.euler_angles();
        // eigenvector signs are arbitrary, the frame is either unrotated or turned by π
        let rz = angles[2];
        assert!(rz < 1e-12 || (rz - PI).abs() < 1e-12 || (rz - 2.0 * PI).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_rotated_ellipse() -> TestResult {
        // eigenvalues 3 and 1 along the diagonals
        let covariance = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 2.0]);
        let region = ConfidenceRegion::with_backend(&covariance, &NalgebraBackend::new())?;
        assert_abs_diff_eq!(region.eigenvalue(0), 3.0, epsilon = 1e-12);
        let [a, b] = region.helmert_axes();
        assert_abs_diff_eq!(a, 3.0_f64.sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(b, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(region.confidence_angle_2d(), PI / 4.0, epsilon = 1e-12);
        let u = region.eigenvector(0);
        assert_abs_diff_eq!(u[0].abs(), 0.5_f64.sqrt(), epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_axes_sorted_in_3d() -> TestResult {
        let covariance = DMatrix::from_row_slice(
            3,
            3,
            &[1.0, 0.2, 0.0, 0.2, 5.0, 0.1, 0.0, 0.1, 2.0],
        );
        for backend in [
            Box::new(FaerBackend::new()) as Box<dyn LinearAlgebra>,
            Box::new(NalgebraBackend::new()),
        ] {
            let region = ConfidenceRegion::with_backend(&covariance, backend.as_ref())?;
            let axes = region.confidence_axes();
            assert!(axes[0] >= axes[1] && axes[1] >= axes[2] && axes[2] >= 0.0);
            let angles = region.euler_angles();
            assert!(angles.iter().all(|a| (0.0..=2.0 * PI).contains(a)));
        }
        Ok(())
    }

    #[test]
    fn test_equal_eigenvalues_keep_all_vectors() -> TestResult {
        let region = ConfidenceRegion::new(&DMatrix::identity(3, 3))?;
        let mut basis = DMatrix::<f64>::zeros(3, 3);
        for i in 0..3 {
            basis.set_column(i, &region.eigenvector(i));
        }
        assert_abs_diff_eq!(basis.determinant().abs(), 1.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_one_dimensional_region() -> TestResult {
        let region = ConfidenceRegion::new(&DMatrix::from_element(1, 1, 9.0))?;
        assert_eq!(region.euler_angles(), [0.0; 3]);
        assert_abs_diff_eq!(region.helmert_axes()[0], 3.0, epsilon = 1e-12);
        assert_eq!(region.helmert_axes()[1], 0.0);
        Ok(())
    }

    #[test]
    fn test_invalid_covariance() {
        assert!(matches!(
            ConfidenceRegion::new(&DMatrix::zeros(2, 3)),
            Err(ConfidenceError::InvalidArgument(_))
        ));
        assert!(matches!(
            ConfidenceRegion::new(&DMatrix::identity(4, 4)),
            Err(ConfidenceError::InvalidArgument(_))
        ));
        let mut covariance = DMatrix::identity(2, 2);
        covariance[(1, 0)] = f64::NAN;
        assert!(matches!(
            ConfidenceRegion::new(&covariance),
            Err(ConfidenceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_quantile_from_registry() -> TestResult {
        let definition = TestStatisticDefinition::new(TestStatisticType::None, 5.0, 80.0, false);
        let registry = create_test_statistic(&definition, 10, 7, 1)?;
        let covariance = DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, 1.0]);
        let region = ConfidenceRegion::new(&covariance)?.with_test_statistic(&registry)?;
        // χ²(2) at 95 % divided by its dof
        assert_abs_diff_eq!(region.quantile(), 5.991464547107979 / 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(
            region.confidence_axis_2d(0, false),
            2.0 * (2.0 * region.quantile()).sqrt(),
            epsilon = 1e-12
        );
        Ok(())
    }
}
