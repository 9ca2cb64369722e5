//! Spherical simplex unscented transformation.
//!
//! Instead of linearizing the estimator, the dispersion of the `n` observed coordinates is
//! represented by `n + 2` sigma points: `n + 1` points on a scaled spherical simplex and the
//! unperturbed observation. Each sigma point is adjusted on its own; the weighted mean and
//! the weighted scatter of the resulting parameter vectors give the estimate and its
//! covariance.
//!
//! With the scaling `α`, the prior knowledge `β` and the weight `w0` of the zero point:
//!
//! ```text
//! wᵢ = (1 − w0) / (n + 1) / α²                  simplex points
//! w0' = w0 / α² + 1 − 1 / α²                    zero point, mean
//! w0'' = w0' + 1 − α² + β                       zero point, covariance
//! ```

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::adjustment::{AdjustmentError, AdjustmentResult};

/// Parameters of the unscented transformation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnscentedTransformation {
    /// Spread `α ∈ (0, 1]` of the sigma points; 1 leaves them unscaled
    pub alpha: f64,
    /// Prior knowledge of the distribution, 2 is optimal for Gaussian observations
    pub beta: f64,
    /// Weight `w0 ∈ [0, 1)` of the unperturbed sigma point
    pub weight_zero: f64,
}

impl Default for UnscentedTransformation {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 2.0,
            weight_zero: 0.0,
        }
    }
}

impl UnscentedTransformation {
    pub fn new(alpha: f64, beta: f64, weight_zero: f64) -> Self {
        Self {
            alpha,
            beta,
            weight_zero,
        }
    }

    /// # Errors
    /// `InvalidArgument` for `α ∉ (0, 1]`, `w0 ∉ [0, 1)` or a non-finite `β`.
    pub fn validate(&self) -> AdjustmentResult<()> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(AdjustmentError::InvalidArgument(format!(
                "unscented transformation scaling must be in (0, 1], got {}",
                self.alpha
            ))
            .log());
        }
        if !(0.0..1.0).contains(&self.weight_zero) {
            return Err(AdjustmentError::InvalidArgument(format!(
                "unscented transformation weight of the zero point must be in [0, 1), got {}",
                self.weight_zero
            ))
            .log());
        }
        if !self.beta.is_finite() {
            return Err(AdjustmentError::InvalidArgument(format!(
                "unscented transformation damping must be finite, got {}",
                self.beta
            ))
            .log());
        }
        Ok(())
    }
}

/// Sigma points and weights for `n` observations.
#[derive(Debug, Clone)]
pub struct SphericalSimplex {
    number_of_observations: usize,
    /// Scaled weight of every simplex point
    weight: f64,
    /// Scaled mean weight of the zero point
    weight_zero: f64,
    /// Covariance weight of the zero point
    weight_zero_covariance: f64,
}

impl SphericalSimplex {
    pub fn new(transformation: &UnscentedTransformation, number_of_observations: usize) -> Self {
        let alpha2 = transformation.alpha * transformation.alpha;
        let weight =
            (1.0 - transformation.weight_zero) / (number_of_observations as f64 + 1.0) / alpha2;
        let weight_zero = transformation.weight_zero / alpha2 + (1.0 - 1.0 / alpha2);
        debug!(
            "Spherical simplex for {} observations: wᵢ = {:.6e}, w0 = {:.6e}",
            number_of_observations, weight, weight_zero
        );
        Self {
            number_of_observations,
            weight,
            weight_zero,
            weight_zero_covariance: weight_zero + 1.0 - alpha2 + transformation.beta,
        }
    }

    /// `n + 2`; the last one is the unperturbed observation.
    pub fn number_of_sigma_points(&self) -> usize {
        self.number_of_observations + 2
    }

    pub fn mean_weight(&self, step: usize) -> f64 {
        if step + 1 == self.number_of_sigma_points() {
            self.weight_zero
        } else {
            self.weight
        }
    }

    pub fn covariance_weight(&self, step: usize) -> f64 {
        if step + 1 == self.number_of_sigma_points() {
            self.weight_zero_covariance
        } else {
            self.weight
        }
    }

    /// Standardized offset of every observation for sigma point `step`.
    ///
    /// Row `r` is `(r + 1)/√((r + 1)(r + 2)·wᵢ)` for `r = step − 1`, `−1/√((r + 1)(r + 2)·wᵢ)`
    /// for `r ≥ step` and zero otherwise.
    pub fn sigma_point(&self, step: usize) -> DVector<f64> {
        DVector::from_fn(self.number_of_observations, |row, _| {
            let scale = ((row as f64 + 1.0) * (row as f64 + 2.0) * self.weight).sqrt();
            if row + 1 == step {
                (row as f64 + 1.0) / scale
            } else if row >= step {
                -1.0 / scale
            } else {
                0.0
            }
        })
    }

    /// Weighted mean of one sample per sigma point.
    pub fn mean(&self, samples: &[DVector<f64>]) -> DVector<f64> {
        let size = samples.first().map_or(0, |s| s.len());
        samples
            .iter()
            .enumerate()
            .fold(DVector::zeros(size), |acc, (step, sample)| {
                acc + sample * self.mean_weight(step)
            })
    }

    /// Weighted scatter of the samples about `mean`.
    pub fn covariance(&self, samples: &[DVector<f64>], mean: &DVector<f64>) -> DMatrix<f64> {
        let size = mean.len();
        let mut covariance = DMatrix::zeros(size, size);
        for (step, sample) in samples.iter().enumerate() {
            let deviation = sample - mean;
            covariance.ger(self.covariance_weight(step), &deviation, &deviation, 1.0);
        }
        covariance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_weights_sum_to_one() {
        for transformation in [
            UnscentedTransformation::default(),
            UnscentedTransformation::new(0.5, 2.0, 0.2),
        ] {
            let simplex = SphericalSimplex::new(&transformation, 7);
            assert_eq!(simplex.number_of_sigma_points(), 9);
            let total: f64 = (0..9).map(|s| simplex.mean_weight(s)).sum();
            assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_simplex_has_zero_mean_and_unit_scatter() {
        let simplex = SphericalSimplex::new(&UnscentedTransformation::new(0.7, 2.0, 0.1), 5);
        let samples: Vec<DVector<f64>> =
            (0..simplex.number_of_sigma_points()).map(|s| simplex.sigma_point(s)).collect();
        assert_eq!(samples[6], DVector::zeros(5));

        let mean = simplex.mean(&samples);
        assert_abs_diff_eq!(mean.amax(), 0.0, epsilon = 1e-12);

        // the zero point has no deviation, so its covariance weight does not matter
        let covariance = simplex.covariance(&samples, &mean);
        assert_abs_diff_eq!(
            (covariance - DMatrix::<f64>::identity(5, 5)).amax(),
            0.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_linear_function_is_propagated_exactly() {
        // y = A·x + b with x ~ N(0, I) gives mean b and covariance A·Aᵀ
        let a = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 0.0, -1.0, 0.5, 3.0]);
        let b = DVector::from_vec(vec![4.0, -2.0]);
        let simplex = SphericalSimplex::new(&UnscentedTransformation::default(), 3);
        let samples: Vec<DVector<f64>> = (0..simplex.number_of_sigma_points())
            .map(|s| &a * simplex.sigma_point(s) + &b)
            .collect();
        let mean = simplex.mean(&samples);
        assert_abs_diff_eq!((&mean - &b).amax(), 0.0, epsilon = 1e-12);
        let covariance = simplex.covariance(&samples, &mean);
        assert_abs_diff_eq!((covariance - &a * a.transpose()).amax(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_validation() {
        assert!(UnscentedTransformation::default().validate().is_ok());
        assert!(UnscentedTransformation::new(0.0, 2.0, 0.0).validate().is_err());
        assert!(UnscentedTransformation::new(1.5, 2.0, 0.0).validate().is_err());
        assert!(UnscentedTransformation::new(1.0, 2.0, 1.0).validate().is_err());
        assert!(UnscentedTransformation::new(1.0, f64::NAN, 0.0).validate().is_err());
    }
}
