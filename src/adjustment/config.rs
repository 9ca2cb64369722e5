//! Estimator settings.

use tracing::debug;

use crate::adjustment::{EstimationType, UnscentedTransformation};
use crate::config::DefaultValues;
use crate::linalg::LinearAlgebraType;
use crate::statistic::TestStatisticDefinition;

/// Configuration of a [`crate::adjustment::FeatureAdjustment`].
///
/// # Builder Pattern
///
/// ```
/// use geofit::adjustment::{AdjustmentConfig, EstimationType};
///
/// let config = AdjustmentConfig::new()
///     .with_maximum_iterations(100)
///     .with_damping(1e-3)
///     .with_estimation_type(EstimationType::L1Norm)
///     .with_preconditioning(true);
/// assert_eq!(config.maximum_iterations, 100);
/// ```
///
/// # Damping
///
/// A positive `damping` λ adds `λ·diag(N)` to the parameter block of the normal equations
/// and shortens the step to `min(0.25·λ^−0.05, 0.75)`. λ shrinks by 0.2 after every step that
/// reduces `Ω = Σ veᵀWve` and grows by 5 otherwise (the step is rejected). It is switched off
/// once it drops below `√eps` or the iteration budget runs low, because the convergence test
/// requires an undamped step.
#[derive(Debug, Clone)]
pub struct AdjustmentConfig {
    pub linear_algebra_type: LinearAlgebraType,
    /// Iteration budget; 0 estimates the complete model in a single pass
    pub maximum_iterations: usize,
    pub estimation_type: EstimationType,
    /// Normalized misclosure above which robust estimation down-weights a point
    pub robust_estimation_limit: f64,
    /// Initial Levenberg-Marquardt damping λ, 0 disables damping
    pub damping: f64,
    /// Jacobi preconditioning of the normal equations
    pub preconditioning: bool,
    /// Scale cofactors with the a-posteriori variance of unit weight
    pub apply_aposteriori_variance: bool,
    pub test_statistic: TestStatisticDefinition,
    /// Sigma point parameters, used with [`EstimationType::SphericalSimplexUnscentedTransformation`]
    pub unscented_transformation: UnscentedTransformation,
}

impl Default for AdjustmentConfig {
    fn default() -> Self {
        Self::from_defaults(&DefaultValues::default())
    }
}

impl AdjustmentConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_defaults(defaults: &DefaultValues) -> Self {
        Self {
            linear_algebra_type: LinearAlgebraType::default(),
            maximum_iterations: defaults.maximum_iterations,
            estimation_type: defaults.estimation_type,
            robust_estimation_limit: defaults.robust_estimation_limit,
            damping: defaults.levenberg_marquardt_damping,
            preconditioning: defaults.preconditioning,
            apply_aposteriori_variance: defaults.apply_variance_of_unit_weight,
            test_statistic: defaults.test_statistic_definition(),
            unscented_transformation: defaults.unscented_transformation(),
        }
    }

    pub fn with_linear_algebra_type(mut self, linear_algebra_type: LinearAlgebraType) -> Self {
        self.linear_algebra_type = linear_algebra_type;
        self
    }

    pub fn with_maximum_iterations(mut self, maximum_iterations: usize) -> Self {
        self.maximum_iterations = maximum_iterations;
        self
    }

    pub fn with_estimation_type(mut self, estimation_type: EstimationType) -> Self {
        self.estimation_type = estimation_type;
        self
    }

    pub fn with_robust_estimation_limit(mut self, limit: f64) -> Self {
        self.robust_estimation_limit = limit;
        self
    }

    /// Negative values disable damping.
    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping.max(0.0);
        self
    }

    pub fn with_preconditioning(mut self, preconditioning: bool) -> Self {
        self.preconditioning = preconditioning;
        self
    }

    pub fn with_aposteriori_variance(mut self, apply: bool) -> Self {
        self.apply_aposteriori_variance = apply;
        self
    }

    pub fn with_test_statistic(mut self, definition: TestStatisticDefinition) -> Self {
        self.test_statistic = definition;
        self
    }

    pub fn with_unscented_transformation(mut self, transformation: UnscentedTransformation) -> Self {
        self.unscented_transformation = transformation;
        self
    }

    /// Print configuration parameters (debug level only)
    pub fn print_configuration(&self) {
        debug!(
            "Configuration:\n  Estimator:           Gauss-Helmert adjustment\n  Linear algebra:      {}\n  Estimation type:     {}\n  Max iterations:      {}\n  Robust limit:        {:.2}\n  Damping:             {:.2e}\n  Preconditioning:     {}\n  A-posteriori var.:   {}\n  Test statistic:      {}\n  Probability value:   {:.2} %\n  Power of test:       {:.2} %\n  Family-wise rate:    {}\n  UT α / β / w0:       {} / {} / {}",
            self.linear_algebra_type,
            self.estimation_type,
            self.maximum_iterations,
            self.robust_estimation_limit,
            self.damping,
            if self.preconditioning {
                "enabled"
            } else {
                "disabled"
            },
            if self.apply_aposteriori_variance {
                "applied"
            } else {
                "not applied"
            },
            self.test_statistic.statistic_type,
            self.test_statistic.probability_value,
            self.test_statistic.power_of_test,
            self.test_statistic.familywise_error_rate,
            self.unscented_transformation.alpha,
            self.unscented_transformation.beta,
            self.unscented_transformation.weight_zero
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistic::TestStatisticType;

    #[test]
    fn test_from_defaults() {
        let defaults = DefaultValues {
            maximum_iterations: 42,
            test_statistic_type: TestStatisticType::Sidak,
            ..DefaultValues::default()
        };
        let config = AdjustmentConfig::from_defaults(&defaults);
        assert_eq!(config.maximum_iterations, 42);
        assert_eq!(config.test_statistic.statistic_type, TestStatisticType::Sidak);
        assert_eq!(config.damping, 0.0);
        assert!(config.preconditioning);
        assert_eq!(config.unscented_transformation, UnscentedTransformation::default());
    }

    #[test]
    fn test_builder() {
        let config = AdjustmentConfig::new()
            .with_damping(-1.0)
            .with_linear_algebra_type(LinearAlgebraType::Nalgebra)
            .with_aposteriori_variance(false);
        assert_eq!(config.damping, 0.0);
        assert_eq!(config.linear_algebra_type, LinearAlgebraType::Nalgebra);
        assert!(!config.apply_aposteriori_variance);
    }
}
