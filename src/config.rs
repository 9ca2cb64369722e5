//! Default values of the estimator.
//!
//! [`DefaultValues`] collects every constant the adjustment falls back to. A deployment can
//! override them from a properties resource with [`DefaultValues::merge_properties`]:
//!
//! ```text
//! # leastsquares.default
//! MAXIMUM_ITERATIONS      = 250
//! ROBUST_ESTIMATION_LIMIT = 3.0
//! ESTIMATION_TYPE         = L1NORM
//! UNSCENTED_TRANSFORMATION_SCALING = 0.5
//! TEST_STATISTIC_TYPE     = SIDAK
//! ```
//!
//! Values outside their admissible range are ignored and the built-in constant is kept.

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::adjustment::{EstimationType, UnscentedTransformation};
use crate::statistic::{TestStatisticDefinition, TestStatisticType};

/// Configuration module error types
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// A line is neither a comment nor `KEY = VALUE`
    #[error("Malformed line {line}: '{content}'")]
    MalformedLine { line: usize, content: String },

    /// A known key carries a value that cannot be parsed
    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
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

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Defaults of the adjustment and of the hypothesis tests.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultValues {
    pub maximum_iterations: usize,
    /// Normalized residual above which a point is down-weighted in robust estimation
    pub robust_estimation_limit: f64,
    pub estimation_type: EstimationType,
    /// Scale the cofactors with the a-posteriori variance of unit weight
    pub apply_variance_of_unit_weight: bool,
    /// Confidence level of confidence regions, in (0, 1)
    pub confidence_level: f64,
    /// Probability value α in percent
    pub probability_value: f64,
    /// Power of test β in percent
    pub power_of_test: f64,
    pub test_statistic_type: TestStatisticType,
    pub familywise_error_rate: bool,
    /// Initial Levenberg-Marquardt damping, 0 disables damping
    pub levenberg_marquardt_damping: f64,
    pub preconditioning: bool,
    /// Spread α of the sigma points, in (0, 1]
    pub unscented_transformation_scaling: f64,
    /// Prior knowledge β of the observation distribution
    pub unscented_transformation_damping: f64,
    /// Weight w0 of the unperturbed sigma point, in [0, 1)
    pub unscented_transformation_weight_zero: f64,
}

impl Default for DefaultValues {
    fn default() -> Self {
        let probability_value = 0.1;
        Self {
            maximum_iterations: 5000,
            robust_estimation_limit: 3.5,
            estimation_type: EstimationType::L2Norm,
            apply_variance_of_unit_weight: true,
            confidence_level: 1.0 - probability_value / 100.0,
            probability_value,
            power_of_test: 80.0,
            test_statistic_type: TestStatisticType::BaardaMethod,
            familywise_error_rate: false,
            levenberg_marquardt_damping: 0.0,
            preconditioning: true,
            unscented_transformation_scaling: 1.0,
            unscented_transformation_damping: 2.0,
            unscented_transformation_weight_zero: 0.0,
        }
    }
}

impl DefaultValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test strategy described by these defaults.
    pub fn test_statistic_definition(&self) -> TestStatisticDefinition {
        TestStatisticDefinition::new(
            self.test_statistic_type,
            self.probability_value,
            self.power_of_test,
            self.familywise_error_rate,
        )
    }

    pub fn unscented_transformation(&self) -> UnscentedTransformation {
        UnscentedTransformation::new(
            self.unscented_transformation_scaling,
            self.unscented_transformation_damping,
            self.unscented_transformation_weight_zero,
        )
    }

    /// Defaults overridden by the properties in `content`.
    ///
    /// # Errors
    /// `MalformedLine` for lines without `=`, `InvalidValue` when a known key has an
    /// unparsable value. Unknown keys are reported with `warn!` and skipped.
    pub fn merge_properties(mut self, content: &str) -> ConfigResult<Self> {
        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some((key, value)) = line.split_once('=').or_else(|| line.split_once(':')) else {
                return Err(ConfigError::MalformedLine {
                    line: index + 1,
                    content: raw.to_string(),
                }
                .log());
            };
            self.apply(key.trim(), value.trim())?;
        }
        Ok(self)
    }

    fn apply(&mut self, key: &str, value: &str) -> ConfigResult<()> {
        match key.to_ascii_uppercase().as_str() {
            "MAXIMUM_ITERATIONS" => {
                let iterations: i64 = parse(key, value)?;
                if iterations >= 0 {
                    self.maximum_iterations = iterations as usize;
                } else {
                    ignored(key, value);
                }
            }
            "ROBUST_ESTIMATION_LIMIT" => {
                let limit: f64 = parse(key, value)?;
                if limit > 0.0 {
                    self.robust_estimation_limit = limit;
                } else {
                    ignored(key, value);
                }
            }
            "ESTIMATION_TYPE" => {
                self.estimation_type = match value.to_ascii_uppercase().as_str() {
                    "L1NORM" | "L1_NORM" => EstimationType::L1Norm,
                    "L2NORM" | "L2_NORM" => EstimationType::L2Norm,
                    "SPHERICAL_SIMPLEX_UNSCENTED_TRANSFORMATION" | "SUT" => {
                        EstimationType::SphericalSimplexUnscentedTransformation
                    }
                    _ => {
                        return Err(invalid(
                            key,
                            value,
                            "expected L1NORM, L2NORM or SPHERICAL_SIMPLEX_UNSCENTED_TRANSFORMATION",
                        ));
                    }
                };
            }
            "APPLY_VARIANCE_OF_UNIT_WEIGHT" => {
                // anything but FALSE keeps the variance of unit weight applied
                self.apply_variance_of_unit_weight = !value.eq_ignore_ascii_case("false");
            }
            "CONFIDENCE_LEVEL" => {
                let level: f64 = parse(key, value)?;
                if level > 0.0 && level < 1.0 {
                    self.confidence_level = level;
                } else {
                    ignored(key, value);
                }
            }
            "PROBABILITY_VALUE" => {
                let alpha: f64 = parse(key, value)?;
                if alpha > 0.0 && alpha < 100.0 {
                    self.probability_value = alpha;
                } else {
                    ignored(key, value);
                }
            }
            "POWER_OF_TEST" => {
                let beta: f64 = parse(key, value)?;
                if beta > 0.0 && beta < 100.0 {
                    self.power_of_test = beta;
                } else {
                    ignored(key, value);
                }
            }
            "TEST_STATISTIC_TYPE" => {
                self.test_statistic_type = match value.to_ascii_uppercase().as_str() {
                    "BAARDA_METHOD" | "BAARDA" => TestStatisticType::BaardaMethod,
                    "SIDAK" | "SIDAK_CORRECTION" => TestStatisticType::Sidak,
                    "NONE" => TestStatisticType::None,
                    _ => return Err(invalid(key, value, "expected BAARDA_METHOD, SIDAK or NONE")),
                };
            }
            "FAMILYWISE_ERROR_RATE" => {
                self.familywise_error_rate = parse_bool(key, value)?;
            }
            "LEVENBERG_MARQUARDT_DAMPING" => {
                let lambda: f64 = parse(key, value)?;
                if lambda >= 0.0 {
                    self.levenberg_marquardt_damping = lambda;
                } else {
                    ignored(key, value);
                }
            }
            "PRECONDITIONING" => {
                self.preconditioning = parse_bool(key, value)?;
            }
            "UNSCENTED_TRANSFORMATION_SCALING" => {
                let alpha: f64 = parse(key, value)?;
                if alpha > 0.0 && alpha <= 1.0 {
                    self.unscented_transformation_scaling = alpha;
                } else {
                    ignored(key, value);
                }
            }
            "UNSCENTED_TRANSFORMATION_DAMPING" => {
                self.unscented_transformation_damping = parse(key, value)?;
            }
            "UNSCENTED_TRANSFORMATION_WEIGHT_ZERO" => {
                let weight: f64 = parse(key, value)?;
                if (0.0..1.0).contains(&weight) {
                    self.unscented_transformation_weight_zero = weight;
                } else {
                    ignored(key, value);
                }
            }
            _ => {
                warn!("Unknown default value key '{}' ignored", key);
            }
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> ConfigResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| invalid(key, value, &e.to_string()))
}

fn parse_bool(key: &str, value: &str) -> ConfigResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(invalid(key, value, "expected TRUE or FALSE")),
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .log()
}

fn ignored(key: &str, value: &str) {
    debug!("Out of range value '{}' for {} ignored, keeping default", value, key);
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_defaults() {
        let defaults = DefaultValues::default();
        assert_eq!(defaults.maximum_iterations, 5000);
        assert_eq!(defaults.robust_estimation_limit, 3.5);
        assert_eq!(defaults.estimation_type, EstimationType::L2Norm);
        assert!(defaults.apply_variance_of_unit_weight);
        assert!((defaults.confidence_level - 0.999).abs() < 1e-12);
    }

    #[test]
    fn test_merge_overrides_known_keys() -> TestResult {
        let content = "\
# comment
MAXIMUM_ITERATIONS = 250
robust_estimation_limit = 2.5
ESTIMATION_TYPE = L1NORM
TEST_STATISTIC_TYPE = SIDAK
APPLY_VARIANCE_OF_UNIT_WEIGHT = FALSE
UNKNOWN_KEY = 1
";
        let defaults = DefaultValues::default().merge_properties(content)?;
        assert_eq!(defaults.maximum_iterations, 250);
        assert_eq!(defaults.robust_estimation_limit, 2.5);
        assert_eq!(defaults.estimation_type, EstimationType::L1Norm);
        assert_eq!(defaults.test_statistic_type, TestStatisticType::Sidak);
        assert!(!defaults.apply_variance_of_unit_weight);
        Ok(())
    }

    #[test]
    fn test_unscented_transformation_keys() -> TestResult {
        let content = "\
ESTIMATION_TYPE = SPHERICAL_SIMPLEX_UNSCENTED_TRANSFORMATION
UNSCENTED_TRANSFORMATION_SCALING = 0.5
UNSCENTED_TRANSFORMATION_DAMPING = 0
UNSCENTED_TRANSFORMATION_WEIGHT_ZERO = 0.25
";
        let defaults = DefaultValues::default().merge_properties(content)?;
        assert_eq!(
            defaults.estimation_type,
            EstimationType::SphericalSimplexUnscentedTransformation
        );
        assert_eq!(
            defaults.unscented_transformation(),
            UnscentedTransformation::new(0.5, 0.0, 0.25)
        );
        Ok(())
    }

    #[test]
    fn test_out_of_range_values_keep_defaults() -> TestResult {
        let content = "PROBABILITY_VALUE = 150\nPOWER_OF_TEST = 0\nCONFIDENCE_LEVEL = 1.5\nMAXIMUM_ITERATIONS = -3\nUNSCENTED_TRANSFORMATION_WEIGHT_ZERO = 1.0";
        let defaults = DefaultValues::default().merge_properties(content)?;
        assert_eq!(defaults, DefaultValues::default());
        Ok(())
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(
            DefaultValues::default().merge_properties("MAXIMUM_ITERATIONS"),
            Err(ConfigError::MalformedLine { line: 1, .. })
        ));
        assert!(matches!(
            DefaultValues::default().merge_properties("ROBUST_ESTIMATION_LIMIT = abc"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
