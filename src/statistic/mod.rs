//! Hypothesis-test strategies for outlier and variance-component tests
//!
//! A [`TestStatistic`] fills [`TestStatisticParameterSet`]s (quantile, noncentrality parameter,
//! probability value, power of test) for a numerator/denominator dof pair. Three strategies
//! are available:
//!
//! - [`BaardaMethodTestStatistic`]: fixed noncentrality parameter from a reference test
//! - [`SidakTestStatistic`]: Šidák correction of α over a number of independent hypotheses
//! - [`UnadjustedTestStatistic`]: every test uses the configured α and β as they are
//!
//! The [`TestStatisticParameters`] registry memoizes the sets per exact dof pair and can be
//! shared between threads.

pub mod baarda;
pub mod definition;
pub mod distribution;
pub mod parameters;
pub mod sidak;
pub mod unadjusted;

pub use baarda::BaardaMethodTestStatistic;
pub use definition::{TestStatisticDefinition, create_test_statistic};
pub use parameters::{TestStatisticParameterSet, TestStatisticParameters};
pub use sidak::SidakTestStatistic;
pub use unadjusted::UnadjustedTestStatistic;

use std::fmt::{self, Debug, Display, Formatter};
use thiserror::Error;
use tracing::error;

use crate::linalg::{EPS, SQRT_EPS};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestStatisticType {
    #[default]
    BaardaMethod,
    Sidak,
    None,
}

impl Display for TestStatisticType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TestStatisticType::BaardaMethod => write!(f, "Baarda method"),
            TestStatisticType::Sidak => write!(f, "Šidák correction"),
            TestStatisticType::None => write!(f, "Unadjusted"),
        }
    }
}

/// Statistic module error types
#[derive(Debug, Clone, Error)]
pub enum StatisticError {
    /// Probability outside (0, 100) or invalid degrees of freedom
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The parameter registry lock was poisoned by a panicking thread
    #[error("Lock poisoned in {context}: {reason}")]
    LockPoisoned { context: String, reason: String },
}

impl StatisticError {
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

/// Result type for statistic operations
pub type StatisticResult<T> = Result<T, StatisticError>;

/// Strategy deriving test decisions for a batch of dof pairs.
pub trait TestStatistic: Send + Sync + Debug {
    fn statistic_type(&self) -> TestStatisticType;

    /// Configured probability value α in percent.
    fn probability_value(&self) -> f64;

    /// Configured power of test β in percent.
    fn power_of_test(&self) -> f64;

    /// Fill quantile, noncentrality parameter, α, β and log(p) of every set.
    fn adjust(&self, sets: &mut [TestStatisticParameterSet]);

    fn adjust_single(&self, mut set: TestStatisticParameterSet) -> TestStatisticParameterSet {
        self.adjust(std::slice::from_mut(&mut set));
        set
    }
}

/// Keep a back-computed α strictly inside (0, 100).
pub(crate) fn clamp_probability(alpha: f64) -> f64 {
    if alpha <= 0.0 {
        EPS
    } else if alpha >= 100.0 {
        100.0 - SQRT_EPS
    } else {
        alpha
    }
}

pub(crate) fn validate_probability(value: f64, name: &str) -> StatisticResult<f64> {
    if value > 0.0 && value < 100.0 {
        Ok(value)
    } else {
        Err(StatisticError::InvalidArgument(format!(
            "{name} must lie in (0, 100) percent, got {value}"
        ))
        .log())
    }
}
