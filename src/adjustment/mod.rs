//! Constrained Gauss-Helmert adjustment of features.
//!
//! Every point `p` with a-priori dispersion `D` contributes `nog` condition equations
//! `f(x, p + v) = 0`, one per primitive of the feature. Linearized at the current estimate
//! they read
//!
//! ```text
//! Jx·dx + Jv·v + w = 0,        w = f(x, p̂) − Jv·v̂
//! ```
//!
//! and lead, after eliminating the residuals, to the bordered normal equations
//!
//! ```text
//! | Σ JxᵀWJx   Rᵀ | |dx|   | −Σ JxᵀWw |
//! |    R       0  | | k| = |    −r    |         W = (Jv·Qll·Jvᵀ)⁻¹
//! ```
//!
//! where `R` and `r` are the linearized restrictions. The iteration is driven by
//! [`FeatureAdjustment`]; all expected numerical outcomes end in an
//! [`EstimationStateType`] rather than an error.
//!
//! # Modules
//!
//! - [`config`]: estimator settings ([`AdjustmentConfig`])
//! - [`normal_equation`]: per-point linearization and normal-equation assembly
//! - [`variance`]: variance component of unit weight and the global test
//! - [`controller`]: the iteration state machine and the stochastic model
//! - [`unscented`]: sigma points of the spherical simplex unscented transformation

pub mod config;
pub mod controller;
pub mod normal_equation;
pub mod unscented;
pub mod variance;

pub use config::AdjustmentConfig;
pub use controller::{AdjustmentSummary, FeatureAdjustment, IterationStats};
pub use normal_equation::NormalEquationSystem;
pub use unscented::{SphericalSimplex, UnscentedTransformation};
pub use variance::VarianceComponent;

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::error;

use crate::core::CoreError;
use crate::feature::FeatureError;
use crate::initial_guess::InitialGuessError;
use crate::linalg::LinAlgError;
use crate::primitive::PrimitiveError;
use crate::statistic::StatisticError;

/// State of the estimator.
///
/// The regular path is `NotInitialised → Busy → Iterate ⇄ Convergence →
/// InvertNormalEquationMatrix → EstimateStochasticParameters → ErrorFreeEstimation`;
/// all other terminal states report an expected numerical outcome. The unscented
/// transformation passes `UnscentedTransformationStep` before adjusting each sigma point.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EstimationStateType {
    #[default]
    NotInitialised,
    Busy,
    UnscentedTransformationStep,
    Iterate,
    Convergence,
    InvertNormalEquationMatrix,
    EstimateStochasticParameters,
    ErrorFreeEstimation,
    SingularMatrix,
    RobustEstimationFailed,
    NoConvergence,
    OutOfMemory,
    Interrupt,
}

impl EstimationStateType {
    /// Whether the estimator stopped in this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EstimationStateType::ErrorFreeEstimation
                | EstimationStateType::SingularMatrix
                | EstimationStateType::RobustEstimationFailed
                | EstimationStateType::NoConvergence
                | EstimationStateType::OutOfMemory
                | EstimationStateType::Interrupt
        )
    }

    pub fn is_success(&self) -> bool {
        *self == EstimationStateType::ErrorFreeEstimation
    }
}

impl Display for EstimationStateType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            EstimationStateType::NotInitialised => "NOT_INITIALISED",
            EstimationStateType::Busy => "BUSY",
            EstimationStateType::UnscentedTransformationStep => "UNSCENTED_TRANSFORMATION_STEP",
            EstimationStateType::Iterate => "ITERATE",
            EstimationStateType::Convergence => "CONVERGENCE",
            EstimationStateType::InvertNormalEquationMatrix => "INVERT_NORMAL_EQUATION_MATRIX",
            EstimationStateType::EstimateStochasticParameters => "ESTIMATE_STOCHASTIC_PARAMETERS",
            EstimationStateType::ErrorFreeEstimation => "ERROR_FREE_ESTIMATION",
            EstimationStateType::SingularMatrix => "SINGULAR_MATRIX",
            EstimationStateType::RobustEstimationFailed => "ROBUST_ESTIMATION_FAILED",
            EstimationStateType::NoConvergence => "NO_CONVERGENCE",
            EstimationStateType::OutOfMemory => "OUT_OF_MEMORY",
            EstimationStateType::Interrupt => "INTERRUPT",
        };
        write!(f, "{}", name)
    }
}

/// Norm minimized by the adjustment.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EstimationType {
    /// Weighted least squares
    #[default]
    L2Norm,
    /// Iteratively reweighted least squares down-weighting outlying points
    L1Norm,
    /// Least squares per sigma point, covariance from the scatter of the solutions
    SphericalSimplexUnscentedTransformation,
}

impl Display for EstimationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EstimationType::L2Norm => write!(f, "L2 norm"),
            EstimationType::L1Norm => write!(f, "L1 norm (robust)"),
            EstimationType::SphericalSimplexUnscentedTransformation => {
                write!(f, "Spherical simplex unscented transformation")
            }
        }
    }
}

/// Adjustment-specific error types
///
/// Only malformed input ends up here; non-convergence, singular systems and interrupts are
/// reported as [`EstimationStateType`].
#[derive(Debug, Clone, Error)]
pub enum AdjustmentError {
    /// The feature has no enabled points
    #[error("No enabled points in feature: {0}")]
    EmptyFeature(String),

    /// Estimation result requested before a successful estimation
    #[error("Estimation not available: {0}")]
    NotEstimated(String),

    /// Estimator settings out of their admissible range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    InitialGuess(#[from] InitialGuessError),

    #[error(transparent)]
    Primitive(#[from] PrimitiveError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Statistic(#[from] StatisticError),

    #[error(transparent)]
    LinAlg(#[from] LinAlgError),
}

impl AdjustmentError {
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

/// Result type for adjustment operations
pub type AdjustmentResult<T> = Result<T, AdjustmentError>;

/// Cooperative cancellation flag shared between the caller and a running adjustment.
///
/// The estimator checks the flag between iterations and between points.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be reused for the next run.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_terminal_states() {
        assert!(EstimationStateType::ErrorFreeEstimation.is_terminal());
        assert!(EstimationStateType::Interrupt.is_terminal());
        assert!(!EstimationStateType::Iterate.is_terminal());
        assert!(!EstimationStateType::UnscentedTransformationStep.is_terminal());
        assert!(!EstimationStateType::NoConvergence.is_success());
        assert_eq!(EstimationStateType::default(), EstimationStateType::NotInitialised);
        assert_eq!(
            EstimationStateType::RobustEstimationFailed.to_string(),
            "ROBUST_ESTIMATION_FAILED"
        );
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let remote = token.clone();
        let handle = thread::spawn(move || remote.cancel());
        assert!(handle.join().is_ok());
        assert!(token.is_cancelled());
        token.reset();
        assert!(!token.is_cancelled());
    }
}
