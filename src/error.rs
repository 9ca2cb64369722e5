//! Error types for the geofit library
//!
//! Every module owns its error enum (`LinAlgError`, `CoreError`, `AdjustmentError`, ...).
//! [`GeoFitError`] wraps them for callers that handle all failures in one place, e.g. the
//! `fit_feature` binary, while keeping the source chain intact:
//!
//! ```text
//! GeoFitError::Adjustment(
//!     AdjustmentError::InitialGuess(
//!         InitialGuessError::InsufficientPoints { .. }
//!     )
//! )
//! ```
//!
//! Note that an adjustment which fails numerically (singular normal equations,
//! no convergence) is not an error: it is reported by its
//! [`crate::adjustment::EstimationStateType`].

use std::error::Error as StdError;
use thiserror::Error;

use crate::adjustment::AdjustmentError;
use crate::config::ConfigError;
use crate::confidence::ConfidenceError;
use crate::core::CoreError;
use crate::feature::FeatureError;
use crate::initial_guess::InitialGuessError;
use crate::linalg::LinAlgError;
use crate::observers::ObserverError;
use crate::primitive::PrimitiveError;
use crate::restriction::RestrictionError;
use crate::statistic::StatisticError;

/// Main result type used throughout the geofit library
pub type GeoFitResult<T> = Result<T, GeoFitError>;

/// Top-level error type of the geofit library
///
/// # Error Chain Access
///
/// ```rust,ignore
/// if let Err(e) = run() {
///     warn!("Full chain: {}", e.chain());
/// }
/// ```
#[derive(Debug, Error)]
pub enum GeoFitError {
    /// Points, parameters and dispersions
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    LinearAlgebra(#[from] LinAlgError),

    #[error(transparent)]
    Restriction(#[from] RestrictionError),

    #[error(transparent)]
    Primitive(#[from] PrimitiveError),

    #[error(transparent)]
    InitialGuess(#[from] InitialGuessError),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    Adjustment(#[from] AdjustmentError),

    #[error(transparent)]
    Statistic(#[from] StatisticError),

    #[error(transparent)]
    Confidence(#[from] ConfidenceError),

    #[error(transparent)]
    Observer(#[from] ObserverError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl GeoFitError {
    /// Get the full error chain as a string for logging and debugging.
    ///
    /// Each nested source is printed on its own line, prefixed with an arrow.
    pub fn chain(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(format!("  → {}", err));
            source = err.source();
        }

        chain.join("\n")
    }

    /// Get a compact single-line error chain for logging
    ///
    /// ```rust,ignore
    /// error!("Fit failed: {}", e.chain_compact());
    /// // Output: "Insufficient points → ..."
    /// ```
    pub fn chain_compact(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }

        chain.join(" → ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geofit_error_display() {
        let error = GeoFitError::from(LinAlgError::SingularMatrix);
        assert!(error.to_string().to_lowercase().contains("singular"));
    }

    #[test]
    fn test_nested_conversion_keeps_message() {
        let adjustment = AdjustmentError::from(LinAlgError::SingularMatrix);
        let error: GeoFitError = adjustment.into();
        match &error {
            GeoFitError::Adjustment(AdjustmentError::LinAlg(LinAlgError::SingularMatrix)) => {}
            other => panic!("unexpected variant {other:?}"),
        }
        assert!(error.chain().to_lowercase().contains("singular"));
        assert!(!error.chain_compact().contains('\n'));
    }

    #[test]
    fn test_geofit_result_err() {
        let result: GeoFitResult<i32> = Err(GeoFitError::from(AdjustmentError::EmptyFeature(
            "circle".to_string(),
        )));
        assert!(result.is_err());
        if let Err(e) = result {
            assert!(e.chain_compact().contains("circle"));
        }
    }
}
