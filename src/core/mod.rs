//! Core data model shared by primitives, restrictions and the estimator
//!
//! - [`parameter`]: unknown parameters and the arena that owns them
//! - [`point`]: observed points with their a-priori dispersion and estimated stochastics

pub mod parameter;
pub mod point;

pub use parameter::{ParameterId, ParameterStore, ParameterType, ProcessingType, UnknownParameter};
pub use point::{FeaturePoint, Point, PointTestStatistic, TestDecision};

use thiserror::Error;
use tracing::error;

/// Core module error types for parameters and points
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Points of one set do not share a coordinate dimension
    #[error("Illegal dimension: {0}")]
    IllegalDimension(String),

    /// Dispersion matrix has the wrong shape or is not positive definite
    #[error("Invalid dispersion for point '{name}': {reason}")]
    InvalidDispersion { name: String, reason: String },

    /// Operation requires at least one (enabled) point
    #[error("Empty point set: {0}")]
    EmptyPointSet(String),

    /// Invalid input parameter or configuration
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| CoreError::from(e).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error with the original source error from a third-party library
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;
