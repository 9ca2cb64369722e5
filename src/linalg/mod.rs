//! Dense linear algebra used by the estimator and the confidence-region analysis.
//!
//! Everything numerical above this module goes through the [`LinearAlgebra`] trait:
//! symmetric (possibly indefinite) solves and inversions, singular value decomposition,
//! pseudo-inverses truncated by tolerance or rank, condition numbers and windowed
//! symmetric eigen-decompositions.
//!
//! Two backends are provided:
//! - [`FaerBackend`]: Bunch-Kaufman LBLᵀ, SVD and self-adjoint eigen solvers from `faer`
//! - [`NalgebraBackend`]: pure `nalgebra` fallback (LU, SVD, symmetric QR eigen)
//!
//! Matrices cross the API boundary as `nalgebra::DMatrix<f64>` / `DVector<f64>`.

pub mod faer_backend;
pub mod nalgebra_backend;

pub use faer_backend::FaerBackend;
pub use nalgebra_backend::NalgebraBackend;

use nalgebra::{DMatrix, DVector};
use std::{
    fmt,
    fmt::{Display, Formatter},
    ops::Range,
};
use thiserror::Error;
use tracing::error;

/// Machine epsilon used for default tolerances.
pub const EPS: f64 = f64::EPSILON;

/// Square root of the machine epsilon.
pub const SQRT_EPS: f64 = 1.4901161193847656e-8;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LinearAlgebraType {
    #[default]
    Faer,
    Nalgebra,
}

impl Display for LinearAlgebraType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LinearAlgebraType::Faer => write!(f, "faer (Bunch-Kaufman LBLᵀ)"),
            LinearAlgebraType::Nalgebra => write!(f, "nalgebra (LU)"),
        }
    }
}

/// Linear algebra specific error types
#[derive(Debug, Clone, Error)]
pub enum LinAlgError {
    /// Matrix factorization failed
    #[error("Matrix factorization failed: {0}")]
    FactorizationFailed(String),

    /// Singular matrix detected (zero pivot in the factorization)
    #[error("Singular matrix detected (matrix is not invertible)")]
    SingularMatrix,

    /// Malformed shapes or non-finite input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Iterative decomposition (eigen/SVD) did not converge
    #[error("Decomposition did not converge: {0}")]
    NotConverged(String),
}

impl LinAlgError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| LinAlgError::from(e).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error together with the error reported by the third-party library
    ///
    /// # Example
    /// ```ignore
    /// matrix.svd().map_err(|e| {
    ///     LinAlgError::NotConverged("SVD".to_string()).log_with_source(e)
    /// })?;
    /// ```
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for linear algebra operations
pub type LinAlgResult<T> = Result<T, LinAlgError>;

/// Singular value decomposition `M = U·diag(σ)·Vᵀ` with σ sorted descending.
#[derive(Debug, Clone)]
pub struct SvdDecomposition {
    pub u: DMatrix<f64>,
    pub singular_values: DVector<f64>,
    pub v_t: DMatrix<f64>,
}

/// Eigenpairs of a symmetric matrix restricted to an index window, ascending.
#[derive(Debug, Clone)]
pub struct EigenWindow {
    pub values: DVector<f64>,
    /// One eigenvector per column, present only when requested
    pub vectors: Option<DMatrix<f64>>,
}

/// Dense linear algebra backend.
///
/// Implementations hold no mutable state; in-place operations are documented as such
/// and the mutated arguments are the only side effect.
pub trait LinearAlgebra: Send + Sync {
    /// Solve `N·x = n` for a symmetric, possibly indefinite `N`.
    ///
    /// The solution overwrites `rhs`. When `invert` is set, `matrix` is overwritten by
    /// `N⁻¹`, otherwise its content is unspecified afterwards.
    ///
    /// # Errors
    /// - `InvalidArgument` on non-square or mismatching shapes
    /// - `SingularMatrix` if the factorization meets a zero pivot
    fn solve_symmetric(
        &self,
        matrix: &mut DMatrix<f64>,
        rhs: &mut DVector<f64>,
        invert: bool,
    ) -> LinAlgResult<()>;

    /// In-place inverse of a symmetric matrix.
    fn invert_symmetric(&self, matrix: &mut DMatrix<f64>) -> LinAlgResult<()>;

    /// Full singular value decomposition with descending singular values.
    fn svd(&self, matrix: &DMatrix<f64>) -> LinAlgResult<SvdDecomposition>;

    /// Eigenpairs `range` (0-based, ascending order) of a symmetric matrix.
    fn partial_symmetric_eigen(
        &self,
        matrix: &DMatrix<f64>,
        range: Range<usize>,
        with_vectors: bool,
    ) -> LinAlgResult<EigenWindow>;

    /// Moore-Penrose pseudo-inverse truncating singular values `|σ| ≤ tolerance`.
    ///
    /// A tolerance below machine epsilon selects the default
    /// `max(rows, cols)·max|σ|·ε`; a negative tolerance uses `√ε` instead of `ε`.
    fn pseudo_inverse(&self, matrix: &DMatrix<f64>, tolerance: f64) -> LinAlgResult<DMatrix<f64>> {
        let svd = self.svd(matrix)?;
        let max_sigma = svd
            .singular_values
            .iter()
            .fold(0.0_f64, |acc, s| acc.max(s.abs()));
        let tolerance = if tolerance < EPS {
            let scale = if tolerance < 0.0 { SQRT_EPS } else { EPS };
            matrix.nrows().max(matrix.ncols()) as f64 * max_sigma * scale
        } else {
            tolerance
        };
        let keep = svd
            .singular_values
            .iter()
            .take_while(|s| s.abs() > tolerance)
            .count();
        Ok(compose_pseudo_inverse(&svd, keep))
    }

    /// Pseudo-inverse keeping the `rank` leading singular values.
    ///
    /// `rank ≤ 0` defers to [`LinearAlgebra::pseudo_inverse`] with `rank` as tolerance.
    fn pseudo_inverse_with_rank(
        &self,
        matrix: &DMatrix<f64>,
        rank: isize,
    ) -> LinAlgResult<DMatrix<f64>> {
        if rank <= 0 {
            return self.pseudo_inverse(matrix, rank as f64);
        }
        let svd = self.svd(matrix)?;
        let keep = svd
            .singular_values
            .iter()
            .take(rank as usize)
            .take_while(|s| s.abs() > 0.0)
            .count();
        Ok(compose_pseudo_inverse(&svd, keep))
    }

    /// `σ_max / σ_min`, or 0 when the smallest singular value vanishes.
    fn condition_number(&self, matrix: &DMatrix<f64>) -> LinAlgResult<f64> {
        let svd = self.svd(matrix)?;
        let n = svd.singular_values.len();
        if n == 0 {
            return Ok(0.0);
        }
        let smallest = svd.singular_values[n - 1];
        Ok(if smallest != 0.0 {
            svd.singular_values[0] / smallest
        } else {
            0.0
        })
    }
}

/// Create the backend selected by `backend_type`.
pub fn create_backend(backend_type: LinearAlgebraType) -> Box<dyn LinearAlgebra> {
    match backend_type {
        LinearAlgebraType::Faer => Box::new(FaerBackend::new()),
        LinearAlgebraType::Nalgebra => Box::new(NalgebraBackend::new()),
    }
}

/// `V·diag(1/σ)·Uᵀ` over the first `keep` singular triplets.
fn compose_pseudo_inverse(svd: &SvdDecomposition, keep: usize) -> DMatrix<f64> {
    let rows = svd.v_t.ncols();
    let cols = svd.u.nrows();
    let mut pinv = DMatrix::zeros(rows, cols);
    for k in 0..keep {
        let inv_sigma = 1.0 / svd.singular_values[k];
        for i in 0..rows {
            let vik = svd.v_t[(k, i)] * inv_sigma;
            if vik == 0.0 {
                continue;
            }
            for j in 0..cols {
                pinv[(i, j)] += vik * svd.u[(j, k)];
            }
        }
    }
    pinv
}

pub(crate) fn ensure_square(matrix: &DMatrix<f64>, context: &str) -> LinAlgResult<()> {
    if matrix.nrows() != matrix.ncols() {
        return Err(LinAlgError::InvalidArgument(format!(
            "{context}: matrix must be square, got {}x{}",
            matrix.nrows(),
            matrix.ncols()
        ))
        .log());
    }
    Ok(())
}

pub(crate) fn ensure_finite(matrix: &DMatrix<f64>, context: &str) -> LinAlgResult<()> {
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(
            LinAlgError::InvalidArgument(format!("{context}: matrix contains NaN or Inf")).log(),
        );
    }
    Ok(())
}

/// Accept a solve only if `‖N·x − b‖∞` is small relative to the data.
pub(crate) fn residual_acceptable(
    matrix: &DMatrix<f64>,
    solution: &DMatrix<f64>,
    rhs: &DMatrix<f64>,
) -> bool {
    if solution.iter().any(|v| !v.is_finite()) {
        return false;
    }
    let residual = matrix * solution - rhs;
    let scale = matrix.amax() * solution.amax() + rhs.amax();
    residual.amax() <= SQRT_EPS * scale.max(EPS)
}

/// `x − floor(x/y)·y`, always taking the sign of `y`.
pub fn modulo(x: f64, y: f64) -> f64 {
    x - (x / y).floor() * y
}

/// `|a|` carrying the sign of `b`.
pub fn sign(a: f64, b: f64) -> f64 {
    if b >= 0.0 { a.abs() } else { -a.abs() }
}

/// Cross product of two 3-vectors.
pub fn cross(a: &DVector<f64>, b: &DVector<f64>) -> LinAlgResult<DVector<f64>> {
    if a.len() != 3 || b.len() != 3 {
        return Err(LinAlgError::InvalidArgument(format!(
            "cross product requires 3-vectors, got {} and {}",
            a.len(),
            b.len()
        ))
        .log());
    }
    Ok(DVector::from_vec(vec![
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]))
}
