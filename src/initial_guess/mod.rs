//! Closed-form starting values for the nonlinear adjustment.
//!
//! The Gauss-Helmert iteration only converges locally, so every primitive type has a
//! direct (non-iterative) estimator that works on centroid-reduced coordinates:
//!
//! | Primitive | Method | Minimum points |
//! |-----------|--------|----------------|
//! | Line | principal component of the scatter matrix | 2 |
//! | Circle | algebraic fit (3×3 linear system) | 3 |
//! | Ellipse | direct least-squares conic fit with `4ac − b² > 0` | 5 |
//! | Quadratic curve | Schur complement eigen method | 5 |
//! | Plane | principal component of the scatter matrix | 3 |
//! | Sphere | algebraic fit (4×4 linear system) | 4 |
//! | Quadratic surface | Schur complement eigen method | 9 |
//!
//! The result is expressed in the reduced frame together with the centroid, so the caller
//! can move it back through the primitive's own translation.

pub mod curve;
pub mod surface;

use nalgebra::{DMatrix, DVector};
use thiserror::Error;
use tracing::{debug, error};

use crate::core::{ParameterType, Point};
use crate::linalg::{LinAlgError, LinearAlgebra};
use crate::primitive::PrimitiveType;

/// Initial guess module error types
#[derive(Debug, Clone, Error)]
pub enum InitialGuessError {
    /// Fewer enabled points than the estimator needs
    #[error("Insufficient points for {primitive}: at least {required} needed, found {found}")]
    InsufficientPoints {
        primitive: PrimitiveType,
        required: usize,
        found: usize,
    },

    /// Point dimension differs from the primitive's dimension
    #[error("Illegal dimension for {primitive}: expected {expected}, found {found}")]
    IllegalDimension {
        primitive: PrimitiveType,
        expected: usize,
        found: usize,
    },

    /// The point configuration admits no solution of the requested kind
    #[error("Degenerate point configuration: {0}")]
    DegenerateConfiguration(String),

    /// Decomposition or solve failed
    #[error(transparent)]
    LinAlg(#[from] LinAlgError),
}

impl InitialGuessError {
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

/// Result type for initial guess derivation
pub type InitialGuessResult<T> = Result<T, InitialGuessError>;

/// Starting values in the frame reduced to `center`.
#[derive(Debug, Clone)]
pub struct InitialGuess {
    pub center: Point,
    pub values: Vec<(ParameterType, f64)>,
}

impl InitialGuess {
    pub fn value(&self, parameter_type: ParameterType) -> Option<f64> {
        self.values
            .iter()
            .find(|(t, _)| *t == parameter_type)
            .map(|(_, v)| *v)
    }
}

/// Smallest number of points the closed-form estimator of `primitive_type` accepts.
pub fn minimum_points(primitive_type: PrimitiveType) -> usize {
    match primitive_type {
        PrimitiveType::Line => 2,
        PrimitiveType::Circle => 3,
        PrimitiveType::Ellipse | PrimitiveType::QuadraticCurve => 5,
        PrimitiveType::Plane => 3,
        PrimitiveType::Sphere => 4,
        PrimitiveType::QuadraticSurface => 9,
    }
}

/// Derive starting values for `primitive_type` from the a-priori point positions.
///
/// # Errors
/// - `IllegalDimension` if a point does not share the primitive's dimension
/// - `InsufficientPoints` below [`minimum_points`]
/// - `DegenerateConfiguration` / `LinAlg` when the point set does not determine the primitive
pub fn derive(
    primitive_type: PrimitiveType,
    points: &[Point],
    backend: &dyn LinearAlgebra,
) -> InitialGuessResult<InitialGuess> {
    let dimension = primitive_type.dimension();
    if let Some(point) = points.iter().find(|p| p.dimension() != dimension) {
        return Err(InitialGuessError::IllegalDimension {
            primitive: primitive_type,
            expected: dimension,
            found: point.dimension(),
        }
        .log());
    }
    let required = minimum_points(primitive_type);
    if points.len() < required {
        return Err(InitialGuessError::InsufficientPoints {
            primitive: primitive_type,
            required,
            found: points.len(),
        }
        .log());
    }

    let center = centroid(points, dimension);
    let reduced: Vec<Point> = points.iter().map(|p| p.offset_from(&center)).collect();

    let values = match primitive_type {
        PrimitiveType::Line => curve::line(&reduced, &center, backend)?,
        PrimitiveType::Circle => curve::circle(&reduced, backend)?,
        PrimitiveType::Ellipse => curve::ellipse(&reduced, backend)?,
        PrimitiveType::QuadraticCurve => curve::quadratic_curve(&reduced, backend)?,
        PrimitiveType::Plane => surface::plane(&reduced, &center, backend)?,
        PrimitiveType::Sphere => surface::sphere(&reduced, backend)?,
        PrimitiveType::QuadraticSurface => surface::quadratic_surface(&reduced, backend)?,
    };
    debug!(
        "Initial guess for {} from {} points, center of mass {}",
        primitive_type,
        points.len(),
        center
    );
    Ok(InitialGuess { center, values })
}

fn centroid(points: &[Point], dimension: usize) -> Point {
    let mut sum = [0.0; 3];
    for point in points {
        for (k, s) in sum.iter_mut().enumerate().take(dimension) {
            *s += point.coordinate(k);
        }
    }
    let n = points.len() as f64;
    match dimension {
        2 => Point::new_2d(sum[0] / n, sum[1] / n),
        _ => Point::new_3d(sum[0] / n, sum[1] / n, sum[2] / n),
    }
}

/// Accumulate `Σ aᵢᵀaᵢ` over design rows.
pub(crate) fn scatter<const N: usize>(rows: impl Iterator<Item = [f64; N]>) -> DMatrix<f64> {
    let mut s = DMatrix::zeros(N, N);
    for row in rows {
        for i in 0..N {
            for j in i..N {
                s[(i, j)] += row[i] * row[j];
            }
        }
    }
    s.fill_lower_triangle_with_upper_triangle();
    s
}

/// Eigenvector of the eigenvalue with the smallest magnitude.
pub(crate) fn smallest_eigenvector(
    matrix: &DMatrix<f64>,
    backend: &dyn LinearAlgebra,
) -> InitialGuessResult<DVector<f64>> {
    let n = matrix.nrows();
    let eigen = backend.partial_symmetric_eigen(matrix, 0..n, true)?;
    let vectors = eigen.vectors.ok_or_else(|| {
        LinAlgError::NotConverged("symmetric eigen decomposition without vectors".to_string())
            .log()
    })?;
    let index = eigen
        .values
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.abs().total_cmp(&b.abs()))
        .map(|(i, _)| i)
        .unwrap_or(0);
    Ok(vectors.column(index).into_owned())
}

/// Solve the Schur-complement eigen problem for a normalized algebraic surface.
///
/// `quadratic` and `linear` hold the monomials of each point; the quadratic coefficient
/// vector `u₁` is the eigenvector of `H = S₁₁ − S₁₂·S₂₂⁻¹·S₁₂ᵀ` with the smallest `|λ|`
/// and `u₂ = −S₂₂⁻¹·S₁₂ᵀ·u₁`.
pub(crate) fn schur_eigen_fit(
    quadratic: &[Vec<f64>],
    linear: &[Vec<f64>],
    backend: &dyn LinearAlgebra,
) -> InitialGuessResult<(DVector<f64>, DVector<f64>)> {
    let n1 = quadratic.first().map_or(0, Vec::len);
    let n2 = linear.first().map_or(0, Vec::len);
    let mut s11 = DMatrix::<f64>::zeros(n1, n1);
    let mut s12 = DMatrix::<f64>::zeros(n1, n2);
    let mut s22 = DMatrix::<f64>::zeros(n2, n2);
    for (a1, a2) in quadratic.iter().zip(linear) {
        for i in 0..n1 {
            for j in 0..n1 {
                s11[(i, j)] += a1[i] * a1[j];
            }
            for j in 0..n2 {
                s12[(i, j)] += a1[i] * a2[j];
            }
        }
        for i in 0..n2 {
            for j in 0..n2 {
                s22[(i, j)] += a2[i] * a2[j];
            }
        }
    }

    backend.invert_symmetric(&mut s22)?;
    let t = &s22 * s12.transpose();
    let mut h = s11 - &s12 * &t;
    // symmetrize against round-off before the symmetric eigen solver
    let ht = h.transpose();
    h = (h + ht) * 0.5;

    let u1 = smallest_eigenvector(&h, backend)?;
    let u2 = -(&t * &u1);
    Ok((u1, u2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::FaerBackend;

    #[test]
    fn test_rejects_mixed_dimensions() {
        let points = vec![Point::new_2d(0.0, 0.0), Point::new_3d(1.0, 0.0, 0.0)];
        let result = derive(PrimitiveType::Line, &points, &FaerBackend::new());
        assert!(matches!(
            result,
            Err(InitialGuessError::IllegalDimension {
                expected: 2,
                found: 3,
                ..
            })
        ));
    }

    #[test]
    fn test_minimum_points() {
        let backend = FaerBackend::new();
        let two = vec![Point::new_2d(0.0, 0.0), Point::new_2d(1.0, 1.0)];
        let result = derive(PrimitiveType::Circle, &two, &backend);
        assert!(matches!(
            result,
            Err(InitialGuessError::InsufficientPoints {
                required: 3,
                found: 2,
                ..
            })
        ));
        let result = derive(PrimitiveType::QuadraticSurface, &[Point::new_3d(0.0, 0.0, 0.0)], &backend);
        assert!(matches!(
            result,
            Err(InitialGuessError::InsufficientPoints { required: 9, .. })
        ));
    }

    #[test]
    fn test_scatter_is_symmetric() {
        let s = scatter([[1.0, 2.0], [3.0, -1.0]].into_iter());
        assert_eq!(s[(0, 0)], 10.0);
        assert_eq!(s[(0, 1)], -1.0);
        assert_eq!(s[(1, 0)], -1.0);
        assert_eq!(s[(1, 1)], 5.0);
    }
}
