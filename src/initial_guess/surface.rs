//! Starting values for surfaces in space.

use nalgebra::DVector;
use std::f64::consts::SQRT_2;

use crate::core::{ParameterType, Point};
use crate::initial_guess::{InitialGuessResult, scatter, schur_eigen_fit, smallest_eigenvector};
use crate::linalg::LinearAlgebra;

/// Plane through the centroid with the normal of least scatter.
pub fn plane(
    points: &[Point],
    center: &Point,
    backend: &dyn LinearAlgebra,
) -> InitialGuessResult<Vec<(ParameterType, f64)>> {
    let h = scatter(points.iter().map(|p| [p.x(), p.y(), p.z()]));
    let mut normal = smallest_eigenvector(&h, backend)?;
    let distance: f64 = (0..3).map(|k| normal[k] * center.coordinate(k)).sum();
    if distance < 0.0 {
        normal = -normal;
    }
    Ok(vec![
        (ParameterType::VectorX, normal[0]),
        (ParameterType::VectorY, normal[1]),
        (ParameterType::VectorZ, normal[2]),
        (ParameterType::Length, 0.0),
    ])
}

/// Algebraic sphere fit `x² + y² + z² = u₀x + u₁y + u₂z + u₃`.
pub fn sphere(
    points: &[Point],
    backend: &dyn LinearAlgebra,
) -> InitialGuessResult<Vec<(ParameterType, f64)>> {
    let mut n = scatter(points.iter().map(|p| [p.x(), p.y(), p.z(), 1.0]));
    let mut rhs = DVector::<f64>::zeros(4);
    for p in points {
        let s = p.x() * p.x() + p.y() * p.y() + p.z() * p.z();
        rhs[0] += p.x() * s;
        rhs[1] += p.y() * s;
        rhs[2] += p.z() * s;
        rhs[3] += s;
    }
    backend.solve_symmetric(&mut n, &mut rhs, false)?;

    let origin = [0.5 * rhs[0], 0.5 * rhs[1], 0.5 * rhs[2]];
    let r = (origin.iter().map(|o| o * o).sum::<f64>() + rhs[3]).abs().sqrt();
    Ok(vec![
        (ParameterType::OriginCoordinateX, origin[0]),
        (ParameterType::OriginCoordinateY, origin[1]),
        (ParameterType::OriginCoordinateZ, origin[2]),
        (ParameterType::Radius, r),
    ])
}

/// Normalized quadric, see [`crate::primitive::QuadraticSurface`].
pub fn quadratic_surface(
    points: &[Point],
    backend: &dyn LinearAlgebra,
) -> InitialGuessResult<Vec<(ParameterType, f64)>> {
    let quadratic: Vec<Vec<f64>> = points
        .iter()
        .map(|p| {
            let (x, y, z) = (p.x(), p.y(), p.z());
            vec![x * x, y * y, z * z, SQRT_2 * x * y, SQRT_2 * x * z, SQRT_2 * y * z]
        })
        .collect();
    let linear: Vec<Vec<f64>> = points.iter().map(|p| vec![p.x(), p.y(), p.z(), 1.0]).collect();
    let (u1, u2) = schur_eigen_fit(&quadratic, &linear, backend)?;

    let quadratic_types = [
        ParameterType::PolynomialCoefficientA,
        ParameterType::PolynomialCoefficientB,
        ParameterType::PolynomialCoefficientC,
        ParameterType::PolynomialCoefficientD,
        ParameterType::PolynomialCoefficientE,
        ParameterType::PolynomialCoefficientF,
    ];
    let linear_types = [
        ParameterType::PolynomialCoefficientG,
        ParameterType::PolynomialCoefficientH,
        ParameterType::PolynomialCoefficientI,
        ParameterType::Length,
    ];
    Ok(quadratic_types
        .into_iter()
        .zip(u1.iter().copied())
        .chain(linear_types.into_iter().zip(u2.iter().copied()))
        .collect())
}
