//! Starting values for plane curves.

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use std::f64::consts::{FRAC_PI_2, PI, SQRT_2};

use crate::core::{ParameterType, Point};
use crate::initial_guess::{
    InitialGuessError, InitialGuessResult, scatter, schur_eigen_fit, smallest_eigenvector,
};
use crate::linalg::LinearAlgebra;

/// Normal of the best-fitting line through the centroid, oriented so that the distance of
/// the line from the original origin is non-negative.
pub fn line(
    points: &[Point],
    center: &Point,
    backend: &dyn LinearAlgebra,
) -> InitialGuessResult<Vec<(ParameterType, f64)>> {
    let h = scatter(points.iter().map(|p| [p.x(), p.y()]));
    let normal = smallest_eigenvector(&h, backend)?;
    let (mut nx, mut ny) = (normal[0], normal[1]);
    if nx * center.x() + ny * center.y() < 0.0 {
        nx = -nx;
        ny = -ny;
    }
    Ok(vec![
        (ParameterType::VectorX, nx),
        (ParameterType::VectorY, ny),
        (ParameterType::Length, 0.0),
    ])
}

/// Algebraic circle fit `x² + y² = u₀x + u₁y + u₂`.
pub fn circle(
    points: &[Point],
    backend: &dyn LinearAlgebra,
) -> InitialGuessResult<Vec<(ParameterType, f64)>> {
    let mut n = scatter(points.iter().map(|p| [p.x(), p.y(), 1.0]));
    let mut rhs = DVector::<f64>::zeros(3);
    for p in points {
        let s = p.x() * p.x() + p.y() * p.y();
        rhs[0] += p.x() * s;
        rhs[1] += p.y() * s;
        rhs[2] += s;
    }
    backend.solve_symmetric(&mut n, &mut rhs, false)?;

    let x0 = 0.5 * rhs[0];
    let y0 = 0.5 * rhs[1];
    let r = (x0 * x0 + y0 * y0 + rhs[2]).abs().sqrt();
    Ok(vec![
        (ParameterType::OriginCoordinateX, x0),
        (ParameterType::OriginCoordinateY, y0),
        (ParameterType::Radius, r),
    ])
}

/// Direct least-squares ellipse fit (Fitzgibbon, Pilu & Fisher) converted to foci and the
/// major semi-axis.
///
/// The reduced points are additionally scaled to a mean distance of `√2` before the conic
/// fit; lengths are scaled back afterwards.
pub fn ellipse(
    points: &[Point],
    backend: &dyn LinearAlgebra,
) -> InitialGuessResult<Vec<(ParameterType, f64)>> {
    let mean_distance =
        points.iter().map(|p| p.x().hypot(p.y())).sum::<f64>() / points.len() as f64;
    if mean_distance <= f64::EPSILON {
        return Err(InitialGuessError::DegenerateConfiguration(
            "all points coincide".to_string(),
        )
        .log());
    }
    let scale = SQRT_2 / mean_distance;
    let scaled: Vec<(f64, f64)> = points
        .iter()
        .map(|p| (p.x() * scale, p.y() * scale))
        .collect();

    // D1 = [xx xy yy], D2 = [x y 1]
    let mut s1 = DMatrix::<f64>::zeros(3, 3);
    let mut s2 = DMatrix::<f64>::zeros(3, 3);
    let mut s3 = DMatrix::<f64>::zeros(3, 3);
    for &(x, y) in &scaled {
        let d1 = [x * x, x * y, y * y];
        let d2 = [x, y, 1.0];
        for i in 0..3 {
            for j in 0..3 {
                s1[(i, j)] += d1[i] * d1[j];
                s2[(i, j)] += d1[i] * d2[j];
                s3[(i, j)] += d2[i] * d2[j];
            }
        }
    }
    backend.invert_symmetric(&mut s3)?;
    let t = -(&s3 * s2.transpose());
    let m = s1 + &s2 * &t;

    // inverse of the constraint matrix [[0, 0, 2], [0, −1, 0], [2, 0, 0]]
    let inverse_constraint = Matrix3::new(0.0, 0.0, 0.5, 0.0, -1.0, 0.0, 0.5, 0.0, 0.0);
    let system = inverse_constraint * Matrix3::from_fn(|i, j| m[(i, j)]);
    let u1 = ellipse_eigenvector(&system).ok_or_else(|| {
        InitialGuessError::DegenerateConfiguration(
            "no conic solution satisfies 4ac − b² > 0".to_string(),
        )
        .log()
    })?;
    let u1 = DVector::from_column_slice(u1.as_slice());
    let u2 = &t * &u1;

    let geometry = conic_geometry([u1[0], u1[1], u1[2], u2[0], u2[1], u2[2]]).ok_or_else(|| {
        InitialGuessError::DegenerateConfiguration("fitted conic is not a real ellipse".to_string())
            .log()
    })?;
    let ConicGeometry {
        center,
        major,
        minor,
        angle,
    } = geometry;

    let eccentricity = (major * major - minor * minor).max(0.0).sqrt() / scale;
    let (cx, cy) = (center[0] / scale, center[1] / scale);
    let (dx, dy) = (eccentricity * angle.cos(), eccentricity * angle.sin());
    Ok(vec![
        (ParameterType::PrimaryFocalCoordinateX, cx + dx),
        (ParameterType::PrimaryFocalCoordinateY, cy + dy),
        (ParameterType::SecondaryFocalCoordinateX, cx - dx),
        (ParameterType::SecondaryFocalCoordinateY, cy - dy),
        (ParameterType::MajorAxisCoefficient, major / scale),
    ])
}

/// Normalized conic `Ax² + By² + √2Cxy + Dx + Ey + F` with `A² + B² + C² = 1`.
pub fn quadratic_curve(
    points: &[Point],
    backend: &dyn LinearAlgebra,
) -> InitialGuessResult<Vec<(ParameterType, f64)>> {
    let quadratic: Vec<Vec<f64>> = points
        .iter()
        .map(|p| vec![p.x() * p.x(), p.y() * p.y(), SQRT_2 * p.x() * p.y()])
        .collect();
    let linear: Vec<Vec<f64>> = points.iter().map(|p| vec![p.x(), p.y(), 1.0]).collect();
    let (u1, u2) = schur_eigen_fit(&quadratic, &linear, backend)?;
    Ok(vec![
        (ParameterType::PolynomialCoefficientA, u1[0]),
        (ParameterType::PolynomialCoefficientB, u1[1]),
        (ParameterType::PolynomialCoefficientC, u1[2]),
        (ParameterType::PolynomialCoefficientD, u2[0]),
        (ParameterType::PolynomialCoefficientE, u2[1]),
        (ParameterType::Length, u2[2]),
    ])
}

/// Center, semi-axes and major-axis direction of `ax² + bxy + cy² + dx + ey + f = 0`.
#[derive(Debug, Clone, Copy)]
struct ConicGeometry {
    center: [f64; 2],
    major: f64,
    minor: f64,
    angle: f64,
}

fn conic_geometry([a, b, c, d, e, f]: [f64; 6]) -> Option<ConicGeometry> {
    let discriminant = 4.0 * a * c - b * b;
    if discriminant <= 0.0 {
        return None;
    }
    let cx = (b * e - 2.0 * c * d) / discriminant;
    let cy = (b * d - 2.0 * a * e) / discriminant;
    let f0 = a * cx * cx + b * cx * cy + c * cy * cy + d * cx + e * cy + f;

    // make the quadratic form positive definite
    let sign = if a + c < 0.0 { -1.0 } else { 1.0 };
    let (a, b, c, f0) = (sign * a, sign * b, sign * c, sign * f0);
    if f0 >= 0.0 {
        return None;
    }

    let root = ((a - c) * (a - c) + b * b).sqrt();
    let larger = 0.5 * (a + c + root);
    let smaller = 0.5 * (a + c - root);
    if smaller <= 0.0 {
        return None;
    }
    // the eigenvector of the larger eigenvalue points along the minor axis
    let minor_direction = 0.5 * b.atan2(a - c);
    let mut angle = minor_direction + FRAC_PI_2;
    if angle > PI {
        angle -= PI;
    }
    Some(ConicGeometry {
        center: [cx, cy],
        major: (-f0 / smaller).sqrt(),
        minor: (-f0 / larger).sqrt(),
        angle,
    })
}

/// Eigenvector of the 3×3 system `C⁻¹M` that satisfies the ellipse condition.
///
/// Eigenvalues are the real roots of the characteristic polynomial; every eigenvector is the
/// dominant row of the adjugate of `C⁻¹M − λI`. Among the admissible vectors the one with
/// the smallest `|λ|` wins.
fn ellipse_eigenvector(system: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let trace = system.trace();
    let minors = system[(0, 0)] * system[(1, 1)] - system[(0, 1)] * system[(1, 0)]
        + system[(0, 0)] * system[(2, 2)]
        - system[(0, 2)] * system[(2, 0)]
        + system[(1, 1)] * system[(2, 2)]
        - system[(1, 2)] * system[(2, 1)];
    let determinant = system.determinant();

    real_cubic_roots(-trace, minors, -determinant)
        .into_iter()
        .filter_map(|lambda| {
            let v = null_vector(&(system - Matrix3::identity() * lambda))?;
            (4.0 * v[0] * v[2] - v[1] * v[1] > 0.0).then_some((lambda.abs(), v))
        })
        .min_by(|(a, _), (b, _)| a.total_cmp(b))
        .map(|(_, v)| v)
}

fn null_vector(m: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let rows = [
        m.row(1).transpose().cross(&m.row(2).transpose()),
        m.row(2).transpose().cross(&m.row(0).transpose()),
        m.row(0).transpose().cross(&m.row(1).transpose()),
    ];
    let best = rows
        .iter()
        .max_by(|a, b| a.norm_squared().total_cmp(&b.norm_squared()))?;
    let norm = best.norm();
    (norm > 1e-150).then(|| best / norm)
}

/// Real roots of `λ³ + bλ² + cλ + d`.
fn real_cubic_roots(b: f64, c: f64, d: f64) -> Vec<f64> {
    let p = c - b * b / 3.0;
    let q = 2.0 * b * b * b / 27.0 - b * c / 3.0 + d;
    let shift = -b / 3.0;
    let discriminant = -4.0 * p * p * p - 27.0 * q * q;

    if discriminant >= 0.0 {
        let r = (-p / 3.0).max(0.0).sqrt();
        let argument = if r > 0.0 {
            (-q / (2.0 * r * r * r)).clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let theta = argument.acos();
        (0..3)
            .map(|k| 2.0 * r * ((theta + 2.0 * PI * k as f64) / 3.0).cos() + shift)
            .collect()
    } else {
        let root = (q * q / 4.0 + p * p * p / 27.0).sqrt();
        vec![(-q / 2.0 + root).cbrt() + (-q / 2.0 - root).cbrt() + shift]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initial_guess::derive;
    use crate::linalg::{FaerBackend, NalgebraBackend};
    use crate::primitive::PrimitiveType;
    use approx::assert_abs_diff_eq;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn ellipse_points(cx: f64, cy: f64, a: f64, b: f64, phi: f64, n: usize) -> Vec<Point> {
        (0..n)
            .map(|i| {
                let t = 2.0 * PI * i as f64 / n as f64 + 0.1;
                let (u, v) = (a * t.cos(), b * t.sin());
                Point::new_2d(
                    cx + u * phi.cos() - v * phi.sin(),
                    cy + u * phi.sin() + v * phi.cos(),
                )
            })
            .collect()
    }

    #[test]
    fn test_circle_from_four_exact_points() -> TestResult {
        let points = vec![
            Point::new_2d(3.0, 3.0),
            Point::new_2d(2.0, 4.0),
            Point::new_2d(1.0, 3.0),
            Point::new_2d(2.0, 2.0),
        ];
        let guess = derive(PrimitiveType::Circle, &points, &FaerBackend::new())?;
        let x0 = guess.value(ParameterType::OriginCoordinateX).ok_or("x0")? + guess.center.x();
        let y0 = guess.value(ParameterType::OriginCoordinateY).ok_or("y0")? + guess.center.y();
        assert_abs_diff_eq!(x0, 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(y0, 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(guess.value(ParameterType::Radius).ok_or("r")?, 1.0, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_circle_from_three_points() -> TestResult {
        let points = vec![
            Point::new_2d(0.0, 0.0),
            Point::new_2d(2.0, 0.0),
            Point::new_2d(0.0, 2.0),
        ];
        let guess = derive(PrimitiveType::Circle, &points, &NalgebraBackend::new())?;
        assert_abs_diff_eq!(
            guess.value(ParameterType::Radius).ok_or("r")?,
            2.0_f64.sqrt(),
            epsilon = 1e-9
        );
        Ok(())
    }

    #[test]
    fn test_line_through_two_points() -> TestResult {
        let points = vec![Point::new_2d(0.0, 0.0), Point::new_2d(2.0, 0.0)];
        let guess = derive(PrimitiveType::Line, &points, &FaerBackend::new())?;
        assert_abs_diff_eq!(guess.value(ParameterType::VectorX).ok_or("nx")?, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            guess.value(ParameterType::VectorY).ok_or("ny")?.abs(),
            1.0,
            epsilon = 1e-12
        );
        Ok(())
    }

    #[test]
    fn test_line_orientation_gives_positive_distance() -> TestResult {
        // y = −x + 4 ⇒ n = (1, 1)/√2, d = 4/√2
        let points: Vec<Point> = (0..5).map(|i| Point::new_2d(i as f64, 4.0 - i as f64)).collect();
        let guess = derive(PrimitiveType::Line, &points, &FaerBackend::new())?;
        let nx = guess.value(ParameterType::VectorX).ok_or("nx")?;
        let ny = guess.value(ParameterType::VectorY).ok_or("ny")?;
        assert!(nx * guess.center.x() + ny * guess.center.y() > 0.0);
        assert_abs_diff_eq!(nx, 1.0 / SQRT_2, epsilon = 1e-12);
        assert_abs_diff_eq!(ny, 1.0 / SQRT_2, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_ellipse_foci() -> TestResult {
        let phi = 30.0_f64.to_radians();
        let points = ellipse_points(3.0, -2.0, 5.0, 3.0, phi, 12);
        let guess = derive(PrimitiveType::Ellipse, &points, &FaerBackend::new())?;
        let c = &guess.center;
        let f1 = [
            guess.value(ParameterType::PrimaryFocalCoordinateX).ok_or("x1")? + c.x(),
            guess.value(ParameterType::PrimaryFocalCoordinateY).ok_or("y1")? + c.y(),
        ];
        let f2 = [
            guess.value(ParameterType::SecondaryFocalCoordinateX).ok_or("x2")? + c.x(),
            guess.value(ParameterType::SecondaryFocalCoordinateY).ok_or("y2")? + c.y(),
        ];
        assert_abs_diff_eq!(
            guess.value(ParameterType::MajorAxisCoefficient).ok_or("a")?,
            5.0,
            epsilon = 1e-6
        );
        // linear eccentricity 4 along the rotated major axis
        let expected = [3.0 + 4.0 * phi.cos(), -2.0 + 4.0 * phi.sin()];
        let (near, far) = if (f1[0] - expected[0]).abs() < (f2[0] - expected[0]).abs() {
            (f1, f2)
        } else {
            (f2, f1)
        };
        assert_abs_diff_eq!(near[0], expected[0], epsilon = 1e-6);
        assert_abs_diff_eq!(near[1], expected[1], epsilon = 1e-6);
        assert_abs_diff_eq!(far[0], 3.0 - 4.0 * phi.cos(), epsilon = 1e-6);
        assert_abs_diff_eq!(far[1], -2.0 - 4.0 * phi.sin(), epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_quadratic_curve_vanishes_on_points() -> TestResult {
        let points = ellipse_points(-1.0, 4.0, 3.0, 1.5, 1.0, 10);
        let guess = derive(PrimitiveType::QuadraticCurve, &points, &FaerBackend::new())?;
        let value = |t| guess.value(t).unwrap_or(f64::NAN);
        let (a, b, c) = (
            value(ParameterType::PolynomialCoefficientA),
            value(ParameterType::PolynomialCoefficientB),
            value(ParameterType::PolynomialCoefficientC),
        );
        assert_abs_diff_eq!(a * a + b * b + c * c, 1.0, epsilon = 1e-12);
        for p in &points {
            let r = p.offset_from(&guess.center);
            let (x, y) = (r.x(), r.y());
            let w = a * x * x
                + b * y * y
                + SQRT_2 * c * x * y
                + value(ParameterType::PolynomialCoefficientD) * x
                + value(ParameterType::PolynomialCoefficientE) * y
                + value(ParameterType::Length);
            assert_abs_diff_eq!(w, 0.0, epsilon = 1e-8);
        }
        Ok(())
    }

    #[test]
    fn test_real_cubic_roots() {
        // (λ − 1)(λ − 2)(λ + 3) = λ³ − 7λ + 6
        let mut roots = real_cubic_roots(0.0, -7.0, 6.0);
        roots.sort_by(f64::total_cmp);
        assert_eq!(roots.len(), 3);
        assert_abs_diff_eq!(roots[0], -3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(roots[1], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(roots[2], 2.0, epsilon = 1e-12);
    }
}
