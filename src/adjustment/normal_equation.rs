//! Linearization of point observations and assembly of the bordered normal equations.
//!
//! With the `parallel` feature the per-point linearization runs on the rayon thread pool;
//! the contributions are summed afterwards in point order, so both builds produce the
//! same system.

use nalgebra::{DMatrix, DVector};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::collections::TryReserveError;

use crate::adjustment::{AdjustmentResult, CancellationToken};
use crate::core::{FeaturePoint, ParameterStore, Point};
use crate::linalg::{EPS, LinAlgError, LinearAlgebra};
use crate::primitive::GeometricPrimitive;
use crate::restriction::Restriction;

/// Condition equations of one point, linearized at the current estimate.
#[derive(Debug, Clone)]
pub struct PointEquations {
    /// `∂f/∂x`, one row per primitive, one column per estimated parameter
    pub jx: DMatrix<f64>,
    /// `∂f/∂p`, one row per primitive, one column per coordinate
    pub jv: DMatrix<f64>,
    /// `w = f(x, p̂) − Jv·v̂`
    pub w: DVector<f64>,
    /// Cofactor matrix of the coordinates `D/(σ0²·ω)` with robust weight ω
    pub qll: DMatrix<f64>,
    /// `W = (Jv·Qll·Jvᵀ)⁻¹`
    pub weight: DMatrix<f64>,
    /// Current residuals `v̂`
    pub residuals: DVector<f64>,
}

impl PointEquations {
    /// Misclosure residuals `ve = Jx·dx + w`.
    pub fn misclosure_residuals(&self, dx: &DVector<f64>) -> DVector<f64> {
        &self.jx * dx + &self.w
    }

    /// `veᵀ·W·ve` for the step `dx`.
    pub fn omega(&self, dx: &DVector<f64>) -> f64 {
        let ve = self.misclosure_residuals(dx);
        ve.dot(&(&self.weight * &ve))
    }
}

/// Linearize every primitive at the adjusted position of `point`.
///
/// # Errors
/// `LinAlg(SingularMatrix)` when the misclosures of the point have a singular dispersion,
/// e.g. a point on the axis of a degenerate primitive.
pub fn linearize_point(
    primitives: &[Box<dyn GeometricPrimitive>],
    store: &ParameterStore,
    point: &FeaturePoint,
    center: &Point,
    number_of_unknowns: usize,
    cofactor_scale: f64,
    backend: &dyn LinearAlgebra,
) -> AdjustmentResult<PointEquations> {
    let nog = primitives.len();
    let dim = point.dimension();
    let reduced = point.adjusted().offset_from(center);

    let mut jx = DMatrix::<f64>::zeros(nog, number_of_unknowns);
    let mut jv = DMatrix::<f64>::zeros(nog, dim);
    let mut w = DVector::<f64>::zeros(nog);
    for (row, primitive) in primitives.iter().enumerate() {
        w[row] = primitive.misclosure(store, reduced.as_slice());
        let jacobian = primitive.jacobian(store, reduced.as_slice());
        for (id, partial) in jacobian.parameters {
            if let Some(column) = store.column(id) {
                jx[(row, column)] += partial;
            }
        }
        for (column, partial) in jacobian.coordinates.iter().enumerate().take(dim) {
            jv[(row, column)] = *partial;
        }
    }

    let residuals = point.residuals().clone();
    w -= &jv * &residuals;

    let qll = point.dispersion() * cofactor_scale;
    let mut weight = &jv * &qll * jv.transpose();
    if nog == 1 {
        let variance = weight[(0, 0)];
        if variance <= 0.0 || !variance.is_finite() {
            return Err(LinAlgError::SingularMatrix.into());
        }
        weight[(0, 0)] = 1.0 / variance;
    } else {
        let transposed = weight.transpose();
        weight = (weight + transposed) * 0.5;
        backend.invert_symmetric(&mut weight)?;
    }

    Ok(PointEquations {
        jx,
        jv,
        w,
        qll,
        weight,
        residuals,
    })
}

/// Linearize all points; `None` when the adjustment was cancelled meanwhile.
///
/// `cofactor_scales[i]` is `1/(σ0²·ωᵢ)` for the i-th point.
#[allow(clippy::too_many_arguments)]
pub fn linearize_points(
    primitives: &[Box<dyn GeometricPrimitive>],
    store: &ParameterStore,
    points: &[&FeaturePoint],
    center: &Point,
    number_of_unknowns: usize,
    cofactor_scales: &[f64],
    backend: &dyn LinearAlgebra,
    cancellation: &CancellationToken,
) -> AdjustmentResult<Option<Vec<PointEquations>>> {
    let linearize = |(point, scale): (&&FeaturePoint, &f64)| {
        if cancellation.is_cancelled() {
            return Ok(None);
        }
        linearize_point(
            primitives,
            store,
            point,
            center,
            number_of_unknowns,
            *scale,
            backend,
        )
        .map(Some)
    };

    #[cfg(feature = "parallel")]
    let equations: AdjustmentResult<Option<Vec<PointEquations>>> = points
        .par_iter()
        .zip(cofactor_scales.par_iter())
        .map(linearize)
        .collect();

    #[cfg(not(feature = "parallel"))]
    let equations: AdjustmentResult<Option<Vec<PointEquations>>> =
        points.iter().zip(cofactor_scales.iter()).map(linearize).collect();

    equations
}

/// Bordered normal equations `N·[dx k]ᵀ = n` with optional Jacobi preconditioner.
#[derive(Debug, Clone)]
pub struct NormalEquationSystem {
    pub matrix: DMatrix<f64>,
    pub vector: DVector<f64>,
    number_of_unknowns: usize,
    preconditioner: Option<DVector<f64>>,
    max_abs_restriction: f64,
}

impl NormalEquationSystem {
    /// Zero system for `nou` unknowns and `nor` restrictions.
    ///
    /// # Errors
    /// The allocation error when the dense matrix does not fit into memory.
    pub fn try_new(nou: usize, nor: usize) -> Result<Self, TryReserveError> {
        let size = nou + nor;
        let mut storage: Vec<f64> = Vec::new();
        storage.try_reserve_exact(size * size)?;
        storage.resize(size * size, 0.0);
        Ok(Self {
            matrix: DMatrix::from_vec(size, size, storage),
            vector: DVector::zeros(size),
            number_of_unknowns: nou,
            preconditioner: None,
            max_abs_restriction: 0.0,
        })
    }

    pub fn size(&self) -> usize {
        self.vector.len()
    }

    pub fn number_of_unknowns(&self) -> usize {
        self.number_of_unknowns
    }

    /// Largest absolute restriction misclosure seen by [`Self::add_restrictions`].
    pub fn max_abs_restriction(&self) -> f64 {
        self.max_abs_restriction
    }

    /// `N += JxᵀWJx`, `n += −JxᵀWw`.
    pub fn add_point(&mut self, equations: &PointEquations) {
        let nou = self.number_of_unknowns;
        let wjx = &equations.weight * &equations.jx;
        let jxt = equations.jx.transpose();
        let mut block = self.matrix.view_mut((0, 0), (nou, nou));
        block += &jxt * &wjx;
        let mut rhs = self.vector.rows_mut(0, nou);
        rhs -= wjx.transpose() * &equations.w;
    }

    /// Border the system with one row and column per restriction, right-hand side `−r`.
    pub fn add_restrictions(
        &mut self,
        restrictions: &[Box<dyn Restriction>],
        store: &ParameterStore,
        center: &Point,
    ) {
        for (k, restriction) in restrictions.iter().enumerate() {
            let row = self.number_of_unknowns + k;
            for (id, derivative) in restriction.partial_derivatives(store, center) {
                if let Some(column) = store.column(id) {
                    self.matrix[(row, column)] += derivative;
                    self.matrix[(column, row)] += derivative;
                }
            }
            let misclosure = restriction.misclosure(store, center);
            self.max_abs_restriction = self.max_abs_restriction.max(misclosure.abs());
            self.vector[row] = -misclosure;
        }
    }

    /// Levenberg-Marquardt damping `N_ii += λ·N_ii` on the parameter block.
    pub fn apply_damping(&mut self, lambda: f64) {
        if lambda <= 0.0 {
            return;
        }
        for i in 0..self.number_of_unknowns {
            self.matrix[(i, i)] += lambda * self.matrix[(i, i)];
        }
    }

    /// Scale `N ← V·N·V`, `n ← V·n` with `Vᵢ = 1/√Nᵢᵢ` (1 for non-positive pivots).
    pub fn precondition(&mut self) {
        let size = self.size();
        let v = DVector::from_iterator(
            size,
            (0..size).map(|i| {
                let value = self.matrix[(i, i)];
                if value > EPS { 1.0 / value.sqrt() } else { 1.0 }
            }),
        );
        for j in 0..size {
            for i in 0..size {
                self.matrix[(i, j)] *= v[i] * v[j];
            }
            self.vector[j] *= v[j];
        }
        self.preconditioner = Some(v);
    }

    /// Solve in place; afterwards `vector` holds `[dx k]` and, if `invert`, `matrix` holds
    /// `N⁻¹`, both in unscaled units.
    pub fn solve(&mut self, backend: &dyn LinearAlgebra, invert: bool) -> AdjustmentResult<()> {
        backend.solve_symmetric(&mut self.matrix, &mut self.vector, invert)?;
        if let Some(v) = &self.preconditioner {
            let size = v.len();
            for j in 0..size {
                self.vector[j] *= v[j];
                if invert {
                    for i in 0..size {
                        self.matrix[(i, j)] *= v[i] * v[j];
                    }
                }
            }
        }
        Ok(())
    }

    /// Parameter part `dx` of the solution.
    pub fn parameter_update(&self) -> DVector<f64> {
        self.vector.rows(0, self.number_of_unknowns).into_owned()
    }

    /// Parameter block `Qxx` of the inverted matrix.
    pub fn parameter_cofactors(&self) -> DMatrix<f64> {
        let nou = self.number_of_unknowns;
        self.matrix.view((0, 0), (nou, nou)).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ParameterType, UnknownParameter};
    use crate::linalg::FaerBackend;
    use crate::primitive::Circle;
    use crate::restriction::AverageRestriction;
    use approx::assert_abs_diff_eq;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_linearize_circle_point() -> TestResult {
        let mut store = ParameterStore::new();
        let circle = Circle::new(&mut store);
        store.set_value(circle.radius(), 2.0);
        let nou = store.assign_columns();
        let primitives: Vec<Box<dyn GeometricPrimitive>> = vec![Box::new(circle)];
        let point = FeaturePoint::new("P", Point::new_2d(3.0, 0.0)).with_uncertainties(&[0.5, 0.5])?;

        let equations = linearize_point(
            &primitives,
            &store,
            &point,
            &Point::new_2d(0.0, 0.0),
            nou,
            1.0,
            &FaerBackend::new(),
        )?;
        // 3² − 2² = 5
        assert_abs_diff_eq!(equations.w[0], 5.0, epsilon = 1e-12);
        assert_eq!(equations.jx.shape(), (1, 3));
        assert_abs_diff_eq!(equations.jx[(0, 2)], -4.0, epsilon = 1e-12);
        // Jv = (6, 0), Qll = 0.25·I → W = 1/9
        assert_abs_diff_eq!(equations.weight[(0, 0)], 1.0 / 9.0, epsilon = 1e-12);
        assert_abs_diff_eq!(equations.omega(&DVector::zeros(nou)), 25.0 / 9.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_bordered_system_and_preconditioning() -> TestResult {
        // two unknowns observed directly, restricted to share their mean with a fixed 3
        let mut store = ParameterStore::new();
        let a = store.add(UnknownParameter::new(ParameterType::Length, 0.0));
        let b = store.add(UnknownParameter::new(ParameterType::Length, 0.0));
        let c = store.add(
            UnknownParameter::new(ParameterType::Constant, 3.0)
                .with_processing_type(crate::core::ProcessingType::Fixed),
        );
        let nou = store.assign_columns();
        let restrictions: Vec<Box<dyn Restriction>> =
            vec![Box::new(AverageRestriction::new(&store, vec![a, b], c)?)];

        let mut system = NormalEquationSystem::try_new(nou, 1)?;
        let equations = PointEquations {
            jx: DMatrix::identity(2, 2),
            jv: DMatrix::identity(2, 2),
            w: DVector::from_vec(vec![-2.0, -6.0]),
            qll: DMatrix::identity(2, 2),
            weight: DMatrix::from_diagonal(&DVector::from_vec(vec![4.0, 1.0])),
            residuals: DVector::zeros(2),
        };
        system.add_point(&equations);
        system.add_restrictions(&restrictions, &store, &Point::new_2d(0.0, 0.0));
        assert_abs_diff_eq!(system.max_abs_restriction(), 3.0, epsilon = 1e-15);
        system.precondition();
        system.solve(&FaerBackend::new(), true)?;

        // minimize 4(a−2)² + (b−6)² subject to a + b = 6 → a = 1.6, b = 4.4
        let dx = system.parameter_update();
        assert_abs_diff_eq!(dx[0], 1.6, epsilon = 1e-10);
        assert_abs_diff_eq!(dx[1], 4.4, epsilon = 1e-10);
        let q = system.parameter_cofactors();
        assert_abs_diff_eq!(q[(0, 1)], q[(1, 0)], epsilon = 1e-12);
        assert_abs_diff_eq!(q[(0, 0)] + q[(0, 1)], 0.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_damping_scales_parameter_diagonal_only() -> TestResult {
        let mut system = NormalEquationSystem::try_new(1, 1)?;
        system.matrix[(0, 0)] = 2.0;
        system.matrix[(0, 1)] = 1.0;
        system.matrix[(1, 0)] = 1.0;
        system.apply_damping(0.5);
        assert_eq!(system.matrix[(0, 0)], 3.0);
        assert_eq!(system.matrix[(1, 1)], 0.0);
        Ok(())
    }
}
