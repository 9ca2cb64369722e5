use nalgebra::{DMatrix, DVector, SVD, SymmetricEigen};
use std::ops::Range;

use crate::linalg::{
    EPS, EigenWindow, LinAlgError, LinAlgResult, LinearAlgebra, SvdDecomposition, ensure_finite,
    ensure_square, residual_acceptable,
};

const MAX_SWEEPS: usize = 1000;

/// Portable backend using only nalgebra decompositions.
///
/// Symmetric systems are solved with partially pivoted LU; a zero pivot is reported
/// as [`LinAlgError::SingularMatrix`].
#[derive(Debug, Clone, Default)]
pub struct NalgebraBackend;

impl NalgebraBackend {
    pub fn new() -> Self {
        NalgebraBackend
    }
}

impl LinearAlgebra for NalgebraBackend {
    fn solve_symmetric(
        &self,
        matrix: &mut DMatrix<f64>,
        rhs: &mut DVector<f64>,
        invert: bool,
    ) -> LinAlgResult<()> {
        ensure_square(matrix, "solve_symmetric")?;
        if rhs.len() != matrix.nrows() {
            return Err(LinAlgError::InvalidArgument(format!(
                "solve_symmetric: right-hand side has {} rows, matrix has {}",
                rhs.len(),
                matrix.nrows()
            ))
            .log());
        }
        if matrix.is_empty() {
            return Ok(());
        }

        let lu = matrix.clone().lu();
        let solution = lu.solve(rhs).ok_or(LinAlgError::SingularMatrix)?;
        let solution_matrix = DMatrix::from_column_slice(solution.len(), 1, solution.as_slice());
        let rhs_matrix = DMatrix::from_column_slice(rhs.len(), 1, rhs.as_slice());
        if !residual_acceptable(matrix, &solution_matrix, &rhs_matrix) {
            return Err(LinAlgError::SingularMatrix);
        }
        if invert {
            *matrix = lu.try_inverse().ok_or(LinAlgError::SingularMatrix)?;
        }
        *rhs = solution;
        Ok(())
    }

    fn invert_symmetric(&self, matrix: &mut DMatrix<f64>) -> LinAlgResult<()> {
        ensure_square(matrix, "invert_symmetric")?;
        let inverse = matrix
            .clone()
            .lu()
            .try_inverse()
            .ok_or(LinAlgError::SingularMatrix)?;
        if !residual_acceptable(matrix, &inverse, &DMatrix::identity(matrix.nrows(), matrix.nrows()))
        {
            return Err(LinAlgError::SingularMatrix);
        }
        *matrix = inverse;
        Ok(())
    }

    fn svd(&self, matrix: &DMatrix<f64>) -> LinAlgResult<SvdDecomposition> {
        ensure_finite(matrix, "svd")?;
        let (rows, cols) = matrix.shape();
        let k = rows.min(cols);
        if k == 0 {
            return Ok(SvdDecomposition {
                u: DMatrix::zeros(rows, 0),
                singular_values: DVector::zeros(0),
                v_t: DMatrix::zeros(0, cols),
            });
        }

        let svd = SVD::try_new(matrix.clone(), true, true, EPS, MAX_SWEEPS).ok_or_else(|| {
            LinAlgError::NotConverged("nalgebra singular value decomposition".to_string()).log()
        })?;
        let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
            return Err(LinAlgError::FactorizationFailed(
                "singular vectors were not computed".to_string(),
            )
            .log());
        };

        let mut order: Vec<usize> = (0..k).collect();
        order.sort_by(|&a, &b| svd.singular_values[b].total_cmp(&svd.singular_values[a]));

        Ok(SvdDecomposition {
            u: DMatrix::from_fn(rows, k, |i, j| u[(i, order[j])]),
            singular_values: DVector::from_fn(k, |i, _| svd.singular_values[order[i]]),
            v_t: DMatrix::from_fn(k, cols, |i, j| v_t[(order[i], j)]),
        })
    }

    fn partial_symmetric_eigen(
        &self,
        matrix: &DMatrix<f64>,
        range: Range<usize>,
        with_vectors: bool,
    ) -> LinAlgResult<EigenWindow> {
        ensure_square(matrix, "partial_symmetric_eigen")?;
        ensure_finite(matrix, "partial_symmetric_eigen")?;
        let n = matrix.nrows();
        if range.start > range.end || range.end > n {
            return Err(LinAlgError::InvalidArgument(format!(
                "eigen window {:?} outside 0..{}",
                range, n
            ))
            .log());
        }

        let eigen = SymmetricEigen::try_new(matrix.clone(), EPS, MAX_SWEEPS).ok_or_else(|| {
            LinAlgError::NotConverged("nalgebra symmetric eigen decomposition".to_string()).log()
        })?;

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));
        let window = &order[range];

        Ok(EigenWindow {
            values: DVector::from_fn(window.len(), |i, _| eigen.eigenvalues[window[i]]),
            vectors: with_vectors.then(|| {
                DMatrix::from_fn(n, window.len(), |i, j| eigen.eigenvectors[(i, window[j])])
            }),
        })
    }
}
