use faer::{
    Mat, MatRef, Side,
    linalg::solvers::{Lblt, Solve},
};
use nalgebra::{DMatrix, DVector};
use std::ops::Range;
use tracing::debug;

use crate::linalg::{
    EigenWindow, LinAlgError, LinAlgResult, LinearAlgebra, SvdDecomposition, ensure_finite,
    ensure_square, residual_acceptable,
};

/// Production backend built on faer's dense decompositions.
#[derive(Debug, Clone, Default)]
pub struct FaerBackend;

impl FaerBackend {
    pub fn new() -> Self {
        FaerBackend
    }
}

fn to_faer(matrix: &DMatrix<f64>) -> Mat<f64> {
    Mat::from_fn(matrix.nrows(), matrix.ncols(), |i, j| matrix[(i, j)])
}

fn from_faer(matrix: MatRef<'_, f64>) -> DMatrix<f64> {
    DMatrix::from_fn(matrix.nrows(), matrix.ncols(), |i, j| matrix[(i, j)])
}

impl LinearAlgebra for FaerBackend {
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
        let n = matrix.nrows();
        if n == 0 {
            return Ok(());
        }

        let faer_matrix = to_faer(matrix);
        let factorization = Lblt::new(faer_matrix.as_ref(), Side::Lower);

        let mut solution = Mat::from_fn(n, 1, |i, _| rhs[i]);
        factorization.solve_in_place(solution.as_mut());
        let solution = from_faer(solution.as_ref());
        let rhs_matrix = DMatrix::from_column_slice(n, 1, rhs.as_slice());
        if !residual_acceptable(matrix, &solution, &rhs_matrix) {
            debug!("LBLᵀ solve rejected, residual too large for {}x{} system", n, n);
            return Err(LinAlgError::SingularMatrix);
        }

        if invert {
            let mut inverse = Mat::<f64>::identity(n, n);
            factorization.solve_in_place(inverse.as_mut());
            let inverse = from_faer(inverse.as_ref());
            if !residual_acceptable(matrix, &inverse, &DMatrix::identity(n, n)) {
                return Err(LinAlgError::SingularMatrix);
            }
            *matrix = inverse;
        }

        rhs.copy_from(&solution.column(0));
        Ok(())
    }

    fn invert_symmetric(&self, matrix: &mut DMatrix<f64>) -> LinAlgResult<()> {
        ensure_square(matrix, "invert_symmetric")?;
        let n = matrix.nrows();
        if n == 0 {
            return Ok(());
        }
        let factorization = Lblt::new(to_faer(matrix).as_ref(), Side::Lower);
        let mut inverse = Mat::<f64>::identity(n, n);
        factorization.solve_in_place(inverse.as_mut());
        let inverse = from_faer(inverse.as_ref());
        if !residual_acceptable(matrix, &inverse, &DMatrix::identity(n, n)) {
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

        let svd = to_faer(matrix).svd().map_err(|e| {
            LinAlgError::NotConverged("faer singular value decomposition".to_string())
                .log_with_source(e)
        })?;
        let u = svd.U();
        let v = svd.V();
        let s = svd.S().column_vector();

        // faer returns nonincreasing values; keep the ordering explicit
        let mut order: Vec<usize> = (0..k).collect();
        order.sort_by(|&a, &b| s[b].total_cmp(&s[a]));

        Ok(SvdDecomposition {
            u: DMatrix::from_fn(rows, k, |i, j| u[(i, order[j])]),
            singular_values: DVector::from_fn(k, |i, _| s[order[i]]),
            v_t: DMatrix::from_fn(k, cols, |i, j| v[(j, order[i])]),
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

        let eigen = to_faer(matrix)
            .self_adjoint_eigen(Side::Lower)
            .map_err(|e| {
                LinAlgError::NotConverged("faer self-adjoint eigen decomposition".to_string())
                    .log_with_source(e)
            })?;
        let values = eigen.S().column_vector();
        let vectors = eigen.U();

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
        let window = &order[range];

        Ok(EigenWindow {
            values: DVector::from_fn(window.len(), |i, _| values[window[i]]),
            vectors: with_vectors
                .then(|| DMatrix::from_fn(n, window.len(), |i, j| vectors[(i, window[j])])),
        })
    }
}
