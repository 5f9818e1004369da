#![allow(clippy::needless_range_loop)]
//! Matrix decompositions and solvers.
//!
//! Dense Cholesky and symmetric eigenvalues via faer, and
//! the caching sparse Cholesky solver used for the normal equations of
//! the fit. The sparse solver keeps the symbolic analysis from the last
//! call and only redoes it when the sparsity pattern changes.

use std::borrow::Cow;

use faer::linalg::triangular_solve::{solve_lower_triangular_in_place, solve_upper_triangular_in_place};
use faer::{Mat, Parallelism, Side};
use tracing::debug;

use crate::dense::DenseMatrix;
use crate::error::{LinalgError, Result};
use crate::sparse::numeric::{NumericCholesky, PIVOT_TOLERANCE};
use crate::sparse::symbolic::{Ordering, SymbolicCholesky};
use crate::sparse::SparseMatrix;
use crate::vector::Vector;

/// Dense Cholesky decomposition computed by faer.
#[derive(Debug, Clone)]
pub struct CholeskyDecomp {
    /// Lower triangular factor L such that A = L * L'.
    pub l: DenseMatrix,
}

impl CholeskyDecomp {
    /// Factorise a symmetric positive definite matrix; only the lower
    /// triangle is read.
    ///
    /// A pivot below `PIVOT_TOLERANCE` times its diagonal entry is reported
    /// as [`LinalgError::SingularMatrix`]. When faer rejects the matrix the
    /// leading block up to the failing column decides between singular and
    /// indefinite from its smallest eigenvalue.
    pub fn new(a: &DenseMatrix) -> Result<Self> {
        if !a.is_square() {
            return Err(LinalgError::NotSquare {
                rows: a.nrows(),
                cols: a.ncols(),
            });
        }
        let n = a.nrows();
        for j in 0..n {
            for i in j..n {
                let v = a.get(i, j);
                if !v.is_finite() {
                    return Err(LinalgError::NotPositiveDefinite { column: j, pivot: v });
                }
            }
        }

        let llt = match a.as_faer().cholesky(Side::Lower) {
            Ok(llt) => llt,
            Err(e) => {
                let column = e.non_positive_definite_minor.saturating_sub(1).min(n.saturating_sub(1));
                return Err(classify_failure(a, column));
            }
        };
        let l = DenseMatrix::from_faer(llt.compute_l());
        for j in 0..n {
            let ljj = l.get(j, j);
            if !ljj.is_finite() {
                return Err(LinalgError::NotPositiveDefinite { column: j, pivot: ljj });
            }
            if ljj * ljj <= PIVOT_TOLERANCE * a.get(j, j).abs() {
                return Err(LinalgError::SingularMatrix { column: j });
            }
        }
        Ok(CholeskyDecomp { l })
    }

    /// Solve L * L' * x = b.
    pub fn solve(&self, b: &Vector) -> Result<Vector> {
        let n = self.l.nrows();
        if b.len() != n {
            return Err(LinalgError::DimensionMismatch {
                expected: n,
                got: b.len(),
            });
        }
        let mut rhs = Mat::from_fn(n, 1, |i, _| b[i]);
        self.solve_in_place(&mut rhs);
        Ok((0..n).map(|i| rhs.read(i, 0)).collect())
    }

    /// A^{-1} = (L L')^{-1}.
    pub fn inverse(&self) -> Result<DenseMatrix> {
        let n = self.l.nrows();
        let mut rhs = Mat::<f64>::identity(n, n);
        self.solve_in_place(&mut rhs);
        Ok(DenseMatrix::from_faer(rhs))
    }

    fn solve_in_place(&self, rhs: &mut Mat<f64>) {
        let l = self.l.as_faer().as_ref();
        solve_lower_triangular_in_place(l, rhs.as_mut(), Parallelism::None);
        solve_upper_triangular_in_place(l.transpose(), rhs.as_mut(), Parallelism::None);
    }
}

/// Error for a matrix whose factorisation broke down at `column`.
fn classify_failure(a: &DenseMatrix, column: usize) -> LinalgError {
    let k = column + 1;
    let block = DenseMatrix::from_faer(Mat::from_fn(k, k, |i, j| {
        if i >= j {
            a.get(i, j)
        } else {
            a.get(j, i)
        }
    }));
    let evals = match symmetric_eigenvalues(&block) {
        Ok(evals) => evals,
        Err(e) => return e,
    };
    let largest = evals.first().map_or(0.0, |e| e.abs());
    let smallest = evals.last().copied().unwrap_or(0.0);
    if smallest < -PIVOT_TOLERANCE.sqrt() * largest {
        LinalgError::NotPositiveDefinite { column, pivot: smallest }
    } else {
        LinalgError::SingularMatrix { column }
    }
}

/// Eigenvalues of a symmetric matrix, sorted in descending order.
pub fn symmetric_eigenvalues(a: &DenseMatrix) -> Result<Vec<f64>> {
    let n = a.nrows();
    if n != a.ncols() {
        return Err(LinalgError::NotSquare {
            rows: n,
            cols: a.ncols(),
        });
    }

    let mat = a.as_faer();
    let eigenvalues = mat.selfadjoint_eigendecomposition(Side::Lower);
    let s = eigenvalues.s();
    let mut evals: Vec<f64> = (0..n).map(|i| s.column_vector().read(i)).collect();
    evals.sort_by(|a, b| b.total_cmp(a));
    Ok(evals)
}

/// Ratio of largest to smallest absolute eigenvalue; infinite when singular.
pub fn condition_number(a: &DenseMatrix) -> Result<f64> {
    let evals = symmetric_eigenvalues(a)?;
    let abs: Vec<f64> = evals.iter().map(|e| e.abs()).collect();
    let max = abs.iter().copied().fold(0.0, f64::max);
    let min = abs.iter().copied().fold(f64::INFINITY, f64::min);
    if evals.is_empty() {
        return Ok(1.0);
    }
    if min == 0.0 {
        return Ok(f64::INFINITY);
    }
    Ok(max / min)
}

/// Solve a symmetric positive definite system A*x = b using Cholesky.
pub fn solve_spd(a: &DenseMatrix, b: &Vector) -> Result<Vector> {
    CholeskyDecomp::new(a)?.solve(b)
}

/// Compute the inverse of a symmetric positive definite matrix.
pub fn inverse_spd(a: &DenseMatrix) -> Result<DenseMatrix> {
    CholeskyDecomp::new(a)?.inverse()
}

/// Sparse Cholesky solver that caches the symbolic analysis between
/// factorisations of matrices sharing a sparsity pattern.
#[derive(Debug, Clone)]
pub struct SparseCholesky {
    ordering: Ordering,
    compress: bool,
    symbolic: Option<SymbolicCholesky>,
    analyses: usize,
}

impl SparseCholesky {
    pub fn new(ordering: Ordering) -> Self {
        Self {
            ordering,
            compress: true,
            symbolic: None,
            analyses: 0,
        }
    }

    /// Remove all-zero rows and columns before factorising.
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Number of symbolic analyses performed so far.
    pub fn analyses(&self) -> usize {
        self.analyses
    }

    pub fn symbolic(&self) -> Option<&SymbolicCholesky> {
        self.symbolic.as_ref()
    }

    /// Drop the cached analysis.
    pub fn reset(&mut self) {
        self.symbolic = None;
    }

    /// Factorise a symmetric positive definite matrix.
    pub fn factorize(&mut self, a: &SparseMatrix) -> Result<CholeskyFactor> {
        if !a.is_square() {
            return Err(LinalgError::NotSquare {
                rows: a.rows(),
                cols: a.cols(),
            });
        }
        let n = a.rows();
        let (work, keep) = if self.compress {
            let keep = a.active_lines();
            if keep.len() < n {
                debug!("Removed {} zero rows/columns before factorisation", n - keep.len());
                (Cow::Owned(a.submatrix(&keep)?), Some(keep))
            } else {
                (Cow::Borrowed(a), None)
            }
        } else {
            (Cow::Borrowed(a), None)
        };

        let pattern = work.pattern();
        let symbolic = match self.symbolic.take() {
            Some(s) if s.matches(&pattern) => s,
            _ => {
                self.analyses += 1;
                SymbolicCholesky::analyze(&pattern, self.ordering)?
            }
        };
        let numeric = NumericCholesky::factorize(&work, &symbolic);
        self.symbolic = Some(symbolic);
        let numeric = numeric.map_err(|e| match (e, keep.as_deref()) {
            (LinalgError::SingularMatrix { column }, Some(k)) => {
                LinalgError::SingularMatrix { column: k[column] }
            }
            (LinalgError::NotPositiveDefinite { column, pivot }, Some(k)) => {
                LinalgError::NotPositiveDefinite {
                    column: k[column],
                    pivot,
                }
            }
            (e, _) => e,
        })?;

        Ok(CholeskyFactor { n, keep, numeric })
    }

    /// Factorise and solve `a x = b`.
    pub fn solve(&mut self, a: &SparseMatrix, b: &Vector) -> Result<Vector> {
        self.factorize(a)?.solve(b)
    }
}

/// Sparse Cholesky factor, possibly of a compressed matrix.
#[derive(Debug, Clone)]
pub struct CholeskyFactor {
    n: usize,
    keep: Option<Vec<usize>>,
    numeric: NumericCholesky,
}

impl CholeskyFactor {
    /// Dimension of the original matrix.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Rows/columns that took part in the factorisation, if any were removed.
    pub fn kept(&self) -> Option<&[usize]> {
        self.keep.as_deref()
    }

    pub fn numeric(&self) -> &NumericCholesky {
        &self.numeric
    }

    /// Solve `A x = b`. Removed rows get a zero solution entry.
    pub fn solve(&self, b: &Vector) -> Result<Vector> {
        if b.len() != self.n {
            return Err(LinalgError::DimensionMismatch {
                expected: self.n,
                got: b.len(),
            });
        }
        let Some(keep) = self.keep.as_deref() else {
            return self.numeric.solve(b);
        };
        let sub: Vector = keep.iter().map(|&i| b[i]).collect();
        let xs = self.numeric.solve(&sub)?;
        let mut x = Vector::zeros(self.n);
        for (k, &i) in keep.iter().enumerate() {
            x[i] = xs[k];
        }
        Ok(x)
    }

    /// `A^{-1}`; removed rows and columns are zero.
    pub fn inverse(&self) -> Result<SparseMatrix> {
        let m = self.numeric.n();
        let mut colptr = Vec::with_capacity(m + 1);
        let mut rowind = Vec::new();
        let mut data = Vec::new();
        colptr.push(0);
        for j in 0..m {
            let col = self.numeric.solve(&Vector::unit(m, j)?)?;
            for (i, &v) in col.iter().enumerate() {
                if v != 0.0 {
                    rowind.push(i);
                    data.push(v);
                }
            }
            colptr.push(rowind.len());
        }
        let inv = SparseMatrix::from_csc(m, m, colptr, rowind, data)?;
        match self.keep.as_deref() {
            Some(keep) => inv.expand(keep, self.n),
            None => Ok(inv),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense_3x3() -> DenseMatrix {
        DenseMatrix::from_row_major(3, 3, &[4.0, 2.0, 1.0, 2.0, 5.0, 3.0, 1.0, 3.0, 6.0]).unwrap()
    }

    #[test]
    fn test_cholesky() {
        // A = [[4, 2], [2, 3]]
        let a = DenseMatrix::from_row_major(2, 2, &[4.0, 2.0, 2.0, 3.0]).unwrap();
        let chol = CholeskyDecomp::new(&a).unwrap();
        // L should be [[2, 0], [1, sqrt(2)]]
        assert!((chol.l.get(0, 0) - 2.0).abs() < 1e-10);
        assert!((chol.l.get(1, 0) - 1.0).abs() < 1e-10);
        assert!((chol.l.get(1, 1) - 2.0f64.sqrt()).abs() < 1e-10);
    }

    #[test]
    fn test_cholesky_solve() {
        let a = dense_3x3();
        let b = Vector::from(vec![1.0, 2.0, 3.0]);
        let x = CholeskyDecomp::new(&a).unwrap().solve(&b).unwrap();
        let ax = a.mul_vec(&x).unwrap();
        for i in 0..3 {
            assert!(
                (ax[i] - b[i]).abs() < 1e-10,
                "ax[{}]={} != b[{}]={}",
                i,
                ax[i],
                i,
                b[i]
            );
        }
    }

    #[test]
    fn test_cholesky_not_pd() {
        let a = DenseMatrix::from_row_major(2, 2, &[1.0, 3.0, 3.0, 1.0]).unwrap();
        assert!(matches!(
            CholeskyDecomp::new(&a),
            Err(LinalgError::NotPositiveDefinite { column: 1, .. })
        ));
        let s = DenseMatrix::from_row_major(2, 2, &[1.0, 1.0, 1.0, 1.0]).unwrap();
        assert!(matches!(
            CholeskyDecomp::new(&s),
            Err(LinalgError::SingularMatrix { column: 1 })
        ));
    }

    #[test]
    fn test_eigenvalues() {
        let a = DenseMatrix::from_row_major(2, 2, &[3.0, 1.0, 1.0, 3.0]).unwrap();
        let evals = symmetric_eigenvalues(&a).unwrap();
        assert!((evals[0] - 4.0).abs() < 1e-10);
        assert!((evals[1] - 2.0).abs() < 1e-10);
        assert!((condition_number(&a).unwrap() - 2.0).abs() < 1e-10);
    }

    #[test]
    fn test_inverse_spd() {
        let a = DenseMatrix::from_row_major(2, 2, &[4.0, 2.0, 2.0, 3.0]).unwrap();
        let inv = inverse_spd(&a).unwrap();
        let prod = a.mat_mul(&inv).unwrap();
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!(
                    (prod.get(i, j) - expected).abs() < 1e-10,
                    "A*A^{{-1}}[{},{}] = {}, expected {}",
                    i,
                    j,
                    prod.get(i, j),
                    expected
                );
            }
        }
    }

    #[test]
    fn test_cholesky_failure_column() {
        // Leading 2x2 block is positive definite, the full matrix is not.
        let a = DenseMatrix::from_row_major(3, 3, &[4.0, 2.0, 4.0, 2.0, 5.0, 1.0, 4.0, 1.0, 1.0])
            .unwrap();
        match CholeskyDecomp::new(&a) {
            Err(LinalgError::NotPositiveDefinite { column, pivot }) => {
                assert_eq!(column, 2);
                assert!(pivot < 0.0);
            }
            other => panic!("expected NotPositiveDefinite, got {:?}", other),
        }

        let mut b = dense_3x3();
        b.set(2, 1, f64::NAN);
        assert!(matches!(
            CholeskyDecomp::new(&b),
            Err(LinalgError::NotPositiveDefinite { column: 1, .. })
        ));
    }

    #[test]
    fn test_cholesky_inverse_identity() {
        let a = dense_3x3();
        let inv = CholeskyDecomp::new(&a).unwrap().inverse().unwrap();
        let prod = inv.mat_mul(&a).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((prod.get(i, j) - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_sparse_matches_dense() {
        let a = dense_3x3();
        let sa = SparseMatrix::from_dense(&a);
        let b = Vector::from(vec![1.0, -2.0, 0.5]);
        let xd = solve_spd(&a, &b).unwrap();
        let xs = sa.cholesky_solve(&b, false).unwrap();
        for i in 0..3 {
            assert!((xd[i] - xs[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_symbolic_is_reused() {
        let a = SparseMatrix::from_dense(&dense_3x3());
        let mut solver = SparseCholesky::new(Ordering::MinimumDegree);
        let b = Vector::from(vec![1.0, 1.0, 1.0]);
        solver.solve(&a, &b).unwrap();
        solver.solve(&a.scale(2.0), &b).unwrap();
        assert_eq!(solver.analyses(), 1);
        // a new non-zero changes the pattern
        let mut c = SparseMatrix::identity(3).scale(10.0);
        c.set(0, 1, 1.0).unwrap();
        c.set(1, 0, 1.0).unwrap();
        solver.solve(&c, &b).unwrap();
        assert_eq!(solver.analyses(), 2);
    }

    #[test]
    fn test_zero_row_compression() {
        // parameter 1 is fixed: its row and column are empty
        let a = SparseMatrix::from_triplets(
            3,
            3,
            &[0, 2, 0, 2],
            &[0, 0, 2, 2],
            &[4.0, 1.0, 1.0, 3.0],
        )
        .unwrap();
        let b = Vector::from(vec![1.0, 7.0, 2.0]);
        assert!(matches!(
            a.cholesky_decompose(false),
            Err(LinalgError::SingularMatrix { .. })
        ));
        let factor = a.cholesky_decompose(true).unwrap();
        assert_eq!(factor.kept(), Some(&[0usize, 2][..]));
        let x = factor.solve(&b).unwrap();
        assert_eq!(x[1], 0.0);
        let ax = a.mul_vec(&x).unwrap();
        assert!((ax[0] - 1.0).abs() < 1e-12);
        assert!((ax[2] - 2.0).abs() < 1e-12);

        let inv = a.cholesky_invert(true).unwrap();
        assert_eq!(inv.rows(), 3);
        assert_eq!(inv.extract_row(1).unwrap().norm(), 0.0);
        // 2x2 inverse of [[4,1],[1,3]] = 1/11 [[3,-1],[-1,4]]
        assert!((inv.get(0, 0) - 3.0 / 11.0).abs() < 1e-12);
        assert!((inv.get(2, 0) + 1.0 / 11.0).abs() < 1e-12);
        assert!((inv.get(2, 2) - 4.0 / 11.0).abs() < 1e-12);
    }

    #[test]
    fn test_compressed_error_reports_original_column() {
        let a = SparseMatrix::from_triplets(
            3,
            3,
            &[0, 2, 0, 2],
            &[0, 0, 2, 2],
            &[1.0, 1.0, 1.0, 1.0],
        )
        .unwrap();
        let err = a.cholesky_decompose(true).unwrap_err();
        assert!(matches!(err, LinalgError::SingularMatrix { column } if column == 0 || column == 2));
    }
}
