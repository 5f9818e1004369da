#![allow(clippy::needless_range_loop)]
//! Numeric phase of the sparse Cholesky factorisation.
//!
//! Up-looking factorisation: row `k` of `L` is obtained by a sparse
//! triangular solve whose non-zero pattern is the elimination-tree reach
//! of column `k` of the permuted matrix.

use tracing::trace;

use super::symbolic::{ereach, symperm_upper, SymbolicCholesky};
use super::SparseMatrix;
use crate::error::{LinalgError, Result};
use crate::vector::{iperm, perm, Vector};

/// Pivots below this fraction of the original diagonal count as zero.
pub const PIVOT_TOLERANCE: f64 = 1e-14;

/// `P A P' = L L'` with `L` stored column-wise, diagonal first.
#[derive(Debug, Clone)]
pub struct NumericCholesky {
    n: usize,
    l: SparseMatrix,
    pinv: Option<Vec<usize>>,
}

impl NumericCholesky {
    /// Factorise `a` using a symbolic analysis of the same pattern.
    ///
    /// The input is not modified. Only the upper triangle of `a` is read.
    pub fn factorize(a: &SparseMatrix, symbolic: &SymbolicCholesky) -> Result<Self> {
        if !a.is_square() {
            return Err(LinalgError::NotSquare {
                rows: a.rows(),
                cols: a.cols(),
            });
        }
        let a = a.committed();
        if !symbolic.matches(&a.pattern()) {
            return Err(LinalgError::PatternMismatch);
        }
        let n = symbolic.n();
        let (cp, ci, cx) = symperm_upper(n, &a.colptr, &a.rowind, Some(&a.data), symbolic.pinv());

        let lp = symbolic.lcolptr().to_vec();
        let lnz = lp[n];
        let mut li = vec![0usize; lnz];
        let mut lx = vec![0.0f64; lnz];
        let mut next = lp.clone();

        let mut x = vec![0.0f64; n];
        let mut marks = vec![usize::MAX; n];
        let mut path = Vec::new();
        let mut reach = Vec::new();

        for k in 0..n {
            ereach(&cp, &ci, k, symbolic.parent(), &mut marks, k, &mut path, &mut reach);

            let mut akk = 0.0;
            for p in cp[k]..cp[k + 1] {
                let i = ci[p];
                if i <= k {
                    x[i] += cx[p];
                    if i == k {
                        akk += cx[p];
                    }
                }
            }
            let mut d = x[k];
            x[k] = 0.0;

            for &i in &reach {
                let lki = x[i] / lx[lp[i]];
                x[i] = 0.0;
                for p in (lp[i] + 1)..next[i] {
                    x[li[p]] -= lx[p] * lki;
                }
                d -= lki * lki;
                let p = next[i];
                next[i] += 1;
                li[p] = k;
                lx[p] = lki;
            }

            let column = symbolic.original_index(k);
            if !d.is_finite() {
                return Err(LinalgError::NotPositiveDefinite { column, pivot: d });
            }
            if d == 0.0 || d.abs() <= PIVOT_TOLERANCE * akk.abs() {
                return Err(LinalgError::SingularMatrix { column });
            }
            if d < 0.0 {
                return Err(LinalgError::NotPositiveDefinite { column, pivot: d });
            }

            let p = next[k];
            next[k] += 1;
            li[p] = k;
            lx[p] = d.sqrt();
        }

        trace!("Numeric Cholesky: n={}, nnz(L)={}", n, lnz);

        Ok(Self {
            n,
            l: SparseMatrix::from_raw_parts(n, n, lp, li, lx),
            pinv: symbolic.pinv().map(<[usize]>::to_vec),
        })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    /// Lower-triangular factor of the permuted matrix.
    pub fn l(&self) -> &SparseMatrix {
        &self.l
    }

    pub fn pinv(&self) -> Option<&[usize]> {
        self.pinv.as_deref()
    }

    /// Solve `A x = b`: `L y = P b`, `L' z = y`, `x = P' z`.
    pub fn solve(&self, b: &Vector) -> Result<Vector> {
        if b.len() != self.n {
            return Err(LinalgError::DimensionMismatch {
                expected: self.n,
                got: b.len(),
            });
        }
        let mut x = iperm(b, self.pinv())?;
        self.lsolve(x.as_mut_slice());
        self.ltsolve(x.as_mut_slice());
        perm(&x, self.pinv())
    }

    /// In-place forward substitution `L y = x`.
    fn lsolve(&self, x: &mut [f64]) {
        for j in 0..self.n {
            let (rows, vals) = self.l.column(j);
            x[j] /= vals[0];
            let xj = x[j];
            for p in 1..rows.len() {
                x[rows[p]] -= vals[p] * xj;
            }
        }
    }

    /// In-place backward substitution `L' z = x`.
    fn ltsolve(&self, x: &mut [f64]) {
        for j in (0..self.n).rev() {
            let (rows, vals) = self.l.column(j);
            let mut s = x[j];
            for p in 1..rows.len() {
                s -= vals[p] * x[rows[p]];
            }
            x[j] = s / vals[0];
        }
    }

    /// Log-determinant of `A`, `2 sum(log L_jj)`.
    pub fn log_determinant(&self) -> f64 {
        (0..self.n)
            .map(|j| 2.0 * self.l.column(j).1[0].ln())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::symbolic::Ordering;

    fn spd() -> SparseMatrix {
        // [4 1 0 1]
        // [1 4 1 0]
        // [0 1 4 1]
        // [1 0 1 4]
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        let mut vals = Vec::new();
        for i in 0..4 {
            rows.push(i);
            cols.push(i);
            vals.push(4.0);
            let j = (i + 1) % 4;
            rows.extend([i, j]);
            cols.extend([j, i]);
            vals.extend([1.0, 1.0]);
        }
        SparseMatrix::from_triplets(4, 4, &rows, &cols, &vals).unwrap()
    }

    fn factorize(a: &SparseMatrix, ordering: Ordering) -> Result<NumericCholesky> {
        let s = SymbolicCholesky::analyze(&a.pattern(), ordering)?;
        NumericCholesky::factorize(a, &s)
    }

    #[test]
    fn test_factor_reproduces_matrix() {
        let a = spd();
        let f = factorize(&a, Ordering::Natural).unwrap();
        let l = f.l();
        let llt = l.mul(&l.transpose()).unwrap();
        for i in 0..4 {
            for j in 0..4 {
                assert!(
                    (llt.get(i, j) - a.get(i, j)).abs() < 1e-12,
                    "LL'[{},{}] = {}, A = {}",
                    i,
                    j,
                    llt.get(i, j),
                    a.get(i, j)
                );
            }
        }
    }

    #[test]
    fn test_solve_with_ordering() {
        let a = spd();
        let b = Vector::from(vec![1.0, 2.0, 3.0, 4.0]);
        for ordering in [Ordering::Natural, Ordering::MinimumDegree] {
            let x = factorize(&a, ordering).unwrap().solve(&b).unwrap();
            let ax = a.mul_vec(&x).unwrap();
            for i in 0..4 {
                assert!((ax[i] - b[i]).abs() < 1e-12, "{:?}: row {}", ordering, i);
            }
        }
    }

    #[test]
    fn test_singular_detected() {
        let a = SparseMatrix::from_triplets(2, 2, &[0, 0, 1, 1], &[0, 1, 0, 1], &[1.0, 1.0, 1.0, 1.0])
            .unwrap();
        assert!(matches!(
            factorize(&a, Ordering::Natural),
            Err(LinalgError::SingularMatrix { column: 1 })
        ));
    }

    #[test]
    fn test_indefinite_detected() {
        let a = SparseMatrix::from_triplets(2, 2, &[0, 0, 1, 1], &[0, 1, 0, 1], &[1.0, 3.0, 3.0, 1.0])
            .unwrap();
        let err = factorize(&a, Ordering::Natural).unwrap_err();
        assert!(matches!(err, LinalgError::NotPositiveDefinite { column: 1, .. }));
        assert!(err.is_numerical_failure());
    }

    #[test]
    fn test_nan_is_not_positive_definite() {
        let a = SparseMatrix::from_triplets(1, 1, &[0], &[0], &[f64::NAN]).unwrap();
        assert!(matches!(
            factorize(&a, Ordering::Natural),
            Err(LinalgError::NotPositiveDefinite { column: 0, .. })
        ));
    }

    #[test]
    fn test_pattern_mismatch() {
        let a = spd();
        let s = SymbolicCholesky::analyze(&SparseMatrix::identity(4).pattern(), Ordering::Natural)
            .unwrap();
        assert!(matches!(
            NumericCholesky::factorize(&a, &s),
            Err(LinalgError::PatternMismatch)
        ));
    }

    #[test]
    fn test_log_determinant() {
        let a = SparseMatrix::from_triplets(2, 2, &[0, 1], &[0, 1], &[2.0, 8.0]).unwrap();
        let f = factorize(&a, Ordering::MinimumDegree).unwrap();
        assert!((f.log_determinant() - 16.0f64.ln()).abs() < 1e-12);
    }
}
