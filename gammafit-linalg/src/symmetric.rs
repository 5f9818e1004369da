#![allow(clippy::needless_range_loop)]
//! Symmetric matrix with packed lower-triangle storage.

use serde::{Deserialize, Serialize};

use crate::decomposition::CholeskyDecomp;
use crate::dense::DenseMatrix;
use crate::error::{LinalgError, Result};
use crate::vector::Vector;

/// Square symmetric matrix storing only the lower triangle, column by
/// column: element (i, j) with i >= j lives at `j*n - j*(j-1)/2 + (i - j)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymMatrix {
    n: usize,
    data: Vec<f64>,
}

impl SymMatrix {
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            data: vec![0.0; n * (n + 1) / 2],
        }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n);
        for i in 0..n {
            m.set(i, i, 1.0);
        }
        m
    }

    /// Build from the lower triangle of a square dense matrix.
    pub fn from_dense_lower(a: &DenseMatrix) -> Result<Self> {
        if !a.is_square() {
            return Err(LinalgError::NotSquare {
                rows: a.nrows(),
                cols: a.ncols(),
            });
        }
        let n = a.nrows();
        let mut m = Self::zeros(n);
        for j in 0..n {
            for i in j..n {
                m.set(i, j, a.get(i, j));
            }
        }
        Ok(m)
    }

    pub fn size(&self) -> usize {
        self.n
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[self.packed(row, col)]
    }

    /// Set (row, col) and, implicitly, (col, row).
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        let k = self.packed(row, col);
        self.data[k] = value;
    }

    pub fn add_to(&mut self, row: usize, col: usize, value: f64) {
        let k = self.packed(row, col);
        self.data[k] += value;
    }

    #[inline]
    fn packed(&self, row: usize, col: usize) -> usize {
        let (i, j) = if row >= col { (row, col) } else { (col, row) };
        // columns 0..j hold n, n-1, ..., n-j+1 elements
        j * self.n - j * j.saturating_sub(1) / 2 + (i - j)
    }

    /// Checked element read.
    pub fn at(&self, row: usize, col: usize) -> Result<f64> {
        if row >= self.n || col >= self.n {
            return Err(LinalgError::MatrixIndexOutOfRange {
                row,
                col,
                rows: self.n,
                cols: self.n,
            });
        }
        Ok(self.get(row, col))
    }

    pub fn diag(&self) -> Vector {
        (0..self.n).map(|i| self.get(i, i)).collect()
    }

    pub fn mul_vec(&self, v: &Vector) -> Result<Vector> {
        if v.len() != self.n {
            return Err(LinalgError::DimensionMismatch {
                expected: self.n,
                got: v.len(),
            });
        }
        let mut r = Vector::zeros(self.n);
        for j in 0..self.n {
            r[j] += self.get(j, j) * v[j];
            for i in (j + 1)..self.n {
                let a = self.get(i, j);
                r[i] += a * v[j];
                r[j] += a * v[i];
            }
        }
        Ok(r)
    }

    pub fn to_dense(&self) -> DenseMatrix {
        let mut d = DenseMatrix::zeros(self.n, self.n);
        for j in 0..self.n {
            for i in j..self.n {
                let a = self.get(i, j);
                d.set(i, j, a);
                d.set(j, i, a);
            }
        }
        d
    }

    /// Dense Cholesky factorisation of this matrix.
    pub fn cholesky(&self) -> Result<CholeskyDecomp> {
        CholeskyDecomp::new(&self.to_dense())
    }

    /// Solve `self * x = b` through a Cholesky factorisation.
    pub fn cholesky_solve(&self, b: &Vector) -> Result<Vector> {
        self.cholesky()?.solve(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric_access() {
        let mut m = SymMatrix::zeros(3);
        m.set(2, 0, 5.0);
        assert_eq!(m.get(0, 2), 5.0);
        m.add_to(0, 2, 1.0);
        assert_eq!(m.get(2, 0), 6.0);
        assert!(m.at(3, 0).is_err());
    }

    #[test]
    fn test_packed_layout_distinct() {
        let n = 4;
        let mut m = SymMatrix::zeros(n);
        let mut k = 1.0;
        for j in 0..n {
            for i in j..n {
                m.set(i, j, k);
                k += 1.0;
            }
        }
        let mut k = 1.0;
        for j in 0..n {
            for i in j..n {
                assert_eq!(m.get(i, j), k, "element ({},{})", i, j);
                k += 1.0;
            }
        }
    }

    #[test]
    fn test_mul_vec_matches_dense() {
        let a = DenseMatrix::from_row_major(3, 3, &[4.0, 2.0, 1.0, 2.0, 5.0, 3.0, 1.0, 3.0, 6.0])
            .unwrap();
        let s = SymMatrix::from_dense_lower(&a).unwrap();
        let v = Vector::from(vec![1.0, -1.0, 2.0]);
        assert_eq!(s.mul_vec(&v).unwrap(), a.mul_vec(&v).unwrap());
    }

    #[test]
    fn test_cholesky_solve() {
        let a = DenseMatrix::from_row_major(2, 2, &[4.0, 2.0, 2.0, 3.0]).unwrap();
        let s = SymMatrix::from_dense_lower(&a).unwrap();
        let b = Vector::from(vec![1.0, 2.0]);
        let x = s.cholesky_solve(&b).unwrap();
        let ax = s.mul_vec(&x).unwrap();
        for i in 0..2 {
            assert!((ax[i] - b[i]).abs() < 1e-12);
        }
    }
}
