#![allow(clippy::needless_range_loop)]
//! Dense matrix operations backed by faer.
//!
//! Wraps faer's column-major Mat<f64>. Used for the dense solve of small
//! curvature blocks and as the reference representation that sparse and
//! symmetric matrices convert to and from.

use faer::Mat;

use crate::error::{LinalgError, Result};
use crate::vector::Vector;

/// A dense matrix wrapper around faer's `Mat<f64>`.
#[derive(Debug, Clone)]
pub struct DenseMatrix {
    inner: Mat<f64>,
}

impl DenseMatrix {
    /// Create a new dense matrix filled with zeros.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            inner: Mat::zeros(nrows, ncols),
        }
    }

    /// Create a dense matrix from a flat slice in row-major order.
    pub fn from_row_major(nrows: usize, ncols: usize, data: &[f64]) -> Result<Self> {
        if data.len() != nrows * ncols {
            return Err(LinalgError::DimensionMismatch {
                expected: nrows * ncols,
                got: data.len(),
            });
        }
        let inner = Mat::from_fn(nrows, ncols, |i, j| data[i * ncols + j]);
        Ok(Self { inner })
    }

    pub fn nrows(&self) -> usize {
        self.inner.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.inner.ncols()
    }

    pub fn is_square(&self) -> bool {
        self.nrows() == self.ncols()
    }

    /// Get element at (row, col). Panics outside the matrix.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.inner.read(row, col)
    }

    /// Set element at (row, col). Panics outside the matrix.
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.inner.write(row, col, value);
    }

    fn check_index(&self, row: usize, col: usize) -> Result<()> {
        if row >= self.nrows() || col >= self.ncols() {
            return Err(LinalgError::MatrixIndexOutOfRange {
                row,
                col,
                rows: self.nrows(),
                cols: self.ncols(),
            });
        }
        Ok(())
    }

    /// Checked element read.
    pub fn at(&self, row: usize, col: usize) -> Result<f64> {
        self.check_index(row, col)?;
        Ok(self.inner.read(row, col))
    }

    pub fn as_faer(&self) -> &Mat<f64> {
        &self.inner
    }

    pub fn from_faer(mat: Mat<f64>) -> Self {
        Self { inner: mat }
    }

    /// Matrix-vector product: self * v.
    pub fn mul_vec(&self, v: &Vector) -> Result<Vector> {
        if self.ncols() != v.len() {
            return Err(LinalgError::DimensionMismatch {
                expected: self.ncols(),
                got: v.len(),
            });
        }
        let n = self.nrows();
        let mut result = Vector::zeros(n);
        for j in 0..self.ncols() {
            let vj = v[j];
            if vj == 0.0 {
                continue;
            }
            for i in 0..n {
                result[i] += self.inner.read(i, j) * vj;
            }
        }
        Ok(result)
    }

    /// Matrix-matrix product: self * other.
    pub fn mat_mul(&self, other: &DenseMatrix) -> Result<DenseMatrix> {
        if self.ncols() != other.nrows() {
            return Err(LinalgError::DimensionMismatch {
                expected: self.ncols(),
                got: other.nrows(),
            });
        }
        let result = &self.inner * &other.inner;
        Ok(DenseMatrix { inner: result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros() {
        let m = DenseMatrix::zeros(3, 4);
        assert_eq!(m.nrows(), 3);
        assert_eq!(m.ncols(), 4);
        assert_eq!(m.get(0, 0), 0.0);
    }

    #[test]
    fn test_bad_shape() {
        assert!(DenseMatrix::from_row_major(2, 2, &[1.0, 2.0, 3.0]).is_err());
        let m = DenseMatrix::zeros(2, 3);
        assert!(m.mul_vec(&Vector::zeros(2)).is_err());
        assert!(m.mat_mul(&DenseMatrix::zeros(2, 2)).is_err());
        assert!(matches!(
            m.at(2, 0),
            Err(LinalgError::MatrixIndexOutOfRange { row: 2, .. })
        ));
    }

    #[test]
    fn test_mul_vec() {
        let m = DenseMatrix::from_row_major(2, 2, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let v = Vector::from(vec![1.0, 1.0]);
        assert_eq!(m.mul_vec(&v).unwrap().as_slice(), &[3.0, 7.0]);
    }

    #[test]
    fn test_mat_mul() {
        let a = DenseMatrix::from_row_major(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let b = DenseMatrix::from_row_major(3, 2, &[7.0, 8.0, 9.0, 10.0, 11.0, 12.0]).unwrap();
        let c = a.mat_mul(&b).unwrap();
        assert_eq!(c.nrows(), 2);
        assert_eq!(c.ncols(), 2);
        assert!((c.get(0, 0) - 58.0).abs() < 1e-10);
        assert!((c.get(0, 1) - 64.0).abs() < 1e-10);
        assert!((c.get(1, 0) - 139.0).abs() < 1e-10);
        assert!((c.get(1, 1) - 154.0).abs() < 1e-10);
    }
}
