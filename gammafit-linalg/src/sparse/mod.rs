#![allow(clippy::needless_range_loop)]
//! Compressed-column sparse matrix with dynamic fill-in.
//!
//! Storage is the classic CSC triple (`colptr`, `rowind`, `data`) with
//! row indices sorted inside each column. New non-zeros can be inserted
//! at any time; the element arrays grow by at least `mem_block` elements
//! (or by their current size, whichever is larger) so repeated insertion
//! is amortised. Setting a single absent element stages it as a *pending*
//! element which is merged into the arrays before the next structural
//! operation; column-wise assembly should go through the fill stack.
//!
//! The symbolic (`symbolic`) and numeric (`numeric`) Cholesky phases live
//! in submodules and communicate through a value-free [`SparsityPattern`].

pub mod numeric;
pub mod pattern;
pub mod stack;
pub mod symbolic;

use std::borrow::Cow;
use std::fmt;
use std::ops::Range;

use sprs::{CsMatI, TriMat};

use crate::decomposition::{CholeskyFactor, SparseCholesky};
use crate::dense::DenseMatrix;
use crate::error::{LinalgError, PatternError, Result};
use crate::symmetric::SymMatrix;
use crate::vector::Vector;

pub use pattern::SparsityPattern;
pub use symbolic::{Ordering, SymbolicCholesky};
pub use numeric::NumericCholesky;

use stack::{compress_vector, mix_column, FillStack};

/// Default growth increment of the element arrays.
pub const DEFAULT_MEM_BLOCK: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Pending {
    row: usize,
    col: usize,
    value: f64,
}

/// Sparse matrix in compressed-column format.
#[derive(Debug, Clone)]
pub struct SparseMatrix {
    rows: usize,
    cols: usize,
    colptr: Vec<usize>,
    rowind: Vec<usize>,
    data: Vec<f64>,
    mem_block: usize,
    pending: Option<Pending>,
    stack: Option<FillStack>,
}

impl SparseMatrix {
    /// Empty `rows x cols` matrix (all elements implicitly zero).
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            colptr: vec![0; cols + 1],
            rowind: Vec::new(),
            data: Vec::new(),
            mem_block: DEFAULT_MEM_BLOCK,
            pending: None,
            stack: None,
        }
    }

    /// Set the growth increment of the element arrays.
    pub fn with_mem_block(mut self, mem_block: usize) -> Self {
        self.mem_block = mem_block.max(1);
        self
    }

    /// Sparse identity matrix.
    pub fn identity(n: usize) -> Self {
        Self::from_raw_parts(n, n, (0..=n).collect(), (0..n).collect(), vec![1.0; n])
    }

    /// Assemble from validated raw CSC arrays.
    pub(crate) fn from_raw_parts(
        rows: usize,
        cols: usize,
        colptr: Vec<usize>,
        rowind: Vec<usize>,
        data: Vec<f64>,
    ) -> Self {
        debug_assert!(pattern::validate(rows, cols, &colptr, &rowind).is_ok());
        debug_assert_eq!(rowind.len(), data.len());
        Self {
            rows,
            cols,
            colptr,
            rowind,
            data,
            mem_block: DEFAULT_MEM_BLOCK,
            pending: None,
            stack: None,
        }
    }

    /// Build from raw CSC arrays, validating the layout.
    pub fn from_csc(
        rows: usize,
        cols: usize,
        colptr: Vec<usize>,
        rowind: Vec<usize>,
        data: Vec<f64>,
    ) -> Result<Self> {
        if rowind.len() != data.len() {
            return Err(PatternError::ArrayLen {
                rows: rowind.len(),
                values: data.len(),
            }
            .into());
        }
        pattern::validate(rows, cols, &colptr, &rowind)?;
        Ok(Self::from_raw_parts(rows, cols, colptr, rowind, data))
    }

    /// Create a sparse matrix from COO triplets; duplicates are summed.
    pub fn from_triplets(
        rows: usize,
        cols: usize,
        row_idx: &[usize],
        col_idx: &[usize],
        vals: &[f64],
    ) -> Result<Self> {
        if row_idx.len() != col_idx.len() || row_idx.len() != vals.len() {
            return Err(LinalgError::DimensionMismatch {
                expected: row_idx.len(),
                got: col_idx.len().min(vals.len()),
            });
        }
        let mut tri = TriMat::new((rows, cols));
        for k in 0..row_idx.len() {
            if row_idx[k] >= rows || col_idx[k] >= cols {
                return Err(LinalgError::MatrixIndexOutOfRange {
                    row: row_idx[k],
                    col: col_idx[k],
                    rows,
                    cols,
                });
            }
            tri.add_triplet(row_idx[k], col_idx[k], vals[k]);
        }
        Ok(Self::from_sprs(&tri.to_csc()))
    }

    /// Convert from any sprs matrix (CSR input is transposed to CSC).
    pub fn from_sprs(mat: &CsMatI<f64, usize>) -> Self {
        let csc = if mat.is_csc() {
            Cow::Borrowed(mat)
        } else {
            Cow::Owned(mat.to_csc())
        };
        let (rows, cols) = (csc.rows(), csc.cols());
        let mut colptr = Vec::with_capacity(cols + 1);
        let mut rowind = Vec::with_capacity(csc.nnz());
        let mut data = Vec::with_capacity(csc.nnz());
        colptr.push(0);
        for col_vec in csc.outer_iterator() {
            let mut entries: Vec<(usize, f64)> = col_vec.iter().map(|(r, &v)| (r, v)).collect();
            entries.sort_by_key(|e| e.0);
            for (r, v) in entries {
                rowind.push(r);
                data.push(v);
            }
            colptr.push(rowind.len());
        }
        Self::from_raw_parts(rows, cols, colptr, rowind, data)
    }

    /// Convert to an sprs CSC matrix.
    pub fn to_sprs(&self) -> CsMatI<f64, usize> {
        let m = self.committed();
        let mut tri = TriMat::new((m.rows, m.cols));
        for col in 0..m.cols {
            for k in m.col_range(col) {
                tri.add_triplet(m.rowind[k], col, m.data[k]);
            }
        }
        tri.to_csc()
    }

    /// Keeps only non-zero entries of a dense matrix.
    pub fn from_dense(a: &DenseMatrix) -> Self {
        let (rows, cols) = (a.nrows(), a.ncols());
        let mut colptr = Vec::with_capacity(cols + 1);
        let mut rowind = Vec::new();
        let mut data = Vec::new();
        colptr.push(0);
        for j in 0..cols {
            for i in 0..rows {
                let v = a.get(i, j);
                if v != 0.0 {
                    rowind.push(i);
                    data.push(v);
                }
            }
            colptr.push(rowind.len());
        }
        Self::from_raw_parts(rows, cols, colptr, rowind, data)
    }

    /// Full (both triangles) sparse copy of a symmetric matrix.
    pub fn from_sym(a: &SymMatrix) -> Self {
        let n = a.size();
        let mut colptr = Vec::with_capacity(n + 1);
        let mut rowind = Vec::new();
        let mut data = Vec::new();
        colptr.push(0);
        for j in 0..n {
            for i in 0..n {
                let v = a.get(i, j);
                if v != 0.0 {
                    rowind.push(i);
                    data.push(v);
                }
            }
            colptr.push(rowind.len());
        }
        Self::from_raw_parts(n, n, colptr, rowind, data)
    }

    pub fn to_dense(&self) -> DenseMatrix {
        let mut d = DenseMatrix::zeros(self.rows, self.cols);
        for col in 0..self.cols {
            for k in self.col_range(col) {
                d.set(self.rowind[k], col, self.data[k]);
            }
        }
        if let Some(p) = self.pending {
            d.set(p.row, p.col, p.value);
        }
        d
    }

    /// Symmetric copy built from the lower triangle.
    pub fn to_sym(&self) -> Result<SymMatrix> {
        self.check_square()?;
        let mut s = SymMatrix::zeros(self.rows);
        for (row, col, v) in self.triplets() {
            if row >= col {
                s.set(row, col, v);
            }
        }
        Ok(s)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    fn check_square(&self) -> Result<()> {
        if !self.is_square() {
            return Err(LinalgError::NotSquare {
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(())
    }

    fn nnz_committed(&self) -> usize {
        self.rowind.len()
    }

    /// Number of stored elements, including a pending one.
    pub fn nnz(&self) -> usize {
        self.rowind.len() + usize::from(self.pending.is_some())
    }

    /// Fraction of stored elements, `nnz / (rows * cols)`.
    pub fn fill(&self) -> f64 {
        let total = self.rows * self.cols;
        if total == 0 {
            0.0
        } else {
            self.nnz() as f64 / total as f64
        }
    }

    /// Allocated element capacity.
    pub fn capacity(&self) -> usize {
        self.rowind.capacity()
    }

    #[inline]
    pub(crate) fn col_range(&self, col: usize) -> Range<usize> {
        self.colptr[col]..self.colptr[col + 1]
    }

    /// Committed row indices and values of one column.
    pub(crate) fn column(&self, col: usize) -> (&[usize], &[f64]) {
        let r = self.col_range(col);
        (&self.rowind[r.clone()], &self.data[r])
    }

    /// Absolute storage index of (row, col), or the insertion point.
    fn locate(&self, row: usize, col: usize) -> std::result::Result<usize, usize> {
        let start = self.colptr[col];
        let rows = &self.rowind[self.col_range(col)];
        rows.binary_search(&row)
            .map(|k| start + k)
            .map_err(|k| start + k)
    }

    fn check_index(&self, row: usize, col: usize) -> Result<()> {
        if row >= self.rows || col >= self.cols {
            return Err(LinalgError::MatrixIndexOutOfRange {
                row,
                col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(())
    }

    /// Grow the element arrays for `additional` more entries.
    fn reserve_elements(&mut self, additional: usize) {
        let len = self.rowind.len();
        if len + additional <= self.rowind.capacity() {
            return;
        }
        let grow = additional.max(self.mem_block).max(self.rowind.capacity());
        self.rowind.reserve_exact(grow);
        self.data.reserve_exact(grow);
    }

    fn insert_entry(&mut self, pos: usize, row: usize, col: usize, value: f64) {
        self.reserve_elements(1);
        self.rowind.insert(pos, row);
        self.data.insert(pos, value);
        for c in (col + 1)..=self.cols {
            self.colptr[c] += 1;
        }
    }

    /// Merge the pending element into the compressed arrays.
    pub(crate) fn fill_pending(&mut self) {
        if let Some(p) = self.pending.take() {
            match self.locate(p.row, p.col) {
                Ok(k) => self.data[k] = p.value,
                Err(pos) => self.insert_entry(pos, p.row, p.col, p.value),
            }
        }
    }

    /// View with any pending element merged.
    pub(crate) fn committed(&self) -> Cow<'_, SparseMatrix> {
        if self.pending.is_none() {
            Cow::Borrowed(self)
        } else {
            let mut m = self.clone();
            m.fill_pending();
            Cow::Owned(m)
        }
    }

    /// Element (row, col); zero when not stored.
    ///
    /// Panics if `col` is outside the matrix.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        #[cfg(feature = "range-check")]
        if let Err(e) = self.check_index(row, col) {
            panic!("{}", e);
        }
        if let Some(p) = self.pending {
            if p.row == row && p.col == col {
                return p.value;
            }
        }
        self.locate(row, col).map(|k| self.data[k]).unwrap_or(0.0)
    }

    /// Checked element read.
    pub fn at(&self, row: usize, col: usize) -> Result<f64> {
        self.check_index(row, col)?;
        Ok(self.get(row, col))
    }

    /// Set element (row, col). An absent element becomes the pending
    /// element; setting an absent element to zero is a no-op.
    pub fn set(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        self.update(row, col, value, |_, v| v)
    }

    /// Add `value` to element (row, col).
    pub fn add_to(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        self.update(row, col, value, |old, v| old + v)
    }

    fn update<F: Fn(f64, f64) -> f64>(
        &mut self,
        row: usize,
        col: usize,
        value: f64,
        op: F,
    ) -> Result<()> {
        self.check_index(row, col)?;
        if let Ok(k) = self.locate(row, col) {
            self.data[k] = op(self.data[k], value);
            return Ok(());
        }
        if let Some(p) = self.pending.as_mut() {
            if p.row == row && p.col == col {
                p.value = op(p.value, value);
                return Ok(());
            }
        }
        let v = op(0.0, value);
        if v != 0.0 {
            self.fill_pending();
            self.pending = Some(Pending { row, col, value: v });
        }
        Ok(())
    }

    fn check_compressed_column(&self, rows: &[usize], values: &[f64], col: usize) -> Result<()> {
        if col >= self.cols {
            return Err(LinalgError::IndexOutOfRange {
                index: col,
                size: self.cols,
            });
        }
        if rows.len() != values.len() {
            return Err(LinalgError::DimensionMismatch {
                expected: rows.len(),
                got: values.len(),
            });
        }
        for (k, &r) in rows.iter().enumerate() {
            if r >= self.rows {
                return Err(PatternError::RowIndexOutOfBounds {
                    col,
                    row: r,
                    rows: self.rows,
                }
                .into());
            }
            if k > 0 && rows[k - 1] >= r {
                return Err(PatternError::RowIndexNotSorted { col }.into());
            }
        }
        Ok(())
    }

    /// Replace the stored entries of `col`.
    fn replace_column(&mut self, col: usize, rows: Vec<usize>, values: Vec<f64>) {
        let r = self.col_range(col);
        let old = r.len();
        let new = rows.len();
        if new > old {
            self.reserve_elements(new - old);
        }
        self.rowind.splice(r.clone(), rows);
        self.data.splice(r, values);
        for c in (col + 1)..=self.cols {
            self.colptr[c] = self.colptr[c] + new - old;
        }
    }

    /// Add a dense column vector to column `col`.
    pub fn add_col(&mut self, v: &Vector, col: usize) -> Result<()> {
        if v.len() != self.rows {
            return Err(LinalgError::DimensionMismatch {
                expected: self.rows,
                got: v.len(),
            });
        }
        let (rows, values) = compress_vector(v);
        self.add_col_compressed(&rows, &values, col)
    }

    /// Add a compressed column (sorted row indices) to column `col`.
    /// Goes through the fill stack when one is initialised.
    pub fn add_col_compressed(&mut self, rows: &[usize], values: &[f64], col: usize) -> Result<()> {
        self.check_compressed_column(rows, values, col)?;
        if self.stack.is_some() && self.stack_push_compressed(rows, values, col)? == 0 {
            return Ok(());
        }
        self.fill_pending();
        let (old_rows, old_vals) = self.column(col);
        let mut new_rows = Vec::with_capacity(old_rows.len() + rows.len());
        let mut new_vals = Vec::with_capacity(old_rows.len() + rows.len());
        mix_column(old_rows, old_vals, rows, values, 1.0, &mut new_rows, &mut new_vals);
        self.replace_column(col, new_rows, new_vals);
        Ok(())
    }

    /// Replace column `col` by a dense vector (zeros are not stored).
    pub fn insert_col(&mut self, v: &Vector, col: usize) -> Result<()> {
        if v.len() != self.rows {
            return Err(LinalgError::DimensionMismatch {
                expected: self.rows,
                got: v.len(),
            });
        }
        let (rows, values) = compress_vector(v);
        self.insert_col_compressed(&rows, &values, col)
    }

    /// Replace column `col` by a compressed column.
    pub fn insert_col_compressed(&mut self, rows: &[usize], values: &[f64], col: usize) -> Result<()> {
        self.check_compressed_column(rows, values, col)?;
        self.stack_flush();
        self.fill_pending();
        self.replace_column(col, rows.to_vec(), values.to_vec());
        Ok(())
    }

    /// Column `col` as a dense vector.
    pub fn extract_col(&self, col: usize) -> Result<Vector> {
        if col >= self.cols {
            return Err(LinalgError::IndexOutOfRange {
                index: col,
                size: self.cols,
            });
        }
        let mut v = Vector::zeros(self.rows);
        for k in self.col_range(col) {
            v[self.rowind[k]] = self.data[k];
        }
        if let Some(p) = self.pending.filter(|p| p.col == col) {
            v[p.row] = p.value;
        }
        Ok(v)
    }

    /// Row `row` as a dense vector.
    pub fn extract_row(&self, row: usize) -> Result<Vector> {
        if row >= self.rows {
            return Err(LinalgError::IndexOutOfRange {
                index: row,
                size: self.rows,
            });
        }
        Ok((0..self.cols).map(|col| self.get(row, col)).collect())
    }

    pub fn diag(&self) -> Vector {
        let n = self.rows.min(self.cols);
        (0..n).map(|i| self.get(i, i)).collect()
    }

    /// All stored elements as (row, col, value), column by column.
    pub fn triplets(&self) -> Vec<(usize, usize, f64)> {
        let m = self.committed();
        let mut out = Vec::with_capacity(m.nnz());
        for col in 0..m.cols {
            for k in m.col_range(col) {
                out.push((m.rowind[k], col, m.data[k]));
            }
        }
        out
    }

    /// Structure of the stored elements (pending element included).
    pub fn pattern(&self) -> SparsityPattern {
        let m = self.committed();
        SparsityPattern::from_parts_unchecked(m.rows, m.cols, m.colptr.clone(), m.rowind.clone())
    }

    /// Verify the compressed-column invariants of the committed storage.
    pub fn check_consistency(&self) -> std::result::Result<(), PatternError> {
        if self.rowind.len() != self.data.len() {
            return Err(PatternError::ArrayLen {
                rows: self.rowind.len(),
                values: self.data.len(),
            });
        }
        pattern::validate(self.rows, self.cols, &self.colptr, &self.rowind)
    }

    /// Drop explicitly stored zeros and release unused memory.
    pub fn compress(&mut self) {
        self.stack_flush();
        self.fill_pending();
        let mut write = 0;
        let mut colptr = Vec::with_capacity(self.cols + 1);
        colptr.push(0);
        for col in 0..self.cols {
            for k in self.col_range(col) {
                if self.data[k] != 0.0 {
                    self.rowind[write] = self.rowind[k];
                    self.data[write] = self.data[k];
                    write += 1;
                }
            }
            colptr.push(write);
        }
        self.colptr = colptr;
        self.rowind.truncate(write);
        self.data.truncate(write);
        self.rowind.shrink_to_fit();
        self.data.shrink_to_fit();
    }

    pub fn transpose(&self) -> SparseMatrix {
        let m = self.committed();
        let nnz = m.nnz_committed();
        let mut counts = vec![0usize; m.rows + 1];
        for &r in &m.rowind {
            counts[r + 1] += 1;
        }
        for i in 0..m.rows {
            counts[i + 1] += counts[i];
        }
        let colptr = counts.clone();
        let mut next = counts;
        let mut rowind = vec![0; nnz];
        let mut data = vec![0.0; nnz];
        for col in 0..m.cols {
            for k in m.col_range(col) {
                let dst = next[m.rowind[k]];
                next[m.rowind[k]] += 1;
                rowind[dst] = col;
                data[dst] = m.data[k];
            }
        }
        Self::from_raw_parts(m.cols, m.rows, colptr, rowind, data)
    }

    /// Matrix-vector product `self * v`.
    pub fn mul_vec(&self, v: &Vector) -> Result<Vector> {
        if v.len() != self.cols {
            return Err(LinalgError::DimensionMismatch {
                expected: self.cols,
                got: v.len(),
            });
        }
        let mut y = Vector::zeros(self.rows);
        for col in 0..self.cols {
            let vj = v[col];
            if vj == 0.0 {
                continue;
            }
            for k in self.col_range(col) {
                y[self.rowind[k]] += self.data[k] * vj;
            }
        }
        if let Some(p) = self.pending {
            y[p.row] += p.value * v[p.col];
        }
        Ok(y)
    }

    /// Sparse matrix product `self * other`.
    pub fn mul(&self, other: &SparseMatrix) -> Result<SparseMatrix> {
        if self.cols != other.rows {
            return Err(LinalgError::DimensionMismatch {
                expected: self.cols,
                got: other.rows,
            });
        }
        let a = self.committed();
        let b = other.committed();
        let mut result = SparseMatrix::new(a.rows, b.cols);
        let mut work = vec![0.0; a.rows];
        let mut mark = vec![usize::MAX; a.rows];
        let mut rows_j: Vec<usize> = Vec::new();
        for j in 0..b.cols {
            rows_j.clear();
            for kb in b.col_range(j) {
                let k = b.rowind[kb];
                let bkj = b.data[kb];
                for ka in a.col_range(k) {
                    let i = a.rowind[ka];
                    if mark[i] != j {
                        mark[i] = j;
                        work[i] = 0.0;
                        rows_j.push(i);
                    }
                    work[i] += a.data[ka] * bkj;
                }
            }
            rows_j.sort_unstable();
            result.reserve_elements(rows_j.len());
            for &i in &rows_j {
                result.rowind.push(i);
                result.data.push(work[i]);
            }
            result.colptr[j + 1] = result.rowind.len();
        }
        Ok(result)
    }

    fn combine(&self, other: &SparseMatrix, alpha: f64) -> Result<SparseMatrix> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err(LinalgError::DimensionMismatch {
                expected: self.rows * self.cols,
                got: other.rows * other.cols,
            });
        }
        let a = self.committed();
        let b = other.committed();
        let mut colptr = Vec::with_capacity(a.cols + 1);
        let mut rowind = Vec::with_capacity(a.nnz_committed() + b.nnz_committed());
        let mut data = Vec::with_capacity(rowind.capacity());
        colptr.push(0);
        for col in 0..a.cols {
            let (ar, av) = a.column(col);
            let (br, bv) = b.column(col);
            mix_column(ar, av, br, bv, alpha, &mut rowind, &mut data);
            colptr.push(rowind.len());
        }
        Ok(Self::from_raw_parts(a.rows, a.cols, colptr, rowind, data))
    }

    /// Element-wise sum; the result pattern is the union of both patterns.
    pub fn add(&self, other: &SparseMatrix) -> Result<SparseMatrix> {
        self.combine(other, 1.0)
    }

    /// Element-wise difference.
    pub fn sub(&self, other: &SparseMatrix) -> Result<SparseMatrix> {
        self.combine(other, -1.0)
    }

    /// In-place `self += other`.
    pub fn add_assign(&mut self, other: &SparseMatrix) -> Result<()> {
        *self = self.add(other)?;
        Ok(())
    }

    fn map_values<F: Fn(f64) -> f64>(&self, f: F) -> SparseMatrix {
        let mut m = self.committed().into_owned();
        m.stack = None;
        m.data.iter_mut().for_each(|v| *v = f(*v));
        m
    }

    pub fn scale(&self, s: f64) -> SparseMatrix {
        self.map_values(|v| v * s)
    }

    pub fn abs(&self) -> SparseMatrix {
        self.map_values(f64::abs)
    }

    /// Smallest element, counting implicit zeros. A matrix with no
    /// elements gives `f64::INFINITY`, the identity of `min`.
    pub fn min(&self) -> f64 {
        let m = self.committed();
        let stored = m.data.iter().copied().fold(f64::INFINITY, f64::min);
        if m.nnz_committed() < m.rows * m.cols {
            stored.min(0.0)
        } else {
            stored
        }
    }

    /// Largest element, counting implicit zeros. A matrix with no
    /// elements gives `f64::NEG_INFINITY`.
    pub fn max(&self) -> f64 {
        let m = self.committed();
        let stored = m.data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if m.nnz_committed() < m.rows * m.cols {
            stored.max(0.0)
        } else {
            stored
        }
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum::<f64>() + self.pending.map_or(0.0, |p| p.value)
    }

    /// Indices `i` whose row or column holds at least one non-zero value.
    pub fn active_lines(&self) -> Vec<usize> {
        let n = self.rows.max(self.cols);
        let mut active = vec![false; n];
        for (row, col, v) in self.triplets() {
            if v != 0.0 {
                active[row] = true;
                active[col] = true;
            }
        }
        (0..n).filter(|&i| active[i]).collect()
    }

    /// Square submatrix made of the rows and columns listed in `keep`
    /// (sorted, ascending).
    pub fn submatrix(&self, keep: &[usize]) -> Result<SparseMatrix> {
        self.check_square()?;
        let mut map = vec![None; self.rows];
        for (new, &old) in keep.iter().enumerate() {
            if old >= self.rows {
                return Err(LinalgError::IndexOutOfRange {
                    index: old,
                    size: self.rows,
                });
            }
            map[old] = Some(new);
        }
        let m = self.committed();
        let mut colptr = Vec::with_capacity(keep.len() + 1);
        let mut rowind = Vec::new();
        let mut data = Vec::new();
        colptr.push(0);
        for &old_col in keep {
            for k in m.col_range(old_col) {
                if let Some(r) = map[m.rowind[k]] {
                    rowind.push(r);
                    data.push(m.data[k]);
                }
            }
            colptr.push(rowind.len());
        }
        Ok(Self::from_raw_parts(keep.len(), keep.len(), colptr, rowind, data))
    }

    /// Scatter `self` (indexed by position in `keep`) into an `n x n` matrix.
    pub fn expand(&self, keep: &[usize], n: usize) -> Result<SparseMatrix> {
        if keep.len() != self.rows || keep.len() != self.cols {
            return Err(LinalgError::DimensionMismatch {
                expected: keep.len(),
                got: self.rows,
            });
        }
        let mut out = SparseMatrix::new(n, n);
        out.stack_init(self.nnz().max(1), 0);
        let m = self.committed();
        for col in 0..m.cols {
            let (rows, vals) = m.column(col);
            let mapped: Vec<usize> = rows.iter().map(|&r| keep[r]).collect();
            out.add_col_compressed(&mapped, vals, keep[col])?;
        }
        out.stack_destroy();
        Ok(out)
    }

    /// Factorise `self = P' L L' P` with a minimum-degree ordering.
    /// With `compress`, all-zero rows and columns are removed first.
    pub fn cholesky_decompose(&self, compress: bool) -> Result<CholeskyFactor> {
        SparseCholesky::new(Ordering::MinimumDegree)
            .with_compression(compress)
            .factorize(self)
    }

    /// Solve `self * x = b` via a fresh Cholesky factorisation.
    pub fn cholesky_solve(&self, b: &Vector, compress: bool) -> Result<Vector> {
        self.cholesky_decompose(compress)?.solve(b)
    }

    /// Inverse of a symmetric positive definite matrix. With `compress`,
    /// all-zero rows and columns stay zero in the result.
    pub fn cholesky_invert(&self, compress: bool) -> Result<SparseMatrix> {
        self.cholesky_decompose(compress)?.inverse()
    }

    /// General inversion; only the symmetric positive definite path
    /// (`cholesky_invert`) is provided.
    pub fn invert(&self) -> Result<SparseMatrix> {
        Err(LinalgError::FeatureNotImplemented(
            "general sparse inversion (use cholesky_invert for SPD matrices)",
        ))
    }
}

impl fmt::Display for SparseMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "SparseMatrix {} x {} ({} elements, fill {:.3})",
            self.rows,
            self.cols,
            self.nnz(),
            self.fill()
        )?;
        for (row, col, v) in self.triplets() {
            writeln!(f, "  ({},{}) {:.6e}", row, col, v)?;
        }
        Ok(())
    }
}
