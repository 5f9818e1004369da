//! Column fill stack for fast column-wise assembly.
//!
//! Columns are appended to a stack that is merged into the matrix in a
//! single pass when it runs full or is flushed explicitly. A column pushed
//! twice is mixed (summed) into a fresh stack entry and the old entry is
//! marked obsolete, so every column appears at most once at flush time.

use tracing::trace;

use super::SparseMatrix;
use crate::error::{LinalgError, Result};
use crate::vector::Vector;

/// Default number of elements the stack can hold.
pub const DEFAULT_STACK_SIZE: usize = 512;

#[derive(Debug, Clone)]
pub(crate) struct FillStack {
    max_entries: usize,
    size: usize,
    /// Column of each entry; `None` marks an entry superseded by a later mix.
    colinx: Vec<Option<usize>>,
    /// Entry `e` occupies `start[e]..start[e + 1]`.
    start: Vec<usize>,
    rowind: Vec<usize>,
    data: Vec<f64>,
}

impl FillStack {
    fn new(size: usize, max_entries: usize) -> Self {
        Self {
            max_entries,
            size,
            colinx: Vec::with_capacity(max_entries),
            start: vec![0],
            rowind: Vec::with_capacity(size),
            data: Vec::with_capacity(size),
        }
    }

    fn used(&self) -> usize {
        self.rowind.len()
    }

    fn entries(&self) -> usize {
        self.colinx.len()
    }

    fn is_empty(&self) -> bool {
        self.colinx.is_empty()
    }

    fn free(&self) -> usize {
        self.size.saturating_sub(self.used())
    }

    fn must_flush_before(&self, number: usize) -> bool {
        self.entries() >= self.max_entries || number >= self.free()
    }

    fn find(&self, col: usize) -> Option<usize> {
        self.colinx.iter().position(|&c| c == Some(col))
    }

    fn entry(&self, e: usize) -> (&[usize], &[f64]) {
        let r = self.start[e]..self.start[e + 1];
        (&self.rowind[r.clone()], &self.data[r])
    }

    fn push_entry(&mut self, col: usize, rows: &[usize], values: &[f64]) {
        self.rowind.extend_from_slice(rows);
        self.data.extend_from_slice(values);
        self.colinx.push(Some(col));
        self.start.push(self.rowind.len());
    }

    fn clear(&mut self) {
        self.colinx.clear();
        self.start.truncate(1);
        self.rowind.clear();
        self.data.clear();
    }
}

/// Merge two sorted compressed columns, `out = a + alpha * b`.
pub(crate) fn mix_column(
    a_rows: &[usize],
    a_vals: &[f64],
    b_rows: &[usize],
    b_vals: &[f64],
    alpha: f64,
    out_rows: &mut Vec<usize>,
    out_vals: &mut Vec<f64>,
) {
    let (mut i, mut k) = (0, 0);
    while i < a_rows.len() && k < b_rows.len() {
        if a_rows[i] == b_rows[k] {
            out_rows.push(a_rows[i]);
            out_vals.push(a_vals[i] + alpha * b_vals[k]);
            i += 1;
            k += 1;
        } else if a_rows[i] < b_rows[k] {
            out_rows.push(a_rows[i]);
            out_vals.push(a_vals[i]);
            i += 1;
        } else {
            out_rows.push(b_rows[k]);
            out_vals.push(alpha * b_vals[k]);
            k += 1;
        }
    }
    out_rows.extend_from_slice(&a_rows[i..]);
    out_vals.extend_from_slice(&a_vals[i..]);
    for k in k..b_rows.len() {
        out_rows.push(b_rows[k]);
        out_vals.push(alpha * b_vals[k]);
    }
}

/// Number of distinct rows in the union of two sorted index lists.
fn union_len(a: &[usize], b: &[usize]) -> usize {
    let (mut i, mut k, mut n) = (0, 0, 0);
    while i < a.len() && k < b.len() {
        match a[i].cmp(&b[k]) {
            std::cmp::Ordering::Equal => {
                i += 1;
                k += 1;
            }
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => k += 1,
        }
        n += 1;
    }
    n + (a.len() - i) + (b.len() - k)
}

impl SparseMatrix {
    /// Set up a fill stack holding up to `size` elements in up to
    /// `entries` columns. Zero selects the defaults (512 elements, one
    /// entry per matrix column). Any previous stack is discarded unflushed.
    pub fn stack_init(&mut self, size: usize, entries: usize) {
        let size = if size > 0 { size } else { DEFAULT_STACK_SIZE };
        let entries = if entries > 0 { entries } else { self.cols.max(1) };
        self.stack = Some(FillStack::new(size, entries));
    }

    pub fn has_stack(&self) -> bool {
        self.stack.is_some()
    }

    /// Push a dense column onto the fill stack. Returns the number of
    /// non-zero elements that could not be stacked (either 0 or all).
    pub fn stack_push_column(&mut self, v: &Vector, col: usize) -> Result<usize> {
        if v.len() != self.rows {
            return Err(LinalgError::DimensionMismatch {
                expected: self.rows,
                got: v.len(),
            });
        }
        let (rows, values) = compress_vector(v);
        self.stack_push_compressed(&rows, &values, col)
    }

    /// Push a compressed column (sorted row indices) onto the fill stack.
    ///
    /// Columns are never partially stacked: the return value is either 0
    /// or `rows.len()`, the latter when no stack exists or the column is
    /// larger than the whole stack.
    pub fn stack_push_compressed(
        &mut self,
        rows: &[usize],
        values: &[f64],
        col: usize,
    ) -> Result<usize> {
        self.check_compressed_column(rows, values, col)?;
        let number = rows.len();
        let Some(stack) = self.stack.as_ref() else {
            return Ok(number);
        };
        if number == 0 {
            return Ok(0);
        }
        if number > stack.size {
            return Ok(number);
        }

        if stack.must_flush_before(number) {
            self.stack_flush();
        }

        let Some(stack) = self.stack.as_mut() else {
            return Ok(number);
        };
        if let Some(e) = stack.find(col) {
            let (old_rows, old_vals) = stack.entry(e);
            let request = union_len(old_rows, rows);
            if request >= stack.free() || stack.entries() >= stack.max_entries {
                self.stack_flush();
                if let Some(stack) = self.stack.as_mut() {
                    stack.push_entry(col, rows, values);
                }
                return Ok(0);
            }
            let mut mixed_rows = Vec::with_capacity(request);
            let mut mixed_vals = Vec::with_capacity(request);
            mix_column(
                old_rows,
                old_vals,
                rows,
                values,
                1.0,
                &mut mixed_rows,
                &mut mixed_vals,
            );
            stack.colinx[e] = None;
            stack.push_entry(col, &mixed_rows, &mixed_vals);
        } else {
            stack.push_entry(col, rows, values);
        }
        Ok(0)
    }

    /// Merge all stacked columns into the matrix in one pass.
    pub fn stack_flush(&mut self) {
        let Some(mut stack) = self.stack.take() else {
            return;
        };
        if stack.is_empty() {
            self.stack = Some(stack);
            return;
        }
        self.fill_pending();

        let mut entry_of = vec![None; self.cols];
        for (e, c) in stack.colinx.iter().enumerate() {
            if let Some(c) = *c {
                entry_of[c] = Some(e);
            }
        }

        let mut colptr = Vec::with_capacity(self.cols + 1);
        let mut rowind = Vec::with_capacity(self.nnz_committed() + stack.used() + self.mem_block);
        let mut data = Vec::with_capacity(rowind.capacity());
        colptr.push(0);
        for col in 0..self.cols {
            let r = self.col_range(col);
            match entry_of[col] {
                None => {
                    rowind.extend_from_slice(&self.rowind[r.clone()]);
                    data.extend_from_slice(&self.data[r]);
                }
                Some(e) => {
                    let (srows, svals) = stack.entry(e);
                    mix_column(
                        &self.rowind[r.clone()],
                        &self.data[r],
                        srows,
                        svals,
                        1.0,
                        &mut rowind,
                        &mut data,
                    );
                }
            }
            colptr.push(rowind.len());
        }
        trace!(
            "Flushed {} stack entries ({} elements) into {}x{} matrix, nnz {} -> {}",
            stack.entries(),
            stack.used(),
            self.rows,
            self.cols,
            self.nnz_committed(),
            rowind.len()
        );
        self.colptr = colptr;
        self.rowind = rowind;
        self.data = data;

        stack.clear();
        self.stack = Some(stack);
    }

    /// Flush and release the fill stack.
    pub fn stack_destroy(&mut self) {
        self.stack_flush();
        self.stack = None;
    }
}

/// Non-zero entries of a dense vector as (rows, values).
pub(crate) fn compress_vector(v: &Vector) -> (Vec<usize>, Vec<f64>) {
    let mut rows = Vec::new();
    let mut values = Vec::new();
    for (i, &x) in v.iter().enumerate() {
        if x != 0.0 {
            rows.push(i);
            values.push(x);
        }
    }
    (rows, values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_column() {
        let mut rows = Vec::new();
        let mut vals = Vec::new();
        mix_column(
            &[0, 2, 5],
            &[1.0, 2.0, 3.0],
            &[2, 3],
            &[10.0, 20.0],
            -1.0,
            &mut rows,
            &mut vals,
        );
        assert_eq!(rows, vec![0, 2, 3, 5]);
        assert_eq!(vals, vec![1.0, -8.0, -20.0, 3.0]);
        assert_eq!(union_len(&[0, 2, 5], &[2, 3]), 4);
    }

    #[test]
    fn test_stack_fill_adds_columns() {
        let mut m = SparseMatrix::new(4, 3);
        m.set(1, 1, 5.0).unwrap();
        m.stack_init(16, 0);
        m.stack_push_column(&Vector::from(vec![1.0, 0.0, 0.0, 2.0]), 0)
            .unwrap();
        m.stack_push_column(&Vector::from(vec![0.0, 1.0, 3.0, 0.0]), 1)
            .unwrap();
        // same column again is mixed on the stack
        m.stack_push_column(&Vector::from(vec![1.0, 0.0, 0.0, 0.0]), 0)
            .unwrap();
        assert_eq!(m.get(0, 0), 0.0);
        m.stack_flush();
        assert_eq!(m.get(0, 0), 2.0);
        assert_eq!(m.get(3, 0), 2.0);
        assert_eq!(m.get(1, 1), 6.0);
        assert_eq!(m.get(2, 1), 3.0);
        assert!(m.check_consistency().is_ok());
        m.stack_destroy();
        assert!(!m.has_stack());
    }

    #[test]
    fn test_stack_flushes_when_full() {
        let mut m = SparseMatrix::new(3, 6);
        m.stack_init(4, 2);
        for col in 0..6 {
            let remaining = m
                .stack_push_compressed(&[0, 2], &[1.0, col as f64 + 1.0], col)
                .unwrap();
            assert_eq!(remaining, 0);
        }
        m.stack_destroy();
        for col in 0..6 {
            assert_eq!(m.get(0, col), 1.0);
            assert_eq!(m.get(2, col), col as f64 + 1.0);
        }
        assert_eq!(m.nnz(), 12);
    }

    #[test]
    fn test_oversized_column_is_not_stacked() {
        let mut m = SparseMatrix::new(5, 1);
        m.stack_init(2, 1);
        let remaining = m
            .stack_push_compressed(&[0, 1, 2], &[1.0, 1.0, 1.0], 0)
            .unwrap();
        assert_eq!(remaining, 3);
    }
}
