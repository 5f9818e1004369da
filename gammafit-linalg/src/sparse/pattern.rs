//! Value-free sparsity pattern handed from the matrix to symbolic analysis.

use std::ops::Range;

use crate::error::PatternError;

/// Column-compressed sparsity pattern (no values).
///
/// Indices are zero-based; each column's row indices are strictly
/// increasing. Two patterns compare equal iff they describe the same
/// set of structural non-zeros, which is what symbolic reuse keys on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SparsityPattern {
    nrows: usize,
    ncols: usize,
    colptr: Vec<usize>,
    rowind: Vec<usize>,
}

impl SparsityPattern {
    /// Creates a validated pattern.
    pub fn new(
        nrows: usize,
        ncols: usize,
        colptr: Vec<usize>,
        rowind: Vec<usize>,
    ) -> Result<Self, PatternError> {
        validate(nrows, ncols, &colptr, &rowind)?;
        Ok(Self {
            nrows,
            ncols,
            colptr,
            rowind,
        })
    }

    /// Skips validation; the caller guarantees a well-formed layout.
    pub(crate) fn from_parts_unchecked(
        nrows: usize,
        ncols: usize,
        colptr: Vec<usize>,
        rowind: Vec<usize>,
    ) -> Self {
        debug_assert!(validate(nrows, ncols, &colptr, &rowind).is_ok());
        Self {
            nrows,
            ncols,
            colptr,
            rowind,
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nnz(&self) -> usize {
        self.rowind.len()
    }

    pub fn colptr(&self) -> &[usize] {
        &self.colptr
    }

    pub fn rowind(&self) -> &[usize] {
        &self.rowind
    }

    pub fn col_range(&self, col: usize) -> Range<usize> {
        self.colptr[col]..self.colptr[col + 1]
    }

    /// Sorted row indices of one column.
    pub fn column(&self, col: usize) -> &[usize] {
        &self.rowind[self.col_range(col)]
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        col < self.ncols && self.column(col).binary_search(&row).is_ok()
    }
}

/// Checks the compressed-column invariants:
/// - `colptr.len() == ncols + 1`, starting at 0 and non-decreasing
/// - `colptr[ncols] == rowind.len()`
/// - row indices strictly increasing and `< nrows` within each column
pub fn validate(
    nrows: usize,
    ncols: usize,
    colptr: &[usize],
    rowind: &[usize],
) -> Result<(), PatternError> {
    if colptr.len() != ncols + 1 {
        return Err(PatternError::ColPtrLen {
            expected: ncols + 1,
            got: colptr.len(),
        });
    }
    if colptr[0] != 0 {
        return Err(PatternError::ColPtrStart(colptr[0]));
    }
    for col in 0..ncols {
        if colptr[col] > colptr[col + 1] {
            return Err(PatternError::ColPtrNotMonotonic { col });
        }
    }
    if colptr[ncols] != rowind.len() {
        return Err(PatternError::ColPtrEnd {
            end: colptr[ncols],
            nnz: rowind.len(),
        });
    }
    for col in 0..ncols {
        let rows = &rowind[colptr[col]..colptr[col + 1]];
        for (k, &row) in rows.iter().enumerate() {
            if row >= nrows {
                return Err(PatternError::RowIndexOutOfBounds {
                    col,
                    row,
                    rows: nrows,
                });
            }
            if k > 0 && rows[k - 1] >= row {
                return Err(PatternError::RowIndexNotSorted { col });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_pattern() {
        let p = SparsityPattern::new(3, 2, vec![0, 2, 3], vec![0, 2, 1]).unwrap();
        assert_eq!(p.nnz(), 3);
        assert_eq!(p.column(0), &[0, 2]);
        assert!(p.contains(1, 1));
        assert!(!p.contains(1, 0));
    }

    #[test]
    fn test_rejects_bad_layouts() {
        assert_eq!(
            SparsityPattern::new(2, 2, vec![0, 1], vec![0]),
            Err(PatternError::ColPtrLen {
                expected: 3,
                got: 2
            })
        );
        assert_eq!(
            SparsityPattern::new(2, 1, vec![1, 1], vec![0]),
            Err(PatternError::ColPtrStart(1))
        );
        assert_eq!(
            SparsityPattern::new(2, 2, vec![0, 2, 1], vec![0, 1]),
            Err(PatternError::ColPtrNotMonotonic { col: 1 })
        );
        assert_eq!(
            SparsityPattern::new(2, 1, vec![0, 2], vec![1, 0]),
            Err(PatternError::RowIndexNotSorted { col: 0 })
        );
        assert_eq!(
            SparsityPattern::new(2, 1, vec![0, 1], vec![2]),
            Err(PatternError::RowIndexOutOfBounds {
                col: 0,
                row: 2,
                rows: 2
            })
        );
        assert_eq!(
            SparsityPattern::new(2, 1, vec![0, 2], vec![0]),
            Err(PatternError::ColPtrEnd { end: 2, nnz: 1 })
        );
    }
}
