//! Error types shared by all linear algebra containers and solvers.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinalgError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Index {index} out of range [0, {size})")]
    IndexOutOfRange { index: usize, size: usize },

    #[error("Element ({row},{col}) out of range for {rows} x {cols} matrix")]
    MatrixIndexOutOfRange {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Matrix is not square ({rows} x {cols})")]
    NotSquare { rows: usize, cols: usize },

    #[error("Matrix is not positive definite (pivot {pivot:.3e} in column {column})")]
    NotPositiveDefinite { column: usize, pivot: f64 },

    #[error("Singular matrix encountered in column {column}")]
    SingularMatrix { column: usize },

    #[error("Sparsity pattern differs from the one used for symbolic analysis")]
    PatternMismatch,

    #[error("Index {index} appears more than once in permutation")]
    InvalidPermutation { index: usize },

    #[error("Operation requires a non-empty vector")]
    EmptyVector,

    #[error("Feature not implemented: {0}")]
    FeatureNotImplemented(&'static str),

    #[error("Invalid sparsity pattern: {0}")]
    InvalidPattern(#[from] PatternError),
}

impl LinalgError {
    /// True for numeric factorisation failures that a caller may recover
    /// from by regularising the system and retrying.
    pub fn is_numerical_failure(&self) -> bool {
        matches!(
            self,
            LinalgError::NotPositiveDefinite { .. } | LinalgError::SingularMatrix { .. }
        )
    }
}

/// Structural problems found when validating compressed-column storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("column pointer has length {got}, expected {expected}")]
    ColPtrLen { expected: usize, got: usize },

    #[error("column pointer must start at 0 (got {0})")]
    ColPtrStart(usize),

    #[error("column pointer decreases at column {col}")]
    ColPtrNotMonotonic { col: usize },

    #[error("column pointer ends at {end} but {nnz} elements are stored")]
    ColPtrEnd { end: usize, nnz: usize },

    #[error("row index {row} out of bounds in column {col} (rows={rows})")]
    RowIndexOutOfBounds { col: usize, row: usize, rows: usize },

    #[error("row indices are not strictly increasing in column {col}")]
    RowIndexNotSorted { col: usize },

    #[error("row index and value arrays differ in length ({rows} vs {values})")]
    ArrayLen { rows: usize, values: usize },
}

pub type Result<T> = std::result::Result<T, LinalgError>;
