//! gammafit-linalg: Linear algebra for gammafit
//!
//! Dense vectors and matrices, packed symmetric matrices, and a
//! compressed-column sparse matrix with a symbolic/numeric sparse
//! Cholesky factorisation. These are the building blocks of the normal
//! equations solved at every Levenberg-Marquardt iteration.

pub mod decomposition;
pub mod dense;
pub mod error;
pub mod sparse;
pub mod symmetric;
pub mod vector;

pub use decomposition::{CholeskyDecomp, CholeskyFactor, SparseCholesky};
pub use dense::DenseMatrix;
pub use error::{LinalgError, PatternError};
pub use sparse::{NumericCholesky, Ordering, SparseMatrix, SparsityPattern, SymbolicCholesky};
pub use symmetric::SymMatrix;
pub use vector::{iperm, perm, Vector};
