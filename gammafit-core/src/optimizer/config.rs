//! Levenberg-Marquardt settings.

use serde::{Deserialize, Serialize};

use gammafit_linalg::Ordering;

/// Solver used for the damped normal equations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinearSolver {
    /// Sparse Cholesky with cached symbolic analysis.
    #[default]
    Sparse,
    /// Dense Cholesky of the active rows and columns.
    Dense,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LmConfig {
    /// Initial damping factor.
    pub lambda_start: f64,
    /// Damping multiplier after a rejected step.
    pub lambda_inc: f64,
    /// Damping multiplier after an accepted step.
    pub lambda_dec: f64,
    /// Lower limit of the damping factor.
    pub lambda_min: f64,
    /// The fit diverges once the damping factor exceeds this.
    pub lambda_max: f64,
    /// Relative objective improvement below which an iteration stalls.
    pub eps: f64,
    /// Consecutive stalled iterations required for convergence.
    pub max_stall: usize,
    /// Maximum number of iterations.
    pub max_iter: usize,
    /// Rejected steps tolerated within one iteration.
    pub max_retries: usize,
    /// Linear solver for the damped system.
    pub solver: LinearSolver,
    /// Fill-reducing ordering of the sparse solver.
    pub ordering: Ordering,
    /// Remove all-zero rows and columns before factorising.
    pub compress: bool,
    /// Record one trace entry per trial step.
    pub record_trace: bool,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            lambda_start: 1e-3,
            lambda_inc: 10.0,
            lambda_dec: 0.1,
            lambda_min: 1e-12,
            lambda_max: 1e12,
            eps: 1e-6,
            max_stall: 2,
            max_iter: 100,
            max_retries: 10,
            solver: LinearSolver::Sparse,
            ordering: Ordering::MinimumDegree,
            compress: true,
            record_trace: false,
        }
    }
}

impl LmConfig {
    pub fn with_lambda_start(mut self, lambda: f64) -> Self {
        self.lambda_start = lambda;
        self
    }

    pub fn with_lambda_max(mut self, lambda: f64) -> Self {
        self.lambda_max = lambda;
        self
    }

    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_solver(mut self, solver: LinearSolver) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_ordering(mut self, ordering: Ordering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_trace(mut self, record: bool) -> Self {
        self.record_trace = record;
        self
    }
}
