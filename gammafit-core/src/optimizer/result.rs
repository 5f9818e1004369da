//! Outcome of a fit.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::likelihood::GoodnessOfFit;
use crate::pars::OptimizerPars;

/// Final state of the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitStatus {
    /// The objective stopped improving.
    Converged,
    /// The damping factor exceeded its upper limit before any step was
    /// accepted.
    Diverged,
    /// The iteration limit was reached first, or the damping factor ran
    /// past its limit after the fit had already made progress.
    MaxIter,
}

impl FitStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, FitStatus::Converged)
    }
}

impl fmt::Display for FitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitStatus::Converged => write!(f, "converged"),
            FitStatus::Diverged => write!(f, "diverged"),
            FitStatus::MaxIter => write!(f, "maximum number of iterations reached"),
        }
    }
}

/// One trial step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    /// Objective at the trial point; `None` when the step could not be solved.
    pub value: Option<f64>,
    pub lambda: f64,
    pub accepted: bool,
    /// Euclidean norm of the parameter step in factor space.
    pub step_norm: f64,
}

/// Bookkeeping of a fit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitCounters {
    pub evaluations: usize,
    pub accepted: usize,
    pub rejected: usize,
    /// Damped systems that failed to factorise.
    pub singular_solves: usize,
    /// Trial values clipped to a parameter bound.
    pub boundary_hits: usize,
    /// Symbolic analyses of the curvature pattern.
    pub analyses: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Magic bytes for validation.
    pub magic: [u8; 4],
    /// Version number for forward compatibility.
    pub version: u32,
    pub status: FitStatus,
    /// Final objective value.
    pub value: f64,
    /// Damping factor at termination.
    pub lambda: f64,
    /// Number of completed iterations.
    pub iterations: usize,
    /// Best parameters with factor errors.
    pub pars: OptimizerPars,
    /// Factor covariance, row-major `npars x npars`; `None` when the
    /// curvature at the optimum could not be inverted.
    pub covariance: Option<Vec<f64>>,
    /// Condition number of the curvature of the active parameters.
    pub condition: Option<f64>,
    /// Only available for chi-square fits.
    pub goodness: Option<GoodnessOfFit>,
    pub counters: FitCounters,
    /// Per-step trace, empty unless requested.
    pub trace: Vec<IterationRecord>,
}

impl FitResult {
    /// Magic bytes: "GFIT".
    pub const MAGIC: [u8; 4] = *b"GFIT";
    /// Current result version.
    pub const VERSION: u32 = 1;

    pub fn new(status: FitStatus, value: f64, pars: OptimizerPars) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            status,
            value,
            lambda: 0.0,
            iterations: 0,
            pars,
            covariance: None,
            condition: None,
            goodness: None,
            counters: FitCounters::default(),
            trace: Vec::new(),
        }
    }

    pub fn converged(&self) -> bool {
        self.status.is_converged()
    }

    pub fn npars(&self) -> usize {
        self.pars.len()
    }

    /// Covariance element, `None` without covariance or out of range.
    pub fn covariance_at(&self, row: usize, col: usize) -> Option<f64> {
        let n = self.pars.len();
        if row >= n || col >= n {
            return None;
        }
        self.covariance.as_ref().map(|c| c[row * n + col])
    }

    /// Correlation coefficient of two parameters.
    pub fn correlation(&self, row: usize, col: usize) -> Option<f64> {
        let c = self.covariance_at(row, col)?;
        let v = self.covariance_at(row, row)? * self.covariance_at(col, col)?;
        (v > 0.0).then(|| c / v.sqrt())
    }
}
