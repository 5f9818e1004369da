//! Binned observations and their contributions to the fit statistic.
//!
//! An observation turns the current model and parameters into a
//! [`Contribution`]: the objective value, its gradient and the curvature
//! matrix. The curvature is assembled column by column through the
//! sparse matrix fill stack; observations restricted to a subset of the
//! model components only touch the rows and columns of those components,
//! which keeps the summed curvature sparse.

use std::fmt;

use serde::{Deserialize, Serialize};

use gammafit_linalg::{SparseMatrix, Vector};

use crate::error::{FitError, Result};
use crate::model::Models;
use crate::pars::OptimizerPars;

/// Fit statistic an observation contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statistic {
    /// Gaussian errors, objective `chi^2 / 2`.
    ChiSquare,
    /// Poisson counts, objective `sum(m - n ln m)`.
    Poisson,
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statistic::ChiSquare => write!(f, "chi-square"),
            Statistic::Poisson => write!(f, "Poisson"),
        }
    }
}

/// Objective value, gradient and curvature at one parameter point.
#[derive(Debug, Clone)]
pub struct Contribution {
    pub value: f64,
    pub gradient: Vector,
    pub curvature: SparseMatrix,
}

impl Contribution {
    pub fn zeros(npars: usize) -> Self {
        Self {
            value: 0.0,
            gradient: Vector::zeros(npars),
            curvature: SparseMatrix::new(npars, npars),
        }
    }

    /// Sum of two contributions.
    pub fn merge(mut self, other: Contribution) -> Result<Self> {
        self.value += other.value;
        self.gradient.axpy(1.0, &other.gradient)?;
        self.curvature.add_assign(&other.curvature)?;
        Ok(self)
    }
}

/// Per-bin accumulation shared by the observation types.
struct Accumulator {
    contribution: Contribution,
    grad: Vec<f64>,
    rows: Vec<usize>,
    values: Vec<f64>,
}

impl Accumulator {
    fn new(npars: usize) -> Self {
        let mut contribution = Contribution::zeros(npars);
        contribution.curvature.stack_init(0, 0);
        Self {
            contribution,
            grad: vec![0.0; npars],
            rows: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Add `value`, `g_scale * grad` to the gradient and
    /// `c_scale * grad grad'` to the curvature.
    fn add_bin(&mut self, value: f64, g_scale: f64, c_scale: f64) -> Result<()> {
        self.contribution.value += value;
        self.rows.clear();
        self.rows
            .extend((0..self.grad.len()).filter(|&j| self.grad[j] != 0.0));
        for &j in &self.rows {
            self.contribution.gradient[j] += g_scale * self.grad[j];
        }
        if c_scale == 0.0 {
            return Ok(());
        }
        for &j in &self.rows {
            let gj = self.grad[j];
            self.values.clear();
            self.values
                .extend(self.rows.iter().map(|&k| c_scale * gj * self.grad[k]));
            self.contribution
                .curvature
                .add_col_compressed(&self.rows, &self.values, j)?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Contribution> {
        self.contribution.curvature.stack_flush();
        self.contribution.curvature.stack_destroy();
        if !self.contribution.value.is_finite() {
            return Err(FitError::NonFiniteObjective(self.contribution.value));
        }
        Ok(self.contribution)
    }
}

/// Data set that contributes to the fit statistic.
pub trait Observation: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn statistic(&self) -> Statistic;

    /// Number of data bins.
    fn nbins(&self) -> usize;

    /// Names of the model components seen by this observation; all when `None`.
    fn components(&self) -> Option<&[String]>;

    /// Objective value, gradient and curvature for `pars`.
    fn contribution(&self, models: &Models, pars: &OptimizerPars) -> Result<Contribution>;

    /// Resolve the component names to indices in `models`.
    fn selection(&self, models: &Models) -> Result<Option<Vec<usize>>> {
        self.components()
            .map(|names| names.iter().map(|n| models.index_of(n)).collect())
            .transpose()
    }
}

fn check_lengths(name: &str, x: &[f64], other: &[(&str, usize)]) -> Result<()> {
    if x.is_empty() {
        return Err(FitError::InvalidData(format!("observation \"{}\" has no bins", name)));
    }
    for (what, len) in other {
        if *len != x.len() {
            return Err(FitError::InvalidData(format!(
                "observation \"{}\": {} has {} entries, expected {}",
                name,
                what,
                len,
                x.len()
            )));
        }
    }
    Ok(())
}

/// Binned data with Gaussian errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChiSquareObservation {
    name: String,
    x: Vec<f64>,
    y: Vec<f64>,
    sigma: Vec<f64>,
    components: Option<Vec<String>>,
}

impl ChiSquareObservation {
    pub fn new(name: &str, x: Vec<f64>, y: Vec<f64>, sigma: Vec<f64>) -> Result<Self> {
        check_lengths(name, &x, &[("y", y.len()), ("sigma", sigma.len())])?;
        if let Some(i) = sigma.iter().position(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(FitError::InvalidData(format!(
                "observation \"{}\": sigma[{}] = {} is not positive",
                name, i, sigma[i]
            )));
        }
        if x.iter().chain(&y).any(|v| !v.is_finite()) {
            return Err(FitError::InvalidData(format!(
                "observation \"{}\" contains non-finite values",
                name
            )));
        }
        Ok(Self {
            name: name.to_string(),
            x,
            y,
            sigma,
            components: None,
        })
    }

    /// Restrict the observation to the named model components.
    pub fn with_components(mut self, components: &[&str]) -> Self {
        self.components = Some(components.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn sigma(&self) -> &[f64] {
        &self.sigma
    }
}

impl Observation for ChiSquareObservation {
    fn name(&self) -> &str {
        &self.name
    }

    fn statistic(&self) -> Statistic {
        Statistic::ChiSquare
    }

    fn nbins(&self) -> usize {
        self.x.len()
    }

    fn components(&self) -> Option<&[String]> {
        self.components.as_deref()
    }

    fn contribution(&self, models: &Models, pars: &OptimizerPars) -> Result<Contribution> {
        let selection = self.selection(models)?;
        let mut acc = Accumulator::new(pars.len());
        for i in 0..self.x.len() {
            let m = models.eval_gradients(self.x[i], pars, selection.as_deref(), &mut acc.grad)?;
            let w = 1.0 / (self.sigma[i] * self.sigma[i]);
            let r = self.y[i] - m;
            acc.add_bin(0.5 * w * r * r, -w * r, w)?;
        }
        acc.finish()
    }
}

/// Binned Poisson counts with an optional per-bin exposure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoissonObservation {
    name: String,
    x: Vec<f64>,
    counts: Vec<f64>,
    exposure: Option<Vec<f64>>,
    components: Option<Vec<String>>,
}

impl PoissonObservation {
    pub fn new(name: &str, x: Vec<f64>, counts: Vec<f64>) -> Result<Self> {
        check_lengths(name, &x, &[("counts", counts.len())])?;
        if let Some(i) = counts.iter().position(|n| !(n.is_finite() && *n >= 0.0)) {
            return Err(FitError::InvalidData(format!(
                "observation \"{}\": counts[{}] = {} is negative",
                name, i, counts[i]
            )));
        }
        Ok(Self {
            name: name.to_string(),
            x,
            counts,
            exposure: None,
            components: None,
        })
    }

    /// Multiply the model in every bin by `exposure`.
    pub fn with_exposure(mut self, exposure: Vec<f64>) -> Result<Self> {
        check_lengths(&self.name, &self.x, &[("exposure", exposure.len())])?;
        if exposure.iter().any(|e| !(e.is_finite() && *e > 0.0)) {
            return Err(FitError::InvalidData(format!(
                "observation \"{}\": exposure must be positive",
                self.name
            )));
        }
        self.exposure = Some(exposure);
        Ok(self)
    }

    pub fn with_components(mut self, components: &[&str]) -> Self {
        self.components = Some(components.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    fn exposure_at(&self, i: usize) -> f64 {
        self.exposure.as_ref().map_or(1.0, |e| e[i])
    }
}

impl Observation for PoissonObservation {
    fn name(&self) -> &str {
        &self.name
    }

    fn statistic(&self) -> Statistic {
        Statistic::Poisson
    }

    fn nbins(&self) -> usize {
        self.x.len()
    }

    fn components(&self) -> Option<&[String]> {
        self.components.as_deref()
    }

    fn contribution(&self, models: &Models, pars: &OptimizerPars) -> Result<Contribution> {
        let selection = self.selection(models)?;
        let mut acc = Accumulator::new(pars.len());
        for i in 0..self.x.len() {
            let exposure = self.exposure_at(i);
            let m = exposure * models.eval_gradients(self.x[i], pars, selection.as_deref(), &mut acc.grad)?;
            acc.grad.iter_mut().for_each(|g| *g *= exposure);
            let n = self.counts[i];
            if m < 0.0 || (m == 0.0 && n > 0.0) {
                return Err(FitError::NonFiniteObjective(f64::INFINITY));
            }
            if n == 0.0 {
                acc.add_bin(m, 1.0, 0.0)?;
                continue;
            }
            acc.add_bin(m - n * m.ln(), 1.0 - n / m, n / (m * m))?;
        }
        acc.finish()
    }
}
