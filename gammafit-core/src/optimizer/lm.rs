//! Levenberg-Marquardt minimisation.
//!
//! The fit runs as an explicit state machine:
//!
//! ```text
//! Init -> Evaluate -> Accept -> Solve -> Evaluate -> Accept | Reject -> ...
//!                                  \-> Reject (factorisation failed)
//! terminal: Converged | Diverged | MaxIter
//! ```
//!
//! Each `Solve` factorises the damped curvature `H + lambda diag(H)` of
//! the free parameters and solves for the step `H' delta = -g`. A worse
//! objective, a non-finite objective or a failed factorisation rejects
//! the step and raises `lambda`; an accepted step lowers it. A `lambda`
//! past its limit ends the fit as `Diverged` when no step was ever
//! accepted and as `MaxIter` otherwise. The sparse
//! solver keeps its symbolic analysis as long as the curvature pattern
//! does not change.

use std::fmt::Write as _;

use tracing::{debug, info, warn};

use gammafit_linalg::decomposition::{condition_number, solve_spd};
use gammafit_linalg::{SparseCholesky, SparseMatrix, Vector};

use super::config::{LinearSolver, LmConfig};
use super::result::{FitCounters, FitResult, FitStatus, IterationRecord};
use crate::error::{FitError, Result};
use crate::likelihood::FitFunction;
use crate::log::FitLog;
use crate::observation::Contribution;
use crate::pars::OptimizerPars;

/// States of the optimizer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LmState {
    Init,
    Evaluate,
    Solve,
    Accept,
    Reject,
    Converged,
    Diverged,
    MaxIter,
}

impl LmState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LmState::Converged | LmState::Diverged | LmState::MaxIter)
    }
}

#[derive(Debug)]
pub struct LevenbergMarquardt {
    config: LmConfig,
    log: Option<FitLog>,
}

/// Mutable state of one fit.
struct Run {
    free: Vec<usize>,
    solver: SparseCholesky,
    lambda: f64,
    iterations: usize,
    stall: usize,
    retries: usize,
    current: Option<Contribution>,
    trial: OptimizerPars,
    trial_eval: Option<Contribution>,
    step_norm: f64,
    counters: FitCounters,
    trace: Vec<IterationRecord>,
}

impl LevenbergMarquardt {
    pub fn new(config: LmConfig) -> Self {
        Self { config, log: None }
    }

    /// Write the iteration protocol to `log`.
    pub fn with_log(mut self, log: FitLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn config(&self) -> &LmConfig {
        &self.config
    }

    pub fn log_mut(&mut self) -> Option<&mut FitLog> {
        self.log.as_mut()
    }

    pub fn take_log(&mut self) -> Option<FitLog> {
        self.log.take()
    }

    /// Minimise `fct` starting from `pars`.
    ///
    /// On return `pars` holds the best parameters found together with
    /// their factor errors. Numerical trouble never aborts the fit; it is
    /// reported through the status of the result. Errors are returned
    /// only when the starting point cannot be evaluated or the function
    /// itself fails.
    pub fn optimize(&mut self, fct: &dyn FitFunction, pars: &mut OptimizerPars) -> Result<FitResult> {
        let mut run = Run {
            free: pars.free_indices(),
            solver: SparseCholesky::new(self.config.ordering).with_compression(self.config.compress),
            lambda: self.config.lambda_start,
            iterations: 0,
            stall: 0,
            retries: 0,
            current: None,
            trial: pars.clone(),
            trial_eval: None,
            step_norm: 0.0,
            counters: FitCounters::default(),
            trace: Vec::new(),
        };

        let mut state = LmState::Init;
        while !state.is_terminal() {
            state = match state {
                LmState::Init => self.init(&run, pars)?,
                LmState::Evaluate => self.evaluate(&mut run, fct)?,
                LmState::Solve => self.solve(&mut run, pars)?,
                LmState::Accept => self.accept(&mut run, pars),
                LmState::Reject => self.reject(&mut run),
                terminal => terminal,
            };
        }

        let status = match state {
            LmState::Converged => FitStatus::Converged,
            LmState::Diverged => FitStatus::Diverged,
            _ => FitStatus::MaxIter,
        };
        self.finish(run, fct, pars, status)
    }

    fn init(&mut self, run: &Run, pars: &OptimizerPars) -> Result<LmState> {
        if run.free.is_empty() {
            return Err(FitError::NoFreeParameters);
        }
        info!(
            "Starting Levenberg-Marquardt fit with {} parameters ({} free)",
            pars.len(),
            run.free.len()
        );
        if let Some(log) = self.log.as_mut() {
            log.header1("Levenberg-Marquardt optimisation");
            log.parameter("Number of parameters", pars.len());
            log.parameter("Number of free parameters", run.free.len());
            log.parameter("Initial lambda", self.config.lambda_start);
            log.parameter("Convergence criterion", self.config.eps);
        }
        Ok(LmState::Evaluate)
    }

    /// Evaluate the trial point.
    fn evaluate(&mut self, run: &mut Run, fct: &dyn FitFunction) -> Result<LmState> {
        run.counters.evaluations += 1;
        let outcome = fct.evaluate(&run.trial).and_then(|e| {
            if e.value.is_finite() {
                Ok(e)
            } else {
                Err(FitError::NonFiniteObjective(e.value))
            }
        });
        match (outcome, run.current.as_ref()) {
            (Ok(eval), None) => {
                run.trial_eval = Some(eval);
                Ok(LmState::Accept)
            }
            (Ok(eval), Some(current)) => {
                let better = eval.value <= current.value;
                run.trial_eval = Some(eval);
                Ok(if better { LmState::Accept } else { LmState::Reject })
            }
            (Err(FitError::NonFiniteObjective(v)), Some(_)) => {
                debug!("Trial step gives non-finite objective {}", v);
                Ok(LmState::Reject)
            }
            (Err(e), _) => Err(e),
        }
    }

    /// Solve the damped system and set up the trial point.
    fn solve(&mut self, run: &mut Run, pars: &OptimizerPars) -> Result<LmState> {
        let Some(current) = run.current.as_ref() else {
            return Ok(LmState::Evaluate);
        };
        let delta = match self.damped_step(current, &run.free, run.lambda, &mut run.solver) {
            Ok(delta) => delta,
            Err(FitError::Linalg(e)) if e.is_numerical_failure() => {
                run.counters.singular_solves += 1;
                debug!("Damped system not solvable at lambda={:.3e}: {}", run.lambda, e);
                run.trial_eval = None;
                run.step_norm = 0.0;
                return Ok(LmState::Reject);
            }
            Err(e) => return Err(e),
        };

        run.trial = pars.clone();
        let mut norm2 = 0.0;
        for (k, &j) in run.free.iter().enumerate() {
            let old = pars[j].factor_value();
            let (value, hit) = pars[j].clamp_factor(old + delta[k]);
            if hit {
                run.counters.boundary_hits += 1;
                debug!("Parameter {} clipped at bound {}", pars[j].name(), value);
            }
            run.trial[j].set_factor_unchecked(value);
            norm2 += (value - old) * (value - old);
        }
        run.step_norm = norm2.sqrt();
        Ok(LmState::Evaluate)
    }

    /// Step of the free parameters from the damped normal equations.
    fn damped_step(
        &self,
        current: &Contribution,
        free: &[usize],
        lambda: f64,
        solver: &mut SparseCholesky,
    ) -> Result<Vector> {
        let mut damped = current.curvature.submatrix(free)?;
        for k in 0..free.len() {
            let d = damped.get(k, k);
            if d != 0.0 {
                damped.add_to(k, k, lambda * d)?;
            }
        }
        let rhs: Vector = free.iter().map(|&j| -current.gradient[j]).collect();
        match self.config.solver {
            LinearSolver::Sparse => Ok(solver.solve(&damped, &rhs)?),
            LinearSolver::Dense => self.dense_solve(&damped, &rhs),
        }
    }

    fn dense_solve(&self, a: &SparseMatrix, b: &Vector) -> Result<Vector> {
        let n = a.rows();
        let keep: Vec<usize> = if self.config.compress {
            a.active_lines()
        } else {
            (0..n).collect()
        };
        let sub = a.submatrix(&keep)?.to_dense();
        let rhs: Vector = keep.iter().map(|&i| b[i]).collect();
        let xs = solve_spd(&sub, &rhs).map_err(|e| match e {
            gammafit_linalg::LinalgError::SingularMatrix { column } => {
                gammafit_linalg::LinalgError::SingularMatrix { column: keep[column] }
            }
            gammafit_linalg::LinalgError::NotPositiveDefinite { column, pivot } => {
                gammafit_linalg::LinalgError::NotPositiveDefinite {
                    column: keep[column],
                    pivot,
                }
            }
            e => e,
        })?;
        let mut x = Vector::zeros(n);
        for (k, &i) in keep.iter().enumerate() {
            x[i] = xs[k];
        }
        Ok(x)
    }

    fn accept(&mut self, run: &mut Run, pars: &mut OptimizerPars) -> LmState {
        let Some(new) = run.trial_eval.take() else {
            return LmState::Solve;
        };
        let new_value = new.value;
        let Some(old) = run.current.replace(new) else {
            info!("Initial objective: {:.6e}", new_value);
            if let Some(log) = self.log.as_mut() {
                log.parameter("Initial function value", format!("{:.6e}", new_value));
            }
            return LmState::Solve;
        };

        *pars = run.trial.clone();
        run.iterations += 1;
        run.retries = 0;
        run.counters.accepted += 1;
        let improvement = old.value - new_value;
        self.record(run, Some(new_value), true);
        run.lambda = (run.lambda * self.config.lambda_dec).max(self.config.lambda_min);

        if improvement <= self.config.eps * old.value.abs().max(1.0) {
            run.stall += 1;
        } else {
            run.stall = 0;
        }

        if run.stall >= self.config.max_stall {
            LmState::Converged
        } else if run.iterations >= self.config.max_iter {
            LmState::MaxIter
        } else {
            LmState::Solve
        }
    }

    fn reject(&mut self, run: &mut Run) -> LmState {
        let value = run.trial_eval.take().map(|e| e.value);
        run.counters.rejected += 1;
        run.retries += 1;
        self.record(run, value, false);
        run.lambda *= self.config.lambda_inc;

        if run.lambda > self.config.lambda_max {
            if run.counters.accepted == 0 {
                warn!(
                    "Damping factor {:.3e} exceeds {:.3e} before any accepted step; fit diverged",
                    run.lambda, self.config.lambda_max
                );
                return LmState::Diverged;
            }
            warn!(
                "Damping factor {:.3e} exceeds {:.3e}; no further improvement after {} accepted steps",
                run.lambda, self.config.lambda_max, run.counters.accepted
            );
            return LmState::MaxIter;
        }
        if run.retries > self.config.max_retries {
            run.iterations += 1;
            run.retries = 0;
            if run.iterations >= self.config.max_iter {
                return LmState::MaxIter;
            }
        }
        LmState::Solve
    }

    fn record(&mut self, run: &mut Run, value: Option<f64>, accepted: bool) {
        let record = IterationRecord {
            iteration: run.iterations,
            value,
            lambda: run.lambda,
            accepted,
            step_norm: run.step_norm,
        };
        debug!(
            "Iteration {}: value={:?}, lambda={:.3e}, step={:.3e}, {}",
            record.iteration,
            value,
            record.lambda,
            record.step_norm,
            if accepted { "accepted" } else { "rejected" }
        );
        if let Some(log) = self.log.as_mut() {
            let shown = value.map_or_else(|| "singular".to_string(), |v| format!("{:.6e}", v));
            let _ = writeln!(
                log,
                "Iteration {:>4}: func={} lambda={:.1e} step={:.3e}{}",
                record.iteration,
                shown,
                record.lambda,
                record.step_norm,
                if accepted { "" } else { " (rejected)" }
            );
        }
        if self.config.record_trace {
            run.trace.push(record);
        }
    }

    /// Parameter errors and covariance from the undamped curvature.
    fn finish(
        &mut self,
        mut run: Run,
        fct: &dyn FitFunction,
        pars: &mut OptimizerPars,
        status: FitStatus,
    ) -> Result<FitResult> {
        let Some(current) = run.current.take() else {
            return Err(FitError::NonFiniteObjective(f64::NAN));
        };
        run.counters.analyses = run.solver.analyses();

        let n = pars.len();
        let curvature = current.curvature.submatrix(&run.free)?;
        let mut covariance = None;
        match curvature.cholesky_invert(self.config.compress) {
            Ok(inv) => {
                let mut full = vec![0.0; n * n];
                for (r, c, v) in inv.triplets() {
                    full[run.free[r] * n + run.free[c]] = v;
                }
                for j in 0..n {
                    let var = full[j * n + j];
                    pars[j].set_factor_error(if var > 0.0 { var.sqrt() } else { 0.0 });
                }
                covariance = Some(full);
            }
            Err(e) => {
                warn!("Unable to compute parameter errors: {}", e);
                for j in 0..n {
                    pars[j].set_factor_error(0.0);
                }
            }
        }

        for j in 0..n {
            let g = if pars[j].is_free() { current.gradient[j] } else { 0.0 };
            pars[j].set_factor_gradient(g);
        }

        let active = curvature.active_lines();
        let condition = if active.is_empty() {
            None
        } else {
            condition_number(&curvature.submatrix(&active)?.to_dense()).ok()
        };

        let mut result = FitResult::new(status, current.value, pars.clone());
        result.lambda = run.lambda;
        result.iterations = run.iterations;
        result.covariance = covariance;
        result.condition = condition;
        result.goodness = fct.goodness_of_fit(current.value, run.free.len());
        result.counters = run.counters;
        result.trace = run.trace;

        info!(
            "Fit {} after {} iterations: value={:.6e}, accepted={}, rejected={}, singular={}",
            status,
            result.iterations,
            result.value,
            result.counters.accepted,
            result.counters.rejected,
            result.counters.singular_solves
        );
        if let Some(log) = self.log.as_mut() {
            log.parameter("Status", status);
            log.parameter("Iterations", result.iterations);
            log.parameter("Final function value", format!("{:.6e}", result.value));
            log.parameter("Final lambda", format!("{:.1e}", result.lambda));
            if let Err(e) = log.flush(true) {
                warn!("Fit log flush failed: {:#}", e);
            }
        }
        Ok(result)
    }
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self::new(LmConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Linear, Models};
    use crate::observation::ChiSquareObservation;
    use crate::likelihood::Likelihood;
    use crate::pars::ModelPar;

    fn line_fit() -> Likelihood {
        let mut models = Models::new();
        models.push("line", Box::new(Linear)).unwrap();
        let mut like = Likelihood::new(models).with_parallel(false);
        like.push(Box::new(
            ChiSquareObservation::new("d", vec![1.0, 2.0, 3.0], vec![2.0, 4.0, 6.0], vec![1.0; 3]).unwrap(),
        ))
        .unwrap();
        like
    }

    /// Quadratic bowl with a fixed curvature matrix.
    struct Quadratic {
        h: Vec<[f64; 2]>,
        center: [f64; 2],
    }

    impl FitFunction for Quadratic {
        fn evaluate(&self, pars: &OptimizerPars) -> Result<Contribution> {
            let d = [
                pars[0].factor_value() - self.center[0],
                pars[1].factor_value() - self.center[1],
            ];
            let hd = [
                self.h[0][0] * d[0] + self.h[0][1] * d[1],
                self.h[1][0] * d[0] + self.h[1][1] * d[1],
            ];
            let mut c = Contribution::zeros(2);
            c.value = 0.5 * (d[0] * hd[0] + d[1] * hd[1]);
            c.gradient = Vector::from(vec![hd[0], hd[1]]);
            for i in 0..2 {
                for j in 0..2 {
                    if self.h[i][j] != 0.0 {
                        c.curvature.set(i, j, self.h[i][j])?;
                    }
                }
            }
            Ok(c)
        }
    }

    fn two_pars() -> OptimizerPars {
        [ModelPar::new("x", 0.0), ModelPar::new("y", 0.0)].into_iter().collect()
    }

    #[test]
    fn test_line_fit_converges() {
        let like = line_fit();
        let mut pars = like.parameters();
        let mut lm = LevenbergMarquardt::new(LmConfig::default().with_trace(true));
        let result = lm.optimize(&like, &mut pars).unwrap();
        assert_eq!(result.status, FitStatus::Converged);
        assert!((pars[0].factor_value() - 2.0).abs() < 1e-6);
        assert!(result.iterations < 20);
        assert_eq!(result.trace.len(), result.counters.accepted + result.counters.rejected);
        // 1 / sqrt(sum x^2)
        assert!((pars[0].factor_error() - 1.0 / 14.0f64.sqrt()).abs() < 1e-9);
        // objective gradient 14 (a - 2) vanishes at the optimum
        assert!(pars[0].factor_gradient().abs() < 1e-4);
        assert_eq!(result.pars[0].factor_gradient(), pars[0].factor_gradient());
    }

    #[test]
    fn test_dense_solver_agrees() {
        let like = line_fit();
        let mut sparse_pars = like.parameters();
        let mut dense_pars = like.parameters();
        LevenbergMarquardt::default()
            .optimize(&like, &mut sparse_pars)
            .unwrap();
        LevenbergMarquardt::new(LmConfig::default().with_solver(LinearSolver::Dense))
            .optimize(&like, &mut dense_pars)
            .unwrap();
        assert!((sparse_pars[0].factor_value() - dense_pars[0].factor_value()).abs() < 1e-9);
    }

    #[test]
    fn test_no_free_parameters() {
        let like = line_fit();
        let mut pars = like.parameters();
        pars[0].fix();
        assert!(matches!(
            LevenbergMarquardt::default().optimize(&like, &mut pars),
            Err(FitError::NoFreeParameters)
        ));
    }

    #[test]
    fn test_indefinite_curvature_diverges() {
        let f = Quadratic {
            h: vec![[-1.0, 0.0], [0.0, -2.0]],
            center: [1.0, 1.0],
        };
        let mut pars = two_pars();
        let result = LevenbergMarquardt::default().optimize(&f, &mut pars).unwrap();
        assert_eq!(result.status, FitStatus::Diverged);
        assert!(result.counters.singular_solves > 0);
        assert_eq!(result.counters.accepted, 0);
        assert!(result.covariance.is_none());
    }

    /// Parabola around 1 whose reported gradient points uphill once the
    /// parameter passes 0.5, so only the first step can be accepted.
    struct Uphill;

    impl FitFunction for Uphill {
        fn evaluate(&self, pars: &OptimizerPars) -> Result<Contribution> {
            let x = pars[0].factor_value();
            let d = x - 1.0;
            let mut c = Contribution::zeros(1);
            c.value = 0.5 * d * d;
            c.gradient = Vector::from(vec![if x > 0.5 { -d } else { d }]);
            c.curvature.set(0, 0, 1.0)?;
            Ok(c)
        }
    }

    #[test]
    fn test_stall_after_progress_is_not_divergence() {
        let mut pars: OptimizerPars = [ModelPar::new("x", 0.0)].into_iter().collect();
        let result = LevenbergMarquardt::default().optimize(&Uphill, &mut pars).unwrap();
        assert_eq!(result.status, FitStatus::MaxIter);
        assert_eq!(result.counters.accepted, 1);
        assert!(result.counters.rejected > 0);
        assert!((pars[0].factor_value() - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_symbolic_analysis_reused() {
        let f = Quadratic {
            h: vec![[2.0, 0.5], [0.5, 1.0]],
            center: [3.0, -1.0],
        };
        let mut pars = two_pars();
        let result = LevenbergMarquardt::default().optimize(&f, &mut pars).unwrap();
        assert!(result.converged());
        assert!(result.counters.accepted >= 2);
        assert_eq!(result.counters.analyses, 1);
        assert!((pars[0].factor_value() - 3.0).abs() < 1e-4);
        assert!((pars[1].factor_value() + 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_bounds_are_respected() {
        let f = Quadratic {
            h: vec![[1.0, 0.0], [0.0, 1.0]],
            center: [5.0, 0.5],
        };
        let mut pars: OptimizerPars = [
            ModelPar::new("x", 0.0).with_range(None, Some(2.0)).unwrap(),
            ModelPar::new("y", 0.0),
        ]
        .into_iter()
        .collect();
        let result = LevenbergMarquardt::default().optimize(&f, &mut pars).unwrap();
        assert!(result.counters.boundary_hits > 0);
        assert!(pars[0].factor_value() <= 2.0);
        assert!((pars[0].factor_value() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_max_iter() {
        let f = Quadratic {
            h: vec![[1.0, 0.0], [0.0, 1e-3]],
            center: [1e3, 1e3],
        };
        let mut pars = two_pars();
        let result = LevenbergMarquardt::new(LmConfig::default().with_max_iter(1))
            .optimize(&f, &mut pars)
            .unwrap();
        assert_eq!(result.status, FitStatus::MaxIter);
        assert_eq!(result.iterations, 1);
    }

    #[test]
    fn test_fit_log_written() {
        let like = line_fit();
        let mut pars = like.parameters();
        let mut log = FitLog::new();
        log.set_max_size(usize::MAX);
        let mut lm = LevenbergMarquardt::default().with_log(log);
        lm.optimize(&like, &mut pars).unwrap();
        let log = lm.take_log().unwrap();
        // flushed at the end of the fit
        assert_eq!(log.size(), 0);
    }
}
