//! Numerical derivatives by Ridders' extrapolation and Minuit2 step
//! refinement.
//!
//! Ridders: central differences are computed for a geometrically shrinking
//! step and extrapolated to zero step with a Neville table. The returned
//! estimate is the table entry with the smallest error, not the last one
//! computed, so late noise from too-small steps does not degrade the result.
//!
//! Minuit2: the step is re-derived each cycle from the current second
//! derivative estimate so that truncation and rounding errors balance.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{FitError, Result};

/// Step reduction factor between successive table columns.
const CON: f64 = 1.4;
const CON2: f64 = CON * CON;
/// Maximum size of the extrapolation table.
const NTAB: usize = 10;
/// Stop when the error grows by this factor over the best one.
const SAFE: f64 = 2.0;
/// Reduction of the initial step between two Ridders attempts.
const RETRY_SHRINK: f64 = 5.0;
/// Minuit2: relative step change below which refinement stops.
const STEP_TOLERANCE: f64 = 0.3;
/// Minuit2: relative gradient change below which refinement stops.
const GRAD_TOLERANCE: f64 = 0.05;
/// Minuit2: function scale added to `|f(x)|` in the rounding estimate.
const UP: f64 = 1.0;

/// A real function of one real variable.
pub trait ScalarFunction {
    fn eval(&self, x: f64) -> f64;
}

impl<F: Fn(f64) -> f64> ScalarFunction for F {
    fn eval(&self, x: f64) -> f64 {
        self(x)
    }
}

/// Derivative estimate returned by [`Derivative::value`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivativeResult {
    pub value: f64,
    /// Error estimate of `value`.
    pub error: f64,
    /// Number of Ridders attempts made.
    pub iterations: usize,
    /// Whether `error` dropped below the requested precision.
    pub converged: bool,
}

/// Derivative engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Derivative {
    /// Requested precision of the derivative.
    pub eps: f64,
    /// Initial step as a fraction of `|x|`.
    pub step_frac: f64,
    /// Maximum number of Ridders attempts.
    pub max_iter: usize,
    /// Suppress the warning emitted when `eps` is not reached.
    pub silent: bool,
}

impl Default for Derivative {
    fn default() -> Self {
        Self {
            eps: 1e-6,
            step_frac: 0.02,
            max_iter: 5,
            silent: false,
        }
    }
}

impl Derivative {
    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_step_frac(mut self, step_frac: f64) -> Self {
        self.step_frac = step_frac;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Derivative of `f` at `x`.
    ///
    /// Ridders' method is tried with the initial step `step` (or
    /// `step_frac * |x|` when `step` is zero), shrinking it after every
    /// attempt that misses `eps`. When all attempts fail the best estimate
    /// is returned with `converged == false`.
    pub fn value<F: ScalarFunction + ?Sized>(&self, f: &F, x: f64, step: f64) -> Result<DerivativeResult> {
        let mut h = if step != 0.0 { step.abs() } else { self.step_frac * x.abs() };
        if h < tiny(x) {
            h = self.step_frac.max(tiny(x));
        }

        let mut best = DerivativeResult {
            value: 0.0,
            error: f64::INFINITY,
            iterations: 0,
            converged: false,
        };
        for iter in 1..=self.max_iter.max(1) {
            best.iterations = iter;
            let (value, error) = self.ridder(f, x, h)?;
            if error < best.error {
                best.value = value;
                best.error = error;
            }
            if error.abs() < self.eps {
                best.converged = true;
                return Ok(best);
            }
            h /= RETRY_SHRINK;
            if h < tiny(x) {
                break;
            }
        }

        if !self.silent {
            warn!(
                "Derivative at x={} did not reach precision {} after {} iterations (error {:.3e})",
                x, self.eps, best.iterations, best.error
            );
        }
        Ok(best)
    }

    /// One Ridders extrapolation starting from step `h`.
    ///
    /// Returns the derivative and its error estimate.
    pub fn ridder<F: ScalarFunction + ?Sized>(&self, f: &F, x: f64, h: f64) -> Result<(f64, f64)> {
        if h == 0.0 || !h.is_finite() {
            return Err(FitError::InvalidData(format!(
                "derivative step must be finite and non-zero (got {})",
                h
            )));
        }

        let mut a = [[0.0f64; NTAB]; NTAB];
        let mut hh = h;
        a[0][0] = self.difference(f, x, hh);
        let mut err = f64::MAX;
        let mut ans = a[0][0];

        for i in 1..NTAB {
            hh /= CON;
            a[0][i] = self.difference(f, x, hh);
            let mut fac = CON2;
            for j in 1..=i {
                a[j][i] = (a[j - 1][i] * fac - a[j - 1][i - 1]) / (fac - 1.0);
                fac *= CON2;
                let errt = (a[j][i] - a[j - 1][i])
                    .abs()
                    .max((a[j][i] - a[j - 1][i - 1]).abs());
                if errt <= err {
                    err = errt;
                    ans = a[j][i];
                }
            }
            if (a[i][i] - a[i - 1][i - 1]).abs() >= SAFE * err {
                break;
            }
        }
        Ok((ans, err))
    }

    /// Derivative of `f` at `x` by Minuit2 iterative step refinement.
    ///
    /// Starting from `step_frac * |x|`, each of at most `max_iter` cycles
    /// picks the step `sqrt(dfmin / |f''|)` that balances truncation against
    /// rounding (bounded to a tenth and ten times the previous step), then
    /// updates the first and second derivative by central differences.
    /// Refinement stops once the step or the gradient settles. `error` is
    /// the change of the gradient in the last cycle.
    pub fn minuit2<F: ScalarFunction + ?Sized>(&self, f: &F, x: f64) -> Result<DerivativeResult> {
        let f0 = f.eval(x);
        if !f0.is_finite() {
            return Err(FitError::NonFiniteObjective(f0));
        }
        let eps2 = 2.0 * f64::EPSILON.sqrt();
        let dfmin = 8.0 * eps2 * (f0.abs() + UP);
        let vrysml = 8.0 * f64::EPSILON * f64::EPSILON;

        let mut gstep = (self.step_frac * x.abs()).max(self.step_frac.max(tiny(x)));
        let mut grd = self.difference(f, x, gstep);
        let mut g2 = (f.eval(x + gstep) + f.eval(x - gstep) - 2.0 * f0) / (gstep * gstep);
        let epspri = eps2 + (grd * eps2).abs();

        let mut result = DerivativeResult {
            value: grd,
            error: f64::INFINITY,
            iterations: 0,
            converged: false,
        };
        let mut step_before = 0.0;
        for cycle in 1..=self.max_iter.max(1) {
            result.iterations = cycle;
            let optimal = (dfmin / (g2.abs() + epspri)).sqrt();
            let mut step = optimal.max((0.1 * gstep).abs());
            step = step.min(10.0 * gstep.abs());
            step = step.max(vrysml.max(8.0 * (eps2 * x).abs()));
            if ((step - step_before) / step).abs() < STEP_TOLERANCE {
                result.converged = true;
                break;
            }
            gstep = step;
            step_before = step;

            let fs1 = f.eval(x + step);
            let fs2 = f.eval(x - step);
            let grd_before = grd;
            grd = 0.5 * (fs1 - fs2) / step;
            g2 = (fs1 + fs2 - 2.0 * f0) / (step * step);
            result.value = grd;
            result.error = (grd_before - grd).abs();
            if !grd.is_finite() {
                return Err(FitError::NonFiniteObjective(grd));
            }
            if result.error / (grd.abs() + dfmin / step) < GRAD_TOLERANCE {
                result.converged = true;
                break;
            }
        }

        if !result.converged && !self.silent {
            warn!(
                "Minuit2 derivative at x={} not settled after {} cycles (change {:.3e})",
                x, result.iterations, result.error
            );
        }
        Ok(result)
    }

    /// Central difference `(f(x+h) - f(x-h)) / 2h`.
    pub fn difference<F: ScalarFunction + ?Sized>(&self, f: &F, x: f64, h: f64) -> f64 {
        (f.eval(x + h) - f.eval(x - h)) / (2.0 * h)
    }
}

/// Smallest step that still changes `x` in floating point.
fn tiny(x: f64) -> f64 {
    8.0 * f64::EPSILON * x.abs().max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_at_three() {
        let d = Derivative::default();
        let r = d.value(&|x: f64| x * x, 3.0, 0.0).unwrap();
        assert!((r.value - 6.0).abs() < d.eps, "got {}", r.value);
        assert!(r.converged);
    }

    #[test]
    fn test_sine_at_zero() {
        let d = Derivative::default();
        let r = d.value(&f64::sin, 0.0, 0.0).unwrap();
        assert!((r.value - 1.0).abs() < d.eps, "got {}", r.value);
    }

    #[test]
    fn test_exp_ridder() {
        let d = Derivative::default();
        let (v, err) = d.ridder(&f64::exp, 1.0, 0.1).unwrap();
        assert!((v - 1.0f64.exp()).abs() < 1e-10);
        assert!(err < 1e-8);
    }

    #[test]
    fn test_minuit2_matches_analytic() {
        let d = Derivative::default();
        let cases: [(&dyn Fn(f64) -> f64, f64, f64); 4] = [
            (&|x: f64| x * x, 3.0, 6.0),
            (&f64::sin, 0.5, 0.5f64.cos()),
            (&f64::exp, 1.0, 1.0f64.exp()),
            (&|x: f64| x.powi(3) - 2.0 * x, 2.0, 10.0),
        ];
        for (f, x, expected) in cases {
            let r = d.minuit2(&f, x).unwrap();
            assert!(r.converged, "x={}", x);
            assert!(
                (r.value - expected).abs() < 1e-5 * (1.0 + expected.abs()),
                "x={}: {} vs {}",
                x,
                r.value,
                expected
            );
        }
    }

    #[test]
    fn test_minuit2_agrees_with_ridders() {
        let d = Derivative::default();
        let f = |x: f64| (x * x + 1.0).ln();
        let m = d.minuit2(&f, 2.0).unwrap();
        let r = d.value(&f, 2.0, 0.0).unwrap();
        assert!((m.value - r.value).abs() < 1e-5, "{} vs {}", m.value, r.value);
    }

    #[test]
    fn test_minuit2_non_finite() {
        let d = Derivative::default().with_silent(true);
        assert!(d.minuit2(&|x: f64| x.ln(), -1.0).is_err());
    }

    #[test]
    fn test_difference() {
        let d = Derivative::default();
        let v = d.difference(&|x: f64| 3.0 * x + 1.0, 2.0, 0.5);
        assert!((v - 3.0).abs() < 1e-14);
    }

    #[test]
    fn test_zero_step_rejected() {
        let d = Derivative::default();
        assert!(d.ridder(&f64::sin, 1.0, 0.0).is_err());
    }

    #[test]
    fn test_not_converged_returns_best_estimate() {
        let d = Derivative::default().with_eps(0.0).with_max_iter(2).with_silent(true);
        let r = d.value(&|x: f64| x.powi(3), 2.0, 0.0).unwrap();
        assert!(!r.converged);
        assert_eq!(r.iterations, 2);
        assert!((r.value - 12.0).abs() < 1e-6);
    }
}
