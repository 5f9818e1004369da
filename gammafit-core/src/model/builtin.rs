//! Built-in spectral shapes.
//!
//! Gradients are analytic except for the Gaussian width, which
//! [`super::Models`] differentiates numerically.

use std::f64::consts::PI;

use super::FitModel;
use crate::error::Result;
use crate::pars::ModelPar;

/// `d value / d factor` for a free parameter, zero for a fixed one.
fn factor_gradient(par: &ModelPar, d_value: f64) -> f64 {
    if par.is_free() {
        d_value * par.scale()
    } else {
        0.0
    }
}

/// `f(x) = c`
#[derive(Debug, Clone, Copy, Default)]
pub struct Constant;

impl FitModel for Constant {
    fn type_name(&self) -> &'static str {
        "Constant"
    }

    fn parameters(&self) -> Vec<ModelPar> {
        vec![ModelPar::new("Value", 1.0).with_analytic_gradient(true)]
    }

    fn eval(&self, _x: f64, pars: &[ModelPar]) -> f64 {
        pars[0].value()
    }

    fn has_analytic_gradient(&self) -> bool {
        true
    }

    fn eval_gradients(&self, _x: f64, pars: &[ModelPar], grad: &mut [f64]) -> Result<f64> {
        grad[0] = factor_gradient(&pars[0], 1.0);
        Ok(pars[0].value())
    }
}

/// `f(x) = a x`
#[derive(Debug, Clone, Copy, Default)]
pub struct Linear;

impl FitModel for Linear {
    fn type_name(&self) -> &'static str {
        "Linear"
    }

    fn parameters(&self) -> Vec<ModelPar> {
        vec![ModelPar::new("Slope", 1.0).with_analytic_gradient(true)]
    }

    fn eval(&self, x: f64, pars: &[ModelPar]) -> f64 {
        pars[0].value() * x
    }

    fn has_analytic_gradient(&self) -> bool {
        true
    }

    fn eval_gradients(&self, x: f64, pars: &[ModelPar], grad: &mut [f64]) -> Result<f64> {
        grad[0] = factor_gradient(&pars[0], x);
        Ok(pars[0].value() * x)
    }
}

/// `f(x) = k (x / x0)^gamma`, pivot `x0` fixed by default.
#[derive(Debug, Clone, Copy, Default)]
pub struct PowerLaw;

impl FitModel for PowerLaw {
    fn type_name(&self) -> &'static str {
        "PowerLaw"
    }

    fn parameters(&self) -> Vec<ModelPar> {
        vec![
            ModelPar::new("Prefactor", 1.0).with_analytic_gradient(true),
            ModelPar::new("Index", -2.0).with_analytic_gradient(true),
            ModelPar::new("PivotEnergy", 1.0)
                .with_free(false)
                .with_analytic_gradient(true),
        ]
    }

    fn eval(&self, x: f64, pars: &[ModelPar]) -> f64 {
        pars[0].value() * (x / pars[2].value()).powf(pars[1].value())
    }

    fn has_analytic_gradient(&self) -> bool {
        true
    }

    fn eval_gradients(&self, x: f64, pars: &[ModelPar], grad: &mut [f64]) -> Result<f64> {
        let (norm, index, pivot) = (pars[0].value(), pars[1].value(), pars[2].value());
        let e = x / pivot;
        let power = e.powf(index);
        let value = norm * power;
        grad[0] = factor_gradient(&pars[0], power);
        grad[1] = factor_gradient(&pars[1], value * e.ln());
        grad[2] = factor_gradient(&pars[2], -value * index / pivot);
        Ok(value)
    }
}

/// `f(x) = k (x / x0)^(gamma + eta ln(x / x0))`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogParabola;

impl FitModel for LogParabola {
    fn type_name(&self) -> &'static str {
        "LogParabola"
    }

    fn parameters(&self) -> Vec<ModelPar> {
        vec![
            ModelPar::new("Prefactor", 1.0).with_analytic_gradient(true),
            ModelPar::new("Index", -2.0).with_analytic_gradient(true),
            ModelPar::new("Curvature", -0.1).with_analytic_gradient(true),
            ModelPar::new("PivotEnergy", 1.0)
                .with_free(false)
                .with_analytic_gradient(true),
        ]
    }

    fn eval(&self, x: f64, pars: &[ModelPar]) -> f64 {
        let e = x / pars[3].value();
        let exponent = pars[1].value() + pars[2].value() * e.ln();
        pars[0].value() * e.powf(exponent)
    }

    fn has_analytic_gradient(&self) -> bool {
        true
    }

    fn eval_gradients(&self, x: f64, pars: &[ModelPar], grad: &mut [f64]) -> Result<f64> {
        let (norm, index, curvature, pivot) =
            (pars[0].value(), pars[1].value(), pars[2].value(), pars[3].value());
        let e = x / pivot;
        let log_e = e.ln();
        let exponent = index + curvature * log_e;
        let power = e.powf(exponent);
        let value = norm * power;
        grad[0] = factor_gradient(&pars[0], power);
        grad[1] = factor_gradient(&pars[1], value * log_e);
        grad[2] = factor_gradient(&pars[2], value * log_e * log_e);
        grad[3] = factor_gradient(&pars[3], -value / pivot * (exponent + curvature * log_e));
        Ok(value)
    }
}

/// `f(x) = n / (sigma sqrt(2 pi)) exp(-(x - mu)^2 / 2 sigma^2)`
#[derive(Debug, Clone, Copy, Default)]
pub struct Gaussian;

impl FitModel for Gaussian {
    fn type_name(&self) -> &'static str {
        "Gaussian"
    }

    fn parameters(&self) -> Vec<ModelPar> {
        let sigma = ModelPar::new("Sigma", 1.0);
        // Starting value 1 always lies inside (1e-10, inf).
        let sigma = sigma.clone().with_range(Some(1e-10), None).unwrap_or(sigma);
        vec![
            ModelPar::new("Normalization", 1.0).with_analytic_gradient(true),
            ModelPar::new("Mean", 0.0).with_analytic_gradient(true),
            sigma,
        ]
    }

    fn eval(&self, x: f64, pars: &[ModelPar]) -> f64 {
        let (norm, mean, sigma) = (pars[0].value(), pars[1].value(), pars[2].value());
        let arg = (x - mean) / sigma;
        norm / (sigma * (2.0 * PI).sqrt()) * (-0.5 * arg * arg).exp()
    }

    fn has_analytic_gradient(&self) -> bool {
        true
    }

    fn eval_gradients(&self, x: f64, pars: &[ModelPar], grad: &mut [f64]) -> Result<f64> {
        let (norm, mean, sigma) = (pars[0].value(), pars[1].value(), pars[2].value());
        let arg = (x - mean) / sigma;
        let shape = (-0.5 * arg * arg).exp() / (sigma * (2.0 * PI).sqrt());
        let value = norm * shape;
        grad[0] = factor_gradient(&pars[0], shape);
        grad[1] = factor_gradient(&pars[1], value * arg / sigma);
        Ok(value)
    }
}
