//! Model parameters and the ordered parameter container seen by the optimizer.
//!
//! A parameter is stored as a *factor* times a fixed *scale*; the
//! optimizer works on factors so that all free parameters are of order
//! unity. Bounds, errors and gradients are kept in factor space.

use serde::{Deserialize, Serialize};

use gammafit_linalg::Vector;

use crate::error::{FitError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPar {
    name: String,
    factor_value: f64,
    factor_error: f64,
    factor_min: Option<f64>,
    factor_max: Option<f64>,
    scale: f64,
    free: bool,
    analytic_gradient: bool,
    factor_gradient: f64,
}

impl ModelPar {
    /// Free parameter with unit scale.
    pub fn new(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            factor_value: value,
            factor_error: 0.0,
            factor_min: None,
            factor_max: None,
            scale: 1.0,
            free: true,
            analytic_gradient: false,
            factor_gradient: 0.0,
        }
    }

    /// Free parameter `value = factor * scale`.
    pub fn scaled(name: &str, factor: f64, scale: f64) -> Result<Self> {
        if scale == 0.0 || !scale.is_finite() {
            return Err(FitError::invalid_parameter(name, "scale must be finite and non-zero"));
        }
        let mut par = Self::new(name, factor);
        par.scale = scale;
        Ok(par)
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Result<Self> {
        self.set_factor_range(min, max)?;
        Ok(self)
    }

    pub fn with_free(mut self, free: bool) -> Self {
        self.free = free;
        self
    }

    pub fn with_analytic_gradient(mut self, analytic: bool) -> Self {
        self.analytic_gradient = analytic;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    /// Physical value `factor * scale`.
    pub fn value(&self) -> f64 {
        self.factor_value * self.scale
    }

    pub fn set_value(&mut self, value: f64) -> Result<()> {
        self.set_factor_value(value / self.scale)
    }

    pub fn error(&self) -> f64 {
        self.factor_error * self.scale.abs()
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn factor_value(&self) -> f64 {
        self.factor_value
    }

    /// Set the factor value; values outside the bounds are rejected.
    pub fn set_factor_value(&mut self, factor: f64) -> Result<()> {
        if !factor.is_finite() {
            return Err(FitError::invalid_parameter(&self.name, format!("value {} is not finite", factor)));
        }
        if let Some(min) = self.factor_min {
            if factor < min {
                return Err(FitError::invalid_parameter(
                    &self.name,
                    format!("value {} below minimum {}", factor, min),
                ));
            }
        }
        if let Some(max) = self.factor_max {
            if factor > max {
                return Err(FitError::invalid_parameter(
                    &self.name,
                    format!("value {} above maximum {}", factor, max),
                ));
            }
        }
        self.factor_value = factor;
        Ok(())
    }

    /// Set the factor without the bounds check, for trial evaluations.
    pub(crate) fn set_factor_unchecked(&mut self, factor: f64) {
        self.factor_value = factor;
    }

    pub fn factor_error(&self) -> f64 {
        self.factor_error
    }

    pub fn set_factor_error(&mut self, error: f64) {
        self.factor_error = error;
    }

    pub fn factor_min(&self) -> Option<f64> {
        self.factor_min
    }

    pub fn factor_max(&self) -> Option<f64> {
        self.factor_max
    }

    /// Set the factor bounds. The current value must lie inside them.
    pub fn set_factor_range(&mut self, min: Option<f64>, max: Option<f64>) -> Result<()> {
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return Err(FitError::invalid_parameter(
                    &self.name,
                    format!("minimum {} exceeds maximum {}", lo, hi),
                ));
            }
        }
        if min.is_some_and(|lo| self.factor_value < lo) || max.is_some_and(|hi| self.factor_value > hi) {
            return Err(FitError::invalid_parameter(
                &self.name,
                format!("value {} outside [{:?}, {:?}]", self.factor_value, min, max),
            ));
        }
        self.factor_min = min;
        self.factor_max = max;
        Ok(())
    }

    /// Clamp a trial factor value to the bounds. The flag is set when the
    /// value had to be moved.
    pub fn clamp_factor(&self, factor: f64) -> (f64, bool) {
        if let Some(min) = self.factor_min {
            if factor < min {
                return (min, true);
            }
        }
        if let Some(max) = self.factor_max {
            if factor > max {
                return (max, true);
            }
        }
        (factor, false)
    }

    pub fn is_free(&self) -> bool {
        self.free
    }

    pub fn free(&mut self) {
        self.free = true;
    }

    pub fn fix(&mut self) {
        self.free = false;
    }

    /// Whether the owning model supplies this parameter's derivative;
    /// otherwise it is computed numerically.
    pub fn has_analytic_gradient(&self) -> bool {
        self.analytic_gradient
    }

    /// Objective gradient with respect to the factor, set when a fit ends.
    pub fn factor_gradient(&self) -> f64 {
        self.factor_gradient
    }

    pub fn set_factor_gradient(&mut self, gradient: f64) {
        self.factor_gradient = gradient;
    }

    /// Gradient with respect to the physical value.
    pub fn gradient(&self) -> f64 {
        self.factor_gradient / self.scale
    }
}

impl std::fmt::Display for ModelPar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:<24} {:>14.6e}", self.name, self.value())?;
        if self.factor_error > 0.0 {
            write!(f, " +/- {:.6e}", self.error())?;
        }
        match (self.factor_min, self.factor_max) {
            (Some(lo), Some(hi)) => write!(f, " [{:e},{:e}]", lo * self.scale, hi * self.scale)?,
            (Some(lo), None) => write!(f, " [{:e},infty[", lo * self.scale)?,
            (None, Some(hi)) => write!(f, " ]-infty,{:e}]", hi * self.scale)?,
            (None, None) => {}
        }
        if !self.free {
            write!(f, " (fixed)")?;
        }
        Ok(())
    }
}

/// Ordered list of parameters handed to the optimizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerPars {
    pars: Vec<ModelPar>,
}

impl OptimizerPars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, par: ModelPar) {
        self.pars.push(par);
    }

    pub fn len(&self) -> usize {
        self.pars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pars.is_empty()
    }

    pub fn as_slice(&self) -> &[ModelPar] {
        &self.pars
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ModelPar> {
        self.pars.iter()
    }

    pub fn get(&self, index: usize) -> Option<&ModelPar> {
        self.pars.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ModelPar> {
        self.pars.get_mut(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.pars.iter().position(|p| p.name == name)
    }

    pub fn by_name(&self, name: &str) -> Result<&ModelPar> {
        self.pars
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| FitError::UnknownParameter(name.to_string()))
    }

    pub fn by_name_mut(&mut self, name: &str) -> Result<&mut ModelPar> {
        self.pars
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| FitError::UnknownParameter(name.to_string()))
    }

    /// Number of free parameters.
    pub fn nfree(&self) -> usize {
        self.pars.iter().filter(|p| p.free).count()
    }

    pub fn free_indices(&self) -> Vec<usize> {
        (0..self.pars.len()).filter(|&i| self.pars[i].free).collect()
    }

    pub fn factor_values(&self) -> Vector {
        self.pars.iter().map(ModelPar::factor_value).collect()
    }

    pub fn values(&self) -> Vector {
        self.pars.iter().map(ModelPar::value).collect()
    }

    pub fn factor_errors(&self) -> Vector {
        self.pars.iter().map(ModelPar::factor_error).collect()
    }

    /// Replace all factor values; bounds are checked for every entry
    /// before anything is changed.
    pub fn set_factor_values(&mut self, values: &Vector) -> Result<()> {
        if values.len() != self.pars.len() {
            return Err(gammafit_linalg::LinalgError::DimensionMismatch {
                expected: self.pars.len(),
                got: values.len(),
            }
            .into());
        }
        let mut updated = self.pars.clone();
        for (par, &v) in updated.iter_mut().zip(values.iter()) {
            par.set_factor_value(v)?;
        }
        self.pars = updated;
        Ok(())
    }
}

impl FromIterator<ModelPar> for OptimizerPars {
    fn from_iter<I: IntoIterator<Item = ModelPar>>(iter: I) -> Self {
        Self {
            pars: iter.into_iter().collect(),
        }
    }
}

impl std::ops::Index<usize> for OptimizerPars {
    type Output = ModelPar;
    fn index(&self, index: usize) -> &ModelPar {
        &self.pars[index]
    }
}

impl std::ops::IndexMut<usize> for OptimizerPars {
    fn index_mut(&mut self, index: usize) -> &mut ModelPar {
        &mut self.pars[index]
    }
}
