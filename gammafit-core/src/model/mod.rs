//! Model components and the ordered model container.
//!
//! Every component implements [`FitModel`], a flat capability interface
//! (evaluate, evaluate with gradients). Parameters are not owned by the
//! model implementation: each component keeps its starting parameters and
//! the optimizer works on the concatenation of all components' parameters
//! as one [`OptimizerPars`].

pub mod builtin;
pub mod registry;

use std::fmt;

use tracing::trace;

use crate::derivative::Derivative;
use crate::error::{FitError, Result};
use crate::pars::{ModelPar, OptimizerPars};

pub use builtin::{Constant, Gaussian, Linear, LogParabola, PowerLaw};
pub use registry::ModelRegistry;

/// A model of one real variable with named parameters.
pub trait FitModel: fmt::Debug + Send + Sync {
    /// Registry name of the model type.
    fn type_name(&self) -> &'static str;

    /// Parameters with their starting values.
    fn parameters(&self) -> Vec<ModelPar>;

    /// Model value at `x`.
    fn eval(&self, x: f64, pars: &[ModelPar]) -> f64;

    /// Whether [`FitModel::eval_gradients`] is implemented. Only entries of
    /// parameters flagged with [`ModelPar::has_analytic_gradient`] are
    /// taken from it; the others are differentiated numerically.
    fn has_analytic_gradient(&self) -> bool {
        false
    }

    /// Model value at `x`, writing the derivatives with respect to the
    /// parameter factors into `grad`.
    fn eval_gradients(&self, x: f64, pars: &[ModelPar], grad: &mut [f64]) -> Result<f64> {
        let _ = (x, pars, grad);
        Err(FitError::FeatureNotImplemented("analytic model gradients"))
    }
}

/// A named model instance inside [`Models`].
#[derive(Debug)]
pub struct Component {
    name: String,
    model: Box<dyn FitModel>,
    pars: Vec<ModelPar>,
}

impl Component {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &dyn FitModel {
        self.model.as_ref()
    }

    pub fn pars(&self) -> &[ModelPar] {
        &self.pars
    }

    pub fn par_mut(&mut self, name: &str) -> Result<&mut ModelPar> {
        self.pars
            .iter_mut()
            .find(|p| p.name() == name)
            .ok_or_else(|| FitError::UnknownParameter(name.to_string()))
    }
}

/// Ordered list of model components.
#[derive(Debug)]
pub struct Models {
    components: Vec<Component>,
    derivative: Derivative,
}

impl Default for Models {
    fn default() -> Self {
        Self::new()
    }
}

impl Models {
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
            derivative: Derivative::default().with_silent(true),
        }
    }

    /// Derivative settings used for models without analytic gradients.
    pub fn with_derivative(mut self, derivative: Derivative) -> Self {
        self.derivative = derivative;
        self
    }

    /// Append a component. Names must be unique.
    pub fn push(&mut self, name: &str, model: Box<dyn FitModel>) -> Result<()> {
        if self.components.iter().any(|c| c.name == name) {
            return Err(FitError::InvalidData(format!("duplicate component name \"{}\"", name)));
        }
        let pars = model.parameters();
        self.components.push(Component {
            name: name.to_string(),
            model,
            pars,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn names(&self) -> Vec<&str> {
        self.components.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.components
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| FitError::UnknownModel(name.to_string()))
    }

    pub fn component_mut(&mut self, name: &str) -> Result<&mut Component> {
        let k = self.index_of(name)?;
        Ok(&mut self.components[k])
    }

    /// Total number of parameters.
    pub fn npars(&self) -> usize {
        self.components.iter().map(|c| c.pars.len()).sum()
    }

    /// Offset of each component's parameters in the global vector.
    pub fn offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.components.len());
        let mut offset = 0;
        for c in &self.components {
            offsets.push(offset);
            offset += c.pars.len();
        }
        offsets
    }

    /// Global parameter list, names prefixed by the component name.
    pub fn parameters(&self) -> OptimizerPars {
        let mut pars = OptimizerPars::new();
        for c in &self.components {
            for p in &c.pars {
                let mut q = p.clone();
                q.set_name(&format!("{}:{}", c.name, p.name()));
                pars.push(q);
            }
        }
        pars
    }

    /// Copy values, errors and free flags back into the components.
    pub fn update(&mut self, pars: &OptimizerPars) -> Result<()> {
        if pars.len() != self.npars() {
            return Err(gammafit_linalg::LinalgError::DimensionMismatch {
                expected: self.npars(),
                got: pars.len(),
            }
            .into());
        }
        let mut k = 0;
        for c in &mut self.components {
            for p in &mut c.pars {
                let name = p.name().to_string();
                *p = pars[k].clone();
                p.set_name(&name);
                k += 1;
            }
        }
        Ok(())
    }

    /// Sum of the selected components (all when `selection` is `None`) at `x`.
    pub fn eval(&self, x: f64, pars: &OptimizerPars, selection: Option<&[usize]>) -> Result<f64> {
        self.check_pars(pars)?;
        let offsets = self.offsets();
        let mut value = 0.0;
        for k in self.selected(selection)? {
            let c = &self.components[k];
            let slice = &pars.as_slice()[offsets[k]..offsets[k] + c.pars.len()];
            value += c.model.eval(x, slice);
        }
        Ok(value)
    }

    /// Sum of the selected components at `x`; `grad` (one entry per global
    /// parameter) receives the factor gradients. Entries of parameters
    /// outside the selection or fixed are zero.
    pub fn eval_gradients(
        &self,
        x: f64,
        pars: &OptimizerPars,
        selection: Option<&[usize]>,
        grad: &mut [f64],
    ) -> Result<f64> {
        self.check_pars(pars)?;
        if grad.len() != pars.len() {
            return Err(gammafit_linalg::LinalgError::DimensionMismatch {
                expected: pars.len(),
                got: grad.len(),
            }
            .into());
        }
        grad.iter_mut().for_each(|g| *g = 0.0);
        let offsets = self.offsets();
        let mut value = 0.0;
        for k in self.selected(selection)? {
            let c = &self.components[k];
            let range = offsets[k]..offsets[k] + c.pars.len();
            let slice = &pars.as_slice()[range.clone()];
            let g = &mut grad[range];
            let analytic = c.model.has_analytic_gradient();
            value += if analytic {
                c.model.eval_gradients(x, slice, g)?
            } else {
                c.model.eval(x, slice)
            };
            for (i, p) in slice.iter().enumerate() {
                if !p.is_free() {
                    g[i] = 0.0;
                } else if !analytic || !p.has_analytic_gradient() {
                    g[i] = self.numeric_gradient(c.model.as_ref(), x, slice, i)?;
                }
            }
        }
        Ok(value)
    }

    /// Derivative of `model` at `x` with respect to the factor of `pars[i]`.
    fn numeric_gradient(&self, model: &dyn FitModel, x: f64, pars: &[ModelPar], i: usize) -> Result<f64> {
        let f = |factor: f64| {
            let mut trial = pars.to_vec();
            trial[i].set_factor_unchecked(factor);
            model.eval(x, &trial)
        };
        let r = self.derivative.value(&f, pars[i].factor_value(), 0.0)?;
        if !r.converged {
            trace!("Numerical gradient of {} at x={} not converged", pars[i].name(), x);
        }
        Ok(r.value)
    }

    fn selected(&self, selection: Option<&[usize]>) -> Result<Vec<usize>> {
        let n = self.components.len();
        match selection {
            Some(s) => s
                .iter()
                .map(|&k| {
                    if k < n {
                        Ok(k)
                    } else {
                        Err(FitError::UnknownModel(format!("component index {} (have {})", k, n)))
                    }
                })
                .collect(),
            None => Ok((0..n).collect()),
        }
    }

    fn check_pars(&self, pars: &OptimizerPars) -> Result<()> {
        if pars.len() != self.npars() {
            return Err(gammafit_linalg::LinalgError::DimensionMismatch {
                expected: self.npars(),
                got: pars.len(),
            }
            .into());
        }
        Ok(())
    }
}
