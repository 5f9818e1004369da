//! Objective functions handed to the optimizer.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use tracing::debug;

use crate::error::{FitError, Result};
use crate::model::Models;
use crate::observation::{Contribution, Observation, Statistic};
use crate::pars::OptimizerPars;

/// Something the optimizer can minimise.
pub trait FitFunction: Sync {
    /// Objective value, gradient and curvature at `pars`.
    fn evaluate(&self, pars: &OptimizerPars) -> Result<Contribution>;

    /// Goodness of fit for a final objective value, when meaningful.
    fn goodness_of_fit(&self, value: f64, nfree: usize) -> Option<GoodnessOfFit> {
        let _ = (value, nfree);
        None
    }
}

/// Chi-square goodness of fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoodnessOfFit {
    pub chi2: f64,
    pub dof: usize,
    /// Probability of a chi-square at least this large.
    pub probability: f64,
}

/// Sum of the contributions of all observations to one statistic.
#[derive(Debug)]
pub struct Likelihood {
    models: Models,
    observations: Vec<Box<dyn Observation>>,
    parallel: bool,
}

impl Likelihood {
    pub fn new(models: Models) -> Self {
        Self {
            models,
            observations: Vec::new(),
            parallel: true,
        }
    }

    /// Accumulate observation contributions on the rayon pool.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Add an observation. Statistics may not be mixed.
    pub fn push(&mut self, observation: Box<dyn Observation>) -> Result<()> {
        if let Some(first) = self.observations.first() {
            if first.statistic() != observation.statistic() {
                return Err(FitError::InvalidData(format!(
                    "cannot combine {} observation \"{}\" with {} observations",
                    observation.statistic(),
                    observation.name(),
                    first.statistic()
                )));
            }
        }
        self.observations.push(observation);
        Ok(())
    }

    pub fn models(&self) -> &Models {
        &self.models
    }

    pub fn models_mut(&mut self) -> &mut Models {
        &mut self.models
    }

    pub fn observations(&self) -> &[Box<dyn Observation>] {
        &self.observations
    }

    /// Statistic of the observations, `None` when there are none.
    pub fn statistic(&self) -> Option<Statistic> {
        self.observations.first().map(|o| o.statistic())
    }

    /// Total number of data bins.
    pub fn nbins(&self) -> usize {
        self.observations.iter().map(|o| o.nbins()).sum()
    }

    /// Starting parameters of the models.
    pub fn parameters(&self) -> OptimizerPars {
        self.models.parameters()
    }
}

impl FitFunction for Likelihood {
    fn evaluate(&self, pars: &OptimizerPars) -> Result<Contribution> {
        if self.observations.is_empty() {
            return Err(FitError::InvalidData("no observations".to_string()));
        }
        let npars = pars.len();
        let total = if self.parallel {
            self.observations
                .par_iter()
                .map(|o| o.contribution(&self.models, pars))
                .try_reduce(|| Contribution::zeros(npars), |a, b| a.merge(b))?
        } else {
            self.observations
                .iter()
                .try_fold(Contribution::zeros(npars), |acc, o| {
                    acc.merge(o.contribution(&self.models, pars)?)
                })?
        };
        debug!(
            "Evaluated {} observations: value={:.6e}, nnz(curvature)={}",
            self.observations.len(),
            total.value,
            total.curvature.nnz()
        );
        Ok(total)
    }

    fn goodness_of_fit(&self, value: f64, nfree: usize) -> Option<GoodnessOfFit> {
        if self.statistic() != Some(Statistic::ChiSquare) {
            return None;
        }
        let dof = self.nbins().checked_sub(nfree).filter(|&d| d > 0)?;
        let chi2 = 2.0 * value;
        let dist = ChiSquared::new(dof as f64).ok()?;
        Some(GoodnessOfFit {
            chi2,
            dof,
            probability: 1.0 - dist.cdf(chi2),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Constant, Linear};
    use crate::observation::{ChiSquareObservation, PoissonObservation};

    fn likelihood(parallel: bool) -> Likelihood {
        let mut models = Models::new();
        models.push("line", Box::new(Linear)).unwrap();
        models.push("offset", Box::new(Constant)).unwrap();
        let mut like = Likelihood::new(models).with_parallel(parallel);
        like.push(Box::new(
            ChiSquareObservation::new("a", vec![1.0, 2.0, 3.0], vec![2.0, 3.0, 5.0], vec![1.0; 3]).unwrap(),
        ))
        .unwrap();
        like.push(Box::new(
            ChiSquareObservation::new("b", vec![4.0, 5.0], vec![7.0, 8.0], vec![0.5; 2])
                .unwrap()
                .with_components(&["line"]),
        ))
        .unwrap();
        like
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let seq = likelihood(false);
        let par = likelihood(true);
        let pars = seq.parameters();
        let a = seq.evaluate(&pars).unwrap();
        let b = par.evaluate(&pars).unwrap();
        assert!((a.value - b.value).abs() < 1e-12);
        for j in 0..pars.len() {
            assert!((a.gradient[j] - b.gradient[j]).abs() < 1e-12);
            for k in 0..pars.len() {
                assert!((a.curvature.get(j, k) - b.curvature.get(j, k)).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_mixed_statistics_rejected() {
        let mut like = likelihood(false);
        let poisson = PoissonObservation::new("p", vec![1.0], vec![1.0]).unwrap();
        assert!(like.push(Box::new(poisson)).is_err());
    }

    #[test]
    fn test_goodness_of_fit() {
        let like = likelihood(false);
        assert_eq!(like.nbins(), 5);
        let gof = like.goodness_of_fit(1.5, 2).unwrap();
        assert_eq!(gof.dof, 3);
        assert!((gof.chi2 - 3.0).abs() < 1e-14);
        assert!(gof.probability > 0.3 && gof.probability < 0.5);
        assert!(like.goodness_of_fit(1.0, 5).is_none());
    }

    #[test]
    fn test_empty_likelihood() {
        let like = Likelihood::new(Models::new());
        assert!(like.evaluate(&OptimizerPars::new()).is_err());
    }
}
