//! gammafit-core: Model fitting for gammafit
//!
//! Model parameters, a Ridders derivative engine, model components and
//! their registry, chi-square and Poisson observations, likelihood
//! assembly and the Levenberg-Marquardt optimizer that solves the damped
//! normal equations with the sparse Cholesky of `gammafit-linalg`.

pub mod derivative;
pub mod error;
pub mod likelihood;
pub mod log;
pub mod model;
pub mod observation;
pub mod optimizer;
pub mod pars;
pub mod serialization;

pub use derivative::{Derivative, DerivativeResult, ScalarFunction};
pub use error::{FitError, Result};
pub use likelihood::{FitFunction, GoodnessOfFit, Likelihood};
pub use log::FitLog;
pub use model::{FitModel, ModelRegistry, Models};
pub use observation::{ChiSquareObservation, Contribution, Observation, PoissonObservation, Statistic};
pub use optimizer::{FitResult, FitStatus, LevenbergMarquardt, LinearSolver, LmConfig};
pub use pars::{ModelPar, OptimizerPars};
