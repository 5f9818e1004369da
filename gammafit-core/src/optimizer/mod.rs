//! Levenberg-Marquardt optimizer.

pub mod config;
pub mod lm;
pub mod result;

pub use config::{LinearSolver, LmConfig};
pub use lm::{LevenbergMarquardt, LmState};
pub use result::{FitCounters, FitResult, FitStatus, IterationRecord};
