//! Fit spectral models to a data table.
//!
//! gammafit fit --data spectrum.csv --statistic chi2 --model PowerLaw --output-prefix out/fit
//! gammafit fit --data counts.tsv --statistic poisson --model src=PowerLaw --model bkg=Constant \
//!     --init src:Prefactor=50 --fix bkg:Value --output-prefix out/fit

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, ValueEnum};
use tracing::{info, warn};

use gammafit_core::serialization::{result_summary, save_result, save_result_json};
use gammafit_core::{
    ChiSquareObservation, FitLog, LevenbergMarquardt, Likelihood, LinearSolver, LmConfig,
    ModelRegistry, Models, Observation, PoissonObservation,
};
use gammafit_linalg::Ordering;

use crate::io;

#[derive(Clone, Copy, ValueEnum)]
pub enum StatisticArg {
    Chi2,
    Poisson,
}

#[derive(Args)]
pub struct FitArgs {
    /// Data table with a header line (tab, comma or whitespace separated)
    #[arg(long)]
    data: PathBuf,

    /// Fit statistic
    #[arg(long, value_enum, default_value = "chi2")]
    statistic: StatisticArg,

    /// Model component as `Type` or `name=Type` (repeatable)
    #[arg(long = "model", required = true)]
    models: Vec<String>,

    /// Starting value as `component:Parameter=value` (repeatable)
    #[arg(long = "init")]
    inits: Vec<String>,

    /// Keep a parameter fixed, `component:Parameter` (repeatable)
    #[arg(long = "fix")]
    fixed: Vec<String>,

    /// Energy column
    #[arg(long, default_value = "x")]
    x_col: String,

    /// Measured value column (chi2)
    #[arg(long, default_value = "y")]
    y_col: String,

    /// Uncertainty column (chi2)
    #[arg(long, default_value = "sigma")]
    sigma_col: String,

    /// Counts column (poisson)
    #[arg(long, default_value = "counts")]
    counts_col: String,

    /// Optional exposure column (poisson)
    #[arg(long)]
    exposure_col: Option<String>,

    /// Maximum number of iterations
    #[arg(long, default_value = "100")]
    max_iter: usize,

    /// Convergence tolerance on the objective
    #[arg(long, default_value = "1e-6")]
    eps: f64,

    /// Starting damping factor
    #[arg(long, default_value = "1e-3")]
    lambda: f64,

    /// Solve the damped system densely
    #[arg(long, default_value = "false")]
    dense: bool,

    /// Keep the natural parameter order in the sparse factorisation
    #[arg(long, default_value = "false")]
    natural_order: bool,

    /// Do not remove inactive parameters before factorising
    #[arg(long, default_value = "false")]
    no_compress: bool,

    /// Accumulate observations sequentially
    #[arg(long, default_value = "false")]
    sequential: bool,

    /// Record the per-iteration trace in the result
    #[arg(long, default_value = "false")]
    trace: bool,

    /// Output file prefix (writes <prefix>.gfit)
    #[arg(long)]
    output_prefix: Option<String>,

    /// Also write a JSON sidecar (<prefix>.gfit.json)
    #[arg(long, default_value = "false")]
    save_json: bool,

    /// Write the iteration protocol to this file
    #[arg(long)]
    log: Option<PathBuf>,

    /// Prefix fit log lines with the UTC date
    #[arg(long, default_value = "false")]
    log_date: bool,
}

/// Split `name=Type`; a bare `Type` names the component after the type.
fn parse_model_arg(text: &str) -> Result<(String, String)> {
    let (name, ty) = match text.split_once('=') {
        Some((name, ty)) => (name.trim(), ty.trim()),
        None => (text.trim(), text.trim()),
    };
    if name.is_empty() || ty.is_empty() {
        bail!("Invalid model argument '{}'", text);
    }
    Ok((name.to_string(), ty.to_string()))
}

fn parse_assignment(text: &str) -> Result<(String, f64)> {
    let (name, value) = text
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected 'component:Parameter=value', got '{}'", text))?;
    let value: f64 = value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value in '{}'", text))?;
    Ok((name.trim().to_string(), value))
}

fn build_models(entries: &[String]) -> Result<Models> {
    let registry = ModelRegistry::with_builtin();
    let mut models = Models::new();
    for text in entries {
        let (name, ty) = parse_model_arg(text)?;
        models.push(&name, registry.create(&ty)?)?;
        info!("Model component '{}' of type {}", name, ty);
    }
    Ok(models)
}

fn build_observation(args: &FitArgs, table: &io::Table) -> Result<Box<dyn Observation>> {
    let name = args
        .data
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("data");
    let x = table.column(&args.x_col)?.to_vec();
    let obs: Box<dyn Observation> = match args.statistic {
        StatisticArg::Chi2 => Box::new(ChiSquareObservation::new(
            name,
            x,
            table.column(&args.y_col)?.to_vec(),
            table.column(&args.sigma_col)?.to_vec(),
        )?),
        StatisticArg::Poisson => {
            let mut obs =
                PoissonObservation::new(name, x, table.column(&args.counts_col)?.to_vec())?;
            if let Some(col) = &args.exposure_col {
                obs = obs.with_exposure(table.column(col)?.to_vec())?;
            }
            Box::new(obs)
        }
    };
    Ok(obs)
}

fn output_path(prefix: &str, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}{}", prefix, suffix))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }
    Ok(())
}

pub fn run(args: FitArgs) -> Result<()> {
    info!("=== Levenberg-Marquardt fit ===");

    let table = io::read_table(&args.data)?;
    info!("Read {} bins from {}", table.nrows(), args.data.display());

    let models = build_models(&args.models)?;
    let mut likelihood = Likelihood::new(models).with_parallel(!args.sequential);
    likelihood.push(build_observation(&args, &table)?)?;

    let mut pars = likelihood.parameters();
    for text in &args.inits {
        let (name, value) = parse_assignment(text)?;
        pars.by_name_mut(&name)?.set_value(value)?;
    }
    for name in &args.fixed {
        pars.by_name_mut(name.trim())?.fix();
    }
    info!("{} parameters, {} free", pars.len(), pars.nfree());

    let config = LmConfig::default()
        .with_max_iter(args.max_iter)
        .with_eps(args.eps)
        .with_lambda_start(args.lambda)
        .with_solver(if args.dense {
            LinearSolver::Dense
        } else {
            LinearSolver::Sparse
        })
        .with_ordering(if args.natural_order {
            Ordering::Natural
        } else {
            Ordering::MinimumDegree
        })
        .with_compress(!args.no_compress)
        .with_trace(args.trace);

    let mut optimizer = LevenbergMarquardt::new(config);
    if let Some(path) = &args.log {
        ensure_parent(path)?;
        let mut log = FitLog::new();
        log.set_name("gammafit");
        log.set_date(args.log_date);
        log.open(path, true)?;
        optimizer = optimizer.with_log(log);
    }

    let result = optimizer.optimize(&likelihood, &mut pars)?;
    if let Some(mut log) = optimizer.take_log() {
        log.close()?;
    }
    likelihood.models_mut().update(&pars)?;

    if !result.converged() {
        warn!("Fit ended with status {}", result.status);
    }
    println!("{}", result_summary(&result));

    if let Some(prefix) = &args.output_prefix {
        let path = output_path(prefix, ".gfit");
        ensure_parent(&path)?;
        save_result(&result, &path)?;
        info!("Fit result saved to {}", path.display());
        if args.save_json {
            let json = output_path(prefix, ".gfit.json");
            save_result_json(&result, &json)?;
            info!("JSON sidecar saved to {}", json.display());
        }
    }

    info!("Fit complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_arg() {
        assert_eq!(
            parse_model_arg("src=PowerLaw").unwrap(),
            ("src".to_string(), "PowerLaw".to_string())
        );
        assert_eq!(
            parse_model_arg("Constant").unwrap(),
            ("Constant".to_string(), "Constant".to_string())
        );
        assert!(parse_model_arg("=PowerLaw").is_err());
    }

    #[test]
    fn test_parse_assignment() {
        let (name, value) = parse_assignment("src:Index=-2.5").unwrap();
        assert_eq!(name, "src:Index");
        assert_eq!(value, -2.5);
        assert!(parse_assignment("src:Index").is_err());
        assert!(parse_assignment("src:Index=steep").is_err());
    }

    #[test]
    fn test_build_models_rejects_unknown_type() {
        assert!(build_models(&["Shell".to_string()]).is_err());
        let models = build_models(&["a=Linear".to_string(), "b=Constant".to_string()]).unwrap();
        assert_eq!(models.names(), vec!["a", "b"]);
    }
}
