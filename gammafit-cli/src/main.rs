//! gammafit: sparse normal-equation solves and spectral model fitting.
//!
//! CLI entry point using clap for argument parsing.

mod commands;
mod io;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "gammafit",
    version,
    about = "gammafit: Levenberg-Marquardt fitting on sparse normal equations",
    long_about = "Fits parametric spectral models to binned data by minimising a\n\
                  chi-square or Poisson objective, and solves sparse symmetric\n\
                  positive definite systems with a sparse Cholesky factorisation."
)]
struct Cli {
    /// Number of threads to use
    #[arg(long, default_value = "1", global = true)]
    threads: usize,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit models to a data table
    Fit(commands::fit::FitArgs),

    /// Solve a sparse symmetric positive definite system
    Solve(commands::solve::SolveArgs),

    /// List the available spectral models
    Models(commands::models::ModelsArgs),

    /// Print a saved fit result
    Show(commands::show::ShowArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    rayon::ThreadPoolBuilder::new()
        .num_threads(cli.threads)
        .build_global()
        .ok();

    tracing::info!("gammafit v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Using {} threads", cli.threads);

    match cli.command {
        Commands::Fit(args) => commands::fit::run(args),
        Commands::Solve(args) => commands::solve::run(args),
        Commands::Models(args) => commands::models::run(args),
        Commands::Show(args) => commands::show::run(args),
    }
}
