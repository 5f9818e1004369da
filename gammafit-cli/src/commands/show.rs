//! Print a fit result written by `gammafit fit`.
//!
//! gammafit show --result fit.gfit [--correlation]

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use gammafit_core::serialization::{load_result, result_summary};

#[derive(Args)]
pub struct ShowArgs {
    /// Fit result file (.gfit)
    #[arg(long)]
    result: PathBuf,

    /// Also print the correlation matrix of the parameters
    #[arg(long, default_value = "false")]
    correlation: bool,
}

pub fn run(args: ShowArgs) -> Result<()> {
    let result = load_result(&args.result)?;
    println!("{}", result_summary(&result));

    if args.correlation {
        if result.covariance.is_none() {
            println!("Correlation matrix: not available");
            return Ok(());
        }
        println!("Correlation matrix:");
        for i in 0..result.npars() {
            let row: Vec<String> = (0..result.npars())
                .map(|j| match result.correlation(i, j) {
                    Some(c) => format!("{:>7.3}", c),
                    None => format!("{:>7}", "-"),
                })
                .collect();
            println!("  {}", row.join(" "));
        }
    }
    Ok(())
}
