//! Solve a sparse symmetric positive definite system.
//!
//! gammafit solve --matrix a.mtx [--rhs b.txt] [--symmetric] [--ordering natural]

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Result};
use clap::{Args, ValueEnum};
use tracing::info;

use gammafit_linalg::{Ordering, SparseCholesky, Vector};

use crate::io;

#[derive(Clone, Copy, ValueEnum)]
pub enum OrderingArg {
    Natural,
    MinimumDegree,
}

impl From<OrderingArg> for Ordering {
    fn from(o: OrderingArg) -> Self {
        match o {
            OrderingArg::Natural => Ordering::Natural,
            OrderingArg::MinimumDegree => Ordering::MinimumDegree,
        }
    }
}

#[derive(Args)]
pub struct SolveArgs {
    /// Matrix in coordinate format (rows cols nnz, then 1-based triplets)
    #[arg(long)]
    matrix: PathBuf,

    /// Right-hand side, one value per line (default: all ones)
    #[arg(long)]
    rhs: Option<PathBuf>,

    /// The file holds one triangle; mirror off-diagonal entries
    #[arg(long, default_value = "false")]
    symmetric: bool,

    /// Fill-reducing ordering
    #[arg(long, value_enum, default_value = "minimum-degree")]
    ordering: OrderingArg,

    /// Do not remove empty rows and columns before factorising
    #[arg(long, default_value = "false")]
    no_compress: bool,

    /// Write the solution here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

pub fn run(args: SolveArgs) -> Result<()> {
    info!("=== Sparse Cholesky solve ===");

    let a = io::read_matrix_market(&args.matrix, args.symmetric)?;
    if !a.is_square() {
        bail!("Matrix must be square, got {}x{}", a.rows(), a.cols());
    }
    info!("Matrix: {}x{}, {} non-zeros", a.rows(), a.cols(), a.nnz());

    let b = match &args.rhs {
        Some(path) => io::read_vector(path)?,
        None => Vector::from(vec![1.0; a.rows()]),
    };
    if b.len() != a.rows() {
        bail!("Right-hand side has {} entries, matrix has {} rows", b.len(), a.rows());
    }

    let start = Instant::now();
    let mut solver = SparseCholesky::new(args.ordering.into()).with_compression(!args.no_compress);
    let factor = solver.factorize(&a)?;
    let x = factor.solve(&b)?;
    let elapsed = start.elapsed();

    let residual = a.mul_vec(&x)?.sub(&b)?.norm() / b.norm().max(f64::MIN_POSITIVE);
    info!(
        "nnz(L) = {}, relative residual = {:.3e}, time = {:.3}s",
        factor.numeric().l().nnz(),
        residual,
        elapsed.as_secs_f64()
    );
    if let Some(kept) = factor.kept() {
        info!("{} empty rows/columns removed", a.rows() - kept.len());
    }

    let text: String = x.iter().map(|v| format!("{:.12e}\n", v)).collect();
    match &args.output {
        Some(path) => {
            std::fs::write(path, text)?;
            info!("Solution written to {}", path.display());
        }
        None => print!("{}", text),
    }
    Ok(())
}
