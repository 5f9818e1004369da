//! Fit result persistence.
//!
//! Uses bincode for compact binary files.
//! Format: magic bytes (GFIT) + version (u32) + bincode payload.
//! Optional JSON sidecar for human inspection.

use anyhow::{bail, Result};
use std::fmt::Write as _;
use std::path::Path;

use crate::optimizer::FitResult;

/// Save a fit result to a binary file (.gfit).
pub fn save_result(result: &FitResult, path: &Path) -> Result<()> {
    let encoded = bincode::serialize(result)?;
    std::fs::write(path, &encoded)?;
    Ok(())
}

/// Load a fit result from a binary file (.gfit).
pub fn load_result(path: &Path) -> Result<FitResult> {
    let data = std::fs::read(path)?;
    if data.len() < 4 || data[..4] != FitResult::MAGIC {
        bail!(
            "Invalid fit result file {}: missing magic bytes {:?}",
            path.display(),
            FitResult::MAGIC
        );
    }
    let result: FitResult = bincode::deserialize(&data)?;
    if result.version > FitResult::VERSION {
        bail!(
            "Fit result version {} is newer than supported version {}",
            result.version,
            FitResult::VERSION
        );
    }
    Ok(result)
}

/// Save a JSON sidecar for inspection (.gfit.json).
pub fn save_result_json(result: &FitResult, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(result)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Summary of a fit result (for display).
pub fn result_summary(result: &FitResult) -> String {
    let mut s = format!(
        "gammafit result v{}\n\
         Status: {}\n\
         Objective: {:.6e}\n\
         Iterations: {}\n\
         Lambda: {:.1e}\n\
         Steps: {} accepted, {} rejected, {} singular\n\
         Boundary hits: {}\n\
         Symbolic analyses: {}",
        result.version,
        result.status,
        result.value,
        result.iterations,
        result.lambda,
        result.counters.accepted,
        result.counters.rejected,
        result.counters.singular_solves,
        result.counters.boundary_hits,
        result.counters.analyses,
    );
    if let Some(cond) = result.condition {
        let _ = write!(s, "\nCondition number: {:.3e}", cond);
    }
    if let Some(gof) = result.goodness {
        let _ = write!(
            s,
            "\nChi-square: {:.4} for {} dof (probability {:.4})",
            gof.chi2, gof.dof, gof.probability
        );
    }
    s.push_str("\nParameters:");
    for par in result.pars.iter() {
        let _ = write!(s, "\n  {}", par);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::FitStatus;
    use crate::pars::{ModelPar, OptimizerPars};

    fn result() -> FitResult {
        let mut par = ModelPar::new("line:Slope", 2.0);
        par.set_factor_error(0.25);
        let pars: OptimizerPars = [par, ModelPar::new("bkg:Value", 1.0).with_free(false)]
            .into_iter()
            .collect();
        let mut result = FitResult::new(FitStatus::Converged, 0.5, pars);
        result.iterations = 4;
        result.covariance = Some(vec![0.0625, 0.0, 0.0, 0.0]);
        result
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.gfit");

        save_result(&result(), &path).unwrap();
        let loaded = load_result(&path).unwrap();

        assert_eq!(loaded.status, FitStatus::Converged);
        assert_eq!(loaded.iterations, 4);
        assert_eq!(loaded.pars, result().pars);
        assert_eq!(loaded.covariance_at(0, 0), Some(0.0625));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.gfit");
        std::fs::write(&path, b"NOPE1234").unwrap();
        assert!(load_result(&path).is_err());
    }

    #[test]
    fn test_json_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.gfit.json");
        save_result_json(&result(), &path).unwrap();
        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains("line:Slope"));

        let summary = result_summary(&result());
        assert!(summary.contains("Status: converged"));
        assert!(summary.contains("(fixed)"));
    }
}
