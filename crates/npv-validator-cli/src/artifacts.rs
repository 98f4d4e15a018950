use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::info;

use npv_validator_core::validator::ValidationReport;

/// Write every artifact of a run under `<out_dir>/<run_id>/`.
pub fn write_run(
    report: &ValidationReport,
    out_dir: &Path,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let dir = out_dir.join(report.run_id.as_str());
    fs::create_dir_all(&dir)
        .map_err(|e| format!("Failed to create '{}': {}", dir.display(), e))?;

    let mut npv = csv::Writer::from_path(dir.join("npv_results.csv"))?;
    npv.write_record(["run_id", "loan_id", "npv", "curve_ref", "computed_at"])?;
    for r in report.valuation.iter().flat_map(|v| v.results.iter()) {
        npv.write_record(&[
            r.run_id.to_string(),
            r.loan_id.clone(),
            r.npv.to_string(),
            r.curve_ref.clone(),
            r.computed_at.to_rfc3339(),
        ])?;
    }
    npv.flush()?;

    let mut issues = csv::Writer::from_path(dir.join("issues.csv"))?;
    issues.write_record(["run_id", "rule", "metric", "severity", "metric_value", "limit", "status"])?;
    for i in &report.issues {
        issues.write_record(&[
            i.run_id.to_string(),
            i.rule.clone(),
            i.metric.clone(),
            i.severity.to_string(),
            i.metric_value.to_string(),
            i.limit.to_string(),
            label(&i.status),
        ])?;
    }
    issues.flush()?;

    write_rows(&dir.join("test_results.csv"), &report.test_results)?;
    if let Some(bt) = &report.backtest {
        write_rows(&dir.join("backtest.csv"), &bt.observations)?;
    }
    if let Some(stress) = &report.stress {
        write_rows(&dir.join("stress_contributions.csv"), stress.contributions())?;
    }

    report
        .audit
        .write_jsonl(BufWriter::new(File::create(dir.join("audit.jsonl"))?))?;
    serde_json::to_writer_pretty(BufWriter::new(File::create(dir.join("report.json"))?), report)?;

    info!(run_id = %report.run_id, dir = %dir.display(), "run artifacts written");
    Ok(dir)
}

fn write_rows<T: Serialize>(
    path: &Path,
    rows: impl IntoIterator<Item = T>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut wtr = csv::Writer::from_path(path)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Serialized name of a unit enum variant.
fn label<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use npv_validator_core::config::ValidationConfig;
    use npv_validator_core::types::RunId;
    use npv_validator_core::validator::Validator;
    use npv_validator_core::NpvValidatorError;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_aborted_run_writes_namespaced_artifacts() {
        let config = ValidationConfig::default();
        let cause = NpvValidatorError::data_integrity("loans", "file not found");
        let report = Validator::new(&config).abort_unloaded(RunId::from("artifact-run"), "load", &cause);

        let out = std::env::temp_dir().join(format!("npvv-artifacts-{}", std::process::id()));
        let dir = write_run(&report, &out).unwrap();
        assert!(dir.ends_with("artifact-run"));

        let audit = fs::read_to_string(dir.join("audit.jsonl")).unwrap();
        assert_eq!(audit.lines().count(), 1);
        assert!(audit.contains("\"stage\":\"abort\""));

        let issues = fs::read_to_string(dir.join("issues.csv")).unwrap();
        assert_eq!(issues.lines().next(), Some("run_id,rule,metric,severity,metric_value,limit,status"));
        assert!(dir.join("report.json").is_file());
        fs::remove_dir_all(&out).unwrap();
    }
}
