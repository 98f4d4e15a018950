//! Data Quality Gate.
//!
//! Per dataset: missing-value rates against a tolerance, type and range
//! checks per configured field, and distributional drift against an
//! optional reference baseline. Findings are reported, never raised; only
//! a structurally unusable dataset (a required column absent) is an error.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::datasets::{Dataset, RejectedRow, DATE_FORMAT};
use crate::error::NpvValidatorError;
use crate::statistics::ks_statistic;
use crate::NpvValidatorResult;

const PSI_FLOOR: f64 = 1.0e-4;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Numeric,
    Integer,
    Date,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldRule {
    pub dataset: String,
    pub column: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    /// Column must be present
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftMethod {
    /// Population stability index over baseline-quantile bins
    #[default]
    Psi,
    /// Two-sample Kolmogorov-Smirnov statistic
    Ks,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriftRule {
    pub dataset: String,
    pub column: String,
    #[serde(default)]
    pub method: DriftMethod,
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataQualityConfig {
    #[serde(default = "default_missing_tolerance")]
    pub missing_tolerance: f64,
    #[serde(default = "default_psi_bins")]
    pub psi_bins: usize,
    #[serde(default)]
    pub fields: Vec<FieldRule>,
    #[serde(default)]
    pub drift: Vec<DriftRule>,
}

fn default_missing_tolerance() -> f64 {
    0.05
}

fn default_psi_bins() -> usize {
    10
}

impl Default for DataQualityConfig {
    fn default() -> Self {
        Self {
            missing_tolerance: default_missing_tolerance(),
            psi_bins: default_psi_bins(),
            fields: Vec::new(),
            drift: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MissingRate,
    TypeMismatch,
    OutOfRange,
    RejectedRow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub column: String,
    pub kind: ViolationKind,
    pub count: usize,
    /// First offending data row (1-based), when row-specific
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_row: Option<usize>,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftResult {
    pub column: String,
    pub method: DriftMethod,
    pub value: f64,
    pub threshold: f64,
    pub breached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataQualityReport {
    pub dataset: String,
    pub rows: usize,
    pub passed: bool,
    pub missing_rates: BTreeMap<String, f64>,
    pub violations: Vec<FieldViolation>,
    pub drift: Vec<DriftResult>,
    /// Drift columns that could not be measured, with the reason
    pub drift_skipped: Vec<String>,
}

impl DataQualityReport {
    pub fn max_missing_rate(&self) -> f64 {
        self.missing_rates.values().copied().fold(0.0, f64::max)
    }

    /// Governance metrics keyed `data_quality.<dataset>.*`.
    pub fn metrics(&self) -> Vec<(String, f64)> {
        let prefix = format!("data_quality.{}", self.dataset);
        let mut out = vec![
            (format!("{prefix}.max_missing_rate"), self.max_missing_rate()),
            (format!("{prefix}.violations"), self.violations.len() as f64),
        ];
        for d in &self.drift {
            out.push((format!("{prefix}.drift.{}", d.column), d.value));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

fn cell_matches(field_type: FieldType, raw: &str) -> bool {
    match field_type {
        FieldType::Numeric => raw.parse::<f64>().map(f64::is_finite).unwrap_or(false),
        FieldType::Integer => raw.parse::<i64>().is_ok(),
        FieldType::Date => NaiveDate::parse_from_str(raw, DATE_FORMAT).is_ok(),
        FieldType::Text => true,
    }
}

fn out_of_range(rule: &FieldRule, raw: &str) -> bool {
    match rule.field_type {
        FieldType::Numeric | FieldType::Integer => match raw.parse::<f64>() {
            Ok(v) => rule.min.is_some_and(|m| v < m) || rule.max.is_some_and(|m| v > m),
            Err(_) => false,
        },
        FieldType::Date | FieldType::Text => false,
    }
}

fn check_field(ds: &Dataset, rule: &FieldRule) -> NpvValidatorResult<Vec<FieldViolation>> {
    let col = match ds.column_index(&rule.column) {
        Some(c) => c,
        None if rule.required => {
            return Err(NpvValidatorError::data_integrity(
                ds.name.clone(),
                format!("required column '{}' is absent", rule.column),
            ))
        }
        None => return Ok(Vec::new()),
    };

    let mut type_bad = (0usize, None);
    let mut range_bad = (0usize, None);
    for (row, value) in ds.column_values(col).enumerate() {
        let Some(raw) = value else { continue };
        if !cell_matches(rule.field_type, raw) {
            type_bad.0 += 1;
            type_bad.1.get_or_insert(row + 1);
        } else if out_of_range(rule, raw) {
            range_bad.0 += 1;
            range_bad.1.get_or_insert(row + 1);
        }
    }

    let mut out = Vec::new();
    if type_bad.0 > 0 {
        out.push(FieldViolation {
            column: rule.column.clone(),
            kind: ViolationKind::TypeMismatch,
            count: type_bad.0,
            sample_row: type_bad.1,
            detail: format!("expected {:?}", rule.field_type).to_lowercase(),
        });
    }
    if range_bad.0 > 0 {
        let bound = |b: Option<f64>| b.map_or("-".to_string(), |v| v.to_string());
        out.push(FieldViolation {
            column: rule.column.clone(),
            kind: ViolationKind::OutOfRange,
            count: range_bad.0,
            sample_row: range_bad.1,
            detail: format!("outside [{}, {}]", bound(rule.min), bound(rule.max)),
        });
    }
    Ok(out)
}

fn numeric_column(ds: &Dataset, column: &str) -> Option<Vec<f64>> {
    let col = ds.column_index(column)?;
    let values: Vec<f64> = ds
        .column_values(col)
        .flatten()
        .filter_map(|raw| raw.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .collect();
    (!values.is_empty()).then_some(values)
}

/// PSI = Σ (aᵢ − eᵢ)·ln(aᵢ/eᵢ) over bins cut at the baseline's quantiles.
pub fn population_stability_index(
    expected: &[f64],
    actual: &[f64],
    bins: usize,
) -> NpvValidatorResult<f64> {
    if expected.is_empty() || actual.is_empty() {
        return Err(NpvValidatorError::InsufficientData(
            "PSI requires non-empty baseline and current samples".into(),
        ));
    }
    if bins < 2 {
        return Err(NpvValidatorError::invalid_input("psi_bins", "at least 2 bins required"));
    }

    let mut sorted = expected.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let mut edges: Vec<f64> = (1..bins)
        .map(|i| sorted[(i * n / bins).min(n - 1)])
        .collect();
    edges.dedup();

    let proportions = |sample: &[f64]| -> Vec<f64> {
        let mut counts = vec![0usize; edges.len() + 1];
        for v in sample {
            counts[edges.partition_point(|e| e < v)] += 1;
        }
        counts
            .into_iter()
            .map(|c| (c as f64 / sample.len() as f64).max(PSI_FLOOR))
            .collect()
    };
    let e = proportions(expected);
    let a = proportions(actual);
    Ok(e.iter()
        .zip(&a)
        .map(|(e, a)| (a - e) * (a / e).ln())
        .sum())
}

fn measure_drift(
    current: &Dataset,
    baseline: &Dataset,
    rule: &DriftRule,
    bins: usize,
) -> Result<DriftResult, String> {
    let cur = numeric_column(current, &rule.column)
        .ok_or_else(|| format!("{}: no numeric values in current data", rule.column))?;
    let base = numeric_column(baseline, &rule.column)
        .ok_or_else(|| format!("{}: no numeric values in baseline", rule.column))?;
    let value = match rule.method {
        DriftMethod::Psi => population_stability_index(&base, &cur, bins),
        DriftMethod::Ks => ks_statistic(&base, &cur),
    }
    .map_err(|e| format!("{}: {e}", rule.column))?;
    Ok(DriftResult {
        column: rule.column.clone(),
        method: rule.method,
        value,
        threshold: rule.threshold,
        breached: value > rule.threshold,
    })
}

/// Run every configured check against one dataset.
///
/// `rejected` are rows the typed parser could not use; each becomes a
/// `rejected_row` violation.
pub fn check_dataset(
    ds: &Dataset,
    baseline: Option<&Dataset>,
    rejected: &[RejectedRow],
    config: &DataQualityConfig,
) -> NpvValidatorResult<DataQualityReport> {
    let rows = ds.len();
    let mut violations = Vec::new();

    let mut missing_rates = BTreeMap::new();
    for (idx, column) in ds.columns.iter().enumerate() {
        let missing = ds.column_values(idx).filter(Option::is_none).count();
        let rate = if rows == 0 { 0.0 } else { missing as f64 / rows as f64 };
        if rate > config.missing_tolerance {
            violations.push(FieldViolation {
                column: column.clone(),
                kind: ViolationKind::MissingRate,
                count: missing,
                sample_row: None,
                detail: format!(
                    "missing rate {rate:.4} exceeds tolerance {}",
                    config.missing_tolerance
                ),
            });
        }
        missing_rates.insert(column.clone(), rate);
    }

    for rule in config.fields.iter().filter(|r| r.dataset == ds.name) {
        violations.extend(check_field(ds, rule)?);
    }

    for r in rejected {
        violations.push(FieldViolation {
            column: "*".into(),
            kind: ViolationKind::RejectedRow,
            count: 1,
            sample_row: Some(r.row),
            detail: r.reason.clone(),
        });
    }

    let mut drift = Vec::new();
    let mut drift_skipped = Vec::new();
    for rule in config.drift.iter().filter(|r| r.dataset == ds.name) {
        match baseline {
            None => drift_skipped.push(format!("{}: no baseline dataset", rule.column)),
            Some(base) => match measure_drift(ds, base, rule, config.psi_bins) {
                Ok(result) => {
                    if result.breached {
                        warn!(
                            dataset = %ds.name,
                            column = %result.column,
                            value = result.value,
                            threshold = result.threshold,
                            "distribution drift above threshold"
                        );
                    }
                    drift.push(result);
                }
                Err(reason) => drift_skipped.push(reason),
            },
        }
    }

    let passed = violations.is_empty() && drift.iter().all(|d| !d.breached);
    debug!(
        dataset = %ds.name,
        rows,
        violations = violations.len(),
        passed,
        "data quality checked"
    );

    Ok(DataQualityReport {
        dataset: ds.name.clone(),
        rows,
        passed,
        missing_rates,
        violations,
        drift,
        drift_skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(name: &str, columns: &[&str], rows: Vec<Vec<Option<&str>>>) -> Dataset {
        Dataset::new(
            name,
            columns.iter().map(|c| c.to_string()).collect(),
            rows.into_iter()
                .map(|r| r.into_iter().map(|v| v.map(String::from)).collect())
                .collect(),
        )
        .unwrap()
    }

    fn rates(values: &[&str]) -> Dataset {
        dataset("loans", &["rate"], values.iter().map(|v| vec![Some(*v)]).collect())
    }

    #[test]
    fn test_missing_rate_breach() {
        let ds = dataset(
            "loans",
            &["loan_id", "rate"],
            vec![
                vec![Some("A"), Some("0.05")],
                vec![Some("B"), None],
                vec![Some("C"), Some("")],
                vec![Some("D"), Some("0.04")],
            ],
        );
        let report = check_dataset(&ds, None, &[], &DataQualityConfig::default()).unwrap();
        assert_eq!(report.missing_rates["rate"], 0.5);
        assert_eq!(report.missing_rates["loan_id"], 0.0);
        assert!(!report.passed);
        assert_eq!(report.violations[0].kind, ViolationKind::MissingRate);
        assert_eq!(report.violations[0].count, 2);
    }

    #[test]
    fn test_type_and_range_checks() {
        let ds = rates(&["0.05", "abc", "1.5", "0.02"]);
        let config = DataQualityConfig {
            fields: vec![FieldRule {
                dataset: "loans".into(),
                column: "rate".into(),
                field_type: FieldType::Numeric,
                min: Some(0.0),
                max: Some(1.0),
                required: true,
            }],
            ..Default::default()
        };
        let report = check_dataset(&ds, None, &[], &config).unwrap();
        let kinds: Vec<ViolationKind> = report.violations.iter().map(|v| v.kind).collect();
        assert_eq!(kinds, vec![ViolationKind::TypeMismatch, ViolationKind::OutOfRange]);
        assert_eq!(report.violations[0].sample_row, Some(2));
        assert_eq!(report.violations[1].sample_row, Some(3));
    }

    #[test]
    fn test_required_column_absent_is_fatal() {
        let ds = rates(&["0.05"]);
        let config = DataQualityConfig {
            fields: vec![FieldRule {
                dataset: "loans".into(),
                column: "tenor_periods".into(),
                field_type: FieldType::Integer,
                min: None,
                max: None,
                required: true,
            }],
            ..Default::default()
        };
        assert!(check_dataset(&ds, None, &[], &config).unwrap_err().is_fatal());
    }

    #[test]
    fn test_psi_identical_is_zero() {
        let s: Vec<f64> = (0..100).map(|i| i as f64 / 10.0).collect();
        assert_eq!(population_stability_index(&s, &s, 10).unwrap(), 0.0);
    }

    #[test]
    fn test_psi_detects_shift() {
        let base: Vec<f64> = (0..200).map(|i| i as f64).collect();
        let shifted: Vec<f64> = (0..200).map(|i| 150.0 + i as f64).collect();
        assert!(population_stability_index(&base, &shifted, 10).unwrap() > 0.25);
    }

    #[test]
    fn test_drift_skipped_without_baseline() {
        let ds = rates(&["0.05", "0.06"]);
        let config = DataQualityConfig {
            drift: vec![DriftRule {
                dataset: "loans".into(),
                column: "rate".into(),
                method: DriftMethod::Ks,
                threshold: 0.2,
            }],
            ..Default::default()
        };
        let report = check_dataset(&ds, None, &[], &config).unwrap();
        assert!(report.drift.is_empty());
        assert_eq!(report.drift_skipped.len(), 1);
        assert!(report.passed);
    }

    #[test]
    fn test_ks_drift_against_baseline() {
        let current = rates(&["0.09", "0.10", "0.11", "0.12"]);
        let baseline = rates(&["0.01", "0.02", "0.03", "0.04"]);
        let config = DataQualityConfig {
            drift: vec![DriftRule {
                dataset: "loans".into(),
                column: "rate".into(),
                method: DriftMethod::Ks,
                threshold: 0.2,
            }],
            ..Default::default()
        };
        let report = check_dataset(&current, Some(&baseline), &[], &config).unwrap();
        assert_eq!(report.drift[0].value, 1.0);
        assert!(report.drift[0].breached);
        let metrics = report.metrics();
        assert!(metrics.contains(&("data_quality.loans.drift.rate".to_string(), 1.0)));
    }

    #[test]
    fn test_rejected_rows_reported() {
        let ds = rates(&["0.05"]);
        let rejected = vec![RejectedRow { row: 1, reason: "bad".into() }];
        let report = check_dataset(&ds, None, &rejected, &DataQualityConfig::default()).unwrap();
        assert_eq!(report.violations[0].kind, ViolationKind::RejectedRow);
        assert!(!report.passed);
    }
}
