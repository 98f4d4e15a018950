//! Error-series statistics and hypothesis tests.
//!
//! Covers:
//! 1. **RMSE / MAE** -- population formulas over any error series.
//! 2. **Diebold-Mariano** -- equal predictive accuracy of two forecasts, with a
//!    Bartlett-kernel Newey-West long-run variance and the
//!    Harvey-Leybourne-Newbold small-sample correction.
//! 3. **Kolmogorov-Smirnov** -- two-sample test with asymptotic p-value.
//!
//! All arithmetic is `f64`; decimal ΔNPV series are converted at the boundary.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

use crate::error::NpvValidatorError;
use crate::types::RunId;
use crate::NpvValidatorResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    Rmse,
    Mae,
    DieboldMariano,
    KolmogorovSmirnov,
}

/// Loss applied to each forecast error before differencing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossFunction {
    #[default]
    Squared,
    Absolute,
}

impl LossFunction {
    fn apply(self, e: f64) -> f64 {
        match self {
            LossFunction::Squared => e * e,
            LossFunction::Absolute => e.abs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DieboldMarianoConfig {
    #[serde(default)]
    pub loss: LossFunction,
    /// Newey-West truncation lag; `floor(4·(T/100)^(2/9))` when absent
    #[serde(default)]
    pub max_lag: Option<usize>,
    #[serde(default = "default_min_sample")]
    pub min_sample: usize,
    /// Harvey-Leybourne-Newbold correction with Student-t reference
    #[serde(default = "default_small_sample_correction")]
    pub small_sample_correction: bool,
}

fn default_min_sample() -> usize {
    10
}

fn default_small_sample_correction() -> bool {
    true
}

impl Default for DieboldMarianoConfig {
    fn default() -> Self {
        Self {
            loss: LossFunction::default(),
            max_lag: None,
            min_sample: default_min_sample(),
            small_sample_correction: default_small_sample_correction(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DieboldMarianoOutcome {
    /// NaN when the loss differential has zero mean and zero variance
    pub statistic: f64,
    pub p_value: Option<f64>,
    pub sample_size: usize,
    pub lag: usize,
    pub mean_differential: f64,
    pub long_run_variance: f64,
    pub reference_distribution: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KolmogorovSmirnovOutcome {
    pub statistic: f64,
    pub p_value: f64,
    pub sample_sizes: (usize, usize),
}

/// A test outcome tagged with the run that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticalTestResult {
    pub run_id: RunId,
    /// Metric key, e.g. `backtest.rmse`
    pub name: String,
    pub test: TestKind,
    pub statistic: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p_value: Option<f64>,
    pub sample_size: usize,
    pub significance_level: f64,
    /// `None` for descriptive statistics governed by threshold rules
    pub passed: Option<bool>,
}

impl StatisticalTestResult {
    pub fn descriptive(run_id: &RunId, name: &str, test: TestKind, value: f64, n: usize, alpha: f64) -> Self {
        Self {
            run_id: run_id.clone(),
            name: name.to_string(),
            test,
            statistic: value,
            p_value: None,
            sample_size: n,
            significance_level: alpha,
            passed: None,
        }
    }

    pub fn from_diebold_mariano(run_id: &RunId, name: &str, outcome: &DieboldMarianoOutcome, alpha: f64) -> Self {
        Self {
            run_id: run_id.clone(),
            name: name.to_string(),
            test: TestKind::DieboldMariano,
            statistic: outcome.statistic,
            p_value: outcome.p_value,
            sample_size: outcome.sample_size,
            significance_level: alpha,
            // Undefined statistic: no evidence the forecasts differ.
            passed: Some(outcome.p_value.map_or(true, |p| p >= alpha)),
        }
    }

    pub fn from_kolmogorov_smirnov(
        run_id: &RunId,
        name: &str,
        outcome: &KolmogorovSmirnovOutcome,
        alpha: f64,
    ) -> Self {
        Self {
            run_id: run_id.clone(),
            name: name.to_string(),
            test: TestKind::KolmogorovSmirnov,
            statistic: outcome.statistic,
            p_value: Some(outcome.p_value),
            sample_size: outcome.sample_sizes.0 + outcome.sample_sizes.1,
            significance_level: alpha,
            passed: Some(outcome.p_value >= alpha),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions and validation
// ---------------------------------------------------------------------------

/// Convert a decimal series to `f64`.
pub fn decimal_series(values: &[Decimal]) -> NpvValidatorResult<Vec<f64>> {
    values
        .iter()
        .map(|v| {
            v.to_f64().ok_or_else(|| NpvValidatorError::NumericOverflow {
                context: format!("converting {v} to f64"),
            })
        })
        .collect()
}

fn check_finite(field: &str, series: &[f64]) -> NpvValidatorResult<()> {
    if let Some(pos) = series.iter().position(|v| !v.is_finite()) {
        return Err(NpvValidatorError::invalid_input(
            field,
            format!("non-finite value at index {pos}"),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// RMSE / MAE
// ---------------------------------------------------------------------------

pub fn rmse(errors: &[f64]) -> NpvValidatorResult<f64> {
    if errors.is_empty() {
        return Err(NpvValidatorError::InsufficientData(
            "RMSE requires at least one observation".into(),
        ));
    }
    check_finite("errors", errors)?;
    let mse = errors.iter().map(|e| e * e).sum::<f64>() / errors.len() as f64;
    Ok(mse.sqrt())
}

pub fn mae(errors: &[f64]) -> NpvValidatorResult<f64> {
    if errors.is_empty() {
        return Err(NpvValidatorError::InsufficientData(
            "MAE requires at least one observation".into(),
        ));
    }
    check_finite("errors", errors)?;
    Ok(errors.iter().map(|e| e.abs()).sum::<f64>() / errors.len() as f64)
}

// ---------------------------------------------------------------------------
// Diebold-Mariano
// ---------------------------------------------------------------------------

/// Default truncation lag: `floor(4·(T/100)^(2/9))`.
pub fn newey_west_lag(sample_size: usize) -> usize {
    (4.0 * (sample_size as f64 / 100.0).powf(2.0 / 9.0)).floor() as usize
}

/// Bartlett-kernel long-run variance of a series around its mean.
fn long_run_variance(d: &[f64], mean: f64, lag: usize) -> f64 {
    let n = d.len() as f64;
    let autocov = |k: usize| -> f64 {
        d.iter()
            .skip(k)
            .zip(d.iter())
            .map(|(x_t, x_tk)| (x_t - mean) * (x_tk - mean))
            .sum::<f64>()
            / n
    };
    let mut lrv = autocov(0);
    for k in 1..=lag {
        let weight = 1.0 - k as f64 / (lag as f64 + 1.0);
        lrv += 2.0 * weight * autocov(k);
    }
    lrv
}

/// Test equal predictive accuracy of two aligned forecast-error series.
pub fn diebold_mariano(
    errors_1: &[f64],
    errors_2: &[f64],
    config: &DieboldMarianoConfig,
) -> NpvValidatorResult<DieboldMarianoOutcome> {
    if errors_1.len() != errors_2.len() {
        return Err(NpvValidatorError::invalid_input(
            "errors",
            format!(
                "series must be aligned (lengths {} and {})",
                errors_1.len(),
                errors_2.len()
            ),
        ));
    }
    let t = errors_1.len();
    let min_sample = config.min_sample.max(2);
    if t < min_sample {
        return Err(NpvValidatorError::InsufficientData(format!(
            "Diebold-Mariano requires at least {min_sample} aligned observations (got {t})"
        )));
    }
    check_finite("errors_1", errors_1)?;
    check_finite("errors_2", errors_2)?;

    let d: Vec<f64> = errors_1
        .iter()
        .zip(errors_2)
        .map(|(a, b)| config.loss.apply(*a) - config.loss.apply(*b))
        .collect();
    let n = t as f64;
    let mean = d.iter().sum::<f64>() / n;
    let lag = config.max_lag.unwrap_or_else(|| newey_west_lag(t)).min(t - 1);
    let lrv = long_run_variance(&d, mean, lag);

    let reference = if config.small_sample_correction {
        format!("student_t({})", t - 1)
    } else {
        "standard_normal".to_string()
    };

    if !(lrv > 0.0) || !lrv.is_finite() {
        // Constant differential: undefined when identical, infinitely
        // significant otherwise.
        let (statistic, p_value) = if mean == 0.0 {
            (f64::NAN, None)
        } else {
            (mean.signum() * f64::INFINITY, Some(0.0))
        };
        return Ok(DieboldMarianoOutcome {
            statistic,
            p_value,
            sample_size: t,
            lag,
            mean_differential: mean,
            long_run_variance: lrv.max(0.0),
            reference_distribution: reference,
        });
    }

    let mut statistic = mean / (lrv / n).sqrt();

    let p_value = if config.small_sample_correction {
        let h = (lag + 1) as f64;
        let adj = (n + 1.0 - 2.0 * h + h * (h - 1.0) / n) / n;
        if adj > 0.0 {
            statistic *= adj.sqrt();
        }
        let dist = StudentsT::new(0.0, 1.0, n - 1.0).map_err(|e| {
            NpvValidatorError::invalid_input("degrees_of_freedom", format!("{e}"))
        })?;
        2.0 * (1.0 - dist.cdf(statistic.abs()))
    } else {
        let dist = Normal::new(0.0, 1.0)
            .map_err(|e| NpvValidatorError::invalid_input("normal", format!("{e}")))?;
        2.0 * (1.0 - dist.cdf(statistic.abs()))
    };

    Ok(DieboldMarianoOutcome {
        statistic,
        p_value: Some(p_value.clamp(0.0, 1.0)),
        sample_size: t,
        lag,
        mean_differential: mean,
        long_run_variance: lrv,
        reference_distribution: reference,
    })
}

// ---------------------------------------------------------------------------
// Kolmogorov-Smirnov
// ---------------------------------------------------------------------------

/// Supremum distance between the empirical CDFs of two samples.
///
/// ECDFs are right-continuous; tied values are consumed together from both
/// samples before the distance is measured.
pub fn ks_statistic(sample_1: &[f64], sample_2: &[f64]) -> NpvValidatorResult<f64> {
    if sample_1.is_empty() || sample_2.is_empty() {
        return Err(NpvValidatorError::InsufficientData(
            "Kolmogorov-Smirnov requires two non-empty samples".into(),
        ));
    }
    check_finite("sample_1", sample_1)?;
    check_finite("sample_2", sample_2)?;

    let mut a = sample_1.to_vec();
    let mut b = sample_2.to_vec();
    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);
    let (n1, n2) = (a.len() as f64, b.len() as f64);

    let (mut i, mut j) = (0usize, 0usize);
    let mut d_max = 0.0_f64;
    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] == x {
            i += 1;
        }
        while j < b.len() && b[j] == x {
            j += 1;
        }
        let d = (i as f64 / n1 - j as f64 / n2).abs();
        if d > d_max {
            d_max = d;
        }
    }
    Ok(d_max)
}

/// Kolmogorov survival function Q(λ) = 2 Σ (-1)^(k-1) exp(-2k²λ²).
fn kolmogorov_q(lambda: f64) -> f64 {
    let a2 = -2.0 * lambda * lambda;
    let mut fac = 2.0;
    let mut sum = 0.0;
    let mut previous = 0.0;
    for k in 1..=100 {
        let kf = k as f64;
        let term = fac * (a2 * kf * kf).exp();
        sum += term;
        if term.abs() <= 0.001 * previous || term.abs() <= 1.0e-8 * sum {
            return sum.clamp(0.0, 1.0);
        }
        fac = -fac;
        previous = term.abs();
    }
    // Series fails to converge only as λ → 0, where Q → 1.
    1.0
}

/// Two-sample KS test with Stephens' small-sample correction.
pub fn kolmogorov_smirnov(
    sample_1: &[f64],
    sample_2: &[f64],
) -> NpvValidatorResult<KolmogorovSmirnovOutcome> {
    let d = ks_statistic(sample_1, sample_2)?;
    let (n1, n2) = (sample_1.len() as f64, sample_2.len() as f64);
    let ne = n1 * n2 / (n1 + n2);
    let sqrt_ne = ne.sqrt();
    let lambda = (sqrt_ne + 0.12 + 0.11 / sqrt_ne) * d;
    Ok(KolmogorovSmirnovOutcome {
        statistic: d,
        p_value: kolmogorov_q(lambda),
        sample_sizes: (sample_1.len(), sample_2.len()),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() < tol,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_rmse_mae_known_values() {
        let e = [3.0, -4.0];
        assert_close(rmse(&e).unwrap(), (12.5f64).sqrt(), 1e-12);
        assert_close(mae(&e).unwrap(), 3.5, 1e-12);
    }

    #[test]
    fn test_rmse_dominates_mae() {
        let e = [1.0, -2.0, 0.5, 7.0, -3.25];
        assert!(rmse(&e).unwrap() >= mae(&e).unwrap());
    }

    #[test]
    fn test_equal_magnitude_rmse_equals_mae() {
        let e = [2.0, -2.0, 2.0, -2.0];
        assert_close(rmse(&e).unwrap(), mae(&e).unwrap(), 1e-12);
    }

    #[test]
    fn test_empty_series_is_insufficient() {
        assert!(matches!(rmse(&[]), Err(NpvValidatorError::InsufficientData(_))));
        assert!(matches!(mae(&[]), Err(NpvValidatorError::InsufficientData(_))));
    }

    #[test]
    fn test_newey_west_lag_rule() {
        assert_eq!(newey_west_lag(100), 4);
        assert_eq!(newey_west_lag(10), 2);
        assert_eq!(newey_west_lag(1000), 6);
    }

    #[test]
    fn test_dm_identical_series_is_nan_safe() {
        let e: Vec<f64> = (0..20).map(|i| (i as f64).sin()).collect();
        let out = diebold_mariano(&e, &e, &DieboldMarianoConfig::default()).unwrap();
        assert!(out.statistic.is_nan());
        assert!(out.p_value.is_none());
        let result = StatisticalTestResult::from_diebold_mariano(&RunId::from("r"), "dm", &out, 0.05);
        assert_eq!(result.passed, Some(true));
    }

    #[test]
    fn test_dm_detects_worse_forecast() {
        let e1: Vec<f64> = (0..60).map(|i| 5.0 + (i as f64 * 0.7).sin()).collect();
        let e2: Vec<f64> = (0..60).map(|i| 0.2 * (i as f64 * 1.3).cos()).collect();
        let out = diebold_mariano(&e1, &e2, &DieboldMarianoConfig::default()).unwrap();
        assert!(out.statistic > 0.0);
        assert!(out.p_value.unwrap() < 0.01);
    }

    #[test]
    fn test_dm_requires_minimum_sample() {
        let e = [1.0, 2.0, 3.0];
        let err = diebold_mariano(&e, &e, &DieboldMarianoConfig::default()).unwrap_err();
        assert!(matches!(err, NpvValidatorError::InsufficientData(_)));
    }

    #[test]
    fn test_dm_rejects_misaligned_series() {
        let err = diebold_mariano(&[1.0; 12], &[1.0; 11], &DieboldMarianoConfig::default())
            .unwrap_err();
        assert!(matches!(err, NpvValidatorError::InvalidInput { .. }));
    }

    #[test]
    fn test_dm_normal_reference_without_correction() {
        let e1: Vec<f64> = (0..30).map(|i| 1.0 + (i as f64).sin()).collect();
        let e2: Vec<f64> = (0..30).map(|i| (i as f64 * 0.5).cos()).collect();
        let cfg = DieboldMarianoConfig {
            small_sample_correction: false,
            ..Default::default()
        };
        let out = diebold_mariano(&e1, &e2, &cfg).unwrap();
        assert_eq!(out.reference_distribution, "standard_normal");
        let p = out.p_value.unwrap();
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn test_ks_identical_samples() {
        let s = [1.0, 2.0, 2.0, 3.0, 10.0];
        let out = kolmogorov_smirnov(&s, &s).unwrap();
        assert_eq!(out.statistic, 0.0);
        assert_close(out.p_value, 1.0, 1e-12);
    }

    #[test]
    fn test_ks_disjoint_samples() {
        let a: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let b: Vec<f64> = (0..50).map(|i| 100.0 + i as f64).collect();
        let out = kolmogorov_smirnov(&a, &b).unwrap();
        assert_close(out.statistic, 1.0, 1e-12);
        assert!(out.p_value < 1e-6);
    }

    #[test]
    fn test_ks_ties_across_samples() {
        // ECDFs: a = {1: 0.5, 2: 1.0}, b = {1: 1/3, 2: 2/3, 3: 1.0}
        let a = [1.0, 2.0];
        let b = [1.0, 2.0, 3.0];
        assert_close(ks_statistic(&a, &b).unwrap(), 1.0 / 3.0, 1e-12);
    }

    #[test]
    fn test_ks_empty_sample() {
        assert!(matches!(
            ks_statistic(&[], &[1.0]),
            Err(NpvValidatorError::InsufficientData(_))
        ));
    }
}
