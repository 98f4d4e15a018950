use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::data_quality::DataQualityConfig;
use crate::discounting::InterpolationPolicy;
use crate::error::NpvValidatorError;
use crate::governance::{GovernanceConfig, ThresholdRule};
use crate::statistics::DieboldMarianoConfig;
use crate::stress::{MonteCarloConfig, ScenarioDefinition, Shock};
use crate::NpvValidatorResult;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CurveConfig {
    #[serde(default)]
    pub interpolation: InterpolationPolicy,
}

/// Everything a validation run is parameterised by. Parsed once, then
/// checked with [`ValidationConfig::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_significance_level")]
    pub significance_level: f64,
    /// Baseline curve date; the latest snapshot when absent
    #[serde(default)]
    pub valuation_date: Option<NaiveDate>,
    #[serde(default)]
    pub curve: CurveConfig,
    #[serde(default)]
    pub data_quality: DataQualityConfig,
    #[serde(default)]
    pub statistics: DieboldMarianoConfig,
    #[serde(default)]
    pub scenarios: Vec<ScenarioDefinition>,
    #[serde(default)]
    pub monte_carlo: Option<MonteCarloConfig>,
    #[serde(default)]
    pub governance: GovernanceConfig,
    #[serde(default)]
    pub rules: Vec<ThresholdRule>,
}

fn default_seed() -> u64 {
    42
}

fn default_significance_level() -> f64 {
    0.05
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            significance_level: default_significance_level(),
            valuation_date: None,
            curve: CurveConfig::default(),
            data_quality: DataQualityConfig::default(),
            statistics: DieboldMarianoConfig::default(),
            scenarios: Vec::new(),
            monte_carlo: None,
            governance: GovernanceConfig::default(),
            rules: Vec::new(),
        }
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> NpvValidatorError {
    NpvValidatorError::invalid_input(field, reason)
}

impl ValidationConfig {
    pub fn validate(&self) -> NpvValidatorResult<()> {
        if !(self.significance_level > 0.0 && self.significance_level < 1.0) {
            return Err(invalid(
                "significance_level",
                format!("{} must lie in (0, 1)", self.significance_level),
            ));
        }

        let dq = &self.data_quality;
        if !(0.0..=1.0).contains(&dq.missing_tolerance) {
            return Err(invalid(
                "data_quality.missing_tolerance",
                "must lie in [0, 1]",
            ));
        }
        if dq.psi_bins < 2 {
            return Err(invalid("data_quality.psi_bins", "at least 2 bins required"));
        }
        for f in &dq.fields {
            if let (Some(min), Some(max)) = (f.min, f.max) {
                if min > max {
                    return Err(invalid(
                        format!("data_quality.fields.{}.{}", f.dataset, f.column),
                        format!("min {min} exceeds max {max}"),
                    ));
                }
            }
        }
        for d in &dq.drift {
            if !d.threshold.is_finite() || d.threshold < 0.0 {
                return Err(invalid(
                    format!("data_quality.drift.{}.{}", d.dataset, d.column),
                    "threshold must be a non-negative number",
                ));
            }
        }

        if self.statistics.min_sample < 2 {
            return Err(invalid("statistics.min_sample", "must be at least 2"));
        }

        let mut names = BTreeSet::new();
        for s in &self.scenarios {
            if s.name.trim().is_empty() {
                return Err(invalid("scenarios.name", "scenario name must not be empty"));
            }
            if !names.insert(s.name.as_str()) {
                return Err(invalid(
                    "scenarios",
                    format!("duplicate scenario name '{}'", s.name),
                ));
            }
            if s.shocks.is_empty() {
                return Err(invalid(
                    format!("scenarios.{}", s.name),
                    "scenario has no shocks",
                ));
            }
            for shock in &s.shocks {
                if let Shock::CashFlowHaircut { pct } = shock {
                    if *pct < Decimal::ZERO || *pct > Decimal::ONE {
                        return Err(invalid(
                            format!("scenarios.{}.cash_flow_haircut", s.name),
                            "pct must lie in [0, 1]",
                        ));
                    }
                }
            }
        }

        if let Some(mc) = &self.monte_carlo {
            if mc.draws == 0 {
                return Err(invalid("monte_carlo.draws", "must be at least 1"));
            }
            if !mc.std_bp.is_finite() || mc.std_bp < 0.0 || !mc.mean_bp.is_finite() {
                return Err(invalid(
                    "monte_carlo",
                    "mean_bp must be finite and std_bp non-negative",
                ));
            }
        }

        for r in &self.rules {
            if r.metric.trim().is_empty() {
                return Err(invalid("rules.metric", "metric name must not be empty"));
            }
            if !r.limit.is_finite() {
                return Err(invalid(format!("rules.{}", r.metric), "limit must be finite"));
            }
        }
        Ok(())
    }
}
