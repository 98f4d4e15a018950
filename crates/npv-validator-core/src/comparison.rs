//! Analytic challenger-vs-champion comparison.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::discounting::YieldCurve;
use crate::error::NpvValidatorError;
use crate::npv_engine::{LoanFailure, PortfolioValuation};
use crate::parallel::map_items;
use crate::types::{CashFlowSchedule, LoanRecord, Money, RunId};
use crate::NpvValidatorResult;

/// What the champion is asked to price.
#[derive(Debug, Clone, Copy)]
pub struct ChampionRequest<'a> {
    pub loan: &'a LoanRecord,
    pub schedule: &'a CashFlowSchedule,
    pub curve: &'a YieldCurve,
    /// Last period to include; `None` for the whole schedule
    pub horizon: Option<u32>,
}

/// The production model under validation.
pub trait ChampionModel: Send + Sync {
    fn name(&self) -> &str;

    fn predict_npv(&self, request: &ChampionRequest<'_>) -> NpvValidatorResult<Money>;
}

/// Champion predictions exported to a table keyed by loan and horizon.
/// Horizon 0 is the full-schedule NPV.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChampionTable {
    name: String,
    values: BTreeMap<String, BTreeMap<u32, Money>>,
}

impl ChampionTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, loan_id: &str, horizon: u32, npv: Money) {
        self.values
            .entry(loan_id.to_string())
            .or_default()
            .insert(horizon, npv);
    }

    pub fn len(&self) -> usize {
        self.values.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl ChampionModel for ChampionTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict_npv(&self, request: &ChampionRequest<'_>) -> NpvValidatorResult<Money> {
        let horizon = request.horizon.unwrap_or(0);
        self.values
            .get(&request.loan.loan_id)
            .and_then(|by_h| by_h.get(&horizon))
            .copied()
            .ok_or_else(|| {
                NpvValidatorError::InsufficientData(format!(
                    "champion '{}' has no NPV for loan {} at horizon {horizon}",
                    self.name, request.loan.loan_id
                ))
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanComparison {
    pub run_id: RunId,
    pub loan_id: String,
    pub challenger_npv: Money,
    pub champion_npv: Money,
    /// challenger − champion
    pub delta_npv: Money,
    pub abs_diff: Money,
    /// |Δ| / |champion|; absent when the champion NPV is zero
    pub rel_diff: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub champion: String,
    /// Sorted by loan id
    pub comparisons: Vec<LoanComparison>,
    pub failures: Vec<LoanFailure>,
    pub max_abs_diff: Money,
    pub mean_abs_rel_diff: Option<f64>,
}

impl ComparisonSummary {
    pub fn deltas(&self) -> Vec<Money> {
        self.comparisons.iter().map(|c| c.delta_npv).collect()
    }

    pub fn challenger_npvs(&self) -> Vec<Money> {
        self.comparisons.iter().map(|c| c.challenger_npv).collect()
    }

    pub fn champion_npvs(&self) -> Vec<Money> {
        self.comparisons.iter().map(|c| c.champion_npv).collect()
    }

    pub fn metrics(&self) -> Vec<(String, f64)> {
        let mut out = vec![
            (
                "comparison.max_abs_diff".to_string(),
                self.max_abs_diff.to_f64().unwrap_or(f64::NAN),
            ),
            ("comparison.loans".to_string(), self.comparisons.len() as f64),
            ("comparison.failures".to_string(), self.failures.len() as f64),
        ];
        if let Some(rel) = self.mean_abs_rel_diff {
            out.push(("comparison.mean_abs_rel_diff".to_string(), rel));
        }
        out
    }
}

/// Ask the champion for every valued loan's NPV on the same curve and
/// compare. Loans the champion cannot price become failures.
pub fn compare_with_champion(
    run_id: &RunId,
    champion: &dyn ChampionModel,
    loans: &[LoanRecord],
    schedules: &BTreeMap<String, CashFlowSchedule>,
    curve: &YieldCurve,
    valuation: &PortfolioValuation,
) -> NpvValidatorResult<ComparisonSummary> {
    let challenger = valuation.npv_by_loan();
    let valued: Vec<&LoanRecord> = loans
        .iter()
        .filter(|l| challenger.contains_key(l.loan_id.as_str()))
        .collect();

    let outcomes: Vec<Result<LoanComparison, LoanFailure>> = map_items(&valued, |loan| {
        let loan: &LoanRecord = loan;
        let fail = |reason: String| LoanFailure {
            loan_id: loan.loan_id.clone(),
            reason,
        };
        let schedule = schedules
            .get(&loan.loan_id)
            .ok_or_else(|| fail("no resolved schedule".into()))?;
        let champion_npv = champion
            .predict_npv(&ChampionRequest {
                loan,
                schedule,
                curve,
                horizon: None,
            })
            .map_err(|e| fail(e.to_string()))?;
        let challenger_npv = challenger
            .get(loan.loan_id.as_str())
            .copied()
            .unwrap_or_default();
        let delta_npv = challenger_npv - champion_npv;
        Ok(LoanComparison {
            run_id: run_id.clone(),
            loan_id: loan.loan_id.clone(),
            challenger_npv,
            champion_npv,
            delta_npv,
            abs_diff: delta_npv.abs(),
            rel_diff: (!champion_npv.is_zero()).then(|| delta_npv.abs() / champion_npv.abs()),
        })
    });

    let mut comparisons = Vec::with_capacity(valued.len());
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(c) => comparisons.push(c),
            Err(f) => {
                warn!(loan_id = %f.loan_id, reason = %f.reason, "champion could not price loan");
                failures.push(f);
            }
        }
    }
    comparisons.sort_by(|a, b| a.loan_id.cmp(&b.loan_id));
    failures.sort_by(|a, b| a.loan_id.cmp(&b.loan_id));

    let max_abs_diff = comparisons
        .iter()
        .map(|c| c.abs_diff)
        .max()
        .unwrap_or(Decimal::ZERO);
    let rel: Vec<f64> = comparisons
        .iter()
        .filter_map(|c| c.rel_diff.and_then(|r| r.to_f64()))
        .collect();
    let mean_abs_rel_diff = (!rel.is_empty()).then(|| rel.iter().sum::<f64>() / rel.len() as f64);

    debug!(
        champion = champion.name(),
        compared = comparisons.len(),
        failed = failures.len(),
        max_abs_diff = %max_abs_diff,
        "champion comparison complete"
    );

    Ok(ComparisonSummary {
        champion: champion.name().to_string(),
        comparisons,
        failures,
        max_abs_diff,
        mean_abs_rel_diff,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discounting::InterpolationPolicy;
    use crate::npv_engine::{resolve_schedules, value_portfolio};
    use crate::types::AmortizationType;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn loan(id: &str) -> LoanRecord {
        LoanRecord {
            loan_id: id.into(),
            principal: dec!(1000),
            rate: dec!(0.06),
            tenor_periods: 4,
            periods_per_year: 4,
            origination_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            amortization: AmortizationType::Bullet,
            schedule_ref: None,
        }
    }

    #[test]
    fn test_comparison_against_table() {
        let loans = vec![loan("B"), loan("A"), loan("C")];
        let schedules = resolve_schedules(&loans, &BTreeMap::new()).unwrap();
        let curve = YieldCurve::flat(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), dec!(0.05)).unwrap();
        let run = RunId::from("r");
        let valuation =
            value_portfolio(&run, &loans, &schedules, &curve, InterpolationPolicy::default()).unwrap();
        let npvs = valuation.npv_by_loan();

        let mut table = ChampionTable::new("prod");
        table.insert("A", 0, npvs["A"]);
        table.insert("B", 0, npvs["B"] - dec!(10));

        let summary =
            compare_with_champion(&run, &table, &loans, &schedules, &curve, &valuation).unwrap();
        assert_eq!(summary.comparisons.len(), 2);
        assert_eq!(summary.comparisons[0].loan_id, "A");
        assert_eq!(summary.comparisons[0].delta_npv, Decimal::ZERO);
        assert_eq!(summary.comparisons[1].delta_npv, dec!(10));
        assert_eq!(summary.max_abs_diff, dec!(10));
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].loan_id, "C");
    }

    #[test]
    fn test_table_lookup_by_horizon() {
        let mut table = ChampionTable::new("prod");
        table.insert("A", 2, dec!(55));
        let l = loan("A");
        let schedule = CashFlowSchedule::new("A", vec![]).unwrap();
        let curve = YieldCurve::flat(l.origination_date, dec!(0.05)).unwrap();
        let mut req = ChampionRequest {
            loan: &l,
            schedule: &schedule,
            curve: &curve,
            horizon: Some(2),
        };
        assert_eq!(table.predict_npv(&req).unwrap(), dec!(55));
        req.horizon = None;
        assert!(table.predict_npv(&req).is_err());
    }
}
