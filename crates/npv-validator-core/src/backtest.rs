//! Back-test of predicted against realized valuations.
//!
//! For each loan and each period with realized data, the discount curve is
//! rebuilt from the latest historical snapshot on or before the period's
//! observation date. Scheduled and realized flows up to that period are
//! discounted on the same curve, so the only difference between the two
//! NPVs is the cash-flow source.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::comparison::{ChampionModel, ChampionRequest};
use crate::discounting::{present_value, DiscountFactorCurve, InterpolationPolicy, YieldCurve};
use crate::error::NpvValidatorError;
use crate::parallel::map_items;
use crate::types::{CashFlowSchedule, LoanRecord, Money, RealizedCashFlow, RunId, ScheduledCashFlow};
use crate::NpvValidatorResult;

/// One (loan, period) point of the ΔNPV series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestObservation {
    pub run_id: RunId,
    pub loan_id: String,
    pub period: u32,
    pub observation_date: NaiveDate,
    /// As-of date of the snapshot used
    pub curve_ref: NaiveDate,
    pub predicted_npv: Money,
    pub realized_npv: Money,
    /// predicted − realized
    pub delta_npv: Money,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub champion_npv: Option<Money>,
    /// champion predicted − realized
    #[serde(skip_serializing_if = "Option::is_none")]
    pub champion_delta: Option<Money>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacktestFailure {
    pub loan_id: String,
    pub period: u32,
    pub reason: String,
}

/// Portfolio-level errors for one period index, summed across loans for
/// which both challenger and champion errors exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodError {
    pub period: u32,
    pub loans: usize,
    pub challenger_error: Money,
    pub champion_error: Money,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Sorted by loan id, then period
    pub observations: Vec<BacktestObservation>,
    pub failures: Vec<BacktestFailure>,
    /// Champion pricing failures, not counted as back-test failures
    pub champion_failures: usize,
    /// Aligned portfolio series for forecast-accuracy comparison
    pub period_errors: Vec<PeriodError>,
}

impl BacktestResult {
    pub fn delta_series(&self) -> Vec<Money> {
        self.observations.iter().map(|o| o.delta_npv).collect()
    }

    pub fn predicted_series(&self) -> Vec<Money> {
        self.observations.iter().map(|o| o.predicted_npv).collect()
    }

    pub fn realized_series(&self) -> Vec<Money> {
        self.observations.iter().map(|o| o.realized_npv).collect()
    }

    /// Time-ordered ΔNPV series for one loan.
    pub fn loan_series(&self, loan_id: &str) -> Vec<(u32, Money)> {
        self.observations
            .iter()
            .filter(|o| o.loan_id == loan_id)
            .map(|o| (o.period, o.delta_npv))
            .collect()
    }

    pub fn metrics(&self) -> Vec<(String, f64)> {
        let n = self.observations.len();
        let mut out = vec![
            ("backtest.observations".to_string(), n as f64),
            ("backtest.failures".to_string(), self.failures.len() as f64),
        ];
        if n > 0 {
            let mean = self.delta_series().iter().sum::<Decimal>() / Decimal::from(n);
            if let Some(m) = mean.to_f64() {
                out.push(("backtest.mean_delta_npv".to_string(), m));
            }
        }
        out
    }
}

/// Historical snapshots indexed by date.
struct CurveHistory {
    /// Ascending by as-of date
    snapshots: Vec<YieldCurve>,
    factors: BTreeMap<(NaiveDate, u32), DiscountFactorCurve>,
}

impl CurveHistory {
    fn build(
        curves: &[YieldCurve],
        frequencies: &BTreeSet<u32>,
        policy: InterpolationPolicy,
    ) -> NpvValidatorResult<Self> {
        let mut snapshots = curves.to_vec();
        snapshots.sort_by_key(|c| c.as_of);
        if snapshots.windows(2).any(|w| w[0].as_of == w[1].as_of) {
            return Err(NpvValidatorError::data_integrity(
                "yield_curves",
                "more than one snapshot for the same date",
            ));
        }
        let mut factors = BTreeMap::new();
        for curve in &snapshots {
            for &ppy in frequencies {
                factors.insert((curve.as_of, ppy), DiscountFactorCurve::build(curve, ppy, policy)?);
            }
        }
        Ok(Self { snapshots, factors })
    }

    /// Latest snapshot dated on or before `date`.
    fn snapshot_at(&self, date: NaiveDate) -> Option<&YieldCurve> {
        let idx = self.snapshots.partition_point(|c| c.as_of <= date);
        idx.checked_sub(1).map(|i| &self.snapshots[i])
    }
}

struct LoanBacktest {
    observations: Vec<BacktestObservation>,
    failures: Vec<BacktestFailure>,
    champion_failures: usize,
}

fn backtest_loan(
    run_id: &RunId,
    loan: &LoanRecord,
    schedule: &CashFlowSchedule,
    realized: &[ScheduledCashFlow],
    history: &CurveHistory,
    champion: Option<&dyn ChampionModel>,
) -> LoanBacktest {
    let mut out = LoanBacktest {
        observations: Vec::new(),
        failures: Vec::new(),
        champion_failures: 0,
    };
    let last = schedule.last_period().unwrap_or(0).max(loan.tenor_periods);
    let realized_schedule = match CashFlowSchedule::from_unordered(loan.loan_id.clone(), realized.to_vec()) {
        Ok(s) => s,
        Err(e) => {
            out.failures.push(BacktestFailure {
                loan_id: loan.loan_id.clone(),
                period: 0,
                reason: e.to_string(),
            });
            return out;
        }
    };

    for flow in realized_schedule.flows().iter().filter(|f| f.period >= 1 && f.period <= last) {
        let period = flow.period;
        let fail = |reason: String| BacktestFailure {
            loan_id: loan.loan_id.clone(),
            period,
            reason,
        };

        let observation_date = match loan.period_date(period) {
            Ok(d) => d,
            Err(e) => {
                out.failures.push(fail(e.to_string()));
                continue;
            }
        };
        let Some(snapshot) = history.snapshot_at(observation_date) else {
            let gap = NpvValidatorError::CurveGap {
                period,
                curve: format!("no snapshot on or before {observation_date}"),
            };
            out.failures.push(fail(gap.to_string()));
            continue;
        };
        let Some(dfs) = history.factors.get(&(snapshot.as_of, loan.periods_per_year)) else {
            out.failures.push(fail("no discount curve for payment frequency".into()));
            continue;
        };

        let valued = present_value(dfs, &schedule.truncated(period))
            .and_then(|p| present_value(dfs, &realized_schedule.truncated(period)).map(|r| (p, r)));
        let (predicted_npv, realized_npv) = match valued {
            Ok(v) => v,
            Err(e) => {
                out.failures.push(fail(e.to_string()));
                continue;
            }
        };

        let champion_npv = champion.and_then(|model| {
            let request = ChampionRequest {
                loan,
                schedule,
                curve: snapshot,
                horizon: Some(period),
            };
            match model.predict_npv(&request) {
                Ok(v) => Some(v),
                Err(e) => {
                    debug!(loan_id = %loan.loan_id, period, error = %e, "no champion back-test value");
                    out.champion_failures += 1;
                    None
                }
            }
        });

        out.observations.push(BacktestObservation {
            run_id: run_id.clone(),
            loan_id: loan.loan_id.clone(),
            period,
            observation_date,
            curve_ref: snapshot.as_of,
            predicted_npv,
            realized_npv,
            delta_npv: predicted_npv - realized_npv,
            champion_npv,
            champion_delta: champion_npv.map(|c| c - realized_npv),
        });
    }
    out
}

fn aligned_period_errors(observations: &[BacktestObservation]) -> Vec<PeriodError> {
    let mut by_period: BTreeMap<u32, PeriodError> = BTreeMap::new();
    for o in observations {
        let Some(champion_delta) = o.champion_delta else { continue };
        let entry = by_period.entry(o.period).or_insert(PeriodError {
            period: o.period,
            loans: 0,
            challenger_error: Decimal::ZERO,
            champion_error: Decimal::ZERO,
        });
        entry.loans += 1;
        entry.challenger_error += o.delta_npv;
        entry.champion_error += champion_delta;
    }
    by_period.into_values().collect()
}

/// Back-test every loan against its realized cash flows.
pub fn run_backtest(
    run_id: &RunId,
    loans: &[LoanRecord],
    schedules: &BTreeMap<String, CashFlowSchedule>,
    realized: &[RealizedCashFlow],
    curves: &[YieldCurve],
    policy: InterpolationPolicy,
    champion: Option<&dyn ChampionModel>,
) -> NpvValidatorResult<BacktestResult> {
    if curves.is_empty() {
        return Err(NpvValidatorError::data_integrity(
            "yield_curves",
            "no historical yield curve snapshots",
        ));
    }
    let frequencies: BTreeSet<u32> = loans.iter().map(|l| l.periods_per_year).collect();
    let history = CurveHistory::build(curves, &frequencies, policy)?;

    let mut realized_by_loan: BTreeMap<&str, Vec<ScheduledCashFlow>> = BTreeMap::new();
    for r in realized {
        realized_by_loan
            .entry(r.loan_id.as_str())
            .or_default()
            .push(ScheduledCashFlow {
                period: r.period,
                amount: r.amount,
            });
    }
    let known: BTreeSet<&str> = loans.iter().map(|l| l.loan_id.as_str()).collect();
    let orphans = realized_by_loan.keys().filter(|id| !known.contains(*id)).count();
    if orphans > 0 {
        warn!(orphans, "realized cash flows for unknown loans ignored");
    }

    let per_loan = map_items(loans, |loan| {
        let Some(schedule) = schedules.get(&loan.loan_id) else {
            return LoanBacktest {
                observations: Vec::new(),
                failures: vec![BacktestFailure {
                    loan_id: loan.loan_id.clone(),
                    period: 0,
                    reason: "no resolved schedule".into(),
                }],
                champion_failures: 0,
            };
        };
        let flows = realized_by_loan
            .get(loan.loan_id.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        backtest_loan(run_id, loan, schedule, flows, &history, champion)
    });

    let mut result = BacktestResult::default();
    for lb in per_loan {
        result.observations.extend(lb.observations);
        result.failures.extend(lb.failures);
        result.champion_failures += lb.champion_failures;
    }
    result
        .observations
        .sort_by(|a, b| a.loan_id.cmp(&b.loan_id).then(a.period.cmp(&b.period)));
    result
        .failures
        .sort_by(|a, b| a.loan_id.cmp(&b.loan_id).then(a.period.cmp(&b.period)));
    for f in &result.failures {
        warn!(loan_id = %f.loan_id, period = f.period, reason = %f.reason, "back-test observation failed");
    }
    result.period_errors = aligned_period_errors(&result.observations);

    debug!(
        observations = result.observations.len(),
        failures = result.failures.len(),
        aligned_periods = result.period_errors.len(),
        "back-test complete"
    );
    Ok(result)
}
