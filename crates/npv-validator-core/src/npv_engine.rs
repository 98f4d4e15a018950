//! Challenger NPV engine.
//!
//! Values every loan independently from its contractual schedule and a
//! single as-of yield curve. Valuation is deterministic: the run seed never
//! reaches this module.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, warn};

use crate::amortization::generate_schedule;
use crate::discounting::{present_value, DiscountFactorCurve, InterpolationPolicy, YieldCurve};
use crate::error::NpvValidatorError;
use crate::parallel::map_items;
use crate::types::{with_metadata, CashFlowSchedule, ComputationOutput, LoanRecord, Money, RunId};
use crate::NpvValidatorResult;

/// Challenger NPV of one loan in one run. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpvResult {
    pub run_id: RunId,
    pub loan_id: String,
    pub npv: Money,
    /// Discount curve the loan was valued on
    pub curve_ref: String,
    pub computed_at: DateTime<Utc>,
}

/// A loan that could not be valued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanFailure {
    pub loan_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioValuation {
    /// Sorted by loan id
    pub results: Vec<NpvResult>,
    pub failures: Vec<LoanFailure>,
    pub total_npv: Money,
}

impl PortfolioValuation {
    pub fn npv_by_loan(&self) -> BTreeMap<&str, Money> {
        self.results
            .iter()
            .map(|r| (r.loan_id.as_str(), r.npv))
            .collect()
    }
}

/// Standalone valuation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpvInput {
    pub loans: Vec<LoanRecord>,
    #[serde(default)]
    pub schedules: Vec<CashFlowSchedule>,
    pub curve: YieldCurve,
    #[serde(default)]
    pub interpolation: InterpolationPolicy,
}

/// Pick each loan's contractual schedule: the referenced explicit schedule,
/// or one generated from its amortization terms.
///
/// A loan whose terms cannot generate a schedule (numeric overflow, dates
/// out of range) is left out; [`value_portfolio`] reports it as a failure.
pub fn resolve_schedules(
    loans: &[LoanRecord],
    explicit: &BTreeMap<String, CashFlowSchedule>,
) -> NpvValidatorResult<BTreeMap<String, CashFlowSchedule>> {
    let mut resolved = BTreeMap::new();
    for loan in loans {
        let schedule = match &loan.schedule_ref {
            Some(reference) => {
                let found = explicit.get(reference).ok_or_else(|| {
                    NpvValidatorError::data_integrity(
                        format!("loan:{}", loan.loan_id),
                        format!("schedule reference '{reference}' not found"),
                    )
                })?;
                CashFlowSchedule::new(loan.loan_id.clone(), found.flows().to_vec())?
            }
            None => match generate_schedule(loan) {
                Ok(schedule) => schedule,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(loan_id = %loan.loan_id, error = %e, "schedule generation failed");
                    continue;
                }
            },
        };
        if resolved.insert(loan.loan_id.clone(), schedule).is_some() {
            return Err(NpvValidatorError::data_integrity(
                "loans",
                format!("duplicate loan id '{}'", loan.loan_id),
            ));
        }
    }
    Ok(resolved)
}

/// One discount factor curve per payment frequency in the portfolio.
pub fn build_curves(
    loans: &[LoanRecord],
    curve: &YieldCurve,
    policy: InterpolationPolicy,
) -> NpvValidatorResult<BTreeMap<u32, DiscountFactorCurve>> {
    let mut curves = BTreeMap::new();
    for loan in loans {
        if !curves.contains_key(&loan.periods_per_year) {
            curves.insert(
                loan.periods_per_year,
                DiscountFactorCurve::build(curve, loan.periods_per_year, policy)?,
            );
        }
    }
    Ok(curves)
}

/// Value one loan on a prepared discount factor curve.
pub fn value_loan(
    schedule: &CashFlowSchedule,
    curve: &DiscountFactorCurve,
) -> NpvValidatorResult<Money> {
    present_value(curve, schedule)
}

/// Value every loan. Curve gaps and other per-loan problems become
/// [`LoanFailure`]s; errors building the baseline curve itself are returned.
pub fn value_portfolio(
    run_id: &RunId,
    loans: &[LoanRecord],
    schedules: &BTreeMap<String, CashFlowSchedule>,
    curve: &YieldCurve,
    policy: InterpolationPolicy,
) -> NpvValidatorResult<PortfolioValuation> {
    let curves = build_curves(loans, curve, policy)?;

    let outcomes: Vec<Result<NpvResult, LoanFailure>> = map_items(loans, |loan| {
        let fail = |reason: String| LoanFailure {
            loan_id: loan.loan_id.clone(),
            reason,
        };
        let schedule = schedules
            .get(&loan.loan_id)
            .ok_or_else(|| fail(missing_schedule_reason(loan)))?;
        let dfs = curves
            .get(&loan.periods_per_year)
            .ok_or_else(|| fail("no discount curve for payment frequency".into()))?;
        let npv = value_loan(schedule, dfs).map_err(|e| fail(e.to_string()))?;
        Ok(NpvResult {
            run_id: run_id.clone(),
            loan_id: loan.loan_id.clone(),
            npv,
            curve_ref: dfs.label(),
            computed_at: Utc::now(),
        })
    });

    let mut results = Vec::with_capacity(loans.len());
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(r) => results.push(r),
            Err(f) => {
                warn!(loan_id = %f.loan_id, reason = %f.reason, "loan valuation failed");
                failures.push(f);
            }
        }
    }
    results.sort_by(|a, b| a.loan_id.cmp(&b.loan_id));
    failures.sort_by(|a, b| a.loan_id.cmp(&b.loan_id));

    let total_npv: Decimal = results.iter().map(|r| r.npv).sum();
    debug!(
        valued = results.len(),
        failed = failures.len(),
        total_npv = %total_npv,
        "portfolio valued"
    );

    Ok(PortfolioValuation {
        results,
        failures,
        total_npv,
    })
}

fn missing_schedule_reason(loan: &LoanRecord) -> String {
    match (&loan.schedule_ref, generate_schedule(loan)) {
        (None, Err(e)) => e.to_string(),
        _ => "no resolved schedule".into(),
    }
}

/// Value a portfolio outside a validation run.
pub fn calculate_portfolio_npv(
    run_id: &RunId,
    input: &NpvInput,
) -> NpvValidatorResult<ComputationOutput<PortfolioValuation>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    if input.loans.is_empty() {
        return Err(NpvValidatorError::InsufficientData(
            "At least one loan required".into(),
        ));
    }

    let explicit: BTreeMap<String, CashFlowSchedule> = input
        .schedules
        .iter()
        .map(|s| (s.loan_id.clone(), s.clone()))
        .collect();
    let schedules = resolve_schedules(&input.loans, &explicit)?;
    let valuation = value_portfolio(run_id, &input.loans, &schedules, &input.curve, input.interpolation)?;

    for f in &valuation.failures {
        warnings.push(format!("Loan '{}' not valued: {}", f.loan_id, f.reason));
    }

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Challenger NPV (Σ CF_t · DF_t, annual-compounding zero curve)",
        &serde_json::json!({
            "num_loans": input.loans.len(),
            "curve_as_of": input.curve.as_of.to_string(),
            "interpolation": input.interpolation,
        }),
        warnings,
        elapsed,
        valuation,
    ))
}
