use chrono::{Months, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::NpvValidatorError;
use crate::NpvValidatorResult;

/// All monetary values. Wraps Decimal to prevent accidental f64 usage.
pub type Money = Decimal;

/// Rates expressed as decimals (0.05 = 5%). Never as percentages.
pub type Rate = Decimal;

/// Year fractions
pub type Years = Decimal;

/// Identifier of a single validation run. Unique per invocation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn generate() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        RunId(s.to_string())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the contractual schedule is derived when no explicit schedule is referenced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmortizationType {
    #[default]
    LevelPayment,
    Bullet,
    StraightLine,
}

/// A loan as loaded for a run. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanRecord {
    pub loan_id: String,
    pub principal: Money,
    /// Annual contractual rate
    pub rate: Rate,
    pub tenor_periods: u32,
    pub periods_per_year: u32,
    pub origination_date: NaiveDate,
    #[serde(default)]
    pub amortization: AmortizationType,
    /// Key of an explicit schedule; generated from `amortization` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_ref: Option<String>,
}

impl LoanRecord {
    /// Year fraction of a payment period.
    pub fn year_fraction(&self, period: u32) -> Years {
        Decimal::from(period) / Decimal::from(self.periods_per_year)
    }

    /// Calendar date of a payment period.
    pub fn period_date(&self, period: u32) -> NpvValidatorResult<NaiveDate> {
        let out_of_range = || {
            NpvValidatorError::invalid_input(
                format!("loan:{} period", self.loan_id),
                format!("period {period} falls outside the calendar range"),
            )
        };
        let months_per_period = 12 / self.periods_per_year.max(1);
        let months = months_per_period
            .checked_mul(period)
            .ok_or_else(out_of_range)?;
        self.origination_date
            .checked_add_months(Months::new(months))
            .ok_or_else(out_of_range)
    }
}

/// A single contractual or realized cash flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledCashFlow {
    pub period: u32,
    pub amount: Money,
}

/// Ordered cash flows for one loan. Periods strictly increasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSchedule")]
pub struct CashFlowSchedule {
    pub loan_id: String,
    flows: Vec<ScheduledCashFlow>,
}

#[derive(Deserialize)]
struct RawSchedule {
    loan_id: String,
    flows: Vec<ScheduledCashFlow>,
}

impl TryFrom<RawSchedule> for CashFlowSchedule {
    type Error = NpvValidatorError;

    fn try_from(raw: RawSchedule) -> Result<Self, Self::Error> {
        CashFlowSchedule::new(raw.loan_id, raw.flows)
    }
}

impl CashFlowSchedule {
    pub fn new(loan_id: impl Into<String>, flows: Vec<ScheduledCashFlow>) -> NpvValidatorResult<Self> {
        let loan_id = loan_id.into();
        for pair in flows.windows(2) {
            if pair[1].period <= pair[0].period {
                return Err(NpvValidatorError::data_integrity(
                    format!("schedule:{loan_id}"),
                    format!(
                        "periods must be strictly increasing (period {} follows {})",
                        pair[1].period, pair[0].period
                    ),
                ));
            }
        }
        Ok(Self { loan_id, flows })
    }

    /// Build a schedule from unordered flows, sorting by period first.
    pub fn from_unordered(
        loan_id: impl Into<String>,
        mut flows: Vec<ScheduledCashFlow>,
    ) -> NpvValidatorResult<Self> {
        flows.sort_by_key(|f| f.period);
        Self::new(loan_id, flows)
    }

    pub fn flows(&self) -> &[ScheduledCashFlow] {
        &self.flows
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn last_period(&self) -> Option<u32> {
        self.flows.last().map(|f| f.period)
    }

    /// Flows up to and including `horizon`.
    pub fn truncated(&self, horizon: u32) -> CashFlowSchedule {
        CashFlowSchedule {
            loan_id: self.loan_id.clone(),
            flows: self
                .flows
                .iter()
                .copied()
                .filter(|f| f.period <= horizon)
                .collect(),
        }
    }

    pub fn total(&self) -> Money {
        self.flows.iter().map(|f| f.amount).sum()
    }

    /// Rebuild with transformed flows. Transforms that merge periods sum the
    /// colliding amounts so the ordering invariant still holds.
    pub fn map_flows<F>(&self, f: F) -> NpvValidatorResult<CashFlowSchedule>
    where
        F: Fn(&ScheduledCashFlow) -> NpvValidatorResult<ScheduledCashFlow>,
    {
        let mut mapped = self
            .flows
            .iter()
            .map(f)
            .collect::<NpvValidatorResult<Vec<ScheduledCashFlow>>>()?;
        mapped.sort_by_key(|cf| cf.period);
        let mut merged: Vec<ScheduledCashFlow> = Vec::with_capacity(mapped.len());
        for cf in mapped {
            match merged.last_mut() {
                Some(last) if last.period == cf.period => {
                    last.amount = last.amount.checked_add(cf.amount).ok_or_else(|| {
                        NpvValidatorError::NumericOverflow {
                            context: format!("schedule:{} period {}", self.loan_id, cf.period),
                        }
                    })?;
                }
                _ => merged.push(cf),
            }
        }
        Ok(CashFlowSchedule {
            loan_id: self.loan_id.clone(),
            flows: merged,
        })
    }
}

/// A cash flow actually collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealizedCashFlow {
    pub loan_id: String,
    pub period: u32,
    pub amount: Money,
}

/// One quarterly macro variable observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroObservation {
    pub date: NaiveDate,
    pub variable: String,
    pub value: Decimal,
}

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap computation results with metadata
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "rust_decimal_128bit".to_string(),
        },
    }
}
