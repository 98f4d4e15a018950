use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::curve::DiscountFactorCurve;
use crate::types::{CashFlowSchedule, Money};
use crate::NpvValidatorResult;

/// A cash flow with the factor used to discount it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountedCashFlow {
    pub period: u32,
    pub amount: Money,
    pub discount_factor: Decimal,
    pub present_value: Money,
}

/// NPV = Σ CF_t · DF_t. An empty schedule is worth zero.
pub fn present_value(
    curve: &DiscountFactorCurve,
    schedule: &CashFlowSchedule,
) -> NpvValidatorResult<Money> {
    let mut result = Decimal::ZERO;
    for cf in schedule.flows() {
        result += cf.amount * curve.discount_factor(cf.period)?;
    }
    Ok(result)
}

/// Per-flow breakdown of [`present_value`].
pub fn discounted_flows(
    curve: &DiscountFactorCurve,
    schedule: &CashFlowSchedule,
) -> NpvValidatorResult<Vec<DiscountedCashFlow>> {
    schedule
        .flows()
        .iter()
        .map(|cf| {
            let df = curve.discount_factor(cf.period)?;
            Ok(DiscountedCashFlow {
                period: cf.period,
                amount: cf.amount,
                discount_factor: df,
                present_value: cf.amount * df,
            })
        })
        .collect()
}
