use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;

use crate::error::NpvValidatorError;
use crate::types::{AmortizationType, CashFlowSchedule, LoanRecord, Money, ScheduledCashFlow};
use crate::NpvValidatorResult;

/// Capacity hint cap; longer schedules grow on demand.
const MAX_PREALLOCATED_PERIODS: u32 = 1200;

/// Level payment (PMT) for a fully amortizing loan at a periodic rate.
pub fn level_payment(periodic_rate: Decimal, nper: u32, principal: Money) -> NpvValidatorResult<Money> {
    if nper == 0 {
        return Err(NpvValidatorError::invalid_input(
            "nper",
            "Number of periods must be > 0",
        ));
    }
    if periodic_rate.is_zero() {
        return Ok(principal / Decimal::from(nper));
    }
    let overflow = || NpvValidatorError::NumericOverflow {
        context: format!("level payment on {principal} over {nper} periods"),
    };

    let factor = (Decimal::ONE + periodic_rate)
        .checked_powi(nper as i64)
        .ok_or_else(|| NpvValidatorError::NumericOverflow {
            context: format!("annuity factor over {nper} periods"),
        })?;
    let annuity_factor = (factor - Decimal::ONE)
        .checked_div(periodic_rate)
        .ok_or_else(overflow)?;
    if annuity_factor.is_zero() {
        return Err(NpvValidatorError::DivisionByZero {
            context: "PMT annuity factor".into(),
        });
    }
    principal
        .checked_mul(factor)
        .and_then(|v| v.checked_div(annuity_factor))
        .ok_or_else(overflow)
}

/// Contractual schedule implied by a loan's amortization type.
///
/// Payments are rounded to cents; the final payment absorbs the rounding
/// residual so principal repaid equals the loan principal exactly.
pub fn generate_schedule(loan: &LoanRecord) -> NpvValidatorResult<CashFlowSchedule> {
    let n = loan.tenor_periods;
    if n == 0 {
        return CashFlowSchedule::new(loan.loan_id.clone(), Vec::new());
    }
    if loan.periods_per_year == 0 {
        return Err(NpvValidatorError::data_integrity(
            format!("loan:{}", loan.loan_id),
            "periods_per_year must be at least 1",
        ));
    }

    let r = loan.rate / Decimal::from(loan.periods_per_year);
    let mut balance = loan.principal;
    let mut flows = Vec::with_capacity(n.min(MAX_PREALLOCATED_PERIODS) as usize);
    let overflow = |period: u32| NpvValidatorError::NumericOverflow {
        context: format!("loan {} schedule at period {period}", loan.loan_id),
    };

    let payment = match loan.amortization {
        AmortizationType::LevelPayment => Some(level_payment(r, n, loan.principal)?.round_dp(2)),
        _ => None,
    };
    let straight_principal = (loan.principal / Decimal::from(n)).round_dp(2);

    for period in 1..=n {
        let interest = balance
            .checked_mul(r)
            .ok_or_else(|| overflow(period))?
            .round_dp(2);
        let principal_paid = if period == n {
            balance
        } else {
            match loan.amortization {
                AmortizationType::LevelPayment => payment
                    .unwrap_or_default()
                    .checked_sub(interest)
                    .ok_or_else(|| overflow(period))?,
                AmortizationType::Bullet => Decimal::ZERO,
                AmortizationType::StraightLine => straight_principal,
            }
        };
        balance = balance
            .checked_sub(principal_paid)
            .ok_or_else(|| overflow(period))?;
        flows.push(ScheduledCashFlow {
            period,
            amount: interest
                .checked_add(principal_paid)
                .ok_or_else(|| overflow(period))?,
        });
    }

    CashFlowSchedule::new(loan.loan_id.clone(), flows)
}
