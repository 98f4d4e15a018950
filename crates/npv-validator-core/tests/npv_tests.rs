use chrono::NaiveDate;
use npv_validator_core::discounting::{
    present_value, CurvePoint, DiscountFactorCurve, InterpolationPolicy, YieldCurve,
};
use npv_validator_core::npv_engine::{calculate_portfolio_npv, NpvInput};
use npv_validator_core::statistics::{kolmogorov_smirnov, mae, rmse};
use npv_validator_core::types::{
    AmortizationType, CashFlowSchedule, LoanRecord, RunId, ScheduledCashFlow,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

fn loan(id: &str, schedule_ref: &str) -> LoanRecord {
    LoanRecord {
        loan_id: id.into(),
        principal: dec!(250),
        rate: dec!(0.10),
        tenor_periods: 3,
        periods_per_year: 1,
        origination_date: as_of(),
        amortization: AmortizationType::LevelPayment,
        schedule_ref: Some(schedule_ref.into()),
    }
}

fn schedule(reference: &str, amounts: &[Decimal]) -> CashFlowSchedule {
    CashFlowSchedule::new(
        reference,
        amounts
            .iter()
            .enumerate()
            .map(|(i, a)| ScheduledCashFlow {
                period: i as u32 + 1,
                amount: *a,
            })
            .collect(),
    )
    .unwrap()
}

// ===========================================================================
// Portfolio NPV
// ===========================================================================

#[test]
fn test_three_loans_at_flat_ten_percent() {
    // 100/1.1 + 100/1.21 + 100/1.331 = 248.685...
    let input = NpvInput {
        loans: vec![loan("L3", "flat"), loan("L1", "flat"), loan("L2", "flat")],
        schedules: vec![schedule("flat", &[dec!(100), dec!(100), dec!(100)])],
        curve: YieldCurve::flat(as_of(), dec!(0.10)).unwrap(),
        interpolation: InterpolationPolicy::default(),
    };
    let out = calculate_portfolio_npv(&RunId::from("run-248"), &input).unwrap();
    let valuation = out.result;

    assert_eq!(valuation.results.len(), 3);
    assert!(valuation.failures.is_empty());
    let ids: Vec<&str> = valuation.results.iter().map(|r| r.loan_id.as_str()).collect();
    assert_eq!(ids, vec!["L1", "L2", "L3"]);
    for r in &valuation.results {
        assert!(
            (r.npv - dec!(248.69)).abs() < dec!(0.005),
            "Expected NPV ~248.69, got {}",
            r.npv
        );
    }
    assert!((valuation.total_npv - dec!(746.06)).abs() < dec!(0.01));
}

#[test]
fn test_zero_rate_npv_equals_undiscounted_sum() {
    let amounts = [dec!(120.50), dec!(0), dec!(-15.25), dec!(980.125)];
    let flows = schedule("s", &amounts);
    let curve = YieldCurve::flat(as_of(), Decimal::ZERO).unwrap();
    for ppy in [1, 4, 12] {
        for policy in [
            InterpolationPolicy::LogLinearDiscount,
            InterpolationPolicy::LinearZeroRate,
        ] {
            let dfc = DiscountFactorCurve::build(&curve, ppy, policy).unwrap();
            assert_eq!(present_value(&dfc, &flows).unwrap(), flows.total());
        }
    }
}

fn assert_non_increasing(curve: &YieldCurve, ppy: u32, periods: u32) {
    for policy in [
        InterpolationPolicy::LogLinearDiscount,
        InterpolationPolicy::LinearZeroRate,
    ] {
        let dfc = DiscountFactorCurve::build(curve, ppy, policy).unwrap();
        let mut previous = Decimal::ONE;
        for period in 1..=periods {
            let df = dfc.discount_factor(period).unwrap();
            assert!(
                df <= previous,
                "DF rose at period {period} under {policy:?} ({ppy}/yr): {previous} -> {df}"
            );
            previous = df;
        }
    }
}

#[test]
fn test_discount_factors_non_increasing_for_non_negative_rates() {
    let curve = YieldCurve::new(
        as_of(),
        vec![
            CurvePoint { tenor_years: dec!(0.25), rate: dec!(0.052) },
            CurvePoint { tenor_years: dec!(1), rate: dec!(0.048) },
            CurvePoint { tenor_years: dec!(2), rate: dec!(0.041) },
            CurvePoint { tenor_years: dec!(5), rate: dec!(0.038) },
            CurvePoint { tenor_years: dec!(10), rate: dec!(0.035) },
        ],
    )
    .unwrap();
    assert_non_increasing(&curve, 12, 150);
}

#[test]
fn test_discount_factors_non_increasing_on_steep_inversion() {
    let curve = YieldCurve::new(
        as_of(),
        vec![
            CurvePoint { tenor_years: dec!(1), rate: dec!(0.10) },
            CurvePoint { tenor_years: dec!(2), rate: dec!(0) },
        ],
    )
    .unwrap();
    assert_non_increasing(&curve, 4, 16);
    assert_non_increasing(&curve, 12, 48);

    let with_long_end = YieldCurve::new(
        as_of(),
        vec![
            CurvePoint { tenor_years: dec!(1), rate: dec!(0.12) },
            CurvePoint { tenor_years: dec!(3), rate: dec!(0.01) },
            CurvePoint { tenor_years: dec!(10), rate: dec!(0.02) },
        ],
    )
    .unwrap();
    assert_non_increasing(&with_long_end, 12, 150);
}

// ===========================================================================
// Error-series statistics
// ===========================================================================

#[test]
fn test_rmse_dominates_mae() {
    let errors = [12.0, -3.5, 0.0, 44.1, -19.9, 7.25];
    assert!(rmse(&errors).unwrap() > mae(&errors).unwrap());

    let same_magnitude = [5.0, -5.0, 5.0, -5.0];
    assert!((rmse(&same_magnitude).unwrap() - mae(&same_magnitude).unwrap()).abs() < 1e-12);
}

#[test]
fn test_identical_series_have_zero_error_and_ks() {
    let npvs = [248.69, 250.0, 1000.0, 12.5];
    let deltas: Vec<f64> = npvs.iter().map(|v| v - v).collect();
    assert_eq!(rmse(&deltas).unwrap(), 0.0);
    assert_eq!(mae(&deltas).unwrap(), 0.0);
    assert_eq!(kolmogorov_smirnov(&npvs, &npvs).unwrap().statistic, 0.0);
}
