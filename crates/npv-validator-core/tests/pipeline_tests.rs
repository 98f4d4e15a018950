use chrono::NaiveDate;
use npv_validator_core::audit::StageStatus;
use npv_validator_core::comparison::ChampionTable;
use npv_validator_core::config::ValidationConfig;
use npv_validator_core::datasets::Dataset;
use npv_validator_core::discounting::{CurvePoint, InterpolationPolicy, YieldCurve};
use npv_validator_core::governance::{
    evaluate_rules, Comparator, GovernanceConfig, MetricSet, RunStatus, Severity, ThresholdRule,
};
use npv_validator_core::stress::{
    run_stress_test, MonteCarloConfig, ScenarioDefinition, Shock, StressInput,
};
use npv_validator_core::types::{AmortizationType, LoanRecord, MacroObservation, RunId};
use npv_validator_core::validator::{ValidationInputs, Validator};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

fn ds(name: &str, columns: &[&str], rows: Vec<Vec<String>>) -> Dataset {
    Dataset::new(
        name,
        columns.iter().map(|c| c.to_string()).collect(),
        rows.into_iter()
            .map(|r| r.into_iter().map(Some).collect())
            .collect(),
    )
    .unwrap()
}

/// Twelve quarterly loans; realized flows run well below contract.
fn portfolio_inputs() -> ValidationInputs {
    let loan_rows = (1..=12)
        .map(|i| {
            vec![
                format!("LN{i:03}"),
                format!("{}", 100_000 + i * 5_000),
                "0.065".to_string(),
                "12".to_string(),
                "4".to_string(),
                "2021-01-01".to_string(),
                "level_payment".to_string(),
            ]
        })
        .collect();
    let realized_rows = (1..=12)
        .flat_map(|i| {
            (1..=8).map(move |p| {
                vec![
                    format!("LN{i:03}"),
                    p.to_string(),
                    format!("{}", 7_000 + i * 300),
                ]
            })
        })
        .collect();
    let curve_rows = ["2021-01-01", "2021-07-01", "2022-01-01"]
        .iter()
        .enumerate()
        .flat_map(|(k, date)| {
            [("0.25", 0.010), ("1", 0.015), ("5", 0.025)]
                .into_iter()
                .map(move |(tenor, rate)| {
                    vec![
                        date.to_string(),
                        tenor.to_string(),
                        format!("{:.4}", rate + k as f64 * 0.002),
                    ]
                })
        })
        .collect();

    ValidationInputs {
        loans: ds(
            "loans",
            &[
                "loan_id",
                "principal",
                "rate",
                "tenor_periods",
                "periods_per_year",
                "origination_date",
                "amortization",
            ],
            loan_rows,
        ),
        schedules: None,
        realized: ds("realized", &["loan_id", "period", "amount"], realized_rows),
        yield_curves: ds("yield_curves", &["date", "tenor", "rate"], curve_rows),
        macro_data: ds(
            "macro",
            &["date", "variable", "value"],
            vec![
                vec!["2021-03-31".into(), "unemployment".into(), "6.0".into()],
                vec!["2021-06-30".into(), "unemployment".into(), "5.9".into()],
            ],
        ),
        baselines: BTreeMap::new(),
    }
}

fn config_with_rules(rules: Vec<ThresholdRule>) -> ValidationConfig {
    ValidationConfig {
        scenarios: vec![ScenarioDefinition {
            name: "severe".into(),
            shocks: vec![
                Shock::ParallelShift { bp: dec!(200) },
                Shock::MacroHaircut {
                    variable: "unemployment".into(),
                    shock: dec!(3),
                    sensitivity: dec!(0.02),
                },
            ],
        }],
        monte_carlo: Some(MonteCarloConfig {
            draws: 50,
            mean_bp: 0.0,
            std_bp: 40.0,
        }),
        rules,
        ..Default::default()
    }
}

// ===========================================================================
// Governance
// ===========================================================================

#[test]
fn test_rmse_600_breaches_500_limit() {
    let mut metrics = MetricSet::new();
    metrics.insert("backtest.rmse", 600.0);
    let rules = vec![ThresholdRule {
        metric: "backtest.rmse".into(),
        comparator: Comparator::Le,
        limit: 500.0,
        severity: Severity::High,
    }];
    let outcome = evaluate_rules(
        &RunId::from("gov"),
        &rules,
        &metrics,
        &GovernanceConfig::default(),
    );
    assert_eq!(outcome.issues.len(), 1);
    assert_eq!(outcome.issues[0].severity, Severity::High);
    assert_eq!(outcome.issues[0].metric_value, 600.0);
    assert_eq!(outcome.status, RunStatus::FailedWithIssues);
}

#[test]
fn test_pipeline_breach_creates_single_issue() {
    let rules = vec![
        ThresholdRule {
            metric: "backtest.rmse".into(),
            comparator: Comparator::Le,
            limit: 500.0,
            severity: Severity::High,
        },
        ThresholdRule {
            metric: "npv.failures".into(),
            comparator: Comparator::Eq,
            limit: 0.0,
            severity: Severity::Critical,
        },
    ];
    let config = config_with_rules(rules);
    let report = Validator::new(&config).run_with_id(RunId::from("run-breach"), &portfolio_inputs());

    let rmse = report.metrics.get("backtest.rmse").unwrap();
    assert!(rmse > 500.0, "expected a large back-test error, got {rmse}");
    assert_eq!(report.status, RunStatus::FailedWithIssues);
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].metric, "backtest.rmse");
    assert_eq!(report.issues[0].severity, Severity::High);
    assert_eq!(report.status.exit_code(), 1);
}

// ===========================================================================
// End-to-end run
// ===========================================================================

#[test]
fn test_every_stage_audited_in_order() {
    let config = config_with_rules(vec![]);
    let report = Validator::new(&config).run_with_id(RunId::from("run-ok"), &portfolio_inputs());

    assert_eq!(report.status, RunStatus::Passed);
    let entries = report.audit.entries();
    assert_eq!(entries.len(), 7);
    for (i, e) in entries.iter().enumerate() {
        assert_eq!(e.sequence, i + 1);
        assert_eq!(e.run_id, RunId::from("run-ok"));
    }
    assert_eq!(entries[2].stage, "champion_comparison");
    assert_eq!(entries[2].status, StageStatus::Skipped);
    assert_eq!(report.valuation.as_ref().unwrap().results.len(), 12);
    assert_eq!(report.stress.as_ref().unwrap().scenarios.len(), 1);
    assert!(report.metrics.get("stress.severe.delta_npv").unwrap() < 0.0);
}

#[test]
fn test_same_seed_reproduces_numbers() {
    let mut champion = ChampionTable::new("production");
    for i in 1..=12 {
        champion.insert(&format!("LN{i:03}"), 0, Decimal::from(100_000 + i * 5_000));
    }
    let config = config_with_rules(vec![]);
    let validator = Validator::new(&config).with_champion(&champion);

    let a = validator.run(&portfolio_inputs());
    let b = validator.run(&portfolio_inputs());
    assert_ne!(a.run_id, b.run_id);

    let npvs = |r: &npv_validator_core::validator::ValidationReport| -> Vec<Decimal> {
        r.valuation.as_ref().unwrap().results.iter().map(|n| n.npv).collect()
    };
    assert_eq!(npvs(&a), npvs(&b));
    assert_eq!(a.metrics, b.metrics);

    let stats = |r: &npv_validator_core::validator::ValidationReport| -> Vec<(String, f64, Option<f64>)> {
        r.test_results
            .iter()
            .map(|t| (t.name.clone(), t.statistic, t.p_value))
            .collect()
    };
    assert_eq!(stats(&a), stats(&b));

    let contributions = |r: &npv_validator_core::validator::ValidationReport| -> Vec<Decimal> {
        r.stress.as_ref().unwrap().contributions().map(|c| c.delta_npv).collect()
    };
    assert_eq!(contributions(&a), contributions(&b));
    assert!(a.comparison.is_some());
}

#[test]
fn test_malformed_dataset_aborts_with_final_entry() {
    let mut inputs = portfolio_inputs();
    inputs.realized = ds("realized", &["loan_id", "amount"], vec![vec!["LN001".into(), "1".into()]]);
    let config = config_with_rules(vec![]);
    let report = Validator::new(&config).run_with_id(RunId::from("run-abort"), &inputs);

    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(report.status.exit_code(), 2);
    assert!(report.abort_reason.is_some());
    assert_eq!(report.audit.len(), 1);
    let last = report.audit.last().unwrap();
    assert_eq!(last.stage, "abort");
    assert_eq!(last.status, StageStatus::Fail);
}

#[test]
fn test_unknown_macro_variable_aborts() {
    let mut config = config_with_rules(vec![]);
    config.scenarios[0].shocks.push(Shock::MacroHaircut {
        variable: "house_prices".into(),
        shock: dec!(-0.1),
        sensitivity: dec!(0.5),
    });
    let report = Validator::new(&config).run(&portfolio_inputs());
    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(report.audit.last().unwrap().metrics["failed_stage"], "stress_test");
    // Stages before the failure keep their entries.
    assert_eq!(report.stages.len(), 4);
}

// ===========================================================================
// Stress
// ===========================================================================

fn stress_input(scenarios: Vec<ScenarioDefinition>) -> StressInput {
    let as_of = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    StressInput {
        loans: (1..=5)
            .map(|i| LoanRecord {
                loan_id: format!("S{i}"),
                principal: Decimal::from(50_000 * i),
                rate: dec!(0.08),
                tenor_periods: 36,
                periods_per_year: 12,
                origination_date: as_of,
                amortization: AmortizationType::LevelPayment,
                schedule_ref: None,
            })
            .collect(),
        schedules: vec![],
        curve: YieldCurve::new(
            as_of,
            vec![
                CurvePoint { tenor_years: dec!(0.5), rate: dec!(0.045) },
                CurvePoint { tenor_years: dec!(2), rate: dec!(0.04) },
                CurvePoint { tenor_years: dec!(5), rate: dec!(0.042) },
            ],
        )
        .unwrap(),
        macro_observations: vec![MacroObservation {
            date: as_of,
            variable: "gdp_growth".into(),
            value: dec!(1.8),
        }],
        scenarios,
        monte_carlo: Some(MonteCarloConfig {
            draws: 200,
            mean_bp: 10.0,
            std_bp: 30.0,
        }),
        interpolation: InterpolationPolicy::LogLinearDiscount,
        seed: 7,
    }
}

#[test]
fn test_waterfall_matches_simultaneous_shocks() {
    let shocks = vec![
        Shock::Steepener { short_bp: dec!(-25), long_bp: dec!(75) },
        Shock::CashFlowHaircut { pct: dec!(0.1) },
        Shock::RecoveryLag { periods: 2, from_period: 1 },
        Shock::MacroHaircut {
            variable: "gdp_growth".into(),
            shock: dec!(-2),
            sensitivity: dec!(-0.03),
        },
    ];
    let out = run_stress_test(
        &RunId::from("wf"),
        &stress_input(vec![ScenarioDefinition { name: "downturn".into(), shocks }]),
    )
    .unwrap();
    let scenario = &out.result.scenarios[0];
    let steps: Vec<usize> = scenario.contributions.iter().map(|c| c.step).collect();
    assert_eq!(steps, vec![1, 2, 3, 4]);
    let total: Decimal = scenario.contributions.iter().map(|c| c.delta_npv).sum();
    assert_eq!(total, scenario.delta_npv);
    assert_eq!(scenario.stressed_npv - scenario.baseline_npv, scenario.delta_npv);
}

#[test]
fn test_monte_carlo_reproducible_under_seed() {
    let scenario = ScenarioDefinition {
        name: "up".into(),
        shocks: vec![Shock::ParallelShift { bp: dec!(50) }],
    };
    let a = run_stress_test(&RunId::from("mc-a"), &stress_input(vec![scenario.clone()])).unwrap();
    let b = run_stress_test(&RunId::from("mc-b"), &stress_input(vec![scenario])).unwrap();
    let (ma, mb) = (
        a.result.monte_carlo.unwrap(),
        b.result.monte_carlo.unwrap(),
    );
    assert_eq!(ma.draws, 200);
    assert_eq!((ma.mean, ma.p5, ma.p50, ma.p95, ma.worst), (mb.mean, mb.p5, mb.p50, mb.p95, mb.worst));
    assert!(ma.p5 <= ma.p50 && ma.p50 <= ma.p95);
}
