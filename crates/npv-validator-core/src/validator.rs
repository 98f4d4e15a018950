//! Validation run orchestration.
//!
//! A run is a fixed sequence of named stages over a [`RunContext`]. Every
//! stage that completes appends exactly one audit entry. A stage error
//! aborts the run: the failing stage gets no entry of its own and a final
//! `abort` entry records the cause instead.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{error, info, warn};

use crate::audit::{AuditLog, StageStatus};
use crate::backtest::{run_backtest, BacktestResult};
use crate::comparison::{compare_with_champion, ChampionModel, ComparisonSummary};
use crate::config::ValidationConfig;
use crate::data_quality::{check_dataset, DataQualityReport};
use crate::datasets::{
    parse_loans, parse_macro, parse_realized, parse_schedules, parse_yield_curves, Dataset,
    RejectedRow,
};
use crate::discounting::YieldCurve;
use crate::error::NpvValidatorError;
use crate::governance::{evaluate_rules, GovernanceOutcome, Issue, MetricSet, RunStatus};
use crate::npv_engine::{resolve_schedules, value_portfolio, PortfolioValuation};
use crate::statistics::{
    decimal_series, diebold_mariano, kolmogorov_smirnov, mae, rmse, StatisticalTestResult,
    TestKind,
};
use crate::stress::{check_macro_references, StressEngine, StressResult};
use crate::types::{CashFlowSchedule, LoanRecord, MacroObservation, RealizedCashFlow, RunId};
use crate::NpvValidatorResult;

// ---------------------------------------------------------------------------
// Inputs and run state
// ---------------------------------------------------------------------------

/// Raw tabular inputs for one run.
#[derive(Debug, Clone)]
pub struct ValidationInputs {
    pub loans: Dataset,
    /// Explicit schedules keyed by `schedule_ref`
    pub schedules: Option<Dataset>,
    pub realized: Dataset,
    pub yield_curves: Dataset,
    pub macro_data: Dataset,
    /// Drift reference per dataset name
    pub baselines: BTreeMap<String, Dataset>,
}

/// Run-scoped mutable state, threaded through every stage.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub seed: u64,
    pub status: RunStatus,
    pub completed_stages: Vec<String>,
    pub audit: AuditLog,
    pub issues: Vec<Issue>,
    pub metrics: MetricSet,
}

impl RunContext {
    pub fn new(run_id: RunId, seed: u64) -> Self {
        Self {
            audit: AuditLog::new(run_id.clone()),
            run_id,
            seed,
            status: RunStatus::Pending,
            completed_stages: Vec::new(),
            issues: Vec::new(),
            metrics: MetricSet::new(),
        }
    }
}

/// Typed inputs established by the data quality stage.
#[derive(Debug, Clone, Default)]
struct TypedInputs {
    loans: Vec<LoanRecord>,
    explicit_schedules: BTreeMap<String, CashFlowSchedule>,
    realized: Vec<RealizedCashFlow>,
    curves: Vec<YieldCurve>,
    macro_observations: Vec<MacroObservation>,
    baseline_curve: Option<YieldCurve>,
}

/// What each stage hands to the audit wrapper.
struct StageReport {
    status: StageStatus,
    metrics: Vec<(String, f64)>,
    details: BTreeMap<String, Value>,
    notes: Vec<String>,
}

impl StageReport {
    fn new(status: StageStatus) -> Self {
        Self {
            status,
            metrics: Vec::new(),
            details: BTreeMap::new(),
            notes: Vec::new(),
        }
    }

    fn skipped(note: impl Into<String>) -> Self {
        let mut report = Self::new(StageStatus::Skipped);
        report.notes.push(note.into());
        report
    }
}

/// Complete outcome of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub run_id: RunId,
    pub seed: u64,
    pub status: RunStatus,
    pub stages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub data_quality: Vec<DataQualityReport>,
    pub valuation: Option<PortfolioValuation>,
    pub comparison: Option<ComparisonSummary>,
    pub backtest: Option<BacktestResult>,
    pub test_results: Vec<StatisticalTestResult>,
    pub stress: Option<StressResult>,
    pub governance: Option<GovernanceOutcome>,
    pub metrics: MetricSet,
    pub issues: Vec<Issue>,
    pub audit: AuditLog,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

struct Pipeline<'a> {
    config: &'a ValidationConfig,
    inputs: &'a ValidationInputs,
    champion: Option<&'a dyn ChampionModel>,
    ctx: RunContext,
    typed: TypedInputs,
    schedules: BTreeMap<String, CashFlowSchedule>,
    data_quality: Vec<DataQualityReport>,
    valuation: Option<PortfolioValuation>,
    comparison: Option<ComparisonSummary>,
    backtest: Option<BacktestResult>,
    test_results: Vec<StatisticalTestResult>,
    stress: Option<StressResult>,
    governance: Option<GovernanceOutcome>,
}

type StageFn = fn(&mut Pipeline<'_>) -> NpvValidatorResult<StageReport>;

const STAGES: &[(&str, StageFn)] = &[
    ("data_quality", stage_data_quality),
    ("challenger_npv", stage_challenger_npv),
    ("champion_comparison", stage_champion_comparison),
    ("backtest", stage_backtest),
    ("stress_test", stage_stress_test),
    ("statistical_tests", stage_statistical_tests),
    ("governance", stage_governance),
];

pub struct Validator<'a> {
    config: &'a ValidationConfig,
    champion: Option<&'a dyn ChampionModel>,
}

impl<'a> Validator<'a> {
    pub fn new(config: &'a ValidationConfig) -> Self {
        Self {
            config,
            champion: None,
        }
    }

    pub fn with_champion(mut self, champion: &'a dyn ChampionModel) -> Self {
        self.champion = Some(champion);
        self
    }

    pub fn run(&self, inputs: &ValidationInputs) -> ValidationReport {
        self.run_with_id(RunId::generate(), inputs)
    }

    /// Report for a run that failed before its first stage, e.g. while
    /// loading inputs (`"load"`) or parsing configuration (`"configuration"`).
    pub fn abort_unloaded(
        &self,
        run_id: RunId,
        stage: &str,
        cause: &NpvValidatorError,
    ) -> ValidationReport {
        let mut ctx = RunContext::new(run_id, self.config.seed);
        record_abort(&mut ctx, stage, cause);
        ValidationReport {
            run_id: ctx.run_id,
            seed: ctx.seed,
            status: ctx.status,
            stages: ctx.completed_stages,
            abort_reason: Some(cause.to_string()),
            data_quality: Vec::new(),
            valuation: None,
            comparison: None,
            backtest: None,
            test_results: Vec::new(),
            stress: None,
            governance: None,
            metrics: ctx.metrics,
            issues: ctx.issues,
            audit: ctx.audit,
        }
    }

    /// Execute every stage. Always returns a report in a terminal status.
    pub fn run_with_id(&self, run_id: RunId, inputs: &ValidationInputs) -> ValidationReport {
        let mut p = Pipeline {
            config: self.config,
            inputs,
            champion: self.champion,
            ctx: RunContext::new(run_id, self.config.seed),
            typed: TypedInputs::default(),
            schedules: BTreeMap::new(),
            data_quality: Vec::new(),
            valuation: None,
            comparison: None,
            backtest: None,
            test_results: Vec::new(),
            stress: None,
            governance: None,
        };
        info!(run_id = %p.ctx.run_id, seed = p.ctx.seed, "validation run started");

        if let Err(e) = self.config.validate() {
            return p.abort("configuration", &e);
        }
        if let Err(e) = p.ctx.status.transition(RunStatus::Running) {
            return p.abort("configuration", &e);
        }

        for (name, stage) in STAGES {
            info!(run_id = %p.ctx.run_id, stage = *name, "stage started");
            match stage(&mut p) {
                Ok(report) => p.record(name, report),
                Err(e) => return p.abort(name, &e),
            }
        }

        let outcome = p
            .governance
            .as_ref()
            .map_or(RunStatus::Passed, |g| g.status);
        if let Err(e) = p.ctx.status.transition(outcome) {
            return p.abort("finalize", &e);
        }
        info!(
            run_id = %p.ctx.run_id,
            status = %p.ctx.status,
            issues = p.ctx.issues.len(),
            "validation run finished"
        );
        p.into_report(None)
    }
}

fn record_abort(ctx: &mut RunContext, stage: &str, cause: &NpvValidatorError) {
    error!(run_id = %ctx.run_id, stage, error = %cause, "validation run aborted");
    let details = BTreeMap::from([
        ("failed_stage".to_string(), json!(stage)),
        ("error".to_string(), json!(cause.to_string())),
        ("fatal".to_string(), json!(cause.is_fatal())),
    ]);
    ctx.audit
        .append("abort", StageStatus::Fail, details, vec![cause.to_string()]);
    if let Err(e) = ctx.status.transition(RunStatus::Aborted) {
        warn!(error = %e, "run already terminal when aborting");
    }
}

impl Pipeline<'_> {
    fn record(&mut self, stage: &str, report: StageReport) {
        let mut audit_metrics: BTreeMap<String, Value> = report.details;
        for (key, value) in report.metrics {
            audit_metrics.insert(key.clone(), Value::from(value));
            self.ctx.metrics.insert(key, value);
        }
        self.ctx
            .audit
            .append(stage, report.status, audit_metrics, report.notes);
        self.ctx.completed_stages.push(stage.to_string());
    }

    fn abort(mut self, stage: &str, cause: &NpvValidatorError) -> ValidationReport {
        record_abort(&mut self.ctx, stage, cause);
        self.into_report(Some(cause.to_string()))
    }

    fn into_report(self, abort_reason: Option<String>) -> ValidationReport {
        ValidationReport {
            run_id: self.ctx.run_id,
            seed: self.ctx.seed,
            status: self.ctx.status,
            stages: self.ctx.completed_stages,
            abort_reason,
            data_quality: self.data_quality,
            valuation: self.valuation,
            comparison: self.comparison,
            backtest: self.backtest,
            test_results: self.test_results,
            stress: self.stress,
            governance: self.governance,
            metrics: self.ctx.metrics,
            issues: self.ctx.issues,
            audit: self.ctx.audit,
        }
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

fn select_baseline_curve(
    curves: &[YieldCurve],
    valuation_date: Option<NaiveDate>,
) -> NpvValidatorResult<YieldCurve> {
    curves
        .iter()
        .filter(|c| valuation_date.map_or(true, |d| c.as_of <= d))
        .max_by_key(|c| c.as_of)
        .cloned()
        .ok_or_else(|| {
            let when = valuation_date.map_or("any date".to_string(), |d| d.to_string());
            NpvValidatorError::data_integrity(
                "yield_curves",
                format!("no curve snapshot on or before {when}"),
            )
        })
}

fn stage_data_quality(p: &mut Pipeline<'_>) -> NpvValidatorResult<StageReport> {
    let inputs = p.inputs;
    let loans = parse_loans(&inputs.loans)?;
    let realized = parse_realized(&inputs.realized)?;
    let curves = parse_yield_curves(&inputs.yield_curves)?;
    let macro_obs = parse_macro(&inputs.macro_data)?;
    let schedules = inputs.schedules.as_ref().map(parse_schedules).transpose()?;

    let mut checks: Vec<(&Dataset, &[RejectedRow])> = vec![
        (&inputs.loans, loans.rejected.as_slice()),
        (&inputs.realized, realized.rejected.as_slice()),
        (&inputs.yield_curves, curves.rejected.as_slice()),
        (&inputs.macro_data, macro_obs.rejected.as_slice()),
    ];
    if let (Some(ds), Some(parsed)) = (&inputs.schedules, &schedules) {
        checks.push((ds, parsed.rejected.as_slice()));
    }

    let mut report = StageReport::new(StageStatus::Pass);
    let mut violating = BTreeSet::new();
    for (ds, rejected) in checks {
        let dq = check_dataset(
            ds,
            inputs.baselines.get(&ds.name),
            rejected,
            &p.config.data_quality,
        )?;
        for v in &dq.violations {
            violating.insert(format!("{}.{}", dq.dataset, v.column));
        }
        report.notes.extend(
            dq.drift_skipped
                .iter()
                .map(|reason| format!("{}: drift skipped, {reason}", dq.dataset)),
        );
        report.metrics.extend(dq.metrics());
        if !dq.passed {
            report.status = StageStatus::Fail;
        }
        p.data_quality.push(dq);
    }
    report.details.insert("violating_fields".into(), json!(violating));

    if loans.records.is_empty() {
        return Err(NpvValidatorError::data_integrity(
            inputs.loans.name.clone(),
            "no usable loan records",
        ));
    }
    let baseline_curve = select_baseline_curve(&curves.records, p.config.valuation_date)?;
    report
        .details
        .insert("baseline_curve".into(), json!(baseline_curve.as_of.to_string()));

    p.typed = TypedInputs {
        loans: loans.records,
        explicit_schedules: schedules.map(|s| s.records).unwrap_or_default(),
        realized: realized.records,
        curves: curves.records,
        macro_observations: macro_obs.records,
        baseline_curve: Some(baseline_curve),
    };
    Ok(report)
}

fn baseline_curve<'p>(p: &'p Pipeline<'_>) -> NpvValidatorResult<&'p YieldCurve> {
    p.typed.baseline_curve.as_ref().ok_or_else(|| {
        NpvValidatorError::data_integrity("yield_curves", "baseline curve not established")
    })
}

fn stage_challenger_npv(p: &mut Pipeline<'_>) -> NpvValidatorResult<StageReport> {
    p.schedules = resolve_schedules(&p.typed.loans, &p.typed.explicit_schedules)?;
    let curve = baseline_curve(p)?;
    let valuation = value_portfolio(
        &p.ctx.run_id,
        &p.typed.loans,
        &p.schedules,
        curve,
        p.config.curve.interpolation,
    )?;

    let status = if valuation.failures.is_empty() {
        StageStatus::Pass
    } else {
        StageStatus::Fail
    };
    let mut report = StageReport::new(status);
    report.metrics = vec![
        ("npv.loans_valued".into(), valuation.results.len() as f64),
        ("npv.failures".into(), valuation.failures.len() as f64),
        (
            "npv.total".into(),
            valuation.total_npv.to_f64().unwrap_or(f64::NAN),
        ),
    ];
    report.notes = valuation
        .failures
        .iter()
        .map(|f| format!("{}: {}", f.loan_id, f.reason))
        .collect();
    p.valuation = Some(valuation);
    Ok(report)
}

fn stage_champion_comparison(p: &mut Pipeline<'_>) -> NpvValidatorResult<StageReport> {
    let Some(champion) = p.champion else {
        return Ok(StageReport::skipped("no champion model supplied"));
    };
    let Some(valuation) = p.valuation.as_ref() else {
        return Ok(StageReport::skipped("no challenger valuation"));
    };
    let summary = compare_with_champion(
        &p.ctx.run_id,
        champion,
        &p.typed.loans,
        &p.schedules,
        baseline_curve(p)?,
        valuation,
    )?;
    let mut report = StageReport::new(if summary.failures.is_empty() {
        StageStatus::Pass
    } else {
        StageStatus::Fail
    });
    report.metrics = summary.metrics();
    report.details.insert("champion".into(), json!(summary.champion));
    p.comparison = Some(summary);
    Ok(report)
}

fn stage_backtest(p: &mut Pipeline<'_>) -> NpvValidatorResult<StageReport> {
    if p.typed.realized.is_empty() {
        return Ok(StageReport::skipped("no realized cash flows"));
    }
    let result = run_backtest(
        &p.ctx.run_id,
        &p.typed.loans,
        &p.schedules,
        &p.typed.realized,
        &p.typed.curves,
        p.config.curve.interpolation,
        p.champion,
    )?;
    let mut report = StageReport::new(if result.failures.is_empty() {
        StageStatus::Pass
    } else {
        StageStatus::Fail
    });
    report.metrics = result.metrics();
    report.notes = result
        .failures
        .iter()
        .map(|f| format!("{} period {}: {}", f.loan_id, f.period, f.reason))
        .collect();
    p.backtest = Some(result);
    Ok(report)
}

fn stage_stress_test(p: &mut Pipeline<'_>) -> NpvValidatorResult<StageReport> {
    let config = p.config;
    if config.scenarios.is_empty() && config.monte_carlo.is_none() {
        return Ok(StageReport::skipped("no scenarios configured"));
    }
    check_macro_references(&config.scenarios, &p.typed.macro_observations)?;
    let engine = StressEngine {
        run_id: &p.ctx.run_id,
        loans: &p.typed.loans,
        schedules: &p.schedules,
        curve: baseline_curve(p)?,
        policy: config.curve.interpolation,
    };
    let result = engine.run(&config.scenarios, config.monte_carlo.as_ref(), p.ctx.seed)?;

    let mut report = StageReport::new(if result.failed.is_empty() {
        StageStatus::Pass
    } else {
        StageStatus::Fail
    });
    report.metrics = result.metrics();
    report.notes = result
        .failed
        .iter()
        .map(|f| format!("scenario {}: {}", f.name, f.reason))
        .collect();
    p.stress = Some(result);
    Ok(report)
}

/// Record a test, or note it as skipped when there is not enough data.
fn collect_test(
    outcome: NpvValidatorResult<StatisticalTestResult>,
    name: &str,
    results: &mut Vec<StatisticalTestResult>,
    skipped: &mut Vec<String>,
) -> NpvValidatorResult<()> {
    match outcome {
        Ok(r) => results.push(r),
        Err(NpvValidatorError::InsufficientData(reason)) => {
            warn!(test = name, %reason, "statistical test skipped");
            skipped.push(format!("{name}: {reason}"));
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

fn stage_statistical_tests(p: &mut Pipeline<'_>) -> NpvValidatorResult<StageReport> {
    let run_id = &p.ctx.run_id;
    let alpha = p.config.significance_level;
    let mut results = Vec::new();
    let mut skipped = Vec::new();

    let descriptive = |name: &str, test: TestKind, series: &[f64]| {
        let value = match test {
            TestKind::Mae => mae(series),
            _ => rmse(series),
        };
        value.map(|v| StatisticalTestResult::descriptive(run_id, name, test, v, series.len(), alpha))
    };

    if let Some(bt) = &p.backtest {
        let deltas = decimal_series(&bt.delta_series())?;
        for (name, test) in [("backtest.rmse", TestKind::Rmse), ("backtest.mae", TestKind::Mae)] {
            collect_test(descriptive(name, test, &deltas[..]), name, &mut results, &mut skipped)?;
        }

        let predicted = decimal_series(&bt.predicted_series())?;
        let realized = decimal_series(&bt.realized_series())?;
        let ks = kolmogorov_smirnov(&predicted, &realized)
            .map(|o| StatisticalTestResult::from_kolmogorov_smirnov(run_id, "backtest.ks", &o, alpha));
        collect_test(ks, "backtest.ks", &mut results, &mut skipped)?;

        if p.champion.is_some() {
            let challenger: Vec<_> = bt.period_errors.iter().map(|e| e.challenger_error).collect();
            let champion: Vec<_> = bt.period_errors.iter().map(|e| e.champion_error).collect();
            let dm = diebold_mariano(
                &decimal_series(&challenger)?,
                &decimal_series(&champion)?,
                &p.config.statistics,
            )
            .map(|o| StatisticalTestResult::from_diebold_mariano(run_id, "backtest.dm", &o, alpha));
            collect_test(dm, "backtest.dm", &mut results, &mut skipped)?;
        }
    }

    if let Some(cmp) = &p.comparison {
        let deltas = decimal_series(&cmp.deltas())?;
        for (name, test) in [("comparison.rmse", TestKind::Rmse), ("comparison.mae", TestKind::Mae)] {
            collect_test(descriptive(name, test, &deltas[..]), name, &mut results, &mut skipped)?;
        }
        let ks = kolmogorov_smirnov(
            &decimal_series(&cmp.challenger_npvs())?,
            &decimal_series(&cmp.champion_npvs())?,
        )
        .map(|o| StatisticalTestResult::from_kolmogorov_smirnov(run_id, "comparison.ks", &o, alpha));
        collect_test(ks, "comparison.ks", &mut results, &mut skipped)?;
    }

    let mut report = if results.is_empty() {
        StageReport::new(StageStatus::Skipped)
    } else if results.iter().any(|r| r.passed == Some(false)) {
        StageReport::new(StageStatus::Fail)
    } else {
        StageReport::new(StageStatus::Pass)
    };
    for r in &results {
        match r.test {
            TestKind::Rmse | TestKind::Mae => report.metrics.push((r.name.clone(), r.statistic)),
            TestKind::DieboldMariano | TestKind::KolmogorovSmirnov => {
                report.metrics.push((format!("{}.statistic", r.name), r.statistic));
                if let Some(pv) = r.p_value {
                    report.metrics.push((format!("{}.p_value", r.name), pv));
                }
            }
        }
    }
    report.details.insert("significance_level".into(), json!(alpha));
    report.notes = skipped;
    p.test_results = results;
    Ok(report)
}

fn stage_governance(p: &mut Pipeline<'_>) -> NpvValidatorResult<StageReport> {
    let outcome = evaluate_rules(
        &p.ctx.run_id,
        &p.config.rules,
        &p.ctx.metrics,
        &p.config.governance,
    );
    let mut report = StageReport::new(if outcome.issues.is_empty() {
        StageStatus::Pass
    } else {
        StageStatus::Fail
    });
    let unevaluated: Vec<&str> = outcome.unevaluated().map(|e| e.rule.as_str()).collect();
    report.metrics = vec![
        ("governance.rules".into(), p.config.rules.len() as f64),
        ("governance.issues".into(), outcome.issues.len() as f64),
    ];
    report.details.insert("unevaluated_rules".into(), json!(unevaluated));
    report
        .details
        .insert("outcome".into(), json!(outcome.status.to_string()));
    report.notes = outcome
        .issues
        .iter()
        .map(|i| format!("{} breached ({}): {}", i.rule, i.severity, i.metric_value))
        .collect();
    p.ctx.issues.extend(outcome.issues.iter().cloned());
    p.governance = Some(outcome);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparison::ChampionTable;
    use crate::governance::{Comparator, Severity, ThresholdRule};

    fn ds(name: &str, columns: &[&str], rows: &[&[&str]]) -> Dataset {
        Dataset::new(
            name,
            columns.iter().map(|c| c.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|v| Some(v.to_string())).collect())
                .collect(),
        )
        .unwrap()
    }

    fn inputs() -> ValidationInputs {
        ValidationInputs {
            loans: ds(
                "loans",
                &["loan_id", "principal", "rate", "tenor_periods", "periods_per_year", "origination_date", "amortization"],
                &[
                    &["L1", "1000", "0.06", "4", "1", "2020-01-01", "level_payment"],
                    &["L2", "2000", "0.05", "4", "1", "2020-01-01", "bullet"],
                ],
            ),
            schedules: None,
            realized: ds(
                "realized",
                &["loan_id", "period", "amount"],
                &[&["L1", "1", "288.59"], &["L1", "2", "250"], &["L2", "1", "100"]],
            ),
            yield_curves: ds(
                "yield_curves",
                &["date", "tenor", "rate"],
                &[&["2020-01-01", "1", "0.03"], &["2020-01-01", "5", "0.04"]],
            ),
            macro_data: ds("macro", &["date", "variable", "value"], &[&["2020-03-31", "unemployment", "4.1"]]),
            baselines: BTreeMap::new(),
        }
    }

    #[test]
    fn test_run_passes_and_audits_every_stage() {
        let config = ValidationConfig::default();
        let report = Validator::new(&config).run_with_id(RunId::from("r1"), &inputs());
        assert_eq!(report.status, RunStatus::Passed);
        assert_eq!(report.stages.len(), STAGES.len());
        let stages: Vec<&str> = report.audit.entries().iter().map(|e| e.stage.as_str()).collect();
        assert_eq!(
            stages,
            vec!["data_quality", "challenger_npv", "champion_comparison", "backtest", "stress_test", "statistical_tests", "governance"]
        );
        assert_eq!(report.audit.entries()[2].status, StageStatus::Skipped);
        assert!(report.metrics.get("backtest.rmse").is_some());
    }

    #[test]
    fn test_structural_failure_aborts() {
        let mut bad = inputs();
        bad.loans = ds("loans", &["loan_id"], &[&["L1"]]);
        let config = ValidationConfig::default();
        let report = Validator::new(&config).run_with_id(RunId::from("r2"), &bad);
        assert_eq!(report.status, RunStatus::Aborted);
        assert!(report.stages.is_empty());
        let last = report.audit.last().unwrap();
        assert_eq!(last.stage, "abort");
        assert_eq!(last.metrics["failed_stage"], "data_quality");
    }

    #[test]
    fn test_unloaded_inputs_abort() {
        let config = ValidationConfig::default();
        let cause = NpvValidatorError::data_integrity("realized", "file not found");
        let report = Validator::new(&config).abort_unloaded(RunId::from("r5"), "load", &cause);
        assert_eq!(report.status, RunStatus::Aborted);
        assert_eq!(report.audit.len(), 1);
        assert_eq!(report.audit.entries()[0].metrics["failed_stage"], "load");
    }

    #[test]
    fn test_invalid_config_aborts_from_pending() {
        let config = ValidationConfig {
            significance_level: 0.0,
            ..Default::default()
        };
        let report = Validator::new(&config).run(&inputs());
        assert_eq!(report.status, RunStatus::Aborted);
        assert_eq!(report.audit.len(), 1);
    }

    #[test]
    fn test_breach_fails_run_with_issue() {
        let config = ValidationConfig {
            rules: vec![ThresholdRule {
                metric: "npv.loans_valued".into(),
                comparator: Comparator::Ge,
                limit: 3.0,
                severity: Severity::Medium,
            }],
            ..Default::default()
        };
        let report = Validator::new(&config).run_with_id(RunId::from("r3"), &inputs());
        assert_eq!(report.status, RunStatus::FailedWithIssues);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].run_id, RunId::from("r3"));
    }

    #[test]
    fn test_champion_comparison_runs_when_supplied() {
        let mut table = ChampionTable::new("prod");
        table.insert("L1", 0, rust_decimal_macros::dec!(1000));
        let config = ValidationConfig::default();
        let report = Validator::new(&config)
            .with_champion(&table)
            .run_with_id(RunId::from("r4"), &inputs());
        let cmp = report.comparison.unwrap();
        assert_eq!(cmp.comparisons.len(), 1);
        assert_eq!(cmp.failures.len(), 1);
        assert!(report.metrics.get("comparison.max_abs_diff").is_some());
    }
}
