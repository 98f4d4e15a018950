//! Stress testing with waterfall attribution.
//!
//! A scenario is an ordered list of shocks. Shock `k` is credited with
//! `NPV(shocks 1..=k) − NPV(shocks 1..k)`, so contributions depend on the
//! configured order and always sum to the scenario's total ΔNPV.

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::discounting::{CurvePoint, InterpolationPolicy, YieldCurve};
use crate::error::NpvValidatorError;
use crate::npv_engine::{resolve_schedules, value_portfolio};
use crate::parallel::map_items;
use crate::types::{
    with_metadata, CashFlowSchedule, ComputationOutput, LoanRecord, MacroObservation, Money, Rate,
    RunId, ScheduledCashFlow,
};
use crate::NpvValidatorResult;

const BP: Decimal = dec!(0.0001);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A single transform of the baseline curve or cash flows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum Shock {
    ParallelShift {
        bp: Decimal,
    },
    /// Shift moves linearly from `short_bp` at t = 0 to `long_bp` at the
    /// last tenor, flat beyond.
    Steepener {
        short_bp: Decimal,
        long_bp: Decimal,
    },
    KeyRate {
        tenor_years: Decimal,
        bp: Decimal,
    },
    CashFlowHaircut {
        pct: Decimal,
    },
    RecoveryLag {
        periods: u32,
        #[serde(default = "default_from_period")]
        from_period: u32,
    },
    MacroHaircut {
        variable: String,
        shock: Decimal,
        sensitivity: Decimal,
    },
}

fn default_from_period() -> u32 {
    1
}

impl Shock {
    pub fn label(&self) -> String {
        match self {
            Shock::ParallelShift { bp } => format!("parallel_shift({bp:+}bp)"),
            Shock::Steepener { short_bp, long_bp } => {
                format!("steepener({short_bp:+}bp/{long_bp:+}bp)")
            }
            Shock::KeyRate { tenor_years, bp } => format!("key_rate({tenor_years}y {bp:+}bp)"),
            Shock::CashFlowHaircut { pct } => format!("cash_flow_haircut({pct})"),
            Shock::RecoveryLag {
                periods,
                from_period,
            } => format!("recovery_lag(+{periods} from {from_period})"),
            Shock::MacroHaircut {
                variable,
                shock,
                sensitivity,
            } => format!("macro_haircut({variable} {shock:+} x {sensitivity})"),
        }
    }

    fn is_curve_shock(&self) -> bool {
        matches!(
            self,
            Shock::ParallelShift { .. } | Shock::Steepener { .. } | Shock::KeyRate { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioDefinition {
    pub name: String,
    /// Applied in this order
    pub shocks: Vec<Shock>,
}

/// Portfolio ΔNPV credited to one shock of a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShockContribution {
    pub run_id: RunId,
    pub scenario: String,
    /// 1-based position in the scenario's shock order
    pub step: usize,
    pub shock: String,
    pub delta_npv: Money,
}

/// Per-loan counterpart of [`ShockContribution`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanShockContribution {
    pub run_id: RunId,
    pub scenario: String,
    pub loan_id: String,
    pub step: usize,
    pub delta_npv: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub baseline_npv: Money,
    pub stressed_npv: Money,
    pub delta_npv: Money,
    /// ΔNPV as a percentage of baseline; absent for a zero baseline
    pub delta_npv_pct: Option<Decimal>,
    pub contributions: Vec<ShockContribution>,
    pub loan_contributions: Vec<LoanShockContribution>,
    /// Loans not valued at some step, left out of every total
    pub excluded_loans: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioFailure {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonteCarloConfig {
    pub draws: usize,
    #[serde(default)]
    pub mean_bp: f64,
    pub std_bp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloSummary {
    pub draws: usize,
    pub failed_draws: usize,
    pub mean: Money,
    pub p5: Money,
    pub p50: Money,
    pub p95: Money,
    /// Most negative portfolio ΔNPV
    pub worst: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressResult {
    pub baseline_npv: Money,
    /// In configured order
    pub scenarios: Vec<ScenarioResult>,
    pub failed: Vec<ScenarioFailure>,
    pub monte_carlo: Option<MonteCarloSummary>,
}

impl StressResult {
    pub fn contributions(&self) -> impl Iterator<Item = &ShockContribution> {
        self.scenarios.iter().flat_map(|s| s.contributions.iter())
    }

    pub fn metrics(&self) -> Vec<(String, f64)> {
        let f = |d: Decimal| d.to_f64().unwrap_or(f64::NAN);
        let mut out = Vec::new();
        for s in &self.scenarios {
            out.push((format!("stress.{}.delta_npv", s.name), f(s.delta_npv)));
            if let Some(pct) = s.delta_npv_pct {
                out.push((format!("stress.{}.delta_npv_pct", s.name), f(pct)));
            }
        }
        out.push(("stress.failed_scenarios".to_string(), self.failed.len() as f64));
        if let Some(mc) = &self.monte_carlo {
            out.push(("stress.monte_carlo.mean".to_string(), f(mc.mean)));
            out.push(("stress.monte_carlo.p5".to_string(), f(mc.p5)));
            out.push(("stress.monte_carlo.p50".to_string(), f(mc.p50)));
            out.push(("stress.monte_carlo.p95".to_string(), f(mc.p95)));
            out.push(("stress.monte_carlo.worst".to_string(), f(mc.worst)));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Shock application
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ShockedInputs {
    curve: YieldCurve,
    schedules: BTreeMap<String, CashFlowSchedule>,
}

/// Linear in rate between points, flat outside.
fn interpolate_rate(points: &[CurvePoint], t: Decimal) -> Rate {
    let Some(first) = points.first() else {
        return Decimal::ZERO;
    };
    if t <= first.tenor_years {
        return first.rate;
    }
    for w in points.windows(2) {
        if t <= w[1].tenor_years {
            let weight = (t - w[0].tenor_years) / (w[1].tenor_years - w[0].tenor_years);
            return w[0].rate + weight * (w[1].rate - w[0].rate);
        }
    }
    points.last().map_or(first.rate, |p| p.rate)
}

/// Bump only the key node; interpolation spreads the bump to the
/// neighbouring tenors, giving a triangular profile.
fn key_rate_bump(curve: &YieldCurve, key: Decimal, shift: Decimal) -> NpvValidatorResult<YieldCurve> {
    let mut points = curve.points().to_vec();
    if !points.iter().any(|p| p.tenor_years == key) {
        points.push(CurvePoint {
            tenor_years: key,
            rate: interpolate_rate(curve.points(), key),
        });
    }
    for p in points.iter_mut().filter(|p| p.tenor_years == key) {
        p.rate += shift;
    }
    YieldCurve::new(curve.as_of, points)
}

fn haircut(
    schedules: &BTreeMap<String, CashFlowSchedule>,
    pct: Decimal,
) -> NpvValidatorResult<BTreeMap<String, CashFlowSchedule>> {
    if pct < Decimal::ZERO || pct > Decimal::ONE {
        return Err(NpvValidatorError::invalid_input(
            "haircut",
            format!("haircut {pct} must lie in [0, 1]"),
        ));
    }
    let keep = Decimal::ONE - pct;
    schedules
        .iter()
        .map(|(id, s)| {
            let mapped = s.map_flows(|cf| {
                Ok(ScheduledCashFlow {
                    period: cf.period,
                    amount: cf.amount * keep,
                })
            })?;
            Ok((id.clone(), mapped))
        })
        .collect()
}

fn apply_shock(state: &ShockedInputs, shock: &Shock) -> NpvValidatorResult<ShockedInputs> {
    let curve = match shock {
        Shock::ParallelShift { bp } => state.curve.map_rates(|p| p.rate + bp * BP)?,
        Shock::Steepener { short_bp, long_bp } => {
            let last = state.curve.max_tenor();
            state.curve.map_rates(|p| {
                let w = (p.tenor_years / last).min(Decimal::ONE);
                p.rate + (short_bp + (long_bp - short_bp) * w) * BP
            })?
        }
        Shock::KeyRate { tenor_years, bp } => {
            if *tenor_years <= Decimal::ZERO {
                return Err(NpvValidatorError::invalid_input(
                    "key_rate.tenor_years",
                    "must be positive",
                ));
            }
            key_rate_bump(&state.curve, *tenor_years, bp * BP)?
        }
        _ => state.curve.clone(),
    };
    if shock.is_curve_shock() {
        return Ok(ShockedInputs {
            curve,
            schedules: state.schedules.clone(),
        });
    }

    let schedules = match shock {
        Shock::CashFlowHaircut { pct } => haircut(&state.schedules, *pct)?,
        Shock::MacroHaircut {
            shock, sensitivity, ..
        } => haircut(&state.schedules, shock * sensitivity)?,
        Shock::RecoveryLag {
            periods,
            from_period,
        } => state
            .schedules
            .iter()
            .map(|(id, s)| {
                let lagged = s.map_flows(|cf| {
                    let period = if cf.period >= *from_period {
                        cf.period.checked_add(*periods).ok_or_else(|| {
                            NpvValidatorError::invalid_input(
                                "recovery_lag.periods",
                                format!("period {} delayed by {periods} overflows", cf.period),
                            )
                        })?
                    } else {
                        cf.period
                    };
                    Ok(ScheduledCashFlow {
                        period,
                        amount: cf.amount,
                    })
                })?;
                Ok((id.clone(), lagged))
            })
            .collect::<NpvValidatorResult<BTreeMap<String, CashFlowSchedule>>>()?,
        _ => state.schedules.clone(),
    };
    Ok(ShockedInputs { curve, schedules })
}

/// Every `macro_haircut` must name a variable present in the macro data.
pub fn check_macro_references(
    scenarios: &[ScenarioDefinition],
    observations: &[MacroObservation],
) -> NpvValidatorResult<()> {
    let known: BTreeSet<&str> = observations.iter().map(|o| o.variable.as_str()).collect();
    for s in scenarios {
        for shock in &s.shocks {
            if let Shock::MacroHaircut { variable, .. } = shock {
                if !known.contains(variable.as_str()) {
                    return Err(NpvValidatorError::data_integrity(
                        "macro",
                        format!(
                            "scenario '{}' references unknown macro variable '{variable}'",
                            s.name
                        ),
                    ));
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Read-only inputs shared by every scenario.
pub struct StressEngine<'a> {
    pub run_id: &'a RunId,
    pub loans: &'a [LoanRecord],
    pub schedules: &'a BTreeMap<String, CashFlowSchedule>,
    pub curve: &'a YieldCurve,
    pub policy: InterpolationPolicy,
}

impl StressEngine<'_> {
    fn npvs(&self, inputs: &ShockedInputs) -> NpvValidatorResult<BTreeMap<String, Money>> {
        let valuation =
            value_portfolio(self.run_id, self.loans, &inputs.schedules, &inputs.curve, self.policy)?;
        Ok(valuation
            .results
            .into_iter()
            .map(|r| (r.loan_id, r.npv))
            .collect())
    }

    fn baseline(&self) -> ShockedInputs {
        ShockedInputs {
            curve: self.curve.clone(),
            schedules: self.schedules.clone(),
        }
    }

    /// Value each cumulative shock step and attribute the increments.
    pub fn run_scenario(
        &self,
        scenario: &ScenarioDefinition,
        baseline: &BTreeMap<String, Money>,
    ) -> NpvValidatorResult<ScenarioResult> {
        let mut state = self.baseline();
        let mut steps = vec![baseline.clone()];
        for shock in &scenario.shocks {
            state = apply_shock(&state, shock)?;
            steps.push(self.npvs(&state)?);
        }

        let common: Vec<&str> = self
            .loans
            .iter()
            .map(|l| l.loan_id.as_str())
            .filter(|id| steps.iter().all(|s| s.contains_key(*id)))
            .collect();
        let mut excluded: Vec<String> = self
            .loans
            .iter()
            .map(|l| l.loan_id.clone())
            .filter(|id| !common.contains(&id.as_str()))
            .collect();
        excluded.sort();
        let value = |step: &BTreeMap<String, Money>, id: &str| step.get(id).copied().unwrap_or_default();

        let mut contributions = Vec::with_capacity(scenario.shocks.len());
        let mut loan_contributions = Vec::new();
        for (k, shock) in scenario.shocks.iter().enumerate() {
            let (before, after) = (&steps[k], &steps[k + 1]);
            let mut step_total = Decimal::ZERO;
            for id in &common {
                let delta = value(after, id) - value(before, id);
                step_total += delta;
                loan_contributions.push(LoanShockContribution {
                    run_id: self.run_id.clone(),
                    scenario: scenario.name.clone(),
                    loan_id: id.to_string(),
                    step: k + 1,
                    delta_npv: delta,
                });
            }
            contributions.push(ShockContribution {
                run_id: self.run_id.clone(),
                scenario: scenario.name.clone(),
                step: k + 1,
                shock: shock.label(),
                delta_npv: step_total,
            });
        }
        loan_contributions.sort_by(|a, b| a.loan_id.cmp(&b.loan_id).then(a.step.cmp(&b.step)));

        let total = |step: &BTreeMap<String, Money>| -> Money {
            common.iter().map(|id| value(step, id)).sum()
        };
        let baseline_npv = total(&steps[0]);
        let stressed_npv = total(&steps[steps.len() - 1]);
        let delta_npv = stressed_npv - baseline_npv;

        Ok(ScenarioResult {
            name: scenario.name.clone(),
            baseline_npv,
            stressed_npv,
            delta_npv,
            delta_npv_pct: (!baseline_npv.is_zero())
                .then(|| delta_npv / baseline_npv * dec!(100)),
            contributions,
            loan_contributions,
            excluded_loans: excluded,
        })
    }

    /// Portfolio ΔNPV distribution under seeded random parallel shifts.
    pub fn monte_carlo(
        &self,
        config: &MonteCarloConfig,
        seed: u64,
        baseline: &BTreeMap<String, Money>,
    ) -> NpvValidatorResult<Option<MonteCarloSummary>> {
        // Zero dispersion degenerates to a fixed shift at the mean.
        let dist = if config.std_bp == 0.0 && config.mean_bp.is_finite() {
            None
        } else {
            Some(Normal::new(config.mean_bp, config.std_bp).map_err(|e| {
                NpvValidatorError::invalid_input("monte_carlo", format!("Invalid Normal parameters: {e}"))
            })?)
        };
        let mut rng = StdRng::seed_from_u64(seed);
        let shifts = (0..config.draws)
            .map(|_| {
                let draw: f64 = dist.as_ref().map_or(config.mean_bp, |d| rng.sample(d));
                Decimal::from_f64(draw)
                    .map(|d| d.round_dp(6))
                    .ok_or_else(|| NpvValidatorError::NumericOverflow {
                        context: format!("Monte Carlo shift {draw}"),
                    })
            })
            .collect::<NpvValidatorResult<Vec<Decimal>>>()?;

        let outcomes: Vec<Option<Money>> = map_items(&shifts, |bp| {
            let curve = self.curve.map_rates(|p| p.rate + bp * BP).ok()?;
            let state = ShockedInputs {
                curve,
                schedules: self.schedules.clone(),
            };
            let npvs = self.npvs(&state).ok()?;
            Some(
                baseline
                    .iter()
                    .filter_map(|(id, base)| npvs.get(id).map(|v| v - base))
                    .sum(),
            )
        });

        let mut deltas: Vec<Money> = outcomes.iter().flatten().copied().collect();
        let failed_draws = outcomes.len() - deltas.len();
        if failed_draws > 0 {
            warn!(failed_draws, "Monte Carlo draws could not be valued");
        }
        if deltas.is_empty() {
            return Ok(None);
        }
        deltas.sort();
        let n = Decimal::from(deltas.len());
        Ok(Some(MonteCarloSummary {
            draws: config.draws,
            failed_draws,
            mean: deltas.iter().sum::<Decimal>() / n,
            p5: percentile_sorted(&deltas, dec!(5)),
            p50: percentile_sorted(&deltas, dec!(50)),
            p95: percentile_sorted(&deltas, dec!(95)),
            worst: deltas[0],
        }))
    }

    /// All scenarios, in configured order, plus the optional simulation.
    pub fn run(
        &self,
        scenarios: &[ScenarioDefinition],
        monte_carlo: Option<&MonteCarloConfig>,
        seed: u64,
    ) -> NpvValidatorResult<StressResult> {
        let baseline = self.npvs(&self.baseline())?;
        let baseline_npv = baseline.values().copied().sum();

        let outcomes = map_items(scenarios, |scenario| {
            self.run_scenario(scenario, &baseline)
                .map_err(|e| ScenarioFailure {
                    name: scenario.name.clone(),
                    reason: e.to_string(),
                })
        });
        let mut results = Vec::with_capacity(scenarios.len());
        let mut failed = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(r) => {
                    debug!(scenario = %r.name, delta_npv = %r.delta_npv, "scenario valued");
                    results.push(r);
                }
                Err(f) => {
                    warn!(scenario = %f.name, reason = %f.reason, "scenario failed");
                    failed.push(f);
                }
            }
        }

        let monte_carlo = match monte_carlo {
            Some(cfg) => self.monte_carlo(cfg, seed, &baseline)?,
            None => None,
        };
        info!(
            scenarios = results.len(),
            failed = failed.len(),
            "stress test complete"
        );

        Ok(StressResult {
            baseline_npv,
            scenarios: results,
            failed,
            monte_carlo,
        })
    }
}

/// Linear interpolation on a sorted slice.
fn percentile_sorted(sorted: &[Decimal], p: Decimal) -> Decimal {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p / dec!(100) * Decimal::from(sorted.len() - 1);
    let lower = rank.floor();
    let frac = rank - lower;
    let lo = lower.to_usize().unwrap_or(0).min(sorted.len() - 1);
    let hi = (lo + 1).min(sorted.len() - 1);
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

// ---------------------------------------------------------------------------
// Standalone entry point
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressInput {
    pub loans: Vec<LoanRecord>,
    #[serde(default)]
    pub schedules: Vec<CashFlowSchedule>,
    pub curve: YieldCurve,
    #[serde(default)]
    pub macro_observations: Vec<MacroObservation>,
    pub scenarios: Vec<ScenarioDefinition>,
    #[serde(default)]
    pub monte_carlo: Option<MonteCarloConfig>,
    #[serde(default)]
    pub interpolation: InterpolationPolicy,
    #[serde(default)]
    pub seed: u64,
}

pub fn run_stress_test(
    run_id: &RunId,
    input: &StressInput,
) -> NpvValidatorResult<ComputationOutput<StressResult>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    if input.loans.is_empty() {
        return Err(NpvValidatorError::InsufficientData(
            "At least one loan required".into(),
        ));
    }
    if input.scenarios.is_empty() && input.monte_carlo.is_none() {
        return Err(NpvValidatorError::InsufficientData(
            "At least one scenario or a Monte Carlo configuration required".into(),
        ));
    }
    check_macro_references(&input.scenarios, &input.macro_observations)?;

    let explicit: BTreeMap<String, CashFlowSchedule> = input
        .schedules
        .iter()
        .map(|s| (s.loan_id.clone(), s.clone()))
        .collect();
    let schedules = resolve_schedules(&input.loans, &explicit)?;
    let engine = StressEngine {
        run_id,
        loans: &input.loans,
        schedules: &schedules,
        curve: &input.curve,
        policy: input.interpolation,
    };
    let result = engine.run(&input.scenarios, input.monte_carlo.as_ref(), input.seed)?;

    for f in &result.failed {
        warnings.push(format!("Scenario '{}' failed: {}", f.name, f.reason));
    }
    for s in result.scenarios.iter().filter(|s| !s.excluded_loans.is_empty()) {
        warnings.push(format!(
            "Scenario '{}' excludes {} loan(s) not valued at every step",
            s.name,
            s.excluded_loans.len()
        ));
    }

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Scenario stress test with sequential (waterfall) shock attribution",
        &serde_json::json!({
            "num_loans": input.loans.len(),
            "num_scenarios": input.scenarios.len(),
            "curve_as_of": input.curve.as_of.to_string(),
            "interpolation": input.interpolation,
            "seed": input.seed,
        }),
        warnings,
        elapsed,
        result,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AmortizationType;
    use chrono::NaiveDate;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn loans() -> Vec<LoanRecord> {
        ["A", "B"]
            .iter()
            .map(|id| LoanRecord {
                loan_id: id.to_string(),
                principal: dec!(10000),
                rate: dec!(0.07),
                tenor_periods: 20,
                periods_per_year: 4,
                origination_date: as_of(),
                amortization: AmortizationType::LevelPayment,
                schedule_ref: None,
            })
            .collect()
    }

    fn curve() -> YieldCurve {
        YieldCurve::new(
            as_of(),
            vec![
                CurvePoint { tenor_years: dec!(1), rate: dec!(0.04) },
                CurvePoint { tenor_years: dec!(3), rate: dec!(0.045) },
                CurvePoint { tenor_years: dec!(5), rate: dec!(0.05) },
            ],
        )
        .unwrap()
    }

    fn input(scenarios: Vec<ScenarioDefinition>) -> StressInput {
        StressInput {
            loans: loans(),
            schedules: vec![],
            curve: curve(),
            macro_observations: vec![MacroObservation {
                date: as_of(),
                variable: "unemployment".into(),
                value: dec!(4.2),
            }],
            scenarios,
            monte_carlo: None,
            interpolation: InterpolationPolicy::default(),
            seed: 42,
        }
    }

    fn combined() -> ScenarioDefinition {
        ScenarioDefinition {
            name: "adverse".into(),
            shocks: vec![
                Shock::ParallelShift { bp: dec!(100) },
                Shock::CashFlowHaircut { pct: dec!(0.05) },
                Shock::RecoveryLag { periods: 3, from_period: 10 },
                Shock::MacroHaircut {
                    variable: "unemployment".into(),
                    shock: dec!(2),
                    sensitivity: dec!(0.01),
                },
            ],
        }
    }

    #[test]
    fn test_waterfall_sums_to_total() {
        let out = run_stress_test(&RunId::from("r"), &input(vec![combined()])).unwrap();
        let s = &out.result.scenarios[0];
        let sum: Decimal = s.contributions.iter().map(|c| c.delta_npv).sum();
        assert_eq!(sum, s.delta_npv);
        assert_eq!(s.contributions.len(), 4);
        assert!(s.contributions.iter().all(|c| c.delta_npv < Decimal::ZERO));
        for loan in ["A", "B"] {
            let per_loan: Decimal = s
                .loan_contributions
                .iter()
                .filter(|c| c.loan_id == loan)
                .map(|c| c.delta_npv)
                .sum();
            assert_ne!(per_loan, Decimal::ZERO);
        }
    }

    #[test]
    fn test_zero_shock_has_zero_delta() {
        let scenario = ScenarioDefinition {
            name: "unchanged".into(),
            shocks: vec![
                Shock::ParallelShift { bp: dec!(0) },
                Shock::CashFlowHaircut { pct: dec!(0) },
            ],
        };
        let out = run_stress_test(&RunId::from("r"), &input(vec![scenario])).unwrap();
        let s = &out.result.scenarios[0];
        assert_eq!(s.delta_npv, Decimal::ZERO);
        assert!(s.loan_contributions.iter().all(|c| c.delta_npv.is_zero()));
    }

    #[test]
    fn test_order_changes_attribution_not_total() {
        let mut reversed = combined();
        reversed.name = "reversed".into();
        reversed.shocks.reverse();
        let out = run_stress_test(&RunId::from("r"), &input(vec![combined(), reversed])).unwrap();
        let (a, b) = (&out.result.scenarios[0], &out.result.scenarios[1]);
        assert_eq!(a.name, "adverse");
        assert!((a.delta_npv - b.delta_npv).abs() < dec!(0.000001));
        assert_ne!(a.contributions[0].delta_npv, b.contributions[3].delta_npv);
    }

    #[test]
    fn test_unknown_macro_variable_is_fatal() {
        let scenario = ScenarioDefinition {
            name: "gdp".into(),
            shocks: vec![Shock::MacroHaircut {
                variable: "gdp".into(),
                shock: dec!(-1),
                sensitivity: dec!(0.02),
            }],
        };
        let err = run_stress_test(&RunId::from("r"), &input(vec![scenario])).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_invalid_shock_is_scenario_failure() {
        let scenario = ScenarioDefinition {
            name: "crash".into(),
            shocks: vec![Shock::ParallelShift { bp: dec!(-20000) }],
        };
        let out = run_stress_test(&RunId::from("r"), &input(vec![scenario, combined()])).unwrap();
        assert_eq!(out.result.failed.len(), 1);
        assert_eq!(out.result.scenarios.len(), 1);
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn test_overflowing_recovery_lag_is_scenario_failure() {
        let scenario = ScenarioDefinition {
            name: "never".into(),
            shocks: vec![Shock::RecoveryLag { periods: u32::MAX, from_period: 1 }],
        };
        let out = run_stress_test(&RunId::from("r"), &input(vec![scenario])).unwrap();
        assert_eq!(out.result.failed.len(), 1);
        assert!(out.result.failed[0].reason.contains("recovery_lag"));
        assert!(out.result.scenarios.is_empty());
    }

    #[test]
    fn test_key_rate_inserts_missing_tenor() {
        let bumped = key_rate_bump(&curve(), dec!(2), dec!(0.01)).unwrap();
        assert_eq!(bumped.points().len(), 4);
        assert_eq!(bumped.points()[1].rate, dec!(0.0525));
        assert_eq!(bumped.points()[0].rate, dec!(0.04));
    }

    #[test]
    fn test_steepener_tilts_linearly() {
        let state = ShockedInputs {
            curve: curve(),
            schedules: BTreeMap::new(),
        };
        let shocked = apply_shock(
            &state,
            &Shock::Steepener { short_bp: dec!(0), long_bp: dec!(100) },
        )
        .unwrap();
        assert_eq!(shocked.curve.points()[0].rate, dec!(0.042));
        assert_eq!(shocked.curve.points()[2].rate, dec!(0.06));
    }

    #[test]
    fn test_monte_carlo_reproducible() {
        let mut inp = input(vec![]);
        inp.monte_carlo = Some(MonteCarloConfig {
            draws: 50,
            mean_bp: 0.0,
            std_bp: 50.0,
        });
        let a = run_stress_test(&RunId::from("r"), &inp).unwrap().result.monte_carlo.unwrap();
        let b = run_stress_test(&RunId::from("r"), &inp).unwrap().result.monte_carlo.unwrap();
        assert_eq!(a.p5, b.p5);
        assert_eq!(a.mean, b.mean);
        assert!(a.worst <= a.p5 && a.p5 <= a.p50 && a.p50 <= a.p95);
    }

    #[test]
    fn test_monte_carlo_zero_dispersion_is_fixed_shift() {
        let mut inp = input(vec![]);
        inp.monte_carlo = Some(MonteCarloConfig {
            draws: 20,
            mean_bp: 100.0,
            std_bp: 0.0,
        });
        let mc = run_stress_test(&RunId::from("r"), &inp).unwrap().result.monte_carlo.unwrap();
        assert_eq!(mc.failed_draws, 0);
        assert_eq!(mc.worst, mc.p95);
        assert_eq!(mc.mean, mc.p50);
        assert!(mc.mean < Decimal::ZERO);

        let mut shifted = input(vec![ScenarioDefinition {
            name: "up100".into(),
            shocks: vec![Shock::ParallelShift { bp: dec!(100) }],
        }]);
        shifted.monte_carlo = None;
        let scenario = run_stress_test(&RunId::from("r"), &shifted).unwrap();
        assert!((scenario.result.scenarios[0].delta_npv - mc.mean).abs() < dec!(0.000001));

        inp.monte_carlo = Some(MonteCarloConfig {
            draws: 20,
            mean_bp: 0.0,
            std_bp: -1.0,
        });
        assert!(run_stress_test(&RunId::from("r"), &inp).is_err());
    }

    #[test]
    fn test_shock_config_rejects_unknown_kind() {
        let ok: Shock = serde_json::from_str(r#"{"kind":"parallel_shift","bp":100}"#).unwrap();
        assert_eq!(ok, Shock::ParallelShift { bp: dec!(100) });
        assert!(serde_json::from_str::<Shock>(r#"{"kind":"twist","bp":1}"#).is_err());
    }
}
