//! Threshold rules, issues and the run state machine.
//!
//! A rule states the condition a metric must satisfy (`backtest.rmse <=
//! 500`). A breach is the condition evaluating false and always produces an
//! [`Issue`]; all rules are evaluated before the run status is decided.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

use crate::error::NpvValidatorError;
use crate::types::RunId;
use crate::NpvValidatorResult;

/// Absolute tolerance for `==`.
const EQ_TOLERANCE: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "==")]
    Eq,
}

impl Comparator {
    pub fn holds(self, value: f64, limit: f64) -> bool {
        match self {
            Comparator::Lt => value < limit,
            Comparator::Le => value <= limit,
            Comparator::Gt => value > limit,
            Comparator::Ge => value >= limit,
            Comparator::Eq => (value - limit).abs() <= EQ_TOLERANCE,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Eq => "==",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdRule {
    pub metric: String,
    pub comparator: Comparator,
    pub limit: f64,
    pub severity: Severity,
}

impl fmt::Display for ThresholdRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.metric, self.comparator.symbol(), self.limit)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GovernanceConfig {
    /// Lowest breach severity that fails the run
    #[serde(default)]
    pub fail_on: Severity,
}

// ---------------------------------------------------------------------------
// Issues
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    Open,
    Closed,
}

/// A breached rule. Created open; closing is an external workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub run_id: RunId,
    pub rule: String,
    pub metric: String,
    pub severity: Severity,
    pub metric_value: f64,
    pub limit: f64,
    pub status: IssueStatus,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Run state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Passed,
    FailedWithIssues,
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Passed | RunStatus::FailedWithIssues | RunStatus::Aborted
        )
    }

    pub fn can_transition_to(self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Pending, RunStatus::Aborted)
                | (RunStatus::Running, RunStatus::Passed)
                | (RunStatus::Running, RunStatus::FailedWithIssues)
                | (RunStatus::Running, RunStatus::Aborted)
        )
    }

    pub fn transition(&mut self, next: RunStatus) -> NpvValidatorResult<()> {
        if !self.can_transition_to(next) {
            return Err(NpvValidatorError::invalid_input(
                "run_status",
                format!("illegal transition {self} -> {next}"),
            ));
        }
        *self = next;
        Ok(())
    }

    /// Process exit code for a terminal status.
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Passed => 0,
            RunStatus::FailedWithIssues => 1,
            _ => 2,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Passed => "passed",
            RunStatus::FailedWithIssues => "failed_with_issues",
            RunStatus::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Named metrics produced by the run, in key order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricSet(BTreeMap<String, f64>);

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Extend<(String, f64)> for MetricSet {
    fn extend<I: IntoIterator<Item = (String, f64)>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOutcome {
    Satisfied,
    Breached,
    /// Metric absent or not finite
    Unevaluated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleEvaluation {
    pub rule: String,
    pub severity: Severity,
    pub value: Option<f64>,
    pub outcome: RuleOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceOutcome {
    /// In rule configuration order
    pub evaluations: Vec<RuleEvaluation>,
    pub issues: Vec<Issue>,
    /// `Passed` or `FailedWithIssues`
    pub status: RunStatus,
}

impl GovernanceOutcome {
    pub fn unevaluated(&self) -> impl Iterator<Item = &RuleEvaluation> {
        self.evaluations
            .iter()
            .filter(|e| e.outcome == RuleOutcome::Unevaluated)
    }
}

/// Evaluate every rule against the run's metrics.
pub fn evaluate_rules(
    run_id: &RunId,
    rules: &[ThresholdRule],
    metrics: &MetricSet,
    config: &GovernanceConfig,
) -> GovernanceOutcome {
    let now = Utc::now();
    let mut evaluations = Vec::with_capacity(rules.len());
    let mut issues = Vec::new();
    let mut failing = false;

    for rule in rules {
        let value = metrics.get(&rule.metric).filter(|v| v.is_finite());
        let outcome = match value {
            None => {
                warn!(rule = %rule, "metric unavailable; rule not evaluated");
                RuleOutcome::Unevaluated
            }
            Some(v) if rule.comparator.holds(v, rule.limit) => RuleOutcome::Satisfied,
            Some(v) => {
                warn!(rule = %rule, value = v, severity = %rule.severity, "threshold breached");
                issues.push(Issue {
                    run_id: run_id.clone(),
                    rule: rule.to_string(),
                    metric: rule.metric.clone(),
                    severity: rule.severity,
                    metric_value: v,
                    limit: rule.limit,
                    status: IssueStatus::Open,
                    created_at: now,
                });
                if rule.severity >= config.fail_on || rule.severity == Severity::Critical {
                    failing = true;
                }
                RuleOutcome::Breached
            }
        };
        evaluations.push(RuleEvaluation {
            rule: rule.to_string(),
            severity: rule.severity,
            value,
            outcome,
        });
    }

    debug!(
        rules = rules.len(),
        issues = issues.len(),
        "governance rules evaluated"
    );
    GovernanceOutcome {
        evaluations,
        issues,
        status: if failing {
            RunStatus::FailedWithIssues
        } else {
            RunStatus::Passed
        },
    }
}
