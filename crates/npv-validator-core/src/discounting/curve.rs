//! Yield curves and the discount factor curves derived from them.
//!
//! Rates are annually-compounded zero rates; a node at `t` years carries
//! `DF(t) = (1 + z)^-t`. Node factors are forced non-increasing by flooring
//! the implied forward rate between neighbouring nodes at zero, so a curve
//! built from non-negative rates is always monotone in period.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::MathematicalOps;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::NpvValidatorError;
use crate::types::{Rate, Years};
use crate::NpvValidatorResult;

/// A single tenor point on a yield curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub tenor_years: Years,
    pub rate: Rate,
}

/// Annualized zero rates by tenor for one as-of date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawYieldCurve")]
pub struct YieldCurve {
    pub as_of: NaiveDate,
    points: Vec<CurvePoint>,
}

#[derive(Deserialize)]
struct RawYieldCurve {
    as_of: NaiveDate,
    points: Vec<CurvePoint>,
}

impl TryFrom<RawYieldCurve> for YieldCurve {
    type Error = NpvValidatorError;

    fn try_from(raw: RawYieldCurve) -> Result<Self, Self::Error> {
        YieldCurve::new(raw.as_of, raw.points)
    }
}

impl YieldCurve {
    pub fn new(as_of: NaiveDate, mut points: Vec<CurvePoint>) -> NpvValidatorResult<Self> {
        let dataset = format!("yield_curve:{as_of}");
        if points.is_empty() {
            return Err(NpvValidatorError::data_integrity(
                dataset,
                "curve has no tenor points",
            ));
        }
        points.sort_by(|a, b| a.tenor_years.cmp(&b.tenor_years));
        for p in &points {
            if p.tenor_years <= Decimal::ZERO {
                return Err(NpvValidatorError::data_integrity(
                    dataset,
                    format!("tenor {} must be positive", p.tenor_years),
                ));
            }
            if p.rate <= -Decimal::ONE {
                return Err(NpvValidatorError::data_integrity(
                    dataset,
                    format!("rate {} at tenor {} must exceed -100%", p.rate, p.tenor_years),
                ));
            }
        }
        if points.windows(2).any(|w| w[0].tenor_years == w[1].tenor_years) {
            return Err(NpvValidatorError::data_integrity(
                dataset,
                "duplicate tenor point",
            ));
        }
        Ok(Self { as_of, points })
    }

    /// Single-point curve, extrapolated flat in every direction.
    pub fn flat(as_of: NaiveDate, rate: Rate) -> NpvValidatorResult<Self> {
        Self::new(
            as_of,
            vec![CurvePoint {
                tenor_years: Decimal::ONE,
                rate,
            }],
        )
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    pub fn label(&self) -> String {
        self.as_of.to_string()
    }

    pub fn max_tenor(&self) -> Years {
        self.points
            .last()
            .map(|p| p.tenor_years)
            .unwrap_or(Decimal::ONE)
    }

    /// Same tenors with rates replaced by `f`. Used by curve shocks.
    pub fn map_rates<F>(&self, f: F) -> NpvValidatorResult<YieldCurve>
    where
        F: Fn(&CurvePoint) -> Rate,
    {
        let points = self
            .points
            .iter()
            .map(|p| CurvePoint {
                tenor_years: p.tenor_years,
                rate: f(p),
            })
            .collect();
        YieldCurve::new(self.as_of, points)
    }
}

/// How discount factors between known tenor points are obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationPolicy {
    /// Linear in ln(DF): constant forward rate between nodes.
    #[default]
    LogLinearDiscount,
    /// Linear in zero rate, as for spot-curve bootstraps.
    LinearZeroRate,
    /// Only exact tenor points are valid; anything else is a curve gap.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveNode {
    pub time: Years,
    /// Zero rate implied by the (possibly floored) discount factor
    pub zero_rate: Rate,
    pub discount_factor: Decimal,
    pub floored: bool,
}

/// Period-indexed discount factors for one curve snapshot and payment frequency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountFactorCurve {
    pub as_of: NaiveDate,
    pub periods_per_year: u32,
    pub policy: InterpolationPolicy,
    nodes: Vec<CurveNode>,
}

impl DiscountFactorCurve {
    pub fn build(
        curve: &YieldCurve,
        periods_per_year: u32,
        policy: InterpolationPolicy,
    ) -> NpvValidatorResult<Self> {
        if periods_per_year == 0 {
            return Err(NpvValidatorError::invalid_input(
                "periods_per_year",
                "must be at least 1",
            ));
        }

        let mut nodes: Vec<CurveNode> = Vec::with_capacity(curve.points().len());
        for point in curve.points() {
            let raw = df_from_zero(point.rate, point.tenor_years)?;
            let node = match nodes.last() {
                Some(prev) if raw > prev.discount_factor => {
                    warn!(
                        curve = %curve.label(),
                        tenor = %point.tenor_years,
                        "implied forward rate below zero; flooring discount factor"
                    );
                    CurveNode {
                        time: point.tenor_years,
                        zero_rate: zero_from_df(prev.discount_factor, point.tenor_years)?,
                        discount_factor: prev.discount_factor,
                        floored: true,
                    }
                }
                _ => CurveNode {
                    time: point.tenor_years,
                    zero_rate: point.rate,
                    discount_factor: raw,
                    floored: false,
                },
            };
            nodes.push(node);
        }

        Ok(Self {
            as_of: curve.as_of,
            periods_per_year,
            policy,
            nodes,
        })
    }

    pub fn label(&self) -> String {
        format!("{}@{}/yr", self.as_of, self.periods_per_year)
    }

    pub fn nodes(&self) -> &[CurveNode] {
        &self.nodes
    }

    pub fn floored_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| n.floored).count()
    }

    /// Discount factor for a payment period.
    pub fn discount_factor(&self, period: u32) -> NpvValidatorResult<Decimal> {
        if period == 0 {
            return Ok(Decimal::ONE);
        }
        let t = Decimal::from(period) / Decimal::from(self.periods_per_year);

        if let Some(node) = self.nodes.iter().find(|n| n.time == t) {
            return Ok(node.discount_factor);
        }
        if self.policy == InterpolationPolicy::None {
            return Err(NpvValidatorError::CurveGap {
                period,
                curve: self.label(),
            });
        }

        let first = self.nodes[0];
        let last = self.nodes[self.nodes.len() - 1];
        if t < first.time {
            return df_from_zero(first.zero_rate, t);
        }
        if t > last.time {
            return df_from_zero(last.zero_rate, t);
        }

        let upper_idx = self
            .nodes
            .iter()
            .position(|n| n.time > t)
            .unwrap_or(self.nodes.len() - 1);
        let lower = self.nodes[upper_idx - 1];
        let upper = self.nodes[upper_idx];
        let weight = (t - lower.time) / (upper.time - lower.time);

        match self.policy {
            InterpolationPolicy::LogLinearDiscount => {
                if lower.discount_factor == upper.discount_factor {
                    return Ok(lower.discount_factor);
                }
                let ln_lower = checked_ln(lower.discount_factor)?;
                let ln_upper = checked_ln(upper.discount_factor)?;
                let ln_df = ln_lower + weight * (ln_upper - ln_lower);
                ln_df.checked_exp().ok_or_else(|| NpvValidatorError::NumericOverflow {
                    context: format!("log-linear discount factor at period {period}"),
                })
            }
            InterpolationPolicy::LinearZeroRate => self.linear_zero_df(lower, upper, period),
            InterpolationPolicy::None => Err(NpvValidatorError::CurveGap {
                period,
                curve: self.label(),
            }),
        }
    }

    /// Linear zero-rate interpolation can imply negative forwards inside a
    /// segment, so the factor is the running minimum over the segment's
    /// periods up to `period`, bounded by the two bracketing nodes.
    fn linear_zero_df(
        &self,
        lower: CurveNode,
        upper: CurveNode,
        period: u32,
    ) -> NpvValidatorResult<Decimal> {
        let ppy = Decimal::from(self.periods_per_year);
        let first = (lower.time * ppy)
            .floor()
            .to_u32()
            .map_or(period, |p| p.saturating_add(1));
        let span = upper.time - lower.time;

        let mut df = lower.discount_factor;
        for p in first.min(period)..=period {
            let t = Decimal::from(p) / ppy;
            if t <= lower.time {
                continue;
            }
            let weight = (t - lower.time) / span;
            let zero = lower.zero_rate + weight * (upper.zero_rate - lower.zero_rate);
            df = df.min(df_from_zero(zero, t)?);
        }
        Ok(df.max(upper.discount_factor))
    }
}

/// `(1 + z)^-t`
pub fn df_from_zero(zero_rate: Rate, t: Years) -> NpvValidatorResult<Decimal> {
    if t.is_zero() {
        return Ok(Decimal::ONE);
    }
    let base = Decimal::ONE + zero_rate;
    if base <= Decimal::ZERO {
        return Err(NpvValidatorError::invalid_input(
            "rate",
            "Discount rate must be greater than -100%",
        ));
    }
    if base == Decimal::ONE {
        return Ok(Decimal::ONE);
    }
    let compound = base
        .checked_powd(t)
        .ok_or_else(|| NpvValidatorError::NumericOverflow {
            context: format!("compounding {base}^{t}"),
        })?;
    if compound.is_zero() {
        return Err(NpvValidatorError::DivisionByZero {
            context: format!("discount factor at t={t}"),
        });
    }
    Ok(Decimal::ONE / compound)
}

/// Inverse of [`df_from_zero`].
pub fn zero_from_df(df: Decimal, t: Years) -> NpvValidatorResult<Rate> {
    if df == Decimal::ONE || t.is_zero() {
        return Ok(Decimal::ZERO);
    }
    let ln_df = checked_ln(df)?;
    let growth = (-ln_df / t)
        .checked_exp()
        .ok_or_else(|| NpvValidatorError::NumericOverflow {
            context: format!("zero rate from discount factor at t={t}"),
        })?;
    Ok(growth - Decimal::ONE)
}

fn checked_ln(x: Decimal) -> NpvValidatorResult<Decimal> {
    if x <= Decimal::ZERO {
        return Err(NpvValidatorError::invalid_input(
            "discount_factor",
            format!("cannot take logarithm of {x}"),
        ));
    }
    x.checked_ln().ok_or_else(|| NpvValidatorError::NumericOverflow {
        context: format!("ln({x})"),
    })
}
