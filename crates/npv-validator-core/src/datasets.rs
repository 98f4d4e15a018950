//! Uniform tabular inputs and their typed views.
//!
//! A [`Dataset`] is what the loading collaborators hand over: named columns
//! and rows of optional raw strings. Structural defects (wrong arity,
//! duplicate or missing required columns, duplicate schedule periods) are
//! fatal `DataIntegrity` errors. Individual rows whose values cannot be
//! parsed are rejected and reported, so the Data Quality Gate can flag them
//! without aborting the run.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use crate::comparison::ChampionTable;
use crate::discounting::{CurvePoint, YieldCurve};
use crate::error::NpvValidatorError;
use crate::types::{
    AmortizationType, CashFlowSchedule, LoanRecord, MacroObservation, RealizedCashFlow,
    ScheduledCashFlow,
};
use crate::NpvValidatorResult;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl Dataset {
    pub fn new(
        name: impl Into<String>,
        columns: Vec<String>,
        rows: Vec<Vec<Option<String>>>,
    ) -> NpvValidatorResult<Self> {
        let name = name.into();
        if columns.is_empty() {
            return Err(NpvValidatorError::data_integrity(name, "dataset has no columns"));
        }
        let mut seen = BTreeSet::new();
        for c in &columns {
            if !seen.insert(c.as_str()) {
                return Err(NpvValidatorError::data_integrity(
                    name,
                    format!("duplicate column '{c}'"),
                ));
            }
        }
        if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != columns.len()) {
            return Err(NpvValidatorError::data_integrity(
                name,
                format!(
                    "row {} has {} fields, expected {}",
                    idx + 1,
                    row.len(),
                    columns.len()
                ),
            ));
        }
        Ok(Self { name, columns, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn require_column(&self, column: &str) -> NpvValidatorResult<usize> {
        self.column_index(column).ok_or_else(|| {
            NpvValidatorError::data_integrity(
                self.name.clone(),
                format!("required column '{column}' is absent"),
            )
        })
    }

    /// Cell value; blank strings count as missing.
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .and_then(|v| v.as_deref())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn column_values(&self, column: usize) -> impl Iterator<Item = Option<&str>> + '_ {
        (0..self.rows.len()).map(move |r| self.cell(r, column))
    }
}

/// A row that could not be converted into a typed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRow {
    /// 1-based data row number
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parsed<T> {
    pub records: T,
    pub rejected: Vec<RejectedRow>,
}

// ---------------------------------------------------------------------------
// Cell parsing helpers
// ---------------------------------------------------------------------------

fn required<'a>(ds: &'a Dataset, row: usize, col: usize, column: &str) -> Result<&'a str, String> {
    ds.cell(row, col).ok_or_else(|| format!("missing {column}"))
}

fn parse_cell<T: FromStr>(ds: &Dataset, row: usize, col: usize, column: &str) -> Result<T, String> {
    let raw = required(ds, row, col, column)?;
    raw.parse::<T>()
        .map_err(|_| format!("invalid {column} '{raw}'"))
}

fn parse_date(ds: &Dataset, row: usize, col: usize, column: &str) -> Result<NaiveDate, String> {
    let raw = required(ds, row, col, column)?;
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| format!("invalid {column} '{raw}'"))
}

fn parse_amortization(raw: &str) -> Result<AmortizationType, String> {
    match raw.to_ascii_lowercase().as_str() {
        "level_payment" | "level" | "annuity" => Ok(AmortizationType::LevelPayment),
        "bullet" => Ok(AmortizationType::Bullet),
        "straight_line" | "linear" => Ok(AmortizationType::StraightLine),
        other => Err(format!("unknown amortization '{other}'")),
    }
}

/// Run `parse_row` over every row, collecting rejections.
fn collect_rows<T, F>(ds: &Dataset, mut parse_row: F) -> (Vec<T>, Vec<RejectedRow>)
where
    F: FnMut(usize) -> Result<T, String>,
{
    let mut records = Vec::with_capacity(ds.len());
    let mut rejected = Vec::new();
    for row in 0..ds.len() {
        match parse_row(row) {
            Ok(r) => records.push(r),
            Err(reason) => rejected.push(RejectedRow { row: row + 1, reason }),
        }
    }
    (records, rejected)
}

// ---------------------------------------------------------------------------
// Typed parsers
// ---------------------------------------------------------------------------

/// Columns: `loan_id, principal, rate, tenor_periods, periods_per_year,
/// origination_date` and optionally `amortization, schedule_ref`.
pub fn parse_loans(ds: &Dataset) -> NpvValidatorResult<Parsed<Vec<LoanRecord>>> {
    let id = ds.require_column("loan_id")?;
    let principal = ds.require_column("principal")?;
    let rate = ds.require_column("rate")?;
    let tenor = ds.require_column("tenor_periods")?;
    let ppy = ds.require_column("periods_per_year")?;
    let orig = ds.require_column("origination_date")?;
    let amort = ds.column_index("amortization");
    let sched = ds.column_index("schedule_ref");

    let (records, rejected) = collect_rows(ds, |row| {
        let periods_per_year: u32 = parse_cell(ds, row, ppy, "periods_per_year")?;
        if periods_per_year == 0 || 12 % periods_per_year != 0 {
            return Err(format!(
                "periods_per_year {periods_per_year} must divide 12"
            ));
        }
        let principal: Decimal = parse_cell(ds, row, principal, "principal")?;
        if principal < Decimal::ZERO {
            return Err(format!("negative principal {principal}"));
        }
        let rate: Decimal = parse_cell(ds, row, rate, "rate")?;
        if rate <= -Decimal::ONE {
            return Err(format!("rate {rate} must exceed -100%"));
        }
        Ok(LoanRecord {
            loan_id: required(ds, row, id, "loan_id")?.to_string(),
            principal,
            rate,
            tenor_periods: parse_cell(ds, row, tenor, "tenor_periods")?,
            periods_per_year,
            origination_date: parse_date(ds, row, orig, "origination_date")?,
            amortization: match amort.and_then(|c| ds.cell(row, c)) {
                Some(raw) => parse_amortization(raw)?,
                None => AmortizationType::default(),
            },
            schedule_ref: sched.and_then(|c| ds.cell(row, c)).map(String::from),
        })
    });

    let mut seen = BTreeSet::new();
    for loan in &records {
        if !seen.insert(loan.loan_id.as_str()) {
            return Err(NpvValidatorError::data_integrity(
                ds.name.clone(),
                format!("duplicate loan id '{}'", loan.loan_id),
            ));
        }
    }
    Ok(Parsed { records, rejected })
}

/// Columns: `schedule_ref, period, amount`. Duplicate periods within a
/// schedule are fatal.
pub fn parse_schedules(
    ds: &Dataset,
) -> NpvValidatorResult<Parsed<BTreeMap<String, CashFlowSchedule>>> {
    let sref = ds.require_column("schedule_ref")?;
    let period = ds.require_column("period")?;
    let amount = ds.require_column("amount")?;

    let (rows, rejected) = collect_rows(ds, |row| {
        Ok((
            required(ds, row, sref, "schedule_ref")?.to_string(),
            ScheduledCashFlow {
                period: parse_cell(ds, row, period, "period")?,
                amount: parse_cell(ds, row, amount, "amount")?,
            },
        ))
    });

    let mut grouped: BTreeMap<String, Vec<ScheduledCashFlow>> = BTreeMap::new();
    for (key, flow) in rows {
        grouped.entry(key).or_default().push(flow);
    }
    let mut records = BTreeMap::new();
    for (key, flows) in grouped {
        let schedule = CashFlowSchedule::from_unordered(key.clone(), flows)?;
        records.insert(key, schedule);
    }
    Ok(Parsed { records, rejected })
}

/// Columns: `loan_id, period, amount`.
pub fn parse_realized(ds: &Dataset) -> NpvValidatorResult<Parsed<Vec<RealizedCashFlow>>> {
    let id = ds.require_column("loan_id")?;
    let period = ds.require_column("period")?;
    let amount = ds.require_column("amount")?;

    let (mut records, rejected) = collect_rows(ds, |row| {
        Ok(RealizedCashFlow {
            loan_id: required(ds, row, id, "loan_id")?.to_string(),
            period: parse_cell(ds, row, period, "period")?,
            amount: parse_cell(ds, row, amount, "amount")?,
        })
    });
    records.sort_by(|a, b| a.loan_id.cmp(&b.loan_id).then(a.period.cmp(&b.period)));
    if let Some(dup) = records
        .windows(2)
        .find(|w| w[0].loan_id == w[1].loan_id && w[0].period == w[1].period)
    {
        return Err(NpvValidatorError::data_integrity(
            ds.name.clone(),
            format!(
                "duplicate realized cash flow for loan '{}' period {}",
                dup[0].loan_id, dup[0].period
            ),
        ));
    }
    Ok(Parsed { records, rejected })
}

/// Columns: `date, tenor, rate`. One curve per distinct date, oldest first.
pub fn parse_yield_curves(ds: &Dataset) -> NpvValidatorResult<Parsed<Vec<YieldCurve>>> {
    let date = ds.require_column("date")?;
    let tenor = ds.require_column("tenor")?;
    let rate = ds.require_column("rate")?;

    let (rows, rejected) = collect_rows(ds, |row| {
        Ok((
            parse_date(ds, row, date, "date")?,
            CurvePoint {
                tenor_years: parse_cell(ds, row, tenor, "tenor")?,
                rate: parse_cell(ds, row, rate, "rate")?,
            },
        ))
    });

    let mut grouped: BTreeMap<NaiveDate, Vec<CurvePoint>> = BTreeMap::new();
    for (d, p) in rows {
        grouped.entry(d).or_default().push(p);
    }
    let records = grouped
        .into_iter()
        .map(|(d, points)| YieldCurve::new(d, points))
        .collect::<NpvValidatorResult<Vec<_>>>()?;
    Ok(Parsed { records, rejected })
}

/// Columns: `date, variable, value`.
pub fn parse_macro(ds: &Dataset) -> NpvValidatorResult<Parsed<Vec<MacroObservation>>> {
    let date = ds.require_column("date")?;
    let variable = ds.require_column("variable")?;
    let value = ds.require_column("value")?;

    let (mut records, rejected) = collect_rows(ds, |row| {
        Ok(MacroObservation {
            date: parse_date(ds, row, date, "date")?,
            variable: required(ds, row, variable, "variable")?.to_string(),
            value: parse_cell(ds, row, value, "value")?,
        })
    });
    records.sort_by(|a, b| a.variable.cmp(&b.variable).then(a.date.cmp(&b.date)));
    Ok(Parsed { records, rejected })
}

/// Columns: `loan_id, horizon, npv`. A blank horizon means the full schedule.
pub fn parse_champion_table(ds: &Dataset) -> NpvValidatorResult<ChampionTable> {
    let id = ds.require_column("loan_id")?;
    let horizon = ds.column_index("horizon");
    let npv = ds.require_column("npv")?;

    let mut table = ChampionTable::new(ds.name.clone());
    for row in 0..ds.len() {
        let malformed = |reason: String| {
            NpvValidatorError::data_integrity(ds.name.clone(), format!("row {}: {reason}", row + 1))
        };
        let loan_id = required(ds, row, id, "loan_id").map_err(malformed)?;
        let h: u32 = match horizon.and_then(|c| ds.cell(row, c)) {
            Some(raw) => raw
                .parse()
                .map_err(|_| malformed(format!("invalid horizon '{raw}'")))?,
            None => 0,
        };
        let value: Decimal = parse_cell(ds, row, npv, "npv").map_err(malformed)?;
        table.insert(loan_id, h, value);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

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

    #[test]
    fn test_wrong_arity_is_fatal() {
        let err = Dataset::new(
            "loans",
            vec!["a".into(), "b".into()],
            vec![vec![Some("1".into())]],
        )
        .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_missing_required_column_is_fatal() {
        let d = ds("realized", &["loan_id", "period"], &[&["L1", "1"]]);
        assert!(parse_realized(&d).unwrap_err().is_fatal());
    }

    #[test]
    fn test_bad_loan_row_is_rejected_not_fatal() {
        let d = ds(
            "loans",
            &["loan_id", "principal", "rate", "tenor_periods", "periods_per_year", "origination_date"],
            &[
                &["L1", "1000", "0.05", "12", "12", "2024-01-01"],
                &["L2", "abc", "0.05", "12", "12", "2024-01-01"],
                &["L3", "1000", "0.05", "12", "5", "2024-01-01"],
            ],
        );
        let parsed = parse_loans(&d).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.rejected.len(), 2);
        assert_eq!(parsed.rejected[0].row, 2);
    }

    #[test]
    fn test_duplicate_schedule_period_is_fatal() {
        let d = ds(
            "schedules",
            &["schedule_ref", "period", "amount"],
            &[&["S1", "1", "100"], &["S1", "1", "100"]],
        );
        assert!(parse_schedules(&d).unwrap_err().is_fatal());
    }

    #[test]
    fn test_curves_grouped_by_date() {
        let d = ds(
            "curves",
            &["date", "tenor", "rate"],
            &[
                &["2024-02-01", "1", "0.04"],
                &["2024-01-01", "2", "0.035"],
                &["2024-01-01", "1", "0.03"],
            ],
        );
        let parsed = parse_yield_curves(&d).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].points().len(), 2);
        assert_eq!(parsed.records[0].points()[0].rate, dec!(0.03));
    }

    #[test]
    fn test_blank_cells_are_missing() {
        let d = Dataset::new(
            "m",
            vec!["date".into(), "variable".into(), "value".into()],
            vec![vec![Some("2024-03-31".into()), Some("  ".into()), Some("1.5".into())]],
        )
        .unwrap();
        let parsed = parse_macro(&d).unwrap();
        assert!(parsed.records.is_empty());
        assert_eq!(parsed.rejected[0].reason, "missing variable");
    }
}
