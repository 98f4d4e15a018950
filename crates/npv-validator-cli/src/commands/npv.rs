use chrono::NaiveDate;
use clap::Args;
use rust_decimal::Decimal;
use serde_json::Value;

use npv_validator_core::datasets::parse_loans;
use npv_validator_core::discounting::{InterpolationPolicy, YieldCurve};
use npv_validator_core::npv_engine::{self, NpvInput};
use npv_validator_core::types::RunId;

use crate::input;

/// Arguments for challenger portfolio valuation
#[derive(Args)]
#[command(allow_hyphen_values = true)]
pub struct NpvArgs {
    /// Path to JSON or YAML input (overrides individual flags)
    #[arg(long)]
    pub input: Option<String>,

    /// Loan tape CSV, valued on a flat curve
    #[arg(long)]
    pub loans: Option<String>,

    /// Flat annual zero rate (e.g. 0.05 for 5%)
    #[arg(long)]
    pub flat_rate: Option<Decimal>,

    /// Curve date (YYYY-MM-DD)
    #[arg(long)]
    pub as_of: Option<NaiveDate>,

    /// Run identifier stamped on every result
    #[arg(long)]
    pub run_id: Option<String>,
}

pub fn run_npv(args: NpvArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let npv_input: NpvInput = if let Some(doc) = input::load_document(args.input.as_deref())? {
        doc
    } else {
        let path = args
            .loans
            .as_deref()
            .ok_or("--loans is required (or provide --input)")?;
        let loans = parse_loans(&input::file::read_dataset("loans", path)?)?;
        if !loans.rejected.is_empty() {
            let rows: Vec<String> = loans
                .rejected
                .iter()
                .map(|r| format!("row {}: {}", r.row, r.reason))
                .collect();
            return Err(format!("unusable loan rows: {}", rows.join("; ")).into());
        }
        let rate = args
            .flat_rate
            .ok_or("--flat-rate is required (or provide --input)")?;
        let as_of = args
            .as_of
            .ok_or("--as-of is required (or provide --input)")?;
        NpvInput {
            loans: loans.records,
            schedules: Vec::new(),
            curve: YieldCurve::flat(as_of, rate)?,
            interpolation: InterpolationPolicy::default(),
        }
    };

    let run_id = args.run_id.as_deref().map_or_else(RunId::generate, RunId::from);
    let result = npv_engine::calculate_portfolio_npv(&run_id, &npv_input)?;
    Ok(serde_json::to_value(result)?)
}
