use clap::Args;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;

use npv_validator_core::comparison::ChampionTable;
use npv_validator_core::config::ValidationConfig;
use npv_validator_core::datasets::parse_champion_table;
use npv_validator_core::types::RunId;
use npv_validator_core::validator::{ValidationInputs, Validator};
use npv_validator_core::{NpvValidatorError, NpvValidatorResult};

use crate::artifacts;
use crate::input;

/// Arguments for a full validation run
#[derive(Args)]
pub struct ValidateArgs {
    /// Validation configuration (JSON or YAML); defaults apply when omitted
    #[arg(long)]
    pub config: Option<String>,

    /// Loan tape CSV
    #[arg(long)]
    pub loans: String,

    /// Explicit cash-flow schedules CSV (schedule_ref, period, amount)
    #[arg(long)]
    pub schedules: Option<String>,

    /// Realized cash flows CSV (loan_id, period, amount)
    #[arg(long)]
    pub realized: String,

    /// Historical yield curves CSV (date, tenor, rate)
    #[arg(long)]
    pub curves: String,

    /// Quarterly macro variables CSV (date, variable, value)
    #[arg(long = "macro")]
    pub macro_data: String,

    /// Champion model predictions CSV (loan_id, horizon, npv)
    #[arg(long)]
    pub champion: Option<String>,

    /// Drift reference as DATASET=PATH, repeatable
    #[arg(long = "baseline", value_parser = parse_baseline)]
    pub baselines: Vec<(String, String)>,

    /// Override the configured random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Run identifier; generated when omitted
    #[arg(long)]
    pub run_id: Option<String>,

    /// Directory that receives `<run_id>/` artifact folders
    #[arg(long, default_value = "./runs")]
    pub out_dir: String,

    /// Print the summary without writing artifacts
    #[arg(long)]
    pub no_artifacts: bool,
}

fn parse_baseline(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), path.to_string()))
        }
        _ => Err(format!("expected DATASET=PATH, got '{s}'")),
    }
}

fn load_inputs(args: &ValidateArgs) -> NpvValidatorResult<(ValidationInputs, Option<ChampionTable>)> {
    let mut baselines = BTreeMap::new();
    for (name, path) in &args.baselines {
        baselines.insert(name.clone(), input::file::read_dataset(name, path)?);
    }
    let inputs = ValidationInputs {
        loans: input::file::read_dataset("loans", &args.loans)?,
        schedules: args
            .schedules
            .as_deref()
            .map(|p| input::file::read_dataset("schedules", p))
            .transpose()?,
        realized: input::file::read_dataset("realized", &args.realized)?,
        yield_curves: input::file::read_dataset("yield_curves", &args.curves)?,
        macro_data: input::file::read_dataset("macro", &args.macro_data)?,
        baselines,
    };
    let champion = args
        .champion
        .as_deref()
        .map(|p| input::file::read_dataset("champion", p).and_then(|ds| parse_champion_table(&ds)))
        .transpose()?;
    Ok((inputs, champion))
}

fn load_config(args: &ValidateArgs) -> NpvValidatorResult<ValidationConfig> {
    let mut config: ValidationConfig = match args.config {
        Some(ref path) => input::file::read_document(path)
            .map_err(|e| NpvValidatorError::invalid_input("config", e.to_string()))?,
        None => ValidationConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    Ok(config)
}

/// Run the pipeline. The returned exit code follows the run's terminal status.
/// Configuration and input failures still produce an aborted, audited run.
pub fn run_validate(args: ValidateArgs) -> Result<(Value, i32), Box<dyn std::error::Error>> {
    let run_id = args.run_id.as_deref().map_or_else(RunId::generate, RunId::from);

    let report = match load_config(&args) {
        Err(e) => {
            let fallback = ValidationConfig {
                seed: args.seed.unwrap_or(ValidationConfig::default().seed),
                ..Default::default()
            };
            Validator::new(&fallback).abort_unloaded(run_id, "configuration", &e)
        }
        Ok(config) => match load_inputs(&args) {
            Ok((inputs, Some(champion))) => Validator::new(&config)
                .with_champion(&champion)
                .run_with_id(run_id, &inputs),
            Ok((inputs, None)) => Validator::new(&config).run_with_id(run_id, &inputs),
            Err(e) => Validator::new(&config).abort_unloaded(run_id, "load", &e),
        },
    };

    let artifacts_dir = if args.no_artifacts {
        None
    } else {
        Some(artifacts::write_run(&report, Path::new(&args.out_dir))?)
    };

    let summary = json!({
        "run_id": report.run_id,
        "status": report.status,
        "seed": report.seed,
        "stages": report.stages,
        "abort_reason": report.abort_reason,
        "total_npv": report.valuation.as_ref().map(|v| v.total_npv),
        "issues": report.issues,
        "test_results": report.test_results,
        "metrics": report.metrics,
        "artifacts": artifacts_dir.map(|d| d.display().to_string()),
    });
    Ok((summary, report.status.exit_code()))
}
