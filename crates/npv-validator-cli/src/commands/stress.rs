use clap::Args;
use serde_json::Value;

use npv_validator_core::stress::{self, StressInput};
use npv_validator_core::types::RunId;

use crate::input;

/// Arguments for a standalone stress test
#[derive(Args)]
pub struct StressArgs {
    /// Path to JSON or YAML input (loans, curve, scenarios, optional Monte Carlo)
    #[arg(long)]
    pub input: Option<String>,

    /// Override the input's random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Run identifier stamped on every contribution
    #[arg(long)]
    pub run_id: Option<String>,
}

pub fn run_stress(args: StressArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut stress_input: StressInput = input::load_document(args.input.as_deref())?
        .ok_or("--input <file> or stdin required for stress testing")?;
    if let Some(seed) = args.seed {
        stress_input.seed = seed;
    }
    let run_id = args.run_id.as_deref().map_or_else(RunId::generate, RunId::from);
    let result = stress::run_stress_test(&run_id, &stress_input)?;
    Ok(serde_json::to_value(result)?)
}
