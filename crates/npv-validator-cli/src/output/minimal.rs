use serde_json::Value;

use super::{format_scalar, payload};

/// Print just the headline of the output: the run status, the portfolio
/// NPV, or one ΔNPV line per stress scenario.
pub fn print_minimal(value: &Value) {
    let body = payload(value);

    if let Some(Value::Array(scenarios)) = body.get("scenarios") {
        for s in scenarios {
            println!(
                "{}: {}",
                s.get("name").map(format_scalar).unwrap_or_default(),
                s.get("delta_npv").map(format_scalar).unwrap_or_default()
            );
        }
        return;
    }

    for key in ["status", "total_npv"] {
        if let Some(val) = body.get(key).filter(|v| !v.is_null()) {
            println!("{}", format_scalar(val));
            return;
        }
    }

    match body.as_object().and_then(|m| m.iter().next()) {
        Some((key, val)) => println!("{key}: {}", format_scalar(val)),
        None => println!("{}", format_scalar(body)),
    }
}
